use std::io::{Read, Write};

use rand::rngs::SmallRng;

use crate::config::Config;
use crate::gru::GruCell;
use crate::kernel;
use crate::tensor::{Tensor, TokenBatch};
use crate::weights::Embedding;
use crate::{Result, Seq2SeqError};

/// Folds a token sequence into per-step annotations with a GRU.
#[derive(Debug, Clone)]
pub struct Encoder {
    pub embedding: Embedding,
    pub cell: GruCell,
}

impl Encoder {
    pub fn new(embedding: Embedding, cell: GruCell) -> Result<Self> {
        let hidden_size = cell.hidden_size();
        if embedding.dim() != hidden_size || cell.input_size() != hidden_size {
            return Err(Seq2SeqError::ShapeMismatch {
                op: "Encoder::new",
                expected: vec![hidden_size, hidden_size],
                actual: vec![embedding.dim(), cell.input_size()],
            });
        }
        Ok(Self { embedding, cell })
    }

    pub fn random(config: &Config, rng: &mut SmallRng) -> Self {
        Self {
            embedding: Embedding::random(config.vocab_size, config.hidden_size, rng),
            cell: GruCell::random_biased(config.hidden_size, config.hidden_size, rng),
        }
    }

    pub fn config(&self) -> Config {
        Config::new(self.embedding.vocab_size(), self.cell.hidden_size())
    }

    /// (batch, hidden_size) of zeros.
    pub fn init_hidden(&self, batch_size: usize) -> Tensor {
        Tensor::zeros(&[batch_size, self.cell.hidden_size()])
    }

    /// Returns the annotations `(batch, seq_len, hidden)` and the final hidden
    /// state `(batch, hidden)`.
    pub fn encode(&self, tokens: &TokenBatch) -> Result<(Tensor, Tensor)> {
        let (batch, seq_len) = (tokens.batch_size(), tokens.seq_len());
        if batch == 0 || seq_len == 0 {
            return Err(Seq2SeqError::ShapeMismatch {
                op: "Encoder::encode",
                expected: vec![batch.max(1), seq_len.max(1)],
                actual: vec![batch, seq_len],
            });
        }

        // (batch * seq_len, hidden), row b * seq_len + t
        let encoded = self.embedding.lookup(tokens.ids())?;

        let mut hidden = self.init_hidden(batch);
        let mut annotations = Vec::with_capacity(seq_len);
        for t in 0..seq_len {
            let rows = (0..batch).map(|b| b * seq_len + t).collect::<Vec<_>>();
            let x = encoded.select_rows(&rows);
            hidden = self.cell.step(&x, &hidden)?;
            annotations.push(hidden.clone());
        }
        kernel::ensure_finite(&hidden, "Encoder::encode")?;

        Ok((Tensor::stack(&annotations)?, hidden))
    }

    pub fn from_reader<R: Read>(r: &mut R) -> Result<Self> {
        let config = Config::from_reader(r)?;
        let embedding = Embedding::from_reader(r, config.vocab_size, config.hidden_size)?;
        let cell = GruCell::from_reader(r, config.hidden_size, config.hidden_size, true)?;
        Self::new(embedding, cell)
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        self.config().write_to(w)?;
        self.embedding.write_to(w)?;
        self.cell.write_to(w)
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;

    use super::*;

    fn encoder(vocab_size: usize, hidden_size: usize) -> Encoder {
        let mut rng = SmallRng::seed_from_u64(42);
        Encoder::random(&Config::new(vocab_size, hidden_size), &mut rng)
    }

    #[test]
    fn encodes_three_tokens() {
        let enc = encoder(10, 4);
        let (annotations, hidden) = enc.encode(&TokenBatch::single(&[2, 7, 1])).unwrap();

        assert_eq!(annotations.shape(), &[1, 3, 4]);
        assert_eq!(hidden.shape(), &[1, 4]);
        assert_eq!(annotations.step(2).unwrap(), hidden);
    }

    #[test]
    fn annotation_length_matches_input_length() {
        let enc = encoder(30, 6);
        for len in [1, 5, 20] {
            let tokens = (0..len).map(|i| i % 30).collect::<Vec<_>>();
            let (annotations, _) = enc.encode(&TokenBatch::single(&tokens)).unwrap();
            assert_eq!(annotations.shape(), &[1, len, 6]);
        }
    }

    #[test]
    fn first_annotation_is_one_step_from_zero() {
        let enc = encoder(10, 4);
        let (annotations, _) = enc.encode(&TokenBatch::single(&[3, 5])).unwrap();

        let x = enc.embedding.lookup(&[3]).unwrap();
        let expected = enc.cell.step(&x, &enc.init_hidden(1)).unwrap();
        assert_eq!(annotations.step(0).unwrap(), expected);
    }

    #[test]
    fn batch_rows_are_encoded_independently() {
        let enc = encoder(10, 5);
        let batch = TokenBatch::from_rows(&[vec![1, 2, 3], vec![4, 5, 6]]).unwrap();
        let (annotations, hidden) = enc.encode(&batch).unwrap();
        assert_eq!(annotations.shape(), &[2, 3, 5]);

        let (_, second) = enc.encode(&TokenBatch::single(&[4, 5, 6])).unwrap();
        for (a, b) in hidden[1].iter().zip(second[0].iter()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn rejects_unknown_tokens_and_empty_input() {
        let enc = encoder(10, 4);
        assert!(matches!(
            enc.encode(&TokenBatch::single(&[1, 10])),
            Err(Seq2SeqError::UnknownToken { index: 10, .. })
        ));
        assert!(matches!(
            enc.encode(&TokenBatch::single(&[])),
            Err(Seq2SeqError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn non_finite_state_is_reported() {
        let mut enc = encoder(5, 3);
        enc.embedding.table.row_mut(2).fill(f32::NAN);

        assert!(enc.encode(&TokenBatch::single(&[0, 1])).is_ok());
        assert!(matches!(
            enc.encode(&TokenBatch::single(&[0, 2, 1])),
            Err(Seq2SeqError::NumericInstability("Encoder::encode"))
        ));
    }

    #[test]
    fn round_trips_through_a_checkpoint() {
        let enc = encoder(12, 3);
        let mut buf = Vec::new();
        enc.write_to(&mut buf).unwrap();

        let read = Encoder::from_reader(&mut buf.as_slice()).unwrap();
        assert_eq!(read.config(), Config::new(12, 3));
        let tokens = TokenBatch::single(&[0, 11, 4]);
        assert_eq!(read.encode(&tokens).unwrap(), enc.encode(&tokens).unwrap());
    }
}
