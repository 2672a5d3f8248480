use std::io::{Read, Write};

use rand::rngs::SmallRng;

use crate::attention::{self, Attention};
use crate::config::{Config, DecoderKind};
use crate::gru::GruCell;
use crate::kernel;
use crate::tensor::Tensor;
use crate::weights::{Embedding, Linear};
use crate::{Result, Seq2SeqError};

/// Output of a single decoder step.
#[derive(Debug, Clone, PartialEq)]
pub struct DecoderStep {
    /// (batch, vocab_size), unnormalised
    pub logits: Tensor,
    /// (batch, hidden_size)
    pub hidden: Tensor,
    /// (batch, seq_len); only the attention decoder produces these
    pub attention: Option<Tensor>,
}

/// Decoder that attends over the encoder annotations at every step.
#[derive(Debug, Clone)]
pub struct AttentionDecoder {
    pub embedding: Embedding,
    pub attention: Attention,
    /// input is `[context, embedding]`, width 2 * hidden_size
    pub cell: GruCell,
    pub out: Linear,
}

impl AttentionDecoder {
    pub fn random(config: &Config, rng: &mut SmallRng) -> Self {
        let h = config.hidden_size;
        Self {
            embedding: Embedding::random(config.vocab_size, h, rng),
            attention: Attention::random(h, rng),
            cell: GruCell::random(2 * h, h, rng),
            out: Linear::random(h, config.vocab_size, true, rng),
        }
    }

    pub fn step(
        &self,
        tokens: &[usize],
        h_prev: &Tensor,
        annotations: &Tensor,
    ) -> Result<DecoderStep> {
        let embed = self.embedding.lookup(tokens)?;
        let weights = self.attention.score(h_prev, annotations)?;
        let context = attention::context(&weights, annotations)?;

        let hidden = self.cell.step(&context.concat_cols(&embed)?, h_prev)?;
        let logits = self.out.forward(&hidden)?;
        kernel::ensure_finite(&logits, "AttentionDecoder::step")?;

        Ok(DecoderStep {
            logits,
            hidden,
            attention: Some(weights),
        })
    }

    fn from_reader<R: Read>(r: &mut R, config: &Config) -> Result<Self> {
        let h = config.hidden_size;
        Ok(Self {
            embedding: Embedding::from_reader(r, config.vocab_size, h)?,
            attention: Attention::from_reader(r, h)?,
            cell: GruCell::from_reader(r, 2 * h, h, false)?,
            out: Linear::from_reader(r, h, config.vocab_size, true)?,
        })
    }

    fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        self.embedding.write_to(w)?;
        self.attention.write_to(w)?;
        self.cell.write_to(w)?;
        self.out.write_to(w)
    }
}

/// Baseline decoder that never looks at the annotations.
#[derive(Debug, Clone)]
pub struct PlainDecoder {
    pub embedding: Embedding,
    pub cell: GruCell,
    pub out: Linear,
}

impl PlainDecoder {
    pub fn random(config: &Config, rng: &mut SmallRng) -> Self {
        let h = config.hidden_size;
        Self {
            embedding: Embedding::random(config.vocab_size, h, rng),
            cell: GruCell::random_biased(h, h, rng),
            out: Linear::random(h, config.vocab_size, true, rng),
        }
    }

    pub fn step(
        &self,
        tokens: &[usize],
        h_prev: &Tensor,
        _annotations: &Tensor,
    ) -> Result<DecoderStep> {
        let embed = self.embedding.lookup(tokens)?;
        let hidden = self.cell.step(&embed, h_prev)?;
        let logits = self.out.forward(&hidden)?;
        kernel::ensure_finite(&logits, "PlainDecoder::step")?;

        Ok(DecoderStep {
            logits,
            hidden,
            attention: None,
        })
    }

    fn from_reader<R: Read>(r: &mut R, config: &Config) -> Result<Self> {
        let h = config.hidden_size;
        Ok(Self {
            embedding: Embedding::from_reader(r, config.vocab_size, h)?,
            cell: GruCell::from_reader(r, h, h, true)?,
            out: Linear::from_reader(r, h, config.vocab_size, true)?,
        })
    }

    fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        self.embedding.write_to(w)?;
        self.cell.write_to(w)?;
        self.out.write_to(w)
    }
}

/// Either decoder behind one `step` signature.
#[derive(Debug, Clone)]
pub enum Decoder {
    Attention(AttentionDecoder),
    Plain(PlainDecoder),
}

impl Decoder {
    pub fn random(kind: DecoderKind, config: &Config, rng: &mut SmallRng) -> Self {
        match kind {
            DecoderKind::Attention => Self::Attention(AttentionDecoder::random(config, rng)),
            DecoderKind::Plain => Self::Plain(PlainDecoder::random(config, rng)),
        }
    }

    pub fn kind(&self) -> DecoderKind {
        match self {
            Self::Attention(_) => DecoderKind::Attention,
            Self::Plain(_) => DecoderKind::Plain,
        }
    }

    pub fn config(&self) -> Config {
        let (embedding, cell) = match self {
            Self::Attention(d) => (&d.embedding, &d.cell),
            Self::Plain(d) => (&d.embedding, &d.cell),
        };
        Config::new(embedding.vocab_size(), cell.hidden_size())
    }

    /// Advances one output step.
    ///
    /// `tokens` holds one input token per batch row. The caller threads
    /// `DecoderStep::hidden` into the next call and passes the same
    /// annotations for the whole pass; the plain decoder ignores them.
    pub fn step(
        &self,
        tokens: &[usize],
        h_prev: &Tensor,
        annotations: &Tensor,
    ) -> Result<DecoderStep> {
        if tokens.len() != h_prev.rows() {
            return Err(Seq2SeqError::ShapeMismatch {
                op: "Decoder::step",
                expected: vec![h_prev.rows()],
                actual: vec![tokens.len()],
            });
        }
        match self {
            Self::Attention(d) => d.step(tokens, h_prev, annotations),
            Self::Plain(d) => d.step(tokens, h_prev, annotations),
        }
    }

    pub fn from_reader<R: Read>(r: &mut R) -> Result<Self> {
        let config = Config::from_reader(r)?;
        let decoder = match DecoderKind::from_reader(r)? {
            DecoderKind::Attention => Self::Attention(AttentionDecoder::from_reader(r, &config)?),
            DecoderKind::Plain => Self::Plain(PlainDecoder::from_reader(r, &config)?),
        };
        Ok(decoder)
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        self.config().write_to(w)?;
        self.kind().write_to(w)?;
        match self {
            Self::Attention(d) => d.write_to(w),
            Self::Plain(d) => d.write_to(w),
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;

    use super::*;

    fn decoder(kind: DecoderKind, config: &Config) -> Decoder {
        let mut rng = SmallRng::seed_from_u64(17);
        Decoder::random(kind, config, &mut rng)
    }

    fn random(shape: &[usize], seed: u64) -> Tensor {
        let mut rng = SmallRng::seed_from_u64(seed);
        Tensor::random(shape, 1.0, &mut rng)
    }

    #[test]
    fn both_decoders_produce_the_same_logit_shape() {
        let config = Config::new(11, 5);
        let h_prev = random(&[3, 5], 1);
        let annotations = random(&[3, 4, 5], 2);
        let tokens = [0, 4, 10];

        let attn = decoder(DecoderKind::Attention, &config)
            .step(&tokens, &h_prev, &annotations)
            .unwrap();
        let plain = decoder(DecoderKind::Plain, &config)
            .step(&tokens, &h_prev, &annotations)
            .unwrap();

        assert_eq!(attn.logits.shape(), &[3, 11]);
        assert_eq!(attn.logits.shape(), plain.logits.shape());
        assert_eq!(attn.hidden.shape(), plain.hidden.shape());
        assert_eq!(attn.attention.map(|w| w.shape().to_vec()), Some(vec![3, 4]));
        assert!(plain.attention.is_none());
    }

    #[test]
    fn single_annotation_gets_weight_one() {
        let config = Config::new(7, 8);
        let dec = decoder(DecoderKind::Attention, &config);
        let annotations = random(&[1, 1, 8], 3);
        for seed in 0..3 {
            let step = dec.step(&[2], &random(&[1, 8], seed), &annotations).unwrap();
            let weights = step.attention.unwrap();
            assert_eq!(weights.shape(), &[1, 1]);
            assert_eq!(&*weights, &[1.0]);
        }
    }

    #[test]
    fn steps_are_deterministic() {
        let config = Config::new(9, 4);
        let h_prev = random(&[2, 4], 5);
        let annotations = random(&[2, 6, 4], 6);
        for kind in [DecoderKind::Attention, DecoderKind::Plain] {
            let dec = decoder(kind, &config);
            let a = dec.step(&[1, 2], &h_prev, &annotations).unwrap();
            let b = dec.step(&[1, 2], &h_prev, &annotations).unwrap();
            assert_eq!(a, b);
        }
    }

    #[test]
    fn plain_decoder_ignores_annotations() {
        let config = Config::new(9, 4);
        let dec = decoder(DecoderKind::Plain, &config);
        let h_prev = random(&[1, 4], 5);
        let a = dec.step(&[3], &h_prev, &random(&[1, 2, 4], 1)).unwrap();
        let b = dec.step(&[3], &h_prev, &Tensor::zeros(&[0])).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn rejects_bad_inputs() {
        let config = Config::new(9, 4);
        let dec = decoder(DecoderKind::Attention, &config);
        let annotations = random(&[1, 3, 4], 1);

        assert!(matches!(
            dec.step(&[9], &random(&[1, 4], 0), &annotations),
            Err(Seq2SeqError::UnknownToken { index: 9, .. })
        ));
        assert!(matches!(
            dec.step(&[1, 2], &random(&[1, 4], 0), &annotations),
            Err(Seq2SeqError::ShapeMismatch { .. })
        ));
        assert!(matches!(
            dec.step(&[1], &random(&[1, 3], 0), &annotations),
            Err(Seq2SeqError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn non_finite_logits_are_reported() {
        let config = Config::new(6, 3);
        let h_prev = random(&[1, 3], 1);
        let annotations = random(&[1, 2, 3], 2);
        for kind in [DecoderKind::Attention, DecoderKind::Plain] {
            let mut dec = decoder(kind, &config);
            let out = match &mut dec {
                Decoder::Attention(d) => &mut d.out,
                Decoder::Plain(d) => &mut d.out,
            };
            out.weight.iter_mut().for_each(|w| *w = f32::NAN);

            let op = match kind {
                DecoderKind::Attention => "AttentionDecoder::step",
                DecoderKind::Plain => "PlainDecoder::step",
            };
            assert!(matches!(
                dec.step(&[1], &h_prev, &annotations),
                Err(Seq2SeqError::NumericInstability(o)) if o == op
            ));
        }
    }

    #[test]
    fn round_trips_both_kinds() {
        let config = Config::new(6, 3);
        let h_prev = random(&[1, 3], 1);
        let annotations = random(&[1, 2, 3], 2);
        for kind in [DecoderKind::Attention, DecoderKind::Plain] {
            let dec = decoder(kind, &config);
            let mut buf = Vec::new();
            dec.write_to(&mut buf).unwrap();

            let read = Decoder::from_reader(&mut buf.as_slice()).unwrap();
            assert_eq!(read.kind(), kind);
            assert_eq!(read.config(), config);
            assert_eq!(
                read.step(&[5], &h_prev, &annotations).unwrap(),
                dec.step(&[5], &h_prev, &annotations).unwrap()
            );
        }
    }
}
