use std::io::{Read, Write};

use rand::rngs::SmallRng;

use crate::kernel;
use crate::tensor::Tensor;
use crate::weights::Linear;
use crate::{Result, Seq2SeqError};

/// Additive attention: a two-layer scorer over `[decoder_hidden, annotation]`
/// followed by a softmax across sequence positions.
#[derive(Debug, Clone)]
pub struct Attention {
    /// (hidden_size, 2 * hidden_size)
    pub hidden: Linear,
    /// (1, hidden_size)
    pub score: Linear,
}

impl Attention {
    pub fn random(hidden_size: usize, rng: &mut SmallRng) -> Self {
        Self {
            hidden: Linear::random(2 * hidden_size, hidden_size, true, rng),
            score: Linear::random(hidden_size, 1, true, rng),
        }
    }

    pub fn hidden_size(&self) -> usize {
        self.hidden.out_features()
    }

    /// hidden(batch, h), annotations(batch, seq_len, h) -> weights(batch, seq_len)
    ///
    /// Every row of the result is non-negative and sums to 1.
    pub fn score(&self, hidden: &Tensor, annotations: &Tensor) -> Result<Tensor> {
        let h = self.hidden_size();
        let &[batch, seq_len, width] = annotations.shape() else {
            return Err(Seq2SeqError::ShapeMismatch {
                op: "Attention::score",
                expected: vec![hidden.rows(), 0, h],
                actual: annotations.shape().to_vec(),
            });
        };
        if width != h || seq_len == 0 {
            return Err(Seq2SeqError::ShapeMismatch {
                op: "Attention::score",
                expected: vec![batch, seq_len.max(1), h],
                actual: annotations.shape().to_vec(),
            });
        }
        hidden.expect_shape("Attention::score", &[batch, h])?;

        // (batch * seq_len, 2h), row b * seq_len + t holds [hidden_b, annotation_bt]
        let expanded = Tensor::from_vec(
            &[batch * seq_len, h],
            (0..batch * seq_len)
                .flat_map(|i| hidden[i / seq_len].iter().copied())
                .collect(),
        )?;
        let flat = annotations.clone().reshape(&[batch * seq_len, h])?;
        let concat = expanded.concat_cols(&flat)?;

        let mut features = self.hidden.forward(&concat)?;
        kernel::relu(&mut features);
        let mut weights = self.score.forward(&features)?.reshape(&[batch, seq_len])?;
        for b in 0..batch {
            kernel::softmax(weights.row_mut(b));
        }
        Ok(weights)
    }

    pub fn from_reader<R: Read>(r: &mut R, hidden_size: usize) -> Result<Self> {
        Ok(Self {
            hidden: Linear::from_reader(r, 2 * hidden_size, hidden_size, true)?,
            score: Linear::from_reader(r, hidden_size, 1, true)?,
        })
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        self.hidden.write_to(w)?;
        self.score.write_to(w)
    }
}

/// weights(batch, seq_len), annotations(batch, seq_len, h) -> context(batch, h)
pub fn context(weights: &Tensor, annotations: &Tensor) -> Result<Tensor> {
    let &[batch, seq_len, h] = annotations.shape() else {
        return Err(Seq2SeqError::ShapeMismatch {
            op: "attention::context",
            expected: vec![weights.rows(), weights.cols(), 0],
            actual: annotations.shape().to_vec(),
        });
    };
    weights.expect_shape("attention::context", &[batch, seq_len])?;

    let mut out = Tensor::zeros(&[batch, h]);
    for b in 0..batch {
        let o = out.row_mut(b);
        for (t, &w) in weights[b].iter().enumerate() {
            o.iter_mut()
                .zip(annotations[b * seq_len + t].iter())
                .for_each(|(o, &a)| *o += w * a);
        }
    }
    Ok(out)
}
