use std::io::{Read, Write};

use rand::rngs::SmallRng;

use crate::kernel;
use crate::tensor::{Float, Tensor};
use crate::{Result, Seq2SeqError};

/// Affine map `y = W x + b` applied to every row of a batch.
#[derive(Debug, Clone)]
pub struct Linear {
    /// (out_features, in_features)
    pub weight: Tensor,
    /// (out_features,)
    pub bias: Option<Tensor>,
}

impl Linear {
    /// Uniform init in `[-1/sqrt(in), 1/sqrt(in))`, the usual fan-in scaling.
    pub fn random(
        in_features: usize,
        out_features: usize,
        bias: bool,
        rng: &mut SmallRng,
    ) -> Self {
        let bound = 1 as Float / (in_features as Float).sqrt();
        Self {
            weight: Tensor::random(&[out_features, in_features], bound, rng),
            bias: bias.then(|| Tensor::random(&[out_features], bound, rng)),
        }
    }

    pub fn in_features(&self) -> usize {
        self.weight.cols()
    }

    pub fn out_features(&self) -> usize {
        self.weight.rows()
    }

    /// x(batch, in) -> (batch, out)
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let (n, d) = (self.in_features(), self.out_features());
        if x.shape().len() != 2 || x.cols() != n {
            return Err(Seq2SeqError::ShapeMismatch {
                op: "Linear::forward",
                expected: vec![x.rows(), n],
                actual: x.shape().to_vec(),
            });
        }

        let batch = x.rows();
        let mut out = Tensor::zeros(&[batch, d]);
        for b in 0..batch {
            let o = out.row_mut(b);
            kernel::matmul(o, &self.weight, &x[b], n, d);
            if let Some(bias) = &self.bias {
                o.iter_mut().zip(bias.iter()).for_each(|(o, b)| *o += b);
            }
        }
        Ok(out)
    }

    pub fn from_reader<R: Read>(
        r: &mut R,
        in_features: usize,
        out_features: usize,
        bias: bool,
    ) -> Result<Self> {
        let weight = Tensor::from_reader(r, &[out_features, in_features])?;
        let bias = if bias {
            Some(Tensor::from_reader(r, &[out_features])?)
        } else {
            None
        };
        Ok(Self { weight, bias })
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        self.weight.write_to(w)?;
        if let Some(bias) = &self.bias {
            bias.write_to(w)?;
        }
        Ok(())
    }
}

/// Lookup table from token index to a dense vector.
#[derive(Debug, Clone)]
pub struct Embedding {
    /// (vocab_size, dim)
    pub table: Tensor,
}

impl Embedding {
    pub fn random(vocab_size: usize, dim: usize, rng: &mut SmallRng) -> Self {
        Self {
            table: Tensor::random(&[vocab_size, dim], 1.0, rng),
        }
    }

    pub fn vocab_size(&self) -> usize {
        self.table.rows()
    }

    pub fn dim(&self) -> usize {
        self.table.cols()
    }

    /// ids(n,) -> (n, dim)
    pub fn lookup(&self, ids: &[usize]) -> Result<Tensor> {
        let vocab_size = self.vocab_size();
        if let Some(&index) = ids.iter().find(|&&id| id >= vocab_size) {
            return Err(Seq2SeqError::UnknownToken { index, vocab_size });
        }
        Ok(self.table.select_rows(ids))
    }

    pub fn from_reader<R: Read>(r: &mut R, vocab_size: usize, dim: usize) -> Result<Self> {
        Ok(Self {
            table: Tensor::from_reader(r, &[vocab_size, dim])?,
        })
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        self.table.write_to(w)
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;

    use super::*;

    #[test]
    fn linear_forward_adds_bias_per_row() {
        let layer = Linear {
            weight: Tensor::from_vec(&[2, 3], vec![1.0, 0.0, 0.0, 0.0, 1.0, 1.0]).unwrap(),
            bias: Some(Tensor::from_vec(&[2], vec![0.5, -0.5]).unwrap()),
        };
        let x = Tensor::from_vec(&[2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let y = layer.forward(&x).unwrap();

        assert_eq!(y.shape(), &[2, 2]);
        assert_eq!(&*y, &[1.5, 4.5, 4.5, 10.5]);
    }

    #[test]
    fn linear_rejects_wrong_width() {
        let mut rng = SmallRng::seed_from_u64(0);
        let layer = Linear::random(4, 2, true, &mut rng);
        let err = layer.forward(&Tensor::zeros(&[1, 3])).unwrap_err();
        assert!(matches!(
            err,
            Seq2SeqError::ShapeMismatch {
                op: "Linear::forward",
                ..
            }
        ));
    }

    #[test]
    fn embedding_lookup_bounds() {
        let mut rng = SmallRng::seed_from_u64(0);
        let emb = Embedding::random(5, 3, &mut rng);

        let rows = emb.lookup(&[4, 0, 4]).unwrap();
        assert_eq!(rows.shape(), &[3, 3]);
        assert_eq!(&rows[0], &rows[2]);
        assert_eq!(&rows[1], &emb.table[0]);

        let err = emb.lookup(&[1, 5]).unwrap_err();
        assert!(matches!(
            err,
            Seq2SeqError::UnknownToken {
                index: 5,
                vocab_size: 5
            }
        ));
    }

    #[test]
    fn linear_without_bias_round_trips() {
        let mut rng = SmallRng::seed_from_u64(3);
        let layer = Linear::random(3, 2, false, &mut rng);
        let mut buf = Vec::new();
        layer.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), 6 * 4);

        let read = Linear::from_reader(&mut buf.as_slice(), 3, 2, false).unwrap();
        assert_eq!(read.weight, layer.weight);
        assert!(read.bias.is_none());
    }
}
