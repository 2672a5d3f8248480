use std::{
    io::{Read, Write},
    ops::{Deref, DerefMut, Index},
};

use rand::rngs::SmallRng;
use rand::Rng;

use crate::{read_tensor, write_tensor, Result, Seq2SeqError};

pub type Float = f32;

/// Dense row-major tensor.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    data: Vec<Float>,
    // from outer to inner: ..., row, col
    shape: Vec<usize>,
}

impl Deref for Tensor {
    type Target = [Float];

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

impl DerefMut for Tensor {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.data
    }
}

/// Indexes the innermost rows, so `t[i]` of a `(batch, seq, hidden)` tensor is
/// the hidden vector at `(i / seq, i % seq)`.
impl Index<usize> for Tensor {
    type Output = [Float];

    fn index(&self, index: usize) -> &Self::Output {
        let cols = self.cols();
        debug_assert!(index < self.rows());
        &self.data[index * cols..(index + 1) * cols]
    }
}

impl Tensor {
    pub fn zeros(shape: &[usize]) -> Self {
        Self {
            data: vec![0.0; shape.iter().product()],
            shape: shape.to_vec(),
        }
    }

    pub fn from_vec(shape: &[usize], data: Vec<Float>) -> Result<Self> {
        let numel = shape.iter().product::<usize>();
        if data.len() != numel {
            return Err(Seq2SeqError::ShapeMismatch {
                op: "Tensor::from_vec",
                expected: vec![numel],
                actual: vec![data.len()],
            });
        }
        Ok(Self {
            data,
            shape: shape.to_vec(),
        })
    }

    /// Uniform samples from `[-bound, bound)`.
    pub fn random(shape: &[usize], bound: Float, rng: &mut SmallRng) -> Self {
        let numel = shape.iter().product::<usize>();
        let data = (0..numel)
            .map(|_| rng.gen_range(-bound..bound))
            .collect();
        Self {
            data,
            shape: shape.to_vec(),
        }
    }

    pub fn from_reader<R: Read>(r: &mut R, shape: &[usize]) -> Result<Self> {
        let numel = shape
            .iter()
            .try_fold(1usize, |n, &d| n.checked_mul(d))
            .ok_or_else(|| {
                Seq2SeqError::Checkpoint(format!("tensor shape {shape:?} is too large"))
            })?;
        let data = read_tensor(r, numel)?;
        Ok(Self {
            data,
            shape: shape.to_vec(),
        })
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        write_tensor(w, &self.data)
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Size of the innermost dimension.
    pub fn cols(&self) -> usize {
        self.shape.last().copied().unwrap_or(1)
    }

    /// Number of innermost rows.
    pub fn rows(&self) -> usize {
        match self.cols() {
            0 => 0,
            cols => self.data.len() / cols,
        }
    }

    pub fn into_vec(self) -> Vec<Float> {
        self.data
    }

    pub fn row_mut(&mut self, index: usize) -> &mut [Float] {
        let cols = self.cols();
        &mut self.data[index * cols..(index + 1) * cols]
    }

    pub fn expect_shape(&self, op: &'static str, expected: &[usize]) -> Result<()> {
        if self.shape != expected {
            return Err(Seq2SeqError::ShapeMismatch {
                op,
                expected: expected.to_vec(),
                actual: self.shape.clone(),
            });
        }
        Ok(())
    }

    pub fn reshape(self, shape: &[usize]) -> Result<Self> {
        Self::from_vec(shape, self.data)
    }

    pub fn zip_map(
        &self,
        other: &Tensor,
        op: &'static str,
        f: impl Fn(Float, Float) -> Float,
    ) -> Result<Self> {
        other.expect_shape(op, &self.shape)?;
        Ok(Self {
            data: self
                .data
                .iter()
                .zip(other.data.iter())
                .map(|(&a, &b)| f(a, b))
                .collect(),
            shape: self.shape.clone(),
        })
    }

    pub fn add(&self, other: &Tensor) -> Result<Self> {
        self.zip_map(other, "Tensor::add", |a, b| a + b)
    }

    pub fn mul(&self, other: &Tensor) -> Result<Self> {
        self.zip_map(other, "Tensor::mul", |a, b| a * b)
    }

    /// (rows, n) ++ (rows, m) -> (rows, n + m)
    pub fn concat_cols(&self, other: &Tensor) -> Result<Self> {
        if self.shape.len() != 2 || other.shape.len() != 2 || self.rows() != other.rows() {
            return Err(Seq2SeqError::ShapeMismatch {
                op: "Tensor::concat_cols",
                expected: vec![self.rows(), other.cols()],
                actual: other.shape.clone(),
            });
        }
        let (rows, cols) = (self.rows(), self.cols() + other.cols());
        let mut data = Vec::with_capacity(rows * cols);
        for i in 0..rows {
            data.extend_from_slice(&self[i]);
            data.extend_from_slice(&other[i]);
        }
        Ok(Self {
            data,
            shape: vec![rows, cols],
        })
    }

    /// Gathers innermost rows into a `(indices.len(), cols)` tensor.
    pub fn select_rows(&self, indices: &[usize]) -> Self {
        let cols = self.cols();
        let mut data = Vec::with_capacity(indices.len() * cols);
        for &i in indices {
            data.extend_from_slice(&self[i]);
        }
        Self {
            data,
            shape: vec![indices.len(), cols],
        }
    }

    /// seq_len x (batch, hidden) -> (batch, seq_len, hidden)
    pub fn stack(steps: &[Tensor]) -> Result<Self> {
        let Some(first) = steps.first() else {
            return Err(Seq2SeqError::ShapeMismatch {
                op: "Tensor::stack",
                expected: vec![1],
                actual: vec![0],
            });
        };
        for step in steps {
            step.expect_shape("Tensor::stack", first.shape())?;
        }
        let (batch, hidden) = (first.rows(), first.cols());
        let mut data = Vec::with_capacity(batch * steps.len() * hidden);
        for b in 0..batch {
            for step in steps {
                data.extend_from_slice(&step[b]);
            }
        }
        Ok(Self {
            data,
            shape: vec![batch, steps.len(), hidden],
        })
    }

    /// Slice `[:, t, :]` of a `(batch, seq_len, hidden)` tensor.
    pub fn step(&self, t: usize) -> Result<Self> {
        let &[batch, seq_len, _] = self.shape.as_slice() else {
            return Err(Seq2SeqError::ShapeMismatch {
                op: "Tensor::step",
                expected: vec![0, t + 1, 0],
                actual: self.shape.clone(),
            });
        };
        if t >= seq_len {
            return Err(Seq2SeqError::ShapeMismatch {
                op: "Tensor::step",
                expected: vec![batch, t + 1, self.cols()],
                actual: self.shape.clone(),
            });
        }
        let indices = (0..batch).map(|b| b * seq_len + t).collect::<Vec<_>>();
        Ok(self.select_rows(&indices))
    }

    pub fn is_finite(&self) -> bool {
        self.data.iter().all(|v| v.is_finite())
    }
}

/// Token indices laid out as `(batch, seq_len)`; every sequence in a batch
/// has the same length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenBatch {
    ids: Vec<usize>,
    batch_size: usize,
    seq_len: usize,
}

impl TokenBatch {
    pub fn new(batch_size: usize, seq_len: usize, ids: Vec<usize>) -> Result<Self> {
        if ids.len() != batch_size * seq_len {
            return Err(Seq2SeqError::ShapeMismatch {
                op: "TokenBatch::new",
                expected: vec![batch_size, seq_len],
                actual: vec![ids.len()],
            });
        }
        Ok(Self {
            ids,
            batch_size,
            seq_len,
        })
    }

    /// A batch of one sequence.
    pub fn single(seq: &[usize]) -> Self {
        Self {
            ids: seq.to_vec(),
            batch_size: 1,
            seq_len: seq.len(),
        }
    }

    pub fn from_rows(rows: &[Vec<usize>]) -> Result<Self> {
        let seq_len = rows.first().map_or(0, Vec::len);
        if let Some(row) = rows.iter().find(|row| row.len() != seq_len) {
            return Err(Seq2SeqError::ShapeMismatch {
                op: "TokenBatch::from_rows",
                expected: vec![seq_len],
                actual: vec![row.len()],
            });
        }
        Ok(Self {
            ids: rows.concat(),
            batch_size: rows.len(),
            seq_len,
        })
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn seq_len(&self) -> usize {
        self.seq_len
    }

    pub fn ids(&self) -> &[usize] {
        &self.ids
    }
}
