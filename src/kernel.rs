use rand::rngs::SmallRng;
use rand::Rng;

use crate::tensor::{Float, Tensor};
use crate::{Result, Seq2SeqError};

/// W(d, n) * x(n,) -> out(d,)
pub fn matmul(out: &mut [Float], w: &[Float], x: &[Float], n: usize, d: usize) {
    debug_assert_eq!(w.len(), d * n);
    debug_assert_eq!(out.len(), d);
    debug_assert_eq!(x.len(), n);

    for (row, o) in w.chunks_exact(n).zip(out.iter_mut()) {
        *o = row
            .iter()
            .zip(x.iter())
            .fold(0 as Float, |acc, (&w, &x)| acc + w * x);
    }
}

pub fn argmax(x: &[Float]) -> usize {
    assert!(!x.is_empty());
    x.iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.total_cmp(b))
        .map(|(index, _)| index)
        .expect("argmax")
}

pub fn softmax(x: &mut [Float]) {
    assert!(!x.is_empty());
    let max_val = x.iter().fold(Float::NAN, |acc, &v| v.max(acc));
    let mut sum = 0 as Float;
    for v in x.iter_mut() {
        *v = (*v - max_val).exp();
        sum += *v;
    }
    x.iter_mut().for_each(|v| *v /= sum);
}

/// σ(x) = 1 / (1 + e^-x)
pub fn sigmoid(x: &mut [Float]) {
    x.iter_mut()
        .for_each(|v| *v = 1 as Float / (1 as Float + (-*v).exp()));
}

pub fn tanh(x: &mut [Float]) {
    x.iter_mut().for_each(|v| *v = v.tanh());
}

pub fn relu(x: &mut [Float]) {
    x.iter_mut().for_each(|v| *v = v.max(0 as Float));
}

pub fn sample(probs: &[Float], rng: &mut SmallRng) -> usize {
    let r = rng.gen::<Float>();

    let mut cdf = 0 as Float;
    for (idx, p) in probs.iter().enumerate() {
        cdf += *p;
        if r < cdf {
            return idx;
        }
    }
    probs.len() - 1
}

pub fn ensure_finite(x: &Tensor, op: &'static str) -> Result<()> {
    if !x.is_finite() {
        tracing::warn!(op, "non-finite values detected");
        return Err(Seq2SeqError::NumericInstability(op));
    }
    Ok(())
}
