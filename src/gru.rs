use std::io::{Read, Write};

use rand::rngs::SmallRng;

use crate::kernel;
use crate::tensor::{Float, Tensor};
use crate::weights::Linear;
use crate::{Result, Seq2SeqError};

/// The input-path and hidden-path affine maps feeding one gate.
#[derive(Debug, Clone)]
pub struct GatePair {
    /// (hidden_size, input_size)
    pub input: Linear,
    /// (hidden_size, hidden_size)
    pub hidden: Linear,
}

impl GatePair {
    fn random(
        input_size: usize,
        hidden_size: usize,
        input_bias: bool,
        rng: &mut SmallRng,
    ) -> Self {
        Self {
            input: Linear::random(input_size, hidden_size, input_bias, rng),
            hidden: Linear::random(hidden_size, hidden_size, true, rng),
        }
    }

    fn from_reader<R: Read>(
        r: &mut R,
        input_size: usize,
        hidden_size: usize,
        input_bias: bool,
    ) -> Result<Self> {
        Ok(Self {
            input: Linear::from_reader(r, input_size, hidden_size, input_bias)?,
            hidden: Linear::from_reader(r, hidden_size, hidden_size, true)?,
        })
    }

    fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        self.input.write_to(w)?;
        self.hidden.write_to(w)
    }
}

/// Intermediate values of one GRU step, each `(batch, hidden_size)`.
#[derive(Debug, Clone)]
pub struct GruGates {
    pub reset: Tensor,
    pub update: Tensor,
    pub candidate: Tensor,
    pub hidden: Tensor,
}

/// Gated recurrent unit, one time step at a time.
///
/// ```text
/// r  = σ(W_ir x + b_ir + W_hr h + b_hr)
/// z  = σ(W_iz x + b_iz + W_hz h + b_hz)
/// g  = tanh(W_in x [+ b_in] + r ⊙ (W_hn h + b_hn))
/// h' = (1 - z) ⊙ g + z ⊙ h
/// ```
///
/// The hand-rolled cell leaves out `b_in`; the library-style cell keeps it.
#[derive(Debug, Clone)]
pub struct GruCell {
    pub reset: GatePair,
    pub update: GatePair,
    pub candidate: GatePair,
}

impl GruCell {
    /// Cell without an input-to-candidate bias.
    pub fn random(input_size: usize, hidden_size: usize, rng: &mut SmallRng) -> Self {
        Self::random_with(input_size, hidden_size, false, rng)
    }

    /// Cell with an input-to-candidate bias, laid out like the stock GRU cell.
    pub fn random_biased(input_size: usize, hidden_size: usize, rng: &mut SmallRng) -> Self {
        Self::random_with(input_size, hidden_size, true, rng)
    }

    fn random_with(
        input_size: usize,
        hidden_size: usize,
        candidate_input_bias: bool,
        rng: &mut SmallRng,
    ) -> Self {
        Self {
            reset: GatePair::random(input_size, hidden_size, true, rng),
            update: GatePair::random(input_size, hidden_size, true, rng),
            candidate: GatePair::random(input_size, hidden_size, candidate_input_bias, rng),
        }
    }

    pub fn input_size(&self) -> usize {
        self.reset.input.in_features()
    }

    pub fn hidden_size(&self) -> usize {
        self.reset.hidden.out_features()
    }

    pub fn has_candidate_input_bias(&self) -> bool {
        self.candidate.input.bias.is_some()
    }

    /// x(batch, input_size), h_prev(batch, hidden_size) -> h_new(batch, hidden_size)
    pub fn step(&self, x: &Tensor, h_prev: &Tensor) -> Result<Tensor> {
        Ok(self.gates(x, h_prev)?.hidden)
    }

    pub fn gates(&self, x: &Tensor, h_prev: &Tensor) -> Result<GruGates> {
        let batch = x.rows();
        if x.shape().len() != 2 || x.cols() != self.input_size() {
            return Err(Seq2SeqError::ShapeMismatch {
                op: "GruCell::step",
                expected: vec![batch, self.input_size()],
                actual: x.shape().to_vec(),
            });
        }
        h_prev.expect_shape("GruCell::step", &[batch, self.hidden_size()])?;

        let mut reset = self
            .reset
            .input
            .forward(x)?
            .add(&self.reset.hidden.forward(h_prev)?)?;
        kernel::sigmoid(&mut reset);

        let mut update = self
            .update
            .input
            .forward(x)?
            .add(&self.update.hidden.forward(h_prev)?)?;
        kernel::sigmoid(&mut update);

        let gated = reset.mul(&self.candidate.hidden.forward(h_prev)?)?;
        let mut candidate = self.candidate.input.forward(x)?.add(&gated)?;
        kernel::tanh(&mut candidate);

        let hidden = update
            .zip_map(&candidate, "GruCell::step", |z, g| (1 as Float - z) * g)?
            .add(&update.mul(h_prev)?)?;

        Ok(GruGates {
            reset,
            update,
            candidate,
            hidden,
        })
    }

    pub fn from_reader<R: Read>(
        r: &mut R,
        input_size: usize,
        hidden_size: usize,
        candidate_input_bias: bool,
    ) -> Result<Self> {
        Ok(Self {
            reset: GatePair::from_reader(r, input_size, hidden_size, true)?,
            update: GatePair::from_reader(r, input_size, hidden_size, true)?,
            candidate: GatePair::from_reader(r, input_size, hidden_size, candidate_input_bias)?,
        })
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        self.reset.write_to(w)?;
        self.update.write_to(w)?;
        self.candidate.write_to(w)
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;

    use super::*;

    fn inputs(batch: usize, width: usize, seed: u64) -> Tensor {
        let mut rng = SmallRng::seed_from_u64(seed);
        Tensor::random(&[batch, width], 2.0, &mut rng)
    }

    #[test]
    fn new_hidden_lies_between_candidate_and_previous() {
        let mut rng = SmallRng::seed_from_u64(11);
        let cell = GruCell::random(6, 5, &mut rng);
        let x = inputs(3, 6, 1);
        let h_prev = inputs(3, 5, 2);

        let gates = cell.gates(&x, &h_prev).unwrap();
        assert_eq!(gates.hidden.shape(), &[3, 5]);
        for ((&h, &g), &p) in gates
            .hidden
            .iter()
            .zip(gates.candidate.iter())
            .zip(h_prev.iter())
        {
            let (lo, hi) = if g < p { (g, p) } else { (p, g) };
            assert!(h >= lo - 1e-6 && h <= hi + 1e-6, "{h} not in [{lo}, {hi}]");
        }
    }

    #[test]
    fn gates_are_in_unit_range() {
        let mut rng = SmallRng::seed_from_u64(5);
        let cell = GruCell::random_biased(4, 4, &mut rng);
        let gates = cell.gates(&inputs(2, 4, 3), &inputs(2, 4, 4)).unwrap();
        assert!(gates.reset.iter().all(|&v| (0.0..=1.0).contains(&v)));
        assert!(gates.update.iter().all(|&v| (0.0..=1.0).contains(&v)));
        assert!(gates.candidate.iter().all(|&v| (-1.0..=1.0).contains(&v)));
    }

    #[test]
    fn step_matches_hand_computation() {
        // one unit, one input: every weight 1, every bias 0
        let one = || Linear {
            weight: Tensor::from_vec(&[1, 1], vec![1.0]).unwrap(),
            bias: Some(Tensor::zeros(&[1])),
        };
        let pair = || GatePair {
            input: one(),
            hidden: one(),
        };
        let cell = GruCell {
            reset: pair(),
            update: pair(),
            candidate: GatePair {
                input: Linear {
                    bias: None,
                    ..one()
                },
                hidden: one(),
            },
        };
        let x = Tensor::from_vec(&[1, 1], vec![0.5]).unwrap();
        let h = Tensor::from_vec(&[1, 1], vec![-0.25]).unwrap();

        let s = |v: f32| 1.0 / (1.0 + (-v).exp());
        let r = s(0.25);
        let z = s(0.25);
        let g = (0.5 + r * -0.25f32).tanh();
        let expected = (1.0 - z) * g + z * -0.25;

        let h_new = cell.step(&x, &h).unwrap();
        assert!((h_new[0][0] - expected).abs() < 1e-6);
        assert!(!cell.has_candidate_input_bias());
    }

    #[test]
    fn rejects_mismatched_batches() {
        let mut rng = SmallRng::seed_from_u64(0);
        let cell = GruCell::random(3, 2, &mut rng);
        let err = cell.step(&inputs(2, 3, 0), &inputs(1, 2, 0)).unwrap_err();
        assert!(matches!(err, Seq2SeqError::ShapeMismatch { .. }));

        let err = cell.step(&inputs(1, 4, 0), &inputs(1, 2, 0)).unwrap_err();
        assert!(matches!(err, Seq2SeqError::ShapeMismatch { .. }));
    }

    #[test]
    fn is_deterministic() {
        let mut rng = SmallRng::seed_from_u64(9);
        let cell = GruCell::random_biased(3, 3, &mut rng);
        let (x, h) = (inputs(2, 3, 1), inputs(2, 3, 2));
        assert_eq!(cell.step(&x, &h).unwrap(), cell.step(&x, &h).unwrap());
    }

    #[test]
    fn serialises_without_candidate_input_bias() {
        let mut rng = SmallRng::seed_from_u64(4);
        let cell = GruCell::random(2, 3, &mut rng);
        let mut buf = Vec::new();
        cell.write_to(&mut buf).unwrap();

        let read = GruCell::from_reader(&mut buf.as_slice(), 2, 3, false).unwrap();
        let (x, h) = (inputs(1, 2, 5), inputs(1, 3, 6));
        assert_eq!(read.step(&x, &h).unwrap(), cell.step(&x, &h).unwrap());
    }
}
