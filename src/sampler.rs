use rand::rngs::SmallRng;
use rand::SeedableRng;

use crate::kernel;
use crate::tensor::Float;

pub struct Sampler {
    temperature: Float,
    rng: SmallRng,
}

impl Sampler {
    pub fn new(temperature: Float) -> Self {
        Self {
            temperature,
            rng: SmallRng::from_entropy(),
        }
    }

    pub fn with_seed(temperature: Float, seed: u64) -> Self {
        Self {
            temperature,
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    /// Always picks the highest-scoring token.
    pub fn greedy() -> Self {
        Self::with_seed(0.0, 0)
    }

    pub fn sample(&mut self, logits: &[Float]) -> usize {
        if self.temperature == 0.0 {
            kernel::argmax(logits)
        } else {
            let mut probs = logits
                .iter()
                .map(|logit| logit / self.temperature)
                .collect::<Vec<_>>();
            kernel::softmax(&mut probs);
            kernel::sample(&probs, &mut self.rng)
        }
    }
}
