use ndarray::{Array1, ArrayView1, Zip};

/// Numerically stable logistic function.
pub fn sigmoid(z: f32) -> f32 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

/// Binary cross-entropy computed straight from the logits.
#[derive(Default, Clone, Copy)]
pub struct BinaryCrossEntropy;

impl BinaryCrossEntropy {
    /// Returns a new `BinaryCrossEntropy`.
    pub fn new() -> Self {
        Self
    }

    /// Mean loss of `logits` against the `{0, 1}` labels `y`.
    ///
    /// Uses `max(z, 0) - z * y + ln(1 + e^-|z|)`, which never overflows.
    pub fn loss(&self, logits: ArrayView1<f32>, y: ArrayView1<f32>) -> f64 {
        if logits.is_empty() {
            return 0.0;
        }

        let total = Zip::from(&logits).and(&y).fold(0.0f64, |acc, &z, &y| {
            let z = z as f64;
            acc + z.max(0.0) - z * y as f64 + (-z.abs()).exp().ln_1p()
        });

        total / logits.len() as f64
    }

    /// Derivative of the mean loss with respect to each logit.
    pub fn loss_prime(&self, logits: ArrayView1<f32>, y: ArrayView1<f32>) -> Array1<f32> {
        let n = logits.len().max(1) as f32;
        Zip::from(&logits)
            .and(&y)
            .map_collect(|&z, &y| (sigmoid(z) - y) / n)
    }
}
