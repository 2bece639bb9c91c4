/// The parameters of a linear classifier: one weight per feature plus a bias.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterVector {
    weights: Vec<f32>,
    bias: f32,
}

impl ParameterVector {
    /// Creates a new `ParameterVector`.
    ///
    /// # Arguments
    /// * `weights` - One weight per input feature.
    /// * `bias` - The intercept term.
    pub fn new(weights: Vec<f32>, bias: f32) -> Self {
        Self { weights, bias }
    }

    /// Returns an all zero vector for `dim` features.
    pub fn zeros(dim: usize) -> Self {
        Self::new(vec![0.0; dim], 0.0)
    }

    pub fn weights(&self) -> &[f32] {
        &self.weights
    }

    pub fn bias(&self) -> f32 {
        self.bias
    }

    /// The amount of features this vector classifies.
    pub fn dim(&self) -> usize {
        self.weights.len()
    }

    /// Returns `true` if neither the weights nor the bias are NaN or infinite.
    pub fn is_finite(&self) -> bool {
        self.bias.is_finite() && self.weights.iter().all(|w| w.is_finite())
    }
}
