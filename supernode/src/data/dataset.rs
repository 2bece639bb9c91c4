/// A single supervised sample: a feature vector and a binary label.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub features: Vec<f32>,
    pub label: f32,
}

impl Sample {
    pub fn new(features: Vec<f32>, label: f32) -> Self {
        Self { features, label }
    }
}

/// The full, ordered dataset shared by every node before partitioning.
///
/// Design goals:
/// - deterministic and test-friendly
/// - every sample has exactly `dim` features
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    dim: usize,
    samples: Vec<Sample>,
}

impl Dataset {
    /// Creates a new dataset from owned samples.
    ///
    /// # Panics
    /// If any sample doesn't have exactly `dim` features.
    pub fn new(dim: usize, samples: Vec<Sample>) -> Self {
        assert!(
            samples.iter().all(|s| s.features.len() == dim),
            "every sample must have {dim} features"
        );

        Self { dim, samples }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// The amount of features per sample.
    #[inline]
    pub fn dim(&self) -> usize {
        self.dim
    }

    #[inline]
    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }
}
