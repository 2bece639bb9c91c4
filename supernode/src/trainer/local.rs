use comms::{ParameterVector, RoundMetrics};
use log::{debug, trace};
use ndarray::ArrayView1;
use tokio_util::sync::CancellationToken;

use super::{
    loss::BinaryCrossEntropy,
    optimizer::{GradientDescent, Optimizer},
};
use crate::{data::DataPartition, error::TrainingError};

pub const DEFAULT_LEARNING_RATE: f32 = 0.1;
pub const DEFAULT_TOLERANCE: f32 = 1e-6;

/// Fits a logistic regression model on a node's partition with full-batch
/// gradient descent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalTrainer {
    learning_rate: f32,
    tolerance: f32,
}

impl Default for LocalTrainer {
    fn default() -> Self {
        Self::new(DEFAULT_LEARNING_RATE, DEFAULT_TOLERANCE)
    }
}

impl LocalTrainer {
    /// Creates a new `LocalTrainer`.
    ///
    /// # Arguments
    /// * `learning_rate` - The step length of each gradient descent iteration.
    /// * `tolerance` - Training stops early once the gradient's L2 norm drops below it.
    pub fn new(learning_rate: f32, tolerance: f32) -> Self {
        Self {
            learning_rate,
            tolerance,
        }
    }

    /// Trains `initial` on `partition` for at most `max_iterations` steps.
    ///
    /// # Arguments
    /// * `initial` - The global parameters of the round, left untouched.
    /// * `partition` - The node-local data.
    /// * `max_iterations` - Upper bound on the gradient steps.
    ///
    /// # Returns
    /// The fitted parameters and their loss and accuracy on `partition`, with
    /// `round` left at 0 for the caller to fill. An empty partition returns a
    /// copy of `initial` and zeroed metrics.
    ///
    /// # Errors
    /// `ShapeMismatch` if the parameters don't match the feature dimension,
    /// `NonFinite` if the optimization diverges.
    pub fn fit(
        &self,
        initial: &ParameterVector,
        partition: &DataPartition,
        max_iterations: usize,
    ) -> Result<(ParameterVector, RoundMetrics), TrainingError> {
        self.fit_until(initial, partition, max_iterations, || false)
    }

    /// Same as `fit`, but checks `cancel` before every iteration.
    ///
    /// # Errors
    /// Additionally returns `Cancelled` once `cancel` fires.
    pub fn fit_cancellable(
        &self,
        initial: &ParameterVector,
        partition: &DataPartition,
        max_iterations: usize,
        cancel: &CancellationToken,
    ) -> Result<(ParameterVector, RoundMetrics), TrainingError> {
        self.fit_until(initial, partition, max_iterations, || cancel.is_cancelled())
    }

    fn fit_until<F>(
        &self,
        initial: &ParameterVector,
        partition: &DataPartition,
        max_iterations: usize,
        stop: F,
    ) -> Result<(ParameterVector, RoundMetrics), TrainingError>
    where
        F: Fn() -> bool,
    {
        if partition.is_empty() {
            return Ok((initial.clone(), RoundMetrics::zeroed()));
        }

        let dim = partition.dim();
        if initial.dim() != dim {
            return Err(TrainingError::ShapeMismatch {
                what: "parameter weights",
                got: initial.dim(),
                expected: dim,
            });
        }

        if !initial.is_finite() {
            return Err(TrainingError::NonFinite { iteration: 0 });
        }

        let xs = partition.xs();
        let ys = partition.ys();
        let loss_fn = BinaryCrossEntropy::new();
        let mut optimizer = GradientDescent::new(self.learning_rate);

        // [w_0, .., w_{d-1}, b]
        let mut params = initial.weights().to_vec();
        params.push(initial.bias());
        let mut grad = vec![0.0; dim + 1];

        let mut iterations = 0;
        while iterations < max_iterations {
            if stop() {
                return Err(TrainingError::Cancelled {
                    iteration: iterations,
                });
            }

            let (w, b) = params.split_at(dim);
            let logits = xs.dot(&ArrayView1::from(w)) + b[0];
            let d = loss_fn.loss_prime(logits.view(), ys);

            let (gw, gb) = grad.split_at_mut(dim);
            for (g, x) in gw.iter_mut().zip(xs.t().dot(&d).iter()) {
                *g = *x;
            }
            gb[0] = d.sum();

            let norm = grad.iter().map(|g| g * g).sum::<f32>().sqrt();
            if !norm.is_finite() {
                return Err(TrainingError::NonFinite {
                    iteration: iterations,
                });
            }

            if norm < self.tolerance {
                debug!(iteration = iterations, norm = norm; "converged");
                break;
            }

            optimizer.update_params(&mut params, &grad);
            iterations += 1;

            if params.iter().any(|p| !p.is_finite()) {
                return Err(TrainingError::NonFinite {
                    iteration: iterations,
                });
            }

            trace!(iteration = iterations, norm = norm; "gradient step");
        }

        let (w, b) = params.split_at(dim);
        let logits = xs.dot(&ArrayView1::from(w)) + b[0];

        let loss = loss_fn.loss(logits.view(), ys);
        if !loss.is_finite() {
            return Err(TrainingError::NonFinite {
                iteration: iterations,
            });
        }

        let correct = logits
            .iter()
            .zip(ys)
            .filter(|&(&z, &y)| (z >= 0.0) == (y >= 0.5))
            .count();

        let n = partition.len();
        let metrics = RoundMetrics {
            round: 0,
            loss,
            accuracy: correct as f64 / n as f64,
            num_examples: n as u64,
        };

        let bias = params.pop().unwrap_or_default();
        Ok((ParameterVector::new(params, bias), metrics))
    }
}

#[cfg(test)]
mod tests {
    use comms::NodeIdentity;

    use super::*;
    use crate::data::{Dataset, DatasetSource, Sample, select};

    fn partition(samples: usize, features: usize) -> DataPartition {
        let ds = DatasetSource::Synthetic {
            seed: 7,
            samples,
            features,
        }
        .load()
        .unwrap();

        select(&ds, NodeIdentity::new(0, 1).unwrap())
    }

    #[test]
    fn fits_a_hundred_examples() {
        let part = partition(100, 2);
        let initial = ParameterVector::zeros(2);

        let (params, metrics) = LocalTrainer::default().fit(&initial, &part, 50).unwrap();

        assert_eq!(params.dim(), 2);
        assert!(params.is_finite());
        assert!(metrics.loss.is_finite() && metrics.loss >= 0.0);
        assert!((0.0..=1.0).contains(&metrics.accuracy));
        assert_eq!(metrics.num_examples, 100);
        assert_eq!(metrics.round, 0);
    }

    #[test]
    fn training_lowers_the_loss() {
        let part = partition(200, 3);
        let initial = ParameterVector::zeros(3);

        let (_, metrics) = LocalTrainer::new(0.5, 1e-6)
            .fit(&initial, &part, 300)
            .unwrap();

        assert!(metrics.loss < std::f64::consts::LN_2, "{metrics:?}");
        assert!(metrics.accuracy > 0.6, "{metrics:?}");
    }

    #[test]
    fn empty_partition_is_a_noop() {
        let ds = Dataset::new(2, vec![Sample::new(vec![1.0, 1.0], 1.0)]);
        let part = select(&ds, NodeIdentity::new(1, 2).unwrap());
        assert!(part.is_empty());

        let initial = ParameterVector::new(vec![0.5, -0.5], 0.25);
        let (params, metrics) = LocalTrainer::default().fit(&initial, &part, 50).unwrap();

        assert_eq!(params, initial);
        assert_eq!(metrics, RoundMetrics::zeroed());
    }

    #[test]
    fn initial_parameters_are_not_mutated() {
        let part = partition(40, 2);
        let initial = ParameterVector::new(vec![0.1, 0.2], 0.3);
        let copy = initial.clone();

        let (params, _) = LocalTrainer::default().fit(&initial, &part, 10).unwrap();

        assert_eq!(initial, copy);
        assert_ne!(params, initial);
    }

    #[test]
    fn zero_iterations_only_measures() {
        let part = partition(40, 2);
        let initial = ParameterVector::zeros(2);

        let (params, metrics) = LocalTrainer::default().fit(&initial, &part, 0).unwrap();

        assert_eq!(params, initial);
        assert!((metrics.loss - std::f64::consts::LN_2).abs() < 1e-6);
        assert_eq!(metrics.num_examples, 40);
    }

    #[test]
    fn large_tolerance_stops_immediately() {
        let part = partition(40, 2);
        let initial = ParameterVector::zeros(2);

        let (params, _) = LocalTrainer::new(0.1, f32::MAX)
            .fit(&initial, &part, 100)
            .unwrap();

        assert_eq!(params, initial);
    }

    #[test]
    fn dimension_mismatch() {
        let part = partition(10, 2);
        let err = LocalTrainer::default()
            .fit(&ParameterVector::zeros(3), &part, 5)
            .unwrap_err();

        assert_eq!(
            err,
            TrainingError::ShapeMismatch {
                what: "parameter weights",
                got: 3,
                expected: 2
            }
        );
    }

    #[test]
    fn divergence_is_reported() {
        let ds = Dataset::new(
            1,
            vec![
                Sample::new(vec![1e30], 1.0),
                Sample::new(vec![-1e30], 0.0),
            ],
        );
        let part = select(&ds, NodeIdentity::new(0, 1).unwrap());

        let err = LocalTrainer::new(1e30, 0.0)
            .fit(&ParameterVector::zeros(1), &part, 10)
            .unwrap_err();

        assert!(matches!(err, TrainingError::NonFinite { .. }), "{err:?}");
    }

    #[test]
    fn non_finite_initial_parameters() {
        let part = partition(10, 1);
        let err = LocalTrainer::default()
            .fit(&ParameterVector::new(vec![f32::NAN], 0.0), &part, 5)
            .unwrap_err();

        assert_eq!(err, TrainingError::NonFinite { iteration: 0 });
    }

    #[test]
    fn cancelled_before_the_first_step() {
        let part = partition(10, 2);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = LocalTrainer::default()
            .fit_cancellable(&ParameterVector::zeros(2), &part, 5, &cancel)
            .unwrap_err();

        assert_eq!(err, TrainingError::Cancelled { iteration: 0 });
    }
}
