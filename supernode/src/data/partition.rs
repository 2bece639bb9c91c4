use std::ops::Range;

use comms::NodeIdentity;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

use super::dataset::{Dataset, Sample};

/// Splits `total` samples among `num_nodes` and returns the block of `node_index`.
///
/// Properties:
/// - Ranges are contiguous, disjoint and cover `[0..total)`.
/// - Sizes differ by at most 1 (balanced partition), the first `total % num_nodes`
///   blocks holding the extra sample.
pub fn partition_range(total: usize, identity: NodeIdentity) -> Range<usize> {
    let node = identity.node_index() as usize;
    let nodes = identity.total_nodes() as usize;

    let base = total / nodes;
    let rem = total % nodes;

    let start = node * base + node.min(rem);
    let extra = if node < rem { 1 } else { 0 };
    let end = start + base + extra;

    start..end
}

/// Returns the partition of `dataset` owned by `identity`.
///
/// Pure function of its inputs: the same dataset and identity always yield the
/// same samples in the same order.
pub fn select(dataset: &Dataset, identity: NodeIdentity) -> DataPartition {
    let range = partition_range(dataset.len(), identity);
    DataPartition::from_samples(dataset.dim(), &dataset.samples()[range.clone()], range)
}

/// The node-local training data, stored as a design matrix and a label vector.
#[derive(Debug, Clone, PartialEq)]
pub struct DataPartition {
    range: Range<usize>,
    xs: Array2<f32>,
    ys: Array1<f32>,
}

impl DataPartition {
    /// # Panics
    /// If a sample doesn't hold exactly `dim` features, which `Dataset` rules out.
    fn from_samples(dim: usize, samples: &[Sample], range: Range<usize>) -> Self {
        let flat: Vec<f32> = samples
            .iter()
            .flat_map(|s| s.features.iter().copied())
            .collect();

        let xs = Array2::from_shape_vec((samples.len(), dim), flat)
            .expect("every dataset sample must hold `dim` features");
        let ys = samples.iter().map(|s| s.label).collect();

        Self { range, xs, ys }
    }

    /// Number of samples in the partition.
    #[inline]
    pub fn len(&self) -> usize {
        self.ys.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ys.is_empty()
    }

    /// Number of features per sample.
    #[inline]
    pub fn dim(&self) -> usize {
        self.xs.ncols()
    }

    /// The indices of the full dataset this partition was cut from.
    #[inline]
    pub fn range(&self) -> Range<usize> {
        self.range.clone()
    }

    #[inline]
    pub fn xs(&self) -> ArrayView2<'_, f32> {
        self.xs.view()
    }

    #[inline]
    pub fn ys(&self) -> ArrayView1<'_, f32> {
        self.ys.view()
    }

    /// Rebuilds the ordered samples of this partition.
    pub fn to_samples(&self) -> Vec<Sample> {
        self.xs
            .rows()
            .into_iter()
            .zip(self.ys.iter())
            .map(|(row, &label)| Sample::new(row.to_vec(), label))
            .collect()
    }
}
