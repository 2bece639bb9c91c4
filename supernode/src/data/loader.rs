use std::{
    fs,
    path::{Path, PathBuf},
};

use log::{debug, info};
use rand::{Rng, SeedableRng, rngs::StdRng};

use super::dataset::{Dataset, Sample};
use crate::error::DataError;

const LABEL_NOISE: f64 = 0.05;

/// Where the node's full dataset comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum DatasetSource {
    /// Every `*.csv` file inside the directory, read in file name order.
    Directory(PathBuf),
    /// A linearly separable dataset with label noise, generated from `seed`.
    Synthetic {
        seed: u64,
        samples: usize,
        features: usize,
    },
}

impl DatasetSource {
    /// Loads the full dataset.
    ///
    /// # Returns
    /// The dataset or a `DataError` if the files can't be read or parsed.
    pub fn load(&self) -> Result<Dataset, DataError> {
        let dataset = match self {
            DatasetSource::Directory(dir) => read_dir(dir)?,
            &DatasetSource::Synthetic {
                seed,
                samples,
                features,
            } => synthetic(seed, samples, features),
        };

        info!(samples = dataset.len(), dim = dataset.dim(); "dataset loaded");
        Ok(dataset)
    }
}

fn read_dir(dir: &Path) -> Result<Dataset, DataError> {
    let io_err = |source| DataError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "csv") {
            files.push(path);
        }
    }

    files.sort();

    let mut dim = None;
    let mut samples = Vec::new();

    for path in &files {
        debug!("reading {}", path.display());
        read_csv(path, &mut dim, &mut samples)?;
    }

    match dim {
        Some(dim) if !samples.is_empty() => Ok(Dataset::new(dim, samples)),
        _ => Err(DataError::Empty(dir.to_path_buf())),
    }
}

/// Appends the rows of `path` to `samples`, fixing `dim` on the first row seen.
fn read_csv(
    path: &Path,
    dim: &mut Option<usize>,
    samples: &mut Vec<Sample>,
) -> Result<(), DataError> {
    let content = fs::read_to_string(path).map_err(|source| DataError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    for (i, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let parse_err = |reason: String| DataError::Parse {
            path: path.to_path_buf(),
            line: i + 1,
            reason,
        };

        let mut values = Vec::new();
        for field in line.split(',') {
            let field = field.trim();
            let value = field
                .parse::<f32>()
                .map_err(|e| parse_err(format!("invalid number {field:?}: {e}")))?;

            if !value.is_finite() {
                return Err(parse_err(format!("value {field:?} is not finite")));
            }

            values.push(value);
        }

        let Some(label) = values.pop() else {
            return Err(parse_err("empty row".into()));
        };

        if values.is_empty() {
            return Err(parse_err("a row needs at least one feature and a label".into()));
        }

        if label != 0.0 && label != 1.0 {
            return Err(parse_err(format!("label must be 0 or 1, got {label}")));
        }

        let expected = *dim.get_or_insert(values.len());
        if values.len() != expected {
            return Err(parse_err(format!(
                "expected {expected} features, got {}",
                values.len()
            )));
        }

        samples.push(Sample::new(values, label));
    }

    Ok(())
}

/// Draws a hidden linear rule and labels uniform points by it, flipping a few labels.
fn synthetic(seed: u64, samples: usize, features: usize) -> Dataset {
    let mut rng = StdRng::seed_from_u64(seed);

    let rule: Vec<f32> = (0..features).map(|_| rng.random_range(-1.0..1.0)).collect();
    let offset: f32 = rng.random_range(-0.5..0.5);

    let samples = (0..samples)
        .map(|_| {
            let x: Vec<f32> = (0..features).map(|_| rng.random_range(-1.0..1.0)).collect();
            let z: f32 = x.iter().zip(&rule).map(|(x, w)| x * w).sum::<f32>() + offset;

            let mut label = z > 0.0;
            if rng.random_bool(LABEL_NOISE) {
                label = !label;
            }

            Sample::new(x, if label { 1.0 } else { 0.0 })
        })
        .collect();

    Dataset::new(features, samples)
}

#[cfg(test)]
mod tests {
    use std::{env, process};

    use super::*;

    struct TempDir(PathBuf);

    impl TempDir {
        fn new(name: &str) -> Self {
            let path = env::temp_dir().join(format!("supernode-loader-{name}-{}", process::id()));
            let _ = fs::remove_dir_all(&path);
            fs::create_dir_all(&path).unwrap();
            Self(path)
        }

        fn write(&self, file: &str, content: &str) {
            fs::write(self.0.join(file), content).unwrap();
        }
    }

    impl Drop for TempDir {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.0);
        }
    }

    #[test]
    fn reads_csv_files_in_name_order() {
        let dir = TempDir::new("order");
        dir.write("b.csv", "3.0,4.0,1\n");
        dir.write("a.csv", "# x1,x2,label\n1.0,2.0,0\n\n  5.5 , 6.5 , 1  \n");
        dir.write("notes.txt", "not,a,csv\n");

        let ds = DatasetSource::Directory(dir.0.clone()).load().unwrap();

        assert_eq!(ds.dim(), 2);
        assert_eq!(
            ds.samples(),
            &[
                Sample::new(vec![1.0, 2.0], 0.0),
                Sample::new(vec![5.5, 6.5], 1.0),
                Sample::new(vec![3.0, 4.0], 1.0),
            ]
        );
    }

    #[test]
    fn ragged_rows_are_rejected() {
        let dir = TempDir::new("ragged");
        dir.write("a.csv", "1.0,2.0,0\n1.0,1\n");

        let err = DatasetSource::Directory(dir.0.clone()).load().unwrap_err();
        assert!(matches!(err, DataError::Parse { line: 2, .. }), "{err}");
    }

    #[test]
    fn non_binary_labels_are_rejected() {
        let dir = TempDir::new("labels");
        dir.write("a.csv", "1.0,2.0,3\n");

        let err = DatasetSource::Directory(dir.0.clone()).load().unwrap_err();
        assert!(matches!(err, DataError::Parse { line: 1, .. }), "{err}");
    }

    #[test]
    fn directory_without_samples_is_empty() {
        let dir = TempDir::new("empty");
        dir.write("a.csv", "# only a comment\n");

        let err = DatasetSource::Directory(dir.0.clone()).load().unwrap_err();
        assert!(matches!(err, DataError::Empty(_)));
    }

    #[test]
    fn missing_directory_is_an_io_error() {
        let path = env::temp_dir().join("supernode-loader-does-not-exist");
        let err = DatasetSource::Directory(path).load().unwrap_err();
        assert!(matches!(err, DataError::Io { .. }));
    }

    #[test]
    fn synthetic_is_seeded() {
        let source = DatasetSource::Synthetic {
            seed: 42,
            samples: 64,
            features: 3,
        };

        let a = source.load().unwrap();
        let b = source.load().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_eq!(a.dim(), 3);
        assert!(a.samples().iter().all(|s| s.label == 0.0 || s.label == 1.0));

        let other = DatasetSource::Synthetic {
            seed: 43,
            samples: 64,
            features: 3,
        };
        assert_ne!(a, other.load().unwrap());
    }
}
