use std::{
    fs, io,
    path::{Path, PathBuf},
};

use comms::RoundMetrics;
use log::{debug, info};
use serde::Serialize;

use crate::client::Termination;

pub const DEFAULT_METRICS_FILE: &str = "client_metrics.json";

/// The JSON document written at the end of a session.
#[derive(Debug, Serialize)]
struct Artifact<'a> {
    round: u64,
    loss: f64,
    accuracy: f64,
    num_examples: u64,
    partition_id: u32,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'a str>,
}

/// Holds the metrics of the latest training round and writes them once, when
/// the session ends.
#[derive(Debug)]
pub struct MetricsSink {
    path: PathBuf,
    partition_id: u32,
    latest: Option<RoundMetrics>,
    flushed: bool,
}

impl MetricsSink {
    /// Creates a new `MetricsSink`.
    ///
    /// # Arguments
    /// * `output_dir` - The directory the artifact is written to, created on flush.
    /// * `file_name` - The artifact's file name.
    /// * `partition_id` - The partition this node trained on.
    pub fn new(output_dir: impl AsRef<Path>, file_name: &str, partition_id: u32) -> Self {
        Self {
            path: output_dir.as_ref().join(file_name),
            partition_id,
            latest: None,
            flushed: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replaces the held metrics with `metrics`.
    pub fn record(&mut self, metrics: RoundMetrics) {
        debug!(round = metrics.round; "recording round metrics");
        self.latest = Some(metrics);
    }

    /// Writes the held metrics, or a zeroed record if no round completed.
    ///
    /// The document is written next to its final path and renamed into place,
    /// so readers never observe a partial file.
    ///
    /// # Returns
    /// `Ok(true)` if the artifact was written, `Ok(false)` if a previous call
    /// already did.
    pub fn flush(&mut self, termination: &Termination) -> io::Result<bool> {
        if self.flushed {
            return Ok(false);
        }

        let metrics = self.latest.unwrap_or_else(RoundMetrics::zeroed);
        let artifact = Artifact {
            round: metrics.round,
            loss: metrics.loss,
            accuracy: metrics.accuracy,
            num_examples: metrics.num_examples,
            partition_id: self.partition_id,
            status: termination.status(),
            message: termination.message(),
        };

        let json = serde_json::to_vec_pretty(&artifact)?;

        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;

        self.flushed = true;
        info!(status = termination.status(); "metrics written to {}", self.path.display());

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use std::{env, process};

    use serde_json::Value;

    use super::*;

    fn out_dir(name: &str) -> PathBuf {
        let dir = env::temp_dir().join(format!("supernode-metrics-{name}-{}", process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    fn read(path: &Path) -> Value {
        serde_json::from_slice(&fs::read(path).unwrap()).unwrap()
    }

    #[test]
    fn writes_the_latest_round_once() {
        let dir = out_dir("once");
        let mut sink = MetricsSink::new(&dir, DEFAULT_METRICS_FILE, 2);

        sink.record(RoundMetrics {
            round: 1,
            loss: 0.6,
            accuracy: 0.5,
            num_examples: 10,
        });
        sink.record(RoundMetrics {
            round: 2,
            loss: 0.4,
            accuracy: 0.75,
            num_examples: 10,
        });

        assert!(sink.flush(&Termination::Completed).unwrap());
        assert!(!sink.flush(&Termination::Cancelled).unwrap());

        let doc = read(sink.path());
        assert_eq!(doc["round"], 2);
        assert_eq!(doc["loss"], 0.4);
        assert_eq!(doc["accuracy"], 0.75);
        assert_eq!(doc["num_examples"], 10);
        assert_eq!(doc["partition_id"], 2);
        assert_eq!(doc["status"], "completed");
        assert!(doc.get("message").is_none());

        let mut tmp = sink.path().to_path_buf().into_os_string();
        tmp.push(".tmp");
        assert!(!PathBuf::from(tmp).exists());

        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn zeroed_record_when_nothing_was_recorded() {
        let dir = out_dir("zeroed");
        let mut sink = MetricsSink::new(&dir, "out.json", 0);

        let failed = Termination::Failed {
            reason: "connect failed".into(),
        };
        assert!(sink.flush(&failed).unwrap());

        let doc = read(&dir.join("out.json"));
        assert_eq!(doc["round"], 0);
        assert_eq!(doc["loss"], 0.0);
        assert_eq!(doc["accuracy"], 0.0);
        assert_eq!(doc["num_examples"], 0);
        assert_eq!(doc["status"], "failed");
        assert_eq!(doc["message"], "connect failed");

        fs::remove_dir_all(dir).unwrap();
    }
}
