use std::{path::PathBuf, time::Duration};

use clap::Parser;
use comms::NodeIdentity;

use crate::{
    client::{RetryPolicy, SessionOptions},
    data::DatasetSource,
    error::ConfigError,
    metrics::DEFAULT_METRICS_FILE,
    trainer::LocalTrainer,
};

/// Command line flags of the `supernode` binary, every one of them with an
/// environment variable fallback.
#[derive(Debug, Clone, Parser)]
#[command(version, about = "Federated learning node: trains a linear classifier on its local partition")]
pub struct Args {
    /// Zero based index of this node.
    #[arg(long, env = "NODE_INDEX")]
    pub node_index: u32,

    /// Amount of nodes in the federation, this one included.
    #[arg(long, env = "TOTAL_NODES", default_value_t = 3)]
    pub total_nodes: u32,

    #[arg(long, env = "SUPERLINK_HOST", default_value = "127.0.0.1")]
    pub host: String,

    #[arg(long, env = "SUPERLINK_PORT", default_value_t = 9092)]
    pub port: u16,

    /// Upper bound on the local gradient steps per round.
    #[arg(long, env = "LOCAL_ITERATIONS", default_value_t = 100)]
    pub max_iterations: usize,

    #[arg(long, env = "LEARNING_RATE", default_value_t = 0.1)]
    pub learning_rate: f32,

    /// Local training stops once the gradient norm drops below this value.
    #[arg(long, env = "TOLERANCE", default_value_t = 1e-6)]
    pub tolerance: f32,

    /// Attempts per network operation, the first one included.
    #[arg(long, env = "RETRY_ATTEMPTS", default_value_t = 5)]
    pub retry_attempts: u32,

    #[arg(long, env = "RETRY_BACKOFF_MS", default_value_t = 200)]
    pub retry_backoff_ms: u64,

    #[arg(long, env = "RETRY_MAX_BACKOFF_MS", default_value_t = 5000)]
    pub retry_max_backoff_ms: u64,

    /// How long to wait for each reply of the aggregator.
    #[arg(long, env = "IO_TIMEOUT_MS", default_value_t = 30_000)]
    pub io_timeout_ms: u64,

    #[arg(long, env = "SHUTDOWN_GRACE_MS", default_value_t = 2000)]
    pub shutdown_grace_ms: u64,

    /// Seed of the synthetic dataset, used when no input directory is given.
    #[arg(long, env = "DATA_SEED", default_value_t = 42)]
    pub data_seed: u64,

    #[arg(long, env = "SYNTHETIC_SAMPLES", default_value_t = 1000)]
    pub synthetic_samples: usize,

    #[arg(long, env = "SYNTHETIC_FEATURES", default_value_t = 4)]
    pub synthetic_features: usize,

    /// Directory with the `*.csv` input files.
    #[arg(long, env = "INPUT_DIR")]
    pub input_dir: Option<PathBuf>,

    #[arg(long, env = "OUTPUT_DIR", default_value = ".")]
    pub output_dir: PathBuf,

    #[arg(long, env = "METRICS_FILE", default_value = DEFAULT_METRICS_FILE)]
    pub metrics_file: String,
}

/// The validated, immutable configuration of a node.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub identity: NodeIdentity,
    /// The aggregator's `host:port`.
    pub addr: String,
    pub trainer: LocalTrainer,
    pub session: SessionOptions,
    pub source: DatasetSource,
    pub output_dir: PathBuf,
    pub metrics_file: String,
}

impl TryFrom<Args> for NodeConfig {
    type Error = ConfigError;

    fn try_from(args: Args) -> Result<Self, Self::Error> {
        let identity = NodeIdentity::new(args.node_index, args.total_nodes)?;

        if !(args.learning_rate.is_finite() && args.learning_rate > 0.0) {
            return Err(invalid("learning rate", "must be a positive number"));
        }

        if !(args.tolerance.is_finite() && args.tolerance >= 0.0) {
            return Err(invalid("tolerance", "must be a non negative number"));
        }

        if args.retry_attempts == 0 {
            return Err(invalid("retry attempts", "at least one attempt is needed"));
        }

        if args.retry_backoff_ms > args.retry_max_backoff_ms {
            return Err(invalid(
                "retry backoff",
                "the initial backoff exceeds the maximum backoff",
            ));
        }

        if args.io_timeout_ms == 0 {
            return Err(invalid("io timeout", "must be greater than zero"));
        }

        if args.host.trim().is_empty() {
            return Err(invalid("host", "must not be empty"));
        }

        if args.metrics_file.is_empty() || args.metrics_file.contains(['/', '\\']) {
            return Err(invalid("metrics file", "must be a plain file name"));
        }

        let source = match args.input_dir {
            Some(dir) => DatasetSource::Directory(dir),
            None => {
                if args.synthetic_samples == 0 || args.synthetic_features == 0 {
                    return Err(invalid(
                        "synthetic dataset",
                        "needs at least one sample and one feature",
                    ));
                }

                DatasetSource::Synthetic {
                    seed: args.data_seed,
                    samples: args.synthetic_samples,
                    features: args.synthetic_features,
                }
            }
        };

        let session = SessionOptions {
            max_iterations: args.max_iterations,
            retry: RetryPolicy {
                max_attempts: args.retry_attempts,
                initial_backoff: Duration::from_millis(args.retry_backoff_ms),
                max_backoff: Duration::from_millis(args.retry_max_backoff_ms),
            },
            io_timeout: Duration::from_millis(args.io_timeout_ms),
            shutdown_grace: Duration::from_millis(args.shutdown_grace_ms),
        };

        Ok(Self {
            identity,
            addr: format!("{}:{}", args.host, args.port),
            trainer: LocalTrainer::new(args.learning_rate, args.tolerance),
            session,
            source,
            output_dir: args.output_dir,
            metrics_file: args.metrics_file,
        })
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.to_string(),
    }
}
