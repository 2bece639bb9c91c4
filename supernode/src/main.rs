use std::{io, sync::Arc};

use clap::Parser;
use log::{error, info};
use tokio::signal;
use tokio_util::sync::CancellationToken;

use supernode::{
    Args, MetricsSink, NodeConfig, NodeErr, RoundClient, Termination, data::select,
};

#[tokio::main]
async fn main() -> io::Result<()> {
    env_logger::init();

    let config = NodeConfig::try_from(Args::parse()).map_err(NodeErr::from)?;
    let identity = config.identity;
    info!("starting node {identity}, aggregator at {}", config.addr);

    let mut sink = MetricsSink::new(
        &config.output_dir,
        &config.metrics_file,
        identity.node_index(),
    );

    let dataset = match config.source.load() {
        Ok(dataset) => dataset,
        Err(e) => {
            error!("{e}");
            sink.flush(&Termination::Failed {
                reason: e.to_string(),
            })?;
            return Err(NodeErr::from(e).into());
        }
    };

    let partition = select(&dataset, identity);
    info!(
        examples = partition.len(),
        start = partition.range().start,
        end = partition.range().end;
        "selected partition {identity}"
    );
    drop(dataset);

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_signal(cancel.clone()));

    let client = RoundClient::new(
        identity,
        config.trainer,
        Arc::new(partition),
        sink,
        config.session,
        cancel,
    );

    let report = client.run_tcp(&config.addr).await;
    info!(
        rounds = report.rounds_completed;
        "wrapping up, {}",
        report.termination
    );

    match report.termination {
        Termination::Failed { reason } => Err(io::Error::other(reason)),
        Termination::Completed | Termination::Cancelled => Ok(()),
    }
}

/// Cancels `cancel` on SIGINT, or SIGTERM on unix.
async fn cancel_on_signal(cancel: CancellationToken) {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("failed to install the SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        res = signal::ctrl_c() => {
            if let Err(e) = res {
                error!("failed to listen for SIGINT: {e}");
                return;
            }

            info!("received SIGINT");
        }
        _ = terminate => info!("received SIGTERM"),
    }

    cancel.cancel();
}
