use std::{io, sync::Arc, time::Duration};

use comms::{
    NodeIdentity, OnoReceiver, OnoSender, ParameterVector, RoundMetrics, codec,
    msg::{Command, Msg, Payload},
};
use log::{debug, error, info, warn};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    task::{self, JoinHandle},
    time::{self, Instant},
};
use tokio_util::sync::CancellationToken;

use super::{
    net,
    retry::{Attempts, RetryPolicy},
    state::{ConnectionState, Termination},
};
use crate::{
    Result,
    data::DataPartition,
    error::{NodeErr, TrainingError, TransportError},
    metrics::MetricsSink,
    trainer::LocalTrainer,
};

pub const DEFAULT_MAX_ITERATIONS: usize = 100;
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

type FitResult = std::result::Result<(ParameterVector, RoundMetrics), TrainingError>;

/// Runtime bounds of a node's session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionOptions {
    /// Upper bound on the local gradient steps of every round.
    pub max_iterations: usize,
    pub retry: RetryPolicy,
    /// How long to wait for each reply of the aggregator.
    pub io_timeout: Duration,
    /// How long an interrupted fit may take to stop once cancelled.
    pub shutdown_grace: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            retry: RetryPolicy::default(),
            io_timeout: DEFAULT_IO_TIMEOUT,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

/// The outcome of a node's session.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub termination: Termination,
    /// Rounds whose update was acknowledged by the aggregator.
    pub rounds_completed: u64,
    /// Every state transition, in order.
    pub transitions: Vec<(ConnectionState, ConnectionState)>,
}

enum Instruction {
    Train { round: u64, params: ParameterVector },
    Stop(Option<String>),
}

enum Reply {
    Acked,
    Stopped(Option<String>),
}

/// Drives the round exchange with the aggregator.
///
/// A `RoundClient` is single use: `run` consumes it and always ends in
/// `ConnectionState::Terminated`, with the metrics sink flushed.
pub struct RoundClient {
    identity: NodeIdentity,
    trainer: LocalTrainer,
    partition: Arc<DataPartition>,
    sink: MetricsSink,
    options: SessionOptions,
    cancel: CancellationToken,

    state: ConnectionState,
    transitions: Vec<(ConnectionState, ConnectionState)>,
    rounds_completed: u64,
    last_round: Option<u64>,
    inflight: Option<JoinHandle<FitResult>>,
}

impl RoundClient {
    /// Creates a new `RoundClient`.
    ///
    /// # Arguments
    /// * `identity` - This node's position among its peers.
    /// * `trainer` - The local trainer.
    /// * `partition` - The node's read-only data partition.
    /// * `sink` - Where the last round's metrics end up.
    /// * `options` - Iteration, retry and timeout bounds.
    /// * `cancel` - Cancelled when the node must stop.
    pub fn new(
        identity: NodeIdentity,
        trainer: LocalTrainer,
        partition: Arc<DataPartition>,
        sink: MetricsSink,
        options: SessionOptions,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            identity,
            trainer,
            partition,
            sink,
            options,
            cancel,
            state: ConnectionState::Disconnected,
            transitions: Vec::new(),
            rounds_completed: 0,
            last_round: None,
            inflight: None,
        }
    }

    /// Connects to the aggregator at `addr` and runs the session over TCP.
    pub async fn run_tcp(self, addr: &str) -> RunReport {
        let cancel = self.cancel.clone();
        let retry = self.options.retry;
        let io_timeout = self.options.io_timeout;

        let connected = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(None),
            res = net::connect(addr, &retry, io_timeout) => res.map_err(Some),
        };

        match connected {
            Ok(stream) => {
                let (rx, tx) = stream.into_split();
                let (rx, tx) = comms::channel(rx, tx);
                self.run(rx, tx).await
            }
            Err(Some(e)) => self.finish(Termination::Failed {
                reason: NodeErr::from(e).to_string(),
            }),
            Err(None) => self.finish(Termination::Cancelled),
        }
    }

    /// Runs the session over an established channel until the aggregator stops
    /// it, a fatal error happens, or the node is cancelled.
    ///
    /// # Returns
    /// The `RunReport` of the session. Errors are not returned but folded into
    /// `RunReport::termination`.
    pub async fn run<R, W>(mut self, mut rx: OnoReceiver<R>, mut tx: OnoSender<W>) -> RunReport
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send,
    {
        let cancel = self.cancel.clone();

        let termination = tokio::select! {
            biased;
            _ = cancel.cancelled() => Termination::Cancelled,
            res = self.drive(&mut rx, &mut tx) => match res {
                Ok(termination) => termination,
                Err(NodeErr::Training(TrainingError::Cancelled { .. })) => Termination::Cancelled,
                Err(e) => Termination::Failed { reason: e.to_string() },
            },
        };

        if termination == Termination::Cancelled {
            self.abandon_fit().await;
        }

        match time::timeout(self.options.shutdown_grace, tx.shutdown()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("closing the aggregator stream: {e}"),
            Err(_) => debug!("closing the aggregator stream timed out"),
        }

        self.finish(termination)
    }

    async fn drive<R, W>(
        &mut self,
        rx: &mut OnoReceiver<R>,
        tx: &mut OnoSender<W>,
    ) -> Result<Termination>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send,
    {
        self.handshake(rx, tx).await?;

        loop {
            let (round, params) = match self.await_instruction(rx, tx).await? {
                Instruction::Train { round, params } => (round, params),
                Instruction::Stop(reason) => {
                    info!(
                        rounds = self.rounds_completed;
                        "aggregator stopped the session: {}",
                        reason.as_deref().unwrap_or("no reason given")
                    );
                    return Ok(Termination::Completed);
                }
            };

            self.transition(ConnectionState::Training)?;
            let (params, metrics) = self.train(round, params).await?;

            self.transition(ConnectionState::Sending)?;
            match self.send_update(rx, tx, params, metrics).await? {
                Reply::Acked => {
                    self.sink.record(metrics);
                    self.rounds_completed += 1;
                    self.last_round = Some(round);

                    info!(
                        round = round,
                        loss = metrics.loss,
                        accuracy = metrics.accuracy,
                        num_examples = metrics.num_examples;
                        "round completed"
                    );
                }
                Reply::Stopped(reason) => {
                    info!(
                        round = round;
                        "aggregator stopped the session before acknowledging: {}",
                        reason.as_deref().unwrap_or("no reason given")
                    );
                    return Ok(Termination::Completed);
                }
            }
        }
    }

    /// `Disconnected -> Connected`, re-sending `Hello` until `Welcome` arrives.
    async fn handshake<R, W>(
        &mut self,
        rx: &mut OnoReceiver<R>,
        tx: &mut OnoSender<W>,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let node_index = self.identity.node_index();
        let hello = Msg::Control(Command::Hello {
            identity: self.identity,
        });

        exchange(rx, tx, &hello, "handshake", &self.options, |msg| match msg {
            Msg::Control(Command::Welcome { node_index: i }) if i == node_index => Ok(Some(())),
            other => Err(unexpected(ConnectionState::Disconnected, other)),
        })
        .await?;

        info!("joined the federation as node {}", self.identity);
        self.transition(ConnectionState::Connected)
    }

    /// `Connected | Sending -> AwaitingInstruction`, then waits for `Train` or `Stop`.
    async fn await_instruction<R, W>(
        &mut self,
        rx: &mut OnoReceiver<R>,
        tx: &mut OnoSender<W>,
    ) -> Result<Instruction>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        self.transition(ConnectionState::AwaitingInstruction)?;

        let last_round = self.last_round;
        let request = Msg::Control(Command::RequestInstruction {
            node_index: self.identity.node_index(),
        });

        exchange(rx, tx, &request, "request instruction", &self.options, |msg| {
            match msg {
                Msg::Data(Payload::Train { round, .. })
                    if last_round.is_some_and(|last| round <= last) =>
                {
                    debug!(round = round; "ignoring instruction for an already trained round");
                    Ok(None)
                }
                Msg::Data(Payload::Train { round, params }) => {
                    Ok(Some(Instruction::Train { round, params }))
                }
                Msg::Control(Command::Stop { reason }) => Ok(Some(Instruction::Stop(reason))),
                Msg::Control(Command::Disconnect) => Ok(Some(Instruction::Stop(None))),
                Msg::Control(Command::UpdateAck { round }) => {
                    debug!(round = round; "ignoring stale update ack");
                    Ok(None)
                }
                Msg::Control(Command::Welcome { .. }) => Ok(None),
                other => Err(unexpected(ConnectionState::AwaitingInstruction, other)),
            }
        })
        .await
    }

    /// Fits the round's parameters on the blocking pool.
    async fn train(
        &mut self,
        round: u64,
        params: ParameterVector,
    ) -> Result<(ParameterVector, RoundMetrics)> {
        let trainer = self.trainer;
        let partition = Arc::clone(&self.partition);
        let cancel = self.cancel.clone();
        let max_iterations = self.options.max_iterations;

        debug!(round = round, examples = partition.len(); "training");

        let handle = self.inflight.insert(task::spawn_blocking(move || {
            trainer.fit_cancellable(&params, &partition, max_iterations, &cancel)
        }));

        let joined = handle.await;
        self.inflight = None;

        let (params, metrics) = joined.map_err(|e| NodeErr::Io(io::Error::other(e)))??;
        Ok((params, metrics.with_round(round)))
    }

    /// Sends the round's update, re-sending it until the aggregator acknowledges it.
    async fn send_update<R, W>(
        &mut self,
        rx: &mut OnoReceiver<R>,
        tx: &mut OnoSender<W>,
        params: ParameterVector,
        metrics: RoundMetrics,
    ) -> Result<Reply>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        if self.state != ConnectionState::Sending {
            return Err(NodeErr::InvalidTransition {
                from: self.state,
                to: ConnectionState::Sending,
            });
        }

        let round = metrics.round;
        let update = Msg::Data(Payload::Update {
            identity: self.identity,
            metrics,
            params,
        });

        exchange(rx, tx, &update, "send update", &self.options, |msg| match msg {
            Msg::Control(Command::UpdateAck { round: acked }) if acked == round => {
                Ok(Some(Reply::Acked))
            }
            Msg::Control(Command::UpdateAck { round: acked }) if acked < round => {
                debug!(round = acked; "ignoring stale update ack");
                Ok(None)
            }
            Msg::Data(Payload::Train { round: r, .. }) if r <= round => {
                debug!(round = r; "ignoring repeated instruction");
                Ok(None)
            }
            Msg::Control(Command::Stop { reason }) => Ok(Some(Reply::Stopped(reason))),
            Msg::Control(Command::Disconnect) => Ok(Some(Reply::Stopped(None))),
            other => Err(unexpected(ConnectionState::Sending, other)),
        })
        .await
    }

    fn transition(&mut self, to: ConnectionState) -> Result<()> {
        let from = self.state;
        if !from.can_transition_to(to) {
            return Err(NodeErr::InvalidTransition { from, to });
        }

        debug!("{from} -> {to}");
        self.transitions.push((from, to));
        self.state = to;
        Ok(())
    }

    /// Gives an interrupted fit `shutdown_grace` to observe the cancellation.
    async fn abandon_fit(&mut self) {
        let Some(handle) = self.inflight.take() else {
            return;
        };

        match time::timeout(self.options.shutdown_grace, handle).await {
            Ok(_) => debug!("interrupted fit stopped"),
            Err(_) => warn!("fit did not stop within the shutdown grace, abandoning it"),
        }
    }

    fn finish(mut self, termination: Termination) -> RunReport {
        if let Err(e) = self.transition(ConnectionState::Terminated) {
            warn!("{e}");
        }

        match &termination {
            Termination::Failed { reason } => {
                error!(rounds = self.rounds_completed; "session failed: {reason}")
            }
            other => info!(rounds = self.rounds_completed; "session {other}"),
        }

        if let Err(e) = self.sink.flush(&termination) {
            error!("failed to write {}: {e}", self.sink.path().display());
        }

        RunReport {
            termination,
            rounds_completed: self.rounds_completed,
            transitions: self.transitions,
        }
    }
}

/// Sends `request` and waits for a reply accepted by `handle`, re-sending the
/// request on every timed out attempt.
///
/// `handle` returns `Ok(None)` for messages that should be skipped without
/// consuming an attempt.
async fn exchange<R, W, T, F>(
    rx: &mut OnoReceiver<R>,
    tx: &mut OnoSender<W>,
    request: &Msg,
    op: &'static str,
    options: &SessionOptions,
    mut handle: F,
) -> Result<T>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    F: FnMut(Msg) -> Result<Option<T>>,
{
    let mut attempts = Attempts::new(&options.retry, op);

    loop {
        let attempt = attempts.attempt();
        match try_exchange(rx, tx, request, op, attempt, options.io_timeout, &mut handle).await {
            Ok(reply) => return Ok(reply),
            Err(NodeErr::Io(e)) => {
                if let Some(decode) = codec::decode_error(&e) {
                    return Err(NodeErr::Decode(decode.clone()));
                }

                attempts.backoff(e).await?;
            }
            Err(e) => return Err(e),
        }
    }
}

/// A single attempt of `exchange`, sharing one `io_timeout` deadline between
/// writing the request and reading the reply.
///
/// A write that misses the deadline may have left part of a frame on the
/// stream, so it fails the exchange for good instead of being retried.
async fn try_exchange<R, W, T, F>(
    rx: &mut OnoReceiver<R>,
    tx: &mut OnoSender<W>,
    request: &Msg,
    op: &'static str,
    attempt: u32,
    io_timeout: Duration,
    handle: &mut F,
) -> Result<T>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    F: FnMut(Msg) -> Result<Option<T>>,
{
    let deadline = Instant::now() + io_timeout;

    match time::timeout_at(deadline, tx.send(request)).await {
        Ok(sent) => sent?,
        Err(_) => {
            return Err(NodeErr::Transport(TransportError {
                op,
                attempts: attempt,
                source: io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("write not drained by the aggregator within {io_timeout:?}"),
                ),
            }));
        }
    }

    loop {
        let msg: Msg = match time::timeout_at(deadline, rx.recv::<Msg>()).await {
            Ok(msg) => msg?,
            Err(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("no reply within {io_timeout:?}"),
                )
                .into());
            }
        };

        if let Msg::Err(detail) = msg {
            return Err(NodeErr::Remote(detail));
        }

        if let Some(reply) = handle(msg)? {
            return Ok(reply);
        }
    }
}

fn unexpected(state: ConnectionState, msg: Msg) -> NodeErr {
    NodeErr::UnexpectedMessage {
        state,
        got: msg.kind(),
    }
}
