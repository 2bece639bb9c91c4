use std::io;

use bytes::BufMut;

use crate::{
    Deserialize, NodeIdentity, ParameterVector, RoundMetrics, Serialize,
    codec::{self, DecodeError, take_f64, take_u32, take_u64},
};

type Header = u32;
const HEADER_SIZE: usize = size_of::<Header>();

const ERR_KIND: Header = 0;
const CONTROL_KIND: Header = 1;
const TRAIN_KIND: Header = 2;
const UPDATE_KIND: Header = 3;

/// The payload data for the `Data` variant of the `Msg` enum.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Aggregator to node: train `params` for `round`.
    Train { round: u64, params: ParameterVector },
    /// Node to aggregator: the locally fitted parameters of `metrics.round`.
    Update {
        identity: NodeIdentity,
        metrics: RoundMetrics,
        params: ParameterVector,
    },
}

/// The command for the `Control` variant of the `Msg` enum.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    /// Node to aggregator: opens the session.
    Hello { identity: NodeIdentity },
    /// Aggregator to node: acknowledges `Hello`.
    Welcome { node_index: u32 },
    /// Node to aggregator: asks for the next instruction.
    RequestInstruction { node_index: u32 },
    /// Aggregator to node: the update for `round` was received.
    UpdateAck { round: u64 },
    /// Aggregator to node: there are no further rounds.
    Stop { reason: Option<String> },
    Disconnect,
}

/// The application layer message for the entire system.
#[derive(Debug, Clone, PartialEq)]
pub enum Msg {
    Control(Command),
    Data(Payload),
    Err(String),
}

impl Msg {
    /// Returns a short, stable description of the message kind for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Msg::Control(Command::Hello { .. }) => "control/hello",
            Msg::Control(Command::Welcome { .. }) => "control/welcome",
            Msg::Control(Command::RequestInstruction { .. }) => "control/request_instruction",
            Msg::Control(Command::UpdateAck { .. }) => "control/update_ack",
            Msg::Control(Command::Stop { .. }) => "control/stop",
            Msg::Control(Command::Disconnect) => "control/disconnect",
            Msg::Data(Payload::Train { .. }) => "data/train",
            Msg::Data(Payload::Update { .. }) => "data/update",
            Msg::Err(_) => "err",
        }
    }
}

impl<'a> Serialize<'a> for Msg {
    fn serialize(&'a self, buf: &mut Vec<u8>) -> Option<&'a [u8]> {
        match self {
            Msg::Err(e) => {
                buf.put_u32(ERR_KIND);
                Some(e.as_bytes())
            }
            Msg::Control(cmd) => {
                buf.put_u32(CONTROL_KIND);

                // SAFETY: Serialize impl for `Command` is derived and not implemented
                //         by hand. Nor has a non string-key map inside.
                serde_json::to_writer(buf, cmd).unwrap();
                None
            }
            Msg::Data(Payload::Train { round, params }) => {
                buf.put_u32(TRAIN_KIND);
                buf.put_u64(*round);
                codec::encode_into(params, buf);
                None
            }
            Msg::Data(Payload::Update {
                identity,
                metrics,
                params,
            }) => {
                buf.put_u32(UPDATE_KIND);
                buf.put_u64(metrics.round);
                buf.put_u32(identity.node_index());
                buf.put_u32(identity.total_nodes());
                buf.put_f64_le(metrics.loss);
                buf.put_f64_le(metrics.accuracy);
                buf.put_u64(metrics.num_examples);
                codec::encode_into(params, buf);
                None
            }
        }
    }
}

impl Deserialize for Msg {
    fn deserialize(buf: &[u8]) -> io::Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(DecodeError::Truncated { what: "frame kind" }.into());
        }

        let mut rest = buf;
        let kind = take_u32(&mut rest, "frame kind")?;

        match kind {
            ERR_KIND => {
                let string = std::str::from_utf8(rest)
                    .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;

                Ok(Self::Err(string.to_owned()))
            }
            CONTROL_KIND => {
                let cmd = serde_json::from_slice(rest)?;
                Ok(Self::Control(cmd))
            }
            TRAIN_KIND => {
                let round = take_u64(&mut rest, "round")?;
                let params = codec::decode(rest)?;
                Ok(Self::Data(Payload::Train { round, params }))
            }
            UPDATE_KIND => {
                let round = take_u64(&mut rest, "round")?;
                let node_index = take_u32(&mut rest, "node index")?;
                let total_nodes = take_u32(&mut rest, "total nodes")?;
                let identity = NodeIdentity::new(node_index, total_nodes).map_err(|e| {
                    DecodeError::InvalidIdentity {
                        node_index: e.node_index,
                        total_nodes: e.total_nodes,
                    }
                })?;

                let metrics = RoundMetrics {
                    round,
                    loss: take_f64(&mut rest, "loss")?,
                    accuracy: take_f64(&mut rest, "accuracy")?,
                    num_examples: take_u64(&mut rest, "example count")?,
                };

                let params = codec::decode(rest)?;
                Ok(Self::Data(Payload::Update {
                    identity,
                    metrics,
                    params,
                }))
            }
            other => Err(DecodeError::UnknownKind(other).into()),
        }
    }
}
