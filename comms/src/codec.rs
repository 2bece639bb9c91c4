//! Binary representation of a `ParameterVector`.
//!
//! Integers are big-endian, floats are IEEE-754 little-endian:
//!
//! ```text
//! v1: u16 version | u32 count | count * f32 weight | f32 bias
//! v2: u16 version | u64 count | count * f32 weight | f32 bias
//! ```
//!
//! `encode` always writes the current version, `decode` accepts every listed version.

use std::{error::Error, fmt, io};

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::ParameterVector;

pub const LEGACY_VERSION: u16 = 1;
pub const CURRENT_VERSION: u16 = 2;

const FLOAT_SIZE: usize = size_of::<f32>();

/// Failures while decoding a received parameter payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The buffer ends before `what` could be read.
    Truncated { what: &'static str },
    UnsupportedVersion(u16),
    /// The amount of bytes after the header doesn't match the declared count.
    LengthMismatch { declared: u64, got_bytes: usize },
    /// Component `index` is NaN or infinite, the bias being index `count`.
    NonFinite { index: usize },
    /// A node identity inside a frame is out of range.
    InvalidIdentity { node_index: u32, total_nodes: u32 },
    /// The frame kind byte is unknown.
    UnknownKind(u32),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Truncated { what } => write!(f, "payload truncated while reading {what}"),
            DecodeError::UnsupportedVersion(v) => write!(f, "unsupported codec version {v}"),
            DecodeError::LengthMismatch {
                declared,
                got_bytes,
            } => write!(
                f,
                "declared {declared} weights but {got_bytes} bytes follow the header"
            ),
            DecodeError::NonFinite { index } => {
                write!(f, "parameter component {index} is not finite")
            }
            DecodeError::InvalidIdentity {
                node_index,
                total_nodes,
            } => write!(f, "node index {node_index} out of range for {total_nodes} nodes"),
            DecodeError::UnknownKind(kind) => write!(f, "unknown frame kind {kind}"),
        }
    }
}

impl Error for DecodeError {}

/// Decode failures travel through the channel as `InvalidData` I/O errors.
impl From<DecodeError> for io::Error {
    fn from(value: DecodeError) -> Self {
        io::Error::new(io::ErrorKind::InvalidData, value)
    }
}

/// Returns the `DecodeError` carried by `err`, if any.
pub fn decode_error(err: &io::Error) -> Option<&DecodeError> {
    err.get_ref()?.downcast_ref::<DecodeError>()
}

/// Serializes `params` in the current wire version.
pub fn encode(params: &ParameterVector) -> Bytes {
    let mut buf = BytesMut::with_capacity(encoded_len(params));
    encode_into(params, &mut buf);
    buf.freeze()
}

/// Appends the current wire version of `params` to `buf`.
pub fn encode_into<B: BufMut>(params: &ParameterVector, buf: &mut B) {
    buf.put_u16(CURRENT_VERSION);
    buf.put_u64(params.dim() as u64);
    for &w in params.weights() {
        buf.put_f32_le(w);
    }
    buf.put_f32_le(params.bias());
}

/// The amount of bytes `encode` produces for `params`.
pub fn encoded_len(params: &ParameterVector) -> usize {
    size_of::<u16>() + size_of::<u64>() + (params.dim() + 1) * FLOAT_SIZE
}

/// Deserializes a parameter vector written by `encode` or by a legacy peer.
///
/// The whole of `buf` must be consumed, trailing or missing bytes are an error.
pub fn decode(mut buf: &[u8]) -> Result<ParameterVector, DecodeError> {
    let version = take_u16(&mut buf, "version")?;

    let count = match version {
        LEGACY_VERSION => take_u32(&mut buf, "weight count")? as u64,
        CURRENT_VERSION => take_u64(&mut buf, "weight count")?,
        other => return Err(DecodeError::UnsupportedVersion(other)),
    };

    let expected = usize::try_from(count)
        .ok()
        .and_then(|c| c.checked_add(1))
        .and_then(|c| c.checked_mul(FLOAT_SIZE));

    if expected != Some(buf.len()) {
        return Err(DecodeError::LengthMismatch {
            declared: count,
            got_bytes: buf.len(),
        });
    }

    let count = count as usize;
    let mut weights = Vec::with_capacity(count);
    for index in 0..count {
        weights.push(finite(buf.get_f32_le(), index)?);
    }
    let bias = finite(buf.get_f32_le(), count)?;

    Ok(ParameterVector::new(weights, bias))
}

fn finite(value: f32, index: usize) -> Result<f32, DecodeError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(DecodeError::NonFinite { index })
    }
}

pub(crate) fn take_u16(buf: &mut &[u8], what: &'static str) -> Result<u16, DecodeError> {
    ensure(buf, size_of::<u16>(), what)?;
    Ok(buf.get_u16())
}

pub(crate) fn take_u32(buf: &mut &[u8], what: &'static str) -> Result<u32, DecodeError> {
    ensure(buf, size_of::<u32>(), what)?;
    Ok(buf.get_u32())
}

pub(crate) fn take_u64(buf: &mut &[u8], what: &'static str) -> Result<u64, DecodeError> {
    ensure(buf, size_of::<u64>(), what)?;
    Ok(buf.get_u64())
}

pub(crate) fn take_f64(buf: &mut &[u8], what: &'static str) -> Result<f64, DecodeError> {
    ensure(buf, size_of::<f64>(), what)?;
    Ok(buf.get_f64_le())
}

fn ensure(buf: &[u8], needed: usize, what: &'static str) -> Result<(), DecodeError> {
    if buf.remaining() < needed {
        return Err(DecodeError::Truncated { what });
    }

    Ok(())
}
