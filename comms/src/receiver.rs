use std::io;

use log::trace;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{Deserialize, LEN_TYPE_SIZE, LenType, MAX_FRAME_LEN};

/// The receiving end handle of the communication.
///
/// Partially read frames are kept inside the receiver, so a `recv` future that is
/// dropped (e.g. by a timeout) can be retried without losing stream alignment.
pub struct OnoReceiver<R: AsyncRead + Unpin> {
    rx: R,
    header: [u8; LEN_TYPE_SIZE],
    header_read: usize,
    buf: Vec<u8>,
    body_read: usize,
}

impl<R: AsyncRead + Unpin> OnoReceiver<R> {
    /// Creates a new `OnoReceiver` instance.
    ///
    /// # Arguments
    /// * `rx` - The underlying reader.
    pub(super) fn new(rx: R) -> Self {
        Self {
            rx,
            header: [0; LEN_TYPE_SIZE],
            header_read: 0,
            buf: Vec::new(),
            body_read: 0,
        }
    }

    /// Waits to receive a new message from the inner receiver.
    ///
    /// This method is cancel safe.
    ///
    /// # Returns
    /// A result object that returns `T` on success or `io::Error` on failure.
    /// A peer closing the stream surfaces as `io::ErrorKind::UnexpectedEof`, a frame
    /// that cannot be decoded as `io::ErrorKind::InvalidData`.
    pub async fn recv<T: Deserialize>(&mut self) -> io::Result<T> {
        while self.header_read < LEN_TYPE_SIZE {
            let n = self.rx.read(&mut self.header[self.header_read..]).await?;
            if n == 0 {
                return Err(closed());
            }

            self.header_read += n;

            if self.header_read == LEN_TYPE_SIZE {
                let len = LenType::from_be_bytes(self.header) as usize;
                if len > MAX_FRAME_LEN {
                    self.header_read = 0;
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("frame of {len} bytes exceeds the {MAX_FRAME_LEN} bytes limit"),
                    ));
                }

                self.buf.resize(len, 0);
                self.body_read = 0;
            }
        }

        while self.body_read < self.buf.len() {
            let n = self.rx.read(&mut self.buf[self.body_read..]).await?;
            if n == 0 {
                return Err(closed());
            }

            self.body_read += n;
        }

        self.header_read = 0;
        trace!(len = self.buf.len(); "received frame");

        T::deserialize(&self.buf)
    }
}

fn closed() -> io::Error {
    io::Error::new(io::ErrorKind::UnexpectedEof, "the peer closed the stream")
}
