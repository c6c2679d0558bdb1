use std::io::Cursor;
use std::net::SocketAddr;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::debug;

use crate::frame::{self, Frame};

/// Read side of a peer socket. Data is read from the socket into the read
/// buffer; when a frame is parsed, the corresponding bytes are removed from
/// the buffer and handed back verbatim alongside the frame (replication
/// needs the raw form for propagation and offset accounting).
pub struct Connection {
    reader: OwnedReadHalf,
    buffer: BytesMut,
    pub addr: SocketAddr,
}

impl Connection {
    pub fn new(reader: OwnedReadHalf, addr: SocketAddr) -> Connection {
        Connection {
            reader,
            // Allocate the buffer with 4kb of capacity.
            buffer: BytesMut::with_capacity(4096),
            addr,
        }
    }

    /// Reads one frame, buffering until the codec has enough bytes. Returns
    /// `None` on a clean EOF at a frame boundary.
    pub async fn read_frame(&mut self) -> crate::Result<Option<(Frame, Bytes)>> {
        loop {
            let mut cursor = Cursor::new(&self.buffer[..]);
            match Frame::parse(&mut cursor) {
                Ok(frame) => {
                    let consumed = cursor.position() as usize;
                    let raw = self.buffer.split_to(consumed).freeze();
                    return Ok(Some((frame, raw)));
                }
                // Not enough data; fall through to read more.
                Err(frame::Error::Incomplete) => {}
                Err(err) => return Err(err.into()),
            }

            if self.reader.read_buf(&mut self.buffer).await? == 0 {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                return Err("connection reset by peer".into());
            }
        }
    }
}

/// Hands the write half to a dedicated task fed by a channel. Every write
/// goes through the returned sender, so concurrent producers (command
/// replies, replication fan-out, GETACK probes) can never interleave bytes
/// within a frame.
pub fn spawn_writer(mut writer: OwnedWriteHalf) -> UnboundedSender<Bytes> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();

    tokio::spawn(async move {
        while let Some(chunk) = rx.recv().await {
            if let Err(e) = writer.write_all(&chunk).await {
                debug!("peer write failed: {e}");
                break;
            }
        }
    });

    tx
}

/// Serializes `frame` into the connection's outbound channel. A closed
/// channel means the peer is gone; the read loop notices on its next step,
/// so the error is swallowed here.
pub fn send(outbound: &UnboundedSender<Bytes>, frame: &Frame) {
    let _ = outbound.send(Bytes::from(frame.serialize()));
}

/// Per-connection dispatcher state: the peer's identity and outbound
/// channel, the transaction buffer, and the raw bytes of the most recent
/// frame (replication propagates those verbatim).
pub struct Session {
    pub addr: SocketAddr,
    pub outbound: UnboundedSender<Bytes>,
    /// `Some` while a MULTI transaction is open; holds the queued frames.
    pub txn: Option<Vec<Frame>>,
    /// True on the connection a replica holds to its primary. Frames on
    /// that link are applied silently.
    pub replica_link: bool,
    pub raw: Bytes,
}

impl Session {
    pub fn client(addr: SocketAddr, outbound: UnboundedSender<Bytes>) -> Session {
        Session {
            addr,
            outbound,
            txn: None,
            replica_link: false,
            raw: Bytes::new(),
        }
    }

    pub fn to_primary(addr: SocketAddr, outbound: UnboundedSender<Bytes>) -> Session {
        Session {
            replica_link: true,
            ..Session::client(addr, outbound)
        }
    }
}
