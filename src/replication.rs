use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use rand::RngCore;
use tokio::net::TcpStream;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

use crate::commands::Command;
use crate::connection::{self, Connection, Session};
use crate::frame::Frame;
use crate::snapshot;
use crate::store::{State, Store};

/// 20 random bytes, hex-encoded: the instance's replication id.
pub fn generate_repl_id() -> String {
    let mut bytes = [0u8; 20];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// A connected follower, keyed in the instance state by the peer address
/// of its connection. Socket writes go through the connection's writer
/// task; this record only holds the sender side.
#[derive(Debug)]
pub struct Follower {
    pub capabilities: Vec<String>,
    pub listening_port: u16,
    /// Absolute replication offset this follower should reach once it has
    /// applied everything written to it. Zero until PSYNC seeds it from
    /// the primary's own offset, the frame ACKs report in.
    pub expected_offset: u64,
    /// Absolute offset carried by its most recent ACK, seeded alongside
    /// `expected_offset`.
    pub acked_offset: u64,
    pub outbound: UnboundedSender<Bytes>,
}

impl Follower {
    pub fn new(outbound: UnboundedSender<Bytes>) -> Follower {
        Follower {
            capabilities: Vec::new(),
            listening_port: 0,
            expected_offset: 0,
            acked_offset: 0,
            outbound,
        }
    }
}

/// Fans a replication-eligible frame out to every follower. The caller
/// holds the guard, so frames reach each follower in execution order.
pub fn propagate(state: &mut State, raw: &Bytes) {
    state.self_offset += raw.len() as u64;
    for follower in state.followers.values_mut() {
        let _ = follower.outbound.send(raw.clone());
        follower.expected_offset += raw.len() as u64;
    }
}

/// The WAIT barrier. Probes lagging followers with `REPLCONF GETACK *`,
/// then waits for ACKs until the deadline, holding the guard only for the
/// bookkeeping on either side of the wait. A follower counts once its
/// acked offset reaches the expected offset recorded before the probe.
pub async fn wait_for_acks(store: &Store, timeout_ms: u64) -> i64 {
    let mut acks = store.subscribe_acks();
    let getack = Bytes::from(Frame::command(&["REPLCONF", "GETACK", "*"]).serialize());

    let targets: Vec<(SocketAddr, u64)> = {
        let mut state = store.lock();
        if state.followers.is_empty() {
            return 0;
        }

        state
            .followers
            .iter_mut()
            .map(|(addr, follower)| {
                let target = follower.expected_offset;
                if follower.acked_offset < target {
                    let _ = follower.outbound.send(getack.clone());
                    follower.expected_offset += getack.len() as u64;
                }
                (*addr, target)
            })
            .collect()
    };

    let deadline = Instant::now() + Duration::from_millis(timeout_ms);

    loop {
        let acked = count_acked(&store.lock(), &targets);
        if acked == targets.len() {
            // Every follower is caught up; nothing more can arrive.
            return acked as i64;
        }

        tokio::select! {
            _ = time::sleep_until(deadline) => {
                return count_acked(&store.lock(), &targets) as i64;
            }
            changed = acks.changed() => {
                if changed.is_err() {
                    return count_acked(&store.lock(), &targets) as i64;
                }
            }
        }
    }
}

fn count_acked(state: &State, targets: &[(SocketAddr, u64)]) -> usize {
    targets
        .iter()
        .filter(|(addr, target)| {
            state
                .followers
                .get(addr)
                .is_some_and(|follower| follower.acked_offset >= *target)
        })
        .count()
}

/// Connects to the primary, runs the handshake, then turns the connection
/// into the apply loop for the replicated write stream.
pub async fn run_replica_link(
    store: Store,
    host: String,
    port: u16,
    listening_port: u16,
) -> crate::Result<()> {
    let socket = TcpStream::connect((host.as_str(), port)).await?;
    let addr = socket.peer_addr()?;
    let (read_half, write_half) = socket.into_split();
    let outbound = connection::spawn_writer(write_half);
    let mut conn = Connection::new(read_half, addr);

    handshake(&mut conn, &outbound, &store, listening_port).await?;
    info!("handshake with primary {host}:{port} complete");

    let mut session = Session::to_primary(addr, outbound);
    crate::server::process(&mut conn, &store, &mut session).await
}

async fn handshake(
    conn: &mut Connection,
    outbound: &UnboundedSender<Bytes>,
    store: &Store,
    listening_port: u16,
) -> crate::Result<()> {
    connection::send(outbound, &Frame::command(&["PING"]));
    expect_simple(conn, "PONG").await?;

    let port = listening_port.to_string();
    connection::send(
        outbound,
        &Frame::command(&["REPLCONF", "listening-port", &port]),
    );
    expect_simple(conn, "OK").await?;

    connection::send(
        outbound,
        &Frame::command(&["REPLCONF", "capa", "psync2", "capa", "eof"]),
    );
    expect_simple(conn, "OK").await?;

    connection::send(outbound, &Frame::command(&["PSYNC", "?", "-1"]));

    // +FULLRESYNC <replid> <offset>; the snapshot frame follows on the
    // same stream and is handled by the regular apply loop.
    let header = read_simple(conn).await?;
    let mut fields = header.split_whitespace();
    if fields.next() != Some("FULLRESYNC") {
        return Err(format!("unexpected PSYNC reply: {header}").into());
    }
    let repl_id = fields
        .next()
        .ok_or("FULLRESYNC is missing the replication id")?;
    let offset = fields
        .next()
        .ok_or("FULLRESYNC is missing the offset")?
        .parse::<u64>()?;

    let mut state = store.lock();
    state.repl_id = repl_id.to_string();
    state.self_offset = offset;

    Ok(())
}

async fn read_simple(conn: &mut Connection) -> crate::Result<String> {
    match conn.read_frame().await? {
        Some((Frame::Simple(s), _)) => Ok(s),
        Some((frame, _)) => Err(format!("expected a simple string, got {frame}").into()),
        None => Err("primary closed the connection during the handshake".into()),
    }
}

async fn expect_simple(conn: &mut Connection, expected: &str) -> crate::Result<()> {
    let reply = read_simple(conn).await?;
    if reply != expected {
        return Err(format!("expected +{expected}, got +{reply}").into());
    }
    Ok(())
}

/// Applies one frame arriving on the replica's link to its primary.
/// Snapshot frames install databases; command frames run silently. Only
/// GETACK produces a reply, carrying the offset from before this frame is
/// counted; every non-snapshot frame then advances the offset by its raw
/// byte length.
pub fn apply(frame: Frame, raw: &Bytes, store: &Store) -> crate::Result<Option<Frame>> {
    if let Frame::Snapshot(bytes) = &frame {
        let databases = snapshot::decode(bytes)?;
        store.lock().install_databases(databases);
        info!("installed snapshot from primary ({} bytes)", bytes.len());
        return Ok(None);
    }

    let mut stream_appended = false;
    let reply = {
        let mut state = store.lock();
        let reply = match Command::try_from(frame) {
            Ok(Command::Replconf(cmd)) if cmd.is_getack() => {
                let offset = state.self_offset.to_string();
                Some(Frame::command(&["REPLCONF", "ACK", &offset]))
            }
            Ok(cmd) => {
                let is_xadd = matches!(cmd, Command::XAdd(_));
                match cmd.apply(&mut state) {
                    Frame::Error(e) => warn!("replicated command failed: {e}"),
                    _ => stream_appended = is_xadd,
                }
                None
            }
            Err(e) => {
                debug!("ignoring unparseable replicated frame: {e}");
                None
            }
        };
        state.self_offset += raw.len() as u64;
        reply
    };

    if stream_appended {
        store.notify_stream_append();
    }

    Ok(reply)
}
