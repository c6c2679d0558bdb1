use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, instrument, warn};

use crate::commands::Command;
use crate::connection::{self, Connection, Session};
use crate::frame::Frame;
use crate::replication;
use crate::store::Store;
use crate::Config;

pub async fn run(config: Config) -> crate::Result<()> {
    let _ = tracing_subscriber::fmt()
        .try_init()
        .map_err(|e| debug!("Failed to initialize global tracing: {e}"));

    let store = Store::new(&config);
    load_snapshot(&store, &config)?;

    if let Some((host, port)) = config.replicaof.clone() {
        let store = store.clone();
        let listening_port = config.port;
        tokio::spawn(async move {
            if let Err(e) = replication::run_replica_link(store, host, port, listening_port).await
            {
                error!("replica link failed: {e}");
            }
        });
    }

    let listener = TcpListener::bind(("0.0.0.0", config.port)).await?;
    info!("listening on {}", listener.local_addr()?);

    loop {
        let (socket, client_address) = listener.accept().await?;
        let store = store.clone();

        tokio::spawn(async move {
            if let Err(e) = handle_connection(socket, client_address, store).await {
                error!("connection error: {e}");
            }
        });
    }
}

fn load_snapshot(store: &Store, config: &Config) -> crate::Result<()> {
    let mut state = store.lock();
    match state.load() {
        Ok(true) => info!("loaded snapshot from {}", state.snapshot_path().display()),
        Ok(false) => info!("no snapshot at {}", state.snapshot_path().display()),
        // A missing file is routine; a corrupt one refuses startup, but
        // only when a snapshot directory was configured explicitly.
        Err(e) if config.dir.is_empty() => warn!("ignoring unreadable snapshot: {e}"),
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

#[instrument(
    name = "connection",
    skip(socket, store),
    fields(client_address = %client_address)
)]
async fn handle_connection(
    socket: TcpStream,
    client_address: SocketAddr,
    store: Store,
) -> crate::Result<()> {
    let (read_half, write_half) = socket.into_split();
    let outbound = connection::spawn_writer(write_half);
    let mut conn = Connection::new(read_half, client_address);
    let mut session = Session::client(client_address, outbound);

    let result = process(&mut conn, &store, &mut session).await;

    if let Err(e) = &result {
        // Give the peer a reason before tearing the connection down.
        connection::send(&session.outbound, &Frame::Error(format!("ERR {e}")));
    }

    // A follower registered on this connection dies with it.
    if store.lock().followers.remove(&client_address).is_some() {
        info!("removed follower {client_address}");
    }

    debug!("connection closed");
    result
}

/// Per-connection read loop, shared between client connections and the
/// replica's link to its primary.
pub async fn process(
    conn: &mut Connection,
    store: &Store,
    session: &mut Session,
) -> crate::Result<()> {
    while let Some((frame, raw)) = conn.read_frame().await? {
        debug!("received frame: {frame}");

        if session.replica_link {
            // Replicated frames apply silently; only GETACK is answered.
            if let Some(reply) = replication::apply(frame, &raw, store)? {
                connection::send(&session.outbound, &reply);
            }
            continue;
        }

        session.raw = raw;
        if let Some(reply) = dispatch(frame, store, session).await? {
            connection::send(&session.outbound, &reply);
        }
    }

    Ok(())
}

async fn dispatch(
    frame: Frame,
    store: &Store,
    session: &mut Session,
) -> crate::Result<Option<Frame>> {
    if matches!(frame, Frame::Snapshot(_)) {
        warn!("ignoring snapshot frame outside a replication link");
        return Ok(None);
    }

    // With a transaction open, everything but the transaction control
    // commands queues unvalidated; errors surface at EXEC.
    match session.txn.as_mut() {
        Some(queued) if !is_transaction_control(&frame) => {
            queued.push(frame);
            return Ok(Some(Frame::Simple("QUEUED".to_string())));
        }
        _ => {}
    }

    let cmd = match Command::try_from(frame) {
        Ok(cmd) => cmd,
        Err(e) => return Ok(Some(Frame::Error(format!("ERR {e}")))),
    };

    cmd.exec(store, session).await
}

fn is_transaction_control(frame: &Frame) -> bool {
    matches!(
        Command::name(frame).as_deref(),
        Some("multi") | Some("exec") | Some("discard")
    )
}
