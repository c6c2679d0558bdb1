use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::time::{sleep, Duration};

use replidis::connection::Connection;
use replidis::frame::Frame;
use replidis::{server, Config};

struct Client {
    conn: Connection,
    writer: OwnedWriteHalf,
}

impl Client {
    async fn connect(port: u16) -> Client {
        let stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let addr = stream.peer_addr().unwrap();
        let (read_half, writer) = stream.into_split();
        Client {
            conn: Connection::new(read_half, addr),
            writer,
        }
    }

    async fn send(&mut self, parts: &[&str]) {
        self.writer
            .write_all(&Frame::command(parts).serialize())
            .await
            .unwrap();
    }

    async fn send_raw(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).await.unwrap();
    }

    async fn reply(&mut self) -> (Frame, Bytes) {
        self.conn
            .read_frame()
            .await
            .unwrap()
            .expect("server closed the connection")
    }

    async fn roundtrip(&mut self, parts: &[&str]) -> Frame {
        self.send(parts).await;
        self.reply().await.0
    }
}

async fn start_server(config: Config) -> u16 {
    let port = config.port;
    tokio::spawn(async move {
        let _ = server::run(config).await;
    });
    sleep(Duration::from_millis(150)).await;
    port
}

fn config(port: u16) -> Config {
    Config {
        port,
        replicaof: None,
        dir: String::new(),
        dbfilename: "dump.rdb".to_string(),
    }
}

fn simple(s: &str) -> Frame {
    Frame::Simple(s.to_string())
}

fn bulk(s: &str) -> Frame {
    Frame::Bulk(Bytes::copy_from_slice(s.as_bytes()))
}

#[tokio::test]
async fn ping_and_echo() {
    let port = start_server(config(7801)).await;
    let mut client = Client::connect(port).await;

    client.send_raw(b"*1\r\n$4\r\nPING\r\n").await;
    let (frame, raw) = client.reply().await;
    assert_eq!(frame, simple("PONG"));
    assert_eq!(raw, Bytes::from_static(b"+PONG\r\n"));

    assert_eq!(client.roundtrip(&["ECHO", "hello"]).await, bulk("hello"));
}

#[tokio::test]
async fn set_get_with_expiry() {
    let port = start_server(config(7802)).await;
    let mut client = Client::connect(port).await;

    assert_eq!(client.roundtrip(&["SET", "k", "v", "PX", "100"]).await, simple("OK"));
    assert_eq!(client.roundtrip(&["GET", "k"]).await, bulk("v"));

    sleep(Duration::from_millis(150)).await;

    let (frame, raw) = {
        client.send(&["GET", "k"]).await;
        client.reply().await
    };
    assert_eq!(frame, Frame::Null);
    assert_eq!(raw, Bytes::from_static(b"$-1\r\n"));

    assert_eq!(client.roundtrip(&["TYPE", "k"]).await, simple("none"));
}

#[tokio::test]
async fn incr_creates_and_increments() {
    let port = start_server(config(7803)).await;
    let mut client = Client::connect(port).await;

    assert_eq!(client.roundtrip(&["INCR", "n"]).await, Frame::Integer(1));
    assert_eq!(client.roundtrip(&["INCR", "n"]).await, Frame::Integer(2));

    assert_eq!(client.roundtrip(&["SET", "n", "abc"]).await, simple("OK"));
    assert_eq!(
        client.roundtrip(&["INCR", "n"]).await,
        Frame::Error("ERR value is not an integer or out of range".to_string())
    );
}

#[tokio::test]
async fn xadd_validates_ids() {
    let port = start_server(config(7804)).await;
    let mut client = Client::connect(port).await;

    let reply = client.roundtrip(&["XADD", "s", "0-0", "f", "v"]).await;
    assert_eq!(
        reply,
        Frame::Error("ERR The ID specified in XADD must be greater than 0-0".to_string())
    );

    assert_eq!(client.roundtrip(&["XADD", "s", "0-1", "f", "v"]).await, bulk("0-1"));

    let reply = client.roundtrip(&["XADD", "s", "0-1", "f", "v"]).await;
    assert_eq!(
        reply,
        Frame::Error(
            "ERR The ID specified in XADD is equal or smaller than the target stream top item"
                .to_string()
        )
    );

    assert_eq!(client.roundtrip(&["XADD", "s", "1-*", "f", "v"]).await, bulk("1-0"));
}

#[tokio::test]
async fn xrange_returns_inclusive_window() {
    let port = start_server(config(7805)).await;
    let mut client = Client::connect(port).await;

    for seq in 1..=3 {
        let id = format!("5-{seq}");
        client
            .roundtrip(&["XADD", "s", &id, "n", &seq.to_string()])
            .await;
    }

    let reply = client.roundtrip(&["XRANGE", "s", "5-1", "5-2"]).await;
    assert_eq!(
        reply,
        Frame::Array(vec![
            Frame::Array(vec![
                bulk("5-1"),
                Frame::Array(vec![bulk("n"), bulk("1")]),
            ]),
            Frame::Array(vec![
                bulk("5-2"),
                Frame::Array(vec![bulk("n"), bulk("2")]),
            ]),
        ])
    );

    // Aliases cover the whole stream.
    let Frame::Array(all) = client.roundtrip(&["XRANGE", "s", "-", "+"]).await else {
        panic!("expected array");
    };
    assert_eq!(all.len(), 3);
}

#[tokio::test]
async fn transactions_queue_and_execute() {
    let port = start_server(config(7806)).await;
    let mut client = Client::connect(port).await;

    assert_eq!(client.roundtrip(&["MULTI"]).await, simple("OK"));
    assert_eq!(client.roundtrip(&["INCR", "x"]).await, simple("QUEUED"));
    assert_eq!(client.roundtrip(&["INCR", "x"]).await, simple("QUEUED"));

    let (frame, raw) = {
        client.send(&["EXEC"]).await;
        client.reply().await
    };
    assert_eq!(
        frame,
        Frame::Array(vec![Frame::Integer(1), Frame::Integer(2)])
    );
    assert_eq!(raw, Bytes::from_static(b"*2\r\n:1\r\n:2\r\n"));

    assert_eq!(
        client.roundtrip(&["DISCARD"]).await,
        Frame::Error("ERR DISCARD without MULTI".to_string())
    );
    assert_eq!(
        client.roundtrip(&["EXEC"]).await,
        Frame::Error("ERR EXEC without MULTI".to_string())
    );

    // Empty transaction.
    assert_eq!(client.roundtrip(&["MULTI"]).await, simple("OK"));
    assert_eq!(client.roundtrip(&["EXEC"]).await, Frame::Array(vec![]));

    // Queued errors surface at EXEC without aborting the batch.
    assert_eq!(client.roundtrip(&["MULTI"]).await, simple("OK"));
    assert_eq!(client.roundtrip(&["SET", "only-key"]).await, simple("QUEUED"));
    assert_eq!(client.roundtrip(&["INCR", "x"]).await, simple("QUEUED"));
    let Frame::Array(replies) = client.roundtrip(&["EXEC"]).await else {
        panic!("expected array");
    };
    assert!(matches!(replies[0], Frame::Error(_)));
    assert_eq!(replies[1], Frame::Integer(3));

    // A discarded transaction leaves no trace.
    assert_eq!(client.roundtrip(&["MULTI"]).await, simple("OK"));
    assert_eq!(client.roundtrip(&["INCR", "x"]).await, simple("QUEUED"));
    assert_eq!(client.roundtrip(&["DISCARD"]).await, simple("OK"));
    assert_eq!(client.roundtrip(&["INCR", "x"]).await, Frame::Integer(4));
}

#[tokio::test]
async fn unknown_commands_are_reported() {
    let port = start_server(config(7807)).await;
    let mut client = Client::connect(port).await;

    assert_eq!(
        client.roundtrip(&["FROBNICATE", "x"]).await,
        Frame::Error("ERR unknown command 'frobnicate'".to_string())
    );
}

#[tokio::test]
async fn keys_select_and_info() {
    let port = start_server(config(7808)).await;
    let mut client = Client::connect(port).await;

    client.roundtrip(&["SET", "alpha", "1"]).await;
    client.roundtrip(&["SET", "beta", "2"]).await;

    assert_eq!(
        client.roundtrip(&["KEYS", "*"]).await,
        Frame::Array(vec![bulk("alpha"), bulk("beta")])
    );

    // Databases are isolated and created on first reference.
    assert_eq!(client.roundtrip(&["SELECT", "4"]).await, simple("OK"));
    assert_eq!(client.roundtrip(&["GET", "alpha"]).await, Frame::Null);
    assert_eq!(client.roundtrip(&["SELECT", "0"]).await, simple("OK"));
    assert_eq!(client.roundtrip(&["GET", "alpha"]).await, bulk("1"));

    let Frame::Bulk(info) = client.roundtrip(&["INFO", "replication"]).await else {
        panic!("expected bulk INFO reply");
    };
    let info = String::from_utf8(info.to_vec()).unwrap();
    assert!(info.contains("role:master"));
    assert!(info.contains("master_replid:"));
    assert!(info.contains("master_repl_offset:"));
}

#[tokio::test]
async fn config_get_reports_persistence_settings() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(7809);
    cfg.dir = dir.path().to_str().unwrap().to_string();
    let port = start_server(cfg).await;
    let mut client = Client::connect(port).await;

    let reply = client.roundtrip(&["CONFIG", "GET", "dir", "dbfilename"]).await;
    assert_eq!(
        reply,
        Frame::Array(vec![
            bulk("dir"),
            bulk(dir.path().to_str().unwrap()),
            bulk("dbfilename"),
            bulk("dump.rdb"),
        ])
    );
}

#[tokio::test]
async fn save_then_reload_from_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let dir_string = dir.path().to_str().unwrap().to_string();

    let mut cfg = config(7810);
    cfg.dir = dir_string.clone();
    let port = start_server(cfg).await;
    let mut client = Client::connect(port).await;

    client.roundtrip(&["SET", "persisted", "yes"]).await;
    client.roundtrip(&["SET", "volatile", "x", "PX", "10"]).await;
    sleep(Duration::from_millis(30)).await;
    assert_eq!(client.roundtrip(&["SAVE"]).await, simple("OK"));

    // A fresh instance pointed at the same directory starts from the file.
    let mut cfg = config(7811);
    cfg.dir = dir_string;
    let port = start_server(cfg).await;
    let mut client = Client::connect(port).await;

    assert_eq!(client.roundtrip(&["GET", "persisted"]).await, bulk("yes"));
    // The expired entry was not saved.
    assert_eq!(client.roundtrip(&["GET", "volatile"]).await, Frame::Null);
}

#[tokio::test]
async fn xread_blocks_until_concurrent_xadd() {
    let port = start_server(config(7812)).await;
    let mut reader = Client::connect(port).await;
    let mut writer = Client::connect(port).await;

    reader
        .send(&["XREAD", "BLOCK", "5000", "STREAMS", "s", "$"])
        .await;
    // Let the read arrive and park before appending.
    sleep(Duration::from_millis(200)).await;

    assert_eq!(
        writer.roundtrip(&["XADD", "s", "7-1", "f", "v"]).await,
        bulk("7-1")
    );

    let (frame, _) = reader.reply().await;
    assert_eq!(
        frame,
        Frame::Array(vec![Frame::Array(vec![
            bulk("s"),
            Frame::Array(vec![Frame::Array(vec![
                bulk("7-1"),
                Frame::Array(vec![bulk("f"), bulk("v")]),
            ])]),
        ])])
    );
}

#[tokio::test]
async fn xread_block_timeout_returns_null() {
    let port = start_server(config(7813)).await;
    let mut client = Client::connect(port).await;

    let reply = client
        .roundtrip(&["XREAD", "BLOCK", "50", "STREAMS", "nothing", "$"])
        .await;
    assert_eq!(reply, Frame::Null);
}

#[tokio::test]
async fn replica_follows_primary() {
    let primary_port = start_server(config(7814)).await;

    let mut replica_cfg = config(7815);
    replica_cfg.replicaof = Some(("127.0.0.1".to_string(), primary_port));
    let replica_port = start_server(replica_cfg).await;

    // Leave room for the handshake and the snapshot transfer.
    sleep(Duration::from_millis(300)).await;

    let mut primary = Client::connect(primary_port).await;
    let mut replica = Client::connect(replica_port).await;

    let Frame::Bulk(info) = replica.roundtrip(&["INFO", "replication"]).await else {
        panic!("expected bulk INFO reply");
    };
    assert!(String::from_utf8(info.to_vec()).unwrap().contains("role:slave"));

    assert_eq!(primary.roundtrip(&["SET", "k", "v"]).await, simple("OK"));

    // The WAIT barrier probes the follower and collects its ACK.
    assert_eq!(
        primary.roundtrip(&["WAIT", "1", "2000"]).await,
        Frame::Integer(1)
    );

    assert_eq!(replica.roundtrip(&["GET", "k"]).await, bulk("v"));

    // DEL propagates too.
    assert_eq!(primary.roundtrip(&["DEL", "k"]).await, Frame::Integer(1));
    assert_eq!(
        primary.roundtrip(&["WAIT", "1", "2000"]).await,
        Frame::Integer(1)
    );
    assert_eq!(replica.roundtrip(&["GET", "k"]).await, Frame::Null);
}

#[tokio::test]
async fn replica_receives_existing_data_through_snapshot() {
    let primary_port = start_server(config(7816)).await;
    let mut primary = Client::connect(primary_port).await;

    // Data written before the replica ever connects.
    primary.roundtrip(&["SET", "seeded", "1"]).await;

    let mut replica_cfg = config(7817);
    replica_cfg.replicaof = Some(("127.0.0.1".to_string(), primary_port));
    let replica_port = start_server(replica_cfg).await;
    sleep(Duration::from_millis(300)).await;

    let mut replica = Client::connect(replica_port).await;
    assert_eq!(replica.roundtrip(&["GET", "seeded"]).await, bulk("1"));

    // Writes after the join stack on top of the seeded baseline; the WAIT
    // barrier must still line up with the replica's absolute ACK offsets.
    assert_eq!(primary.roundtrip(&["SET", "w1", "a"]).await, simple("OK"));
    assert_eq!(
        primary.roundtrip(&["WAIT", "1", "2000"]).await,
        Frame::Integer(1)
    );
    assert_eq!(replica.roundtrip(&["GET", "w1"]).await, bulk("a"));

    // A second round: a WAIT here must not be satisfied by the ACK that
    // answered the previous one.
    assert_eq!(primary.roundtrip(&["SET", "w2", "b"]).await, simple("OK"));
    assert_eq!(
        primary.roundtrip(&["WAIT", "1", "2000"]).await,
        Frame::Integer(1)
    );
    assert_eq!(replica.roundtrip(&["GET", "w2"]).await, bulk("b"));
}

#[tokio::test]
async fn wait_reports_zero_without_followers() {
    let port = start_server(config(7818)).await;
    let mut client = Client::connect(port).await;

    assert_eq!(
        client.roundtrip(&["WAIT", "0", "500"]).await,
        Frame::Integer(0)
    );
}
