use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::SystemTime;

use bytes::Bytes;
use thiserror::Error as ThisError;
use tokio::sync::watch;

use crate::replication::Follower;
use crate::snapshot;
use crate::stream::{IdError, IdSpec, Stream, StreamId, StreamRecord, ZERO_ID};
use crate::Config;

/// Errors surfaced to clients as simple-error replies.
#[derive(Debug, ThisError, PartialEq)]
pub enum StoreError {
    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,
    #[error("ERR value is not an integer or out of range")]
    NotAnInteger,
    #[error("ERR {0}")]
    Id(#[from] IdError),
}

/// Cloneable handle to the process-wide instance state. All shared state
/// sits behind one coordination guard; the two watch channels broadcast
/// "a stream grew" and "a follower acknowledged" so blocked XREAD and WAIT
/// callers wake without polling.
#[derive(Clone)]
pub struct Store {
    shared: Arc<Shared>,
}

struct Shared {
    state: Mutex<State>,
    stream_events: watch::Sender<u64>,
    ack_events: watch::Sender<u64>,
}

impl Store {
    pub fn new(config: &Config) -> Store {
        let mut databases = HashMap::new();
        databases.insert(0, Database::default());

        let (role, repl_id, self_offset) = match &config.replicaof {
            // The replica learns its id from the primary's FULLRESYNC.
            Some((host, port)) => (
                Role::Replica {
                    primary_addr: format!("{host}:{port}"),
                },
                "?".to_string(),
                0,
            ),
            None => (Role::Primary, crate::replication::generate_repl_id(), 0),
        };

        let state = State {
            repl_id,
            self_offset,
            role,
            followers: HashMap::new(),
            active_db: 0,
            databases,
            dir: config.dir.clone(),
            dbfilename: config.dbfilename.clone(),
        };

        Store {
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                stream_events: watch::channel(0).0,
                ack_events: watch::channel(0).0,
            }),
        }
    }

    /// Acquires the coordination guard. Held for the duration of one
    /// dispatched command; never across an await point.
    pub fn lock(&self) -> MutexGuard<'_, State> {
        self.shared.state.lock().unwrap()
    }

    pub fn subscribe_streams(&self) -> watch::Receiver<u64> {
        self.shared.stream_events.subscribe()
    }

    pub fn subscribe_acks(&self) -> watch::Receiver<u64> {
        self.shared.ack_events.subscribe()
    }

    pub fn notify_stream_append(&self) {
        self.shared
            .stream_events
            .send_modify(|version| *version = version.wrapping_add(1));
    }

    pub fn notify_ack(&self) {
        self.shared
            .ack_events
            .send_modify(|version| *version = version.wrapping_add(1));
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Role {
    Primary,
    Replica { primary_addr: String },
}

impl Role {
    /// Role name as reported by INFO.
    pub fn wire_name(&self) -> &'static str {
        match self {
            Role::Primary => "master",
            Role::Replica { .. } => "slave",
        }
    }
}

pub struct State {
    /// 40-char hex replication id; `?` on a replica before FULLRESYNC.
    pub repl_id: String,
    /// Byte length of the replication stream produced (primary) or
    /// consumed (replica) so far.
    pub self_offset: u64,
    pub role: Role,
    /// Follower records, keyed by the peer address of their connection.
    pub followers: HashMap<SocketAddr, Follower>,
    pub active_db: usize,
    pub databases: HashMap<usize, Database>,
    pub dir: String,
    pub dbfilename: String,
}

impl State {
    /// The active database. Selecting a missing index creates it.
    fn db(&mut self) -> &mut Database {
        self.databases.entry(self.active_db).or_default()
    }

    pub fn select(&mut self, index: usize) {
        self.active_db = index;
        self.databases.entry(index).or_default();
    }

    pub fn set(&mut self, key: String, value: Bytes, expires_at: Option<SystemTime>) {
        self.db()
            .entries
            .insert(key, Value::String(StringEntry { value, expires_at }));
    }

    pub fn get(&mut self, key: &str) -> Result<Option<Bytes>, StoreError> {
        let db = self.db();
        match db.entries.get(key) {
            Some(Value::String(entry)) => {
                if entry.is_expired() {
                    db.entries.remove(key);
                    return Ok(None);
                }
                Ok(Some(entry.value.clone()))
            }
            Some(Value::Stream(_)) => Err(StoreError::WrongType),
            None => Ok(None),
        }
    }

    /// Removes a key of any type. Expired strings count as absent.
    pub fn remove(&mut self, key: &str) -> bool {
        let db = self.db();
        match db.entries.get(key) {
            Some(Value::String(entry)) if entry.is_expired() => {
                db.entries.remove(key);
                false
            }
            Some(_) => {
                db.entries.remove(key);
                true
            }
            None => false,
        }
    }

    /// Atomic read-modify-write. A missing key counts from zero.
    pub fn incr(&mut self, key: &str) -> Result<i64, StoreError> {
        let db = self.db();
        let current = match db.entries.get(key) {
            Some(Value::String(entry)) if entry.is_expired() => 0,
            Some(Value::String(entry)) => std::str::from_utf8(&entry.value)
                .ok()
                .and_then(|s| s.parse::<i64>().ok())
                .ok_or(StoreError::NotAnInteger)?,
            Some(Value::Stream(_)) => return Err(StoreError::WrongType),
            None => 0,
        };

        let next = current.checked_add(1).ok_or(StoreError::NotAnInteger)?;
        let expires_at = match db.entries.get(key) {
            Some(Value::String(entry)) if !entry.is_expired() => entry.expires_at,
            _ => None,
        };
        db.entries.insert(
            key.to_string(),
            Value::String(StringEntry {
                value: Bytes::from(next.to_string()),
                expires_at,
            }),
        );

        Ok(next)
    }

    pub fn key_type(&mut self, key: &str) -> &'static str {
        let db = self.db();
        match db.entries.get(key) {
            Some(Value::String(entry)) if entry.is_expired() => {
                db.entries.remove(key);
                "none"
            }
            Some(Value::String(_)) => "string",
            Some(Value::Stream(_)) => "stream",
            None => "none",
        }
    }

    /// Live string keys of the active database, unordered.
    pub fn string_keys(&mut self) -> Vec<String> {
        self.db()
            .entries
            .iter()
            .filter_map(|(key, value)| match value {
                Value::String(entry) if !entry.is_expired() => Some(key.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn xadd(
        &mut self,
        key: &str,
        spec: IdSpec,
        fields: Vec<(String, String)>,
        now_ms: u64,
    ) -> Result<StreamId, StoreError> {
        let db = self.db();
        match db.entries.get_mut(key) {
            Some(Value::Stream(stream)) => {
                let id = stream.next_id(spec, now_ms)?;
                stream.add(id, fields);
                Ok(id)
            }
            Some(Value::String(_)) => Err(StoreError::WrongType),
            // A rejected id must not leave an empty stream behind, so the
            // key is only inserted once validation passed.
            None => {
                let mut stream = Stream::new();
                let id = stream.next_id(spec, now_ms)?;
                stream.add(id, fields);
                db.entries.insert(key.to_string(), Value::Stream(stream));
                Ok(id)
            }
        }
    }

    pub fn xrange(
        &mut self,
        key: &str,
        start: StreamId,
        end: StreamId,
    ) -> Result<Vec<StreamRecord>, StoreError> {
        match self.db().entries.get(key) {
            Some(Value::Stream(stream)) => Ok(stream.range(start, end).cloned().collect()),
            Some(Value::String(_)) => Err(StoreError::WrongType),
            None => Ok(Vec::new()),
        }
    }

    /// Entries strictly newer than `cutoff`. A missing stream is empty: it
    /// may yet be created while an XREAD blocks on it.
    pub fn stream_entries_after(
        &mut self,
        key: &str,
        cutoff: StreamId,
    ) -> Result<Vec<StreamRecord>, StoreError> {
        match self.db().entries.get(key) {
            Some(Value::Stream(stream)) => Ok(stream.after(cutoff).cloned().collect()),
            Some(Value::String(_)) => Err(StoreError::WrongType),
            None => Ok(Vec::new()),
        }
    }

    /// Resolves the `$` cutoff: the stream head at the moment of the call.
    pub fn stream_last_id(&mut self, key: &str) -> StreamId {
        match self.db().entries.get(key) {
            Some(Value::Stream(stream)) => stream.last_id,
            _ => ZERO_ID,
        }
    }

    pub fn snapshot_path(&self) -> PathBuf {
        if self.dir.is_empty() {
            PathBuf::from(&self.dbfilename)
        } else {
            PathBuf::from(&self.dir).join(&self.dbfilename)
        }
    }

    /// Flushes all databases to the snapshot file.
    pub fn save(&self) -> std::io::Result<()> {
        let encoded = snapshot::encode(&self.databases);
        std::fs::write(self.snapshot_path(), encoded)
    }

    /// Loads the snapshot file if one exists. `Ok(false)` means there was
    /// nothing to load; decode failures bubble up.
    pub fn load(&mut self) -> Result<bool, snapshot::Error> {
        let bytes = match std::fs::read(self.snapshot_path()) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(snapshot::Error::Io(e)),
        };

        self.install_databases(snapshot::decode(&bytes)?);
        Ok(true)
    }

    /// Replaces the database slots present in `databases`, e.g. from a
    /// snapshot file or a full-resync transfer.
    pub fn install_databases(&mut self, databases: HashMap<usize, Database>) {
        for (index, database) in databases {
            self.databases.insert(index, database);
        }
    }

    /// Bare primary state for unit tests.
    #[cfg(test)]
    pub(crate) fn for_tests() -> State {
        State {
            repl_id: crate::replication::generate_repl_id(),
            self_offset: 0,
            role: Role::Primary,
            followers: HashMap::new(),
            active_db: 0,
            databases: HashMap::from([(0, Database::default())]),
            dir: String::new(),
            dbfilename: "dump.rdb".to_string(),
        }
    }
}

/// One logical database: a single keyspace of tagged values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Database {
    pub entries: HashMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(StringEntry),
    Stream(Stream),
}

#[derive(Debug, Clone, PartialEq)]
pub struct StringEntry {
    pub value: Bytes,
    pub expires_at: Option<SystemTime>,
}

impl StringEntry {
    pub fn is_expired(&self) -> bool {
        matches!(self.expires_at, Some(at) if at <= SystemTime::now())
    }
}
