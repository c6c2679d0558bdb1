pub mod commands;
pub mod connection;
pub mod frame;
pub mod replication;
pub mod server;
pub mod snapshot;
pub mod store;
pub mod stream;

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Result<T> = std::result::Result<T, Error>;

/// Runtime settings, normally produced from the CLI flags.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// Address of the primary to follow. `None` makes this instance the
    /// primary.
    pub replicaof: Option<(String, u16)>,
    pub dir: String,
    pub dbfilename: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            port: 6379,
            replicaof: None,
            dir: String::new(),
            dbfilename: "dump.rdb".to_string(),
        }
    }
}

impl Config {
    /// Parses the `--replicaof` flag value, a `"<host> <port>"` pair. An
    /// empty string means no primary.
    pub fn parse_replicaof(raw: &str) -> Result<Option<(String, u16)>> {
        if raw.is_empty() {
            return Ok(None);
        }

        let mut fields = raw.split_whitespace();
        let host = fields
            .next()
            .ok_or("replicaof expects \"<host> <port>\"")?
            .to_string();
        let port = fields
            .next()
            .ok_or("replicaof expects \"<host> <port>\"")?
            .parse::<u16>()?;

        Ok(Some((host, port)))
    }
}
