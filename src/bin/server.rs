use clap::Parser;
use replidis::{server, Config, Error};

#[derive(Parser, Debug)]
struct Args {
    /// The port to listen on
    #[arg(long, default_value_t = 6379)]
    port: u16,
    /// "<host> <port>" of the primary to follow; empty runs as primary
    #[arg(long, default_value = "")]
    replicaof: String,
    /// Directory holding the snapshot file
    #[arg(long, default_value = "")]
    dir: String,
    /// Snapshot file name
    #[arg(long, default_value = "dump.rdb")]
    dbfilename: String,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    let config = Config {
        port: args.port,
        replicaof: Config::parse_replicaof(&args.replicaof)?,
        dir: args.dir,
        dbfilename: args.dbfilename,
    };

    server::run(config).await
}
