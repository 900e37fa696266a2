//! violation_sink - stores violation frames reported by proctord
//!
//! Serves `POST /api/quiz/store-violation-frame` and
//! `GET /api/quiz/get-violation-frames` over a SQLite database.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::mpsc;

use gaze_witness::sink::{SinkConfig, SinkServer, QUERY_PATH, STORE_PATH};

#[derive(Parser, Debug)]
#[command(author, version, about = "Violation frame sink backed by SQLite")]
struct Args {
    /// Address to listen on.
    #[arg(long, env = "VIOLATION_SINK_ADDR", default_value = "127.0.0.1:3000")]
    addr: String,

    /// Path to the SQLite database.
    #[arg(long, env = "VIOLATION_SINK_DB", default_value = "violations.db")]
    db_path: PathBuf,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let handle = SinkServer::new(SinkConfig {
        addr: args.addr,
        db_path: args.db_path,
    })
    .spawn()?;
    log::info!(
        "violation_sink running on {}: POST {} / GET {}",
        handle.addr,
        STORE_PATH,
        QUERY_PATH
    );

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .expect("error setting Ctrl-C handler");

    let _ = rx.recv();
    log::info!("shutdown signal received, stopping violation sink...");
    handle.stop()?;
    Ok(())
}
