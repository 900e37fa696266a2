//! proctord - attention monitoring server
//!
//! Each client connection (`GET /monitor?session_id=..&student_id=..&quiz_id=..`)
//! gets its own monitoring session on the configured camera and receives one
//! NDJSON status line per processed frame. Violation frames go to the
//! configured report URL, or to the local fallback directory.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::mpsc;

use gaze_witness::server::{resolve_addr, MonitorServer};
use gaze_witness::MonitorConfig;

#[derive(Parser, Debug)]
#[command(author, version, about = "Attention monitoring server")]
struct Args {
    /// Interface to listen on. Overrides `server.addr` from the config.
    #[arg(long, env = "PROCTORD_HOST")]
    host: Option<String>,

    /// Port to listen on. Overrides `server.addr` from the config.
    #[arg(long, env = "PROCTORD_PORT")]
    port: Option<u16>,

    /// JSON configuration file (same layout as `GAZE_CONFIG`).
    #[arg(long, env = "GAZE_CONFIG")]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut config = MonitorConfig::load_from(args.config.as_deref())?;
    if args.host.is_some() || args.port.is_some() {
        config.server.addr = override_addr(&config.server.addr, args.host, args.port)?;
    }

    log::info!(
        "camera {} at {} fps, warnings after {}s / {}s",
        config.camera.url,
        config.camera.target_fps,
        config.debounce.early_warning_secs,
        config.debounce.warning_secs
    );
    match &config.capture.report_url {
        Some(url) => log::info!("violation reports go to {}", url),
        None => log::warn!(
            "no report url configured; violation frames stay in {}",
            config.capture.fallback_dir.display()
        ),
    }

    let handle = MonitorServer::new(config).spawn()?;
    log::info!("proctord listening on {}", handle.addr);

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .expect("error setting Ctrl-C handler");

    let _ = rx.recv();
    log::info!(
        "shutdown signal received, stopping {} active session(s)...",
        handle.registry().len()
    );
    handle.stop()?;
    Ok(())
}

fn override_addr(current: &str, host: Option<String>, port: Option<u16>) -> Result<String> {
    let (current_host, current_port) = current
        .rsplit_once(':')
        .ok_or_else(|| anyhow!("server.addr {:?} has no port", current))?;
    let current_port: u16 = current_port
        .parse()
        .map_err(|e| anyhow!("server.addr {:?} has a bad port: {}", current, e))?;
    let host = host.unwrap_or_else(|| current_host.to_string());
    let port = port.unwrap_or(current_port);
    let addr = if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    };
    resolve_addr(&addr)
        .map_err(|e| anyhow!("--host/--port give invalid address {:?}: {}", addr, e))?;
    Ok(addr)
}
