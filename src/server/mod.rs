//! Monitoring server.
//!
//! Accept loop on a non-blocking listener; each connection gets its own
//! thread. `GET /monitor` (or `/`) starts a session that owns one capture
//! device and streams NDJSON status lines until the client goes away or the
//! server shuts down. `POST /sessions/<session_id>/stop` ends the sessions
//! carrying that id and leaves the others streaming.
//!
//! Responses before streaming starts:
//! - 409 when the camera is leased by another session
//! - 503 when the camera cannot be opened
//! - 404 / 405 for unknown paths and unsupported methods

mod registry;

pub use registry::{Registration, RegistrySnapshot, SessionEntry, SessionRegistry};

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::config::MonitorConfig;
use crate::http::{read_request, write_json_response, write_stream_header, HttpRequest};
use crate::ingest::{open_device, DeviceBusy, DevicePool};
use crate::monitor::MonitorSession;
use crate::status::NdjsonSink;
use crate::SessionIdentity;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(2);
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8765".to_string(),
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<()> {
        resolve_addr(&self.addr)
            .map_err(|e| anyhow!("server.addr {:?} is not a socket address: {}", self.addr, e))?;
        Ok(())
    }
}

/// Resolve `host:port`, accepting hostnames such as `localhost:8765` as well
/// as literal addresses. The first resolved address wins.
pub fn resolve_addr(addr: &str) -> Result<SocketAddr> {
    addr.to_socket_addrs()?
        .next()
        .ok_or_else(|| anyhow!("{} resolved to no addresses", addr))
}

#[derive(Debug)]
pub struct ServerHandle {
    pub addr: SocketAddr,
    registry: SessionRegistry,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ServerHandle {
    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Stop the sessions with this id; others keep streaming. Returns how
    /// many sessions were signalled.
    pub fn stop_session(&self, session_id: &str) -> usize {
        self.registry.stop_session(session_id)
    }

    /// Stop accepting, signal every session, and wait for them to finish.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("monitor server thread panicked"))?;
        }
        Ok(())
    }
}

struct ServerContext {
    config: MonitorConfig,
    pool: DevicePool,
    registry: SessionRegistry,
    shutdown: Arc<AtomicBool>,
}

pub struct MonitorServer {
    config: MonitorConfig,
}

impl MonitorServer {
    pub fn new(config: MonitorConfig) -> Self {
        Self { config }
    }

    /// Bind and start the accept loop. A bind failure is returned to the
    /// caller; nothing else in a session can stop the server.
    pub fn spawn(self) -> Result<ServerHandle> {
        self.config.validate()?;
        let configured_addr = resolve_addr(&self.config.server.addr)?;
        let listener = TcpListener::bind(configured_addr)
            .map_err(|e| anyhow!("bind {}: {}", configured_addr, e))?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let registry = SessionRegistry::new();
        let ctx = Arc::new(ServerContext {
            config: self.config,
            pool: DevicePool::new(),
            registry: registry.clone(),
            shutdown: shutdown.clone(),
        });

        let join = std::thread::spawn(move || {
            if let Err(err) = run_server(listener, ctx) {
                log::error!("monitor server stopped: {}", err);
            }
        });
        log::info!("monitor server listening on {}", addr);

        Ok(ServerHandle {
            addr,
            registry,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_server(listener: TcpListener, ctx: Arc<ServerContext>) -> Result<()> {
    let mut connections: Vec<JoinHandle<()>> = Vec::new();
    let result = loop {
        if ctx.shutdown.load(Ordering::SeqCst) {
            break Ok(());
        }
        connections.retain(|handle| !handle.is_finished());
        match listener.accept() {
            Ok((stream, peer)) => {
                let ctx = Arc::clone(&ctx);
                connections.push(std::thread::spawn(move || {
                    if let Err(err) = handle_connection(stream, &ctx) {
                        log::warn!("connection from {} rejected: {}", peer, err);
                    }
                }));
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => break Err(err.into()),
        }
    };

    for handle in connections {
        if handle.join().is_err() {
            log::error!("session thread panicked");
        }
    }
    result
}

fn handle_connection(mut stream: TcpStream, ctx: &ServerContext) -> Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(HANDSHAKE_TIMEOUT))?;
    stream.set_write_timeout(Some(WRITE_TIMEOUT))?;

    let request = read_request(&mut stream)?;
    if request.method == "POST" {
        return match stop_target(&request.path) {
            Some(session_id) => stop_session(stream, session_id, ctx),
            None => write_json_response(&mut stream, 405, r#"{"error":"method_not_allowed"}"#),
        };
    }
    if request.method != "GET" {
        write_json_response(&mut stream, 405, r#"{"error":"method_not_allowed"}"#)?;
        return Ok(());
    }
    match request.path.as_str() {
        "/health" => write_json_response(&mut stream, 200, r#"{"status":"ok"}"#),
        "/sessions" => {
            let body = serde_json::to_string(&ctx.registry.snapshot())?;
            write_json_response(&mut stream, 200, &body)
        }
        "/" | "/monitor" => start_session(stream, &request, ctx),
        _ => write_json_response(&mut stream, 404, r#"{"error":"not_found"}"#),
    }
}

/// `/sessions/<id>/stop` -> `<id>`.
fn stop_target(path: &str) -> Option<&str> {
    path.strip_prefix("/sessions/")?
        .strip_suffix("/stop")
        .filter(|id| !id.is_empty() && !id.contains('/'))
}

fn stop_session(mut stream: TcpStream, session_id: &str, ctx: &ServerContext) -> Result<()> {
    let stopped = ctx.registry.stop_session(session_id);
    if stopped == 0 {
        return write_json_response(&mut stream, 404, r#"{"error":"not_found"}"#);
    }
    log::info!("session {}: stop requested ({} active)", session_id, stopped);
    let body = serde_json::json!({ "stopped": stopped }).to_string();
    write_json_response(&mut stream, 200, &body)
}

fn start_session(mut stream: TcpStream, request: &HttpRequest, ctx: &ServerContext) -> Result<()> {
    let identity = SessionIdentity::from_query(&request.query);
    let mut session = match MonitorSession::new(identity.clone(), &ctx.config, ctx.shutdown.clone()) {
        Ok(session) => session,
        Err(err) => {
            write_json_response(&mut stream, 500, r#"{"error":"invalid_configuration"}"#)?;
            return Err(err);
        }
    };

    let lease = match open_device(&ctx.config.camera).and_then(|device| ctx.pool.acquire(device)) {
        Ok(lease) => lease,
        Err(err) if err.downcast_ref::<DeviceBusy>().is_some() => {
            write_json_response(&mut stream, 409, r#"{"error":"device_busy"}"#)?;
            return Err(err);
        }
        Err(err) => {
            write_json_response(&mut stream, 503, r#"{"error":"device_unavailable"}"#)?;
            return Err(err);
        }
    };

    write_stream_header(&mut stream, "application/x-ndjson")?;
    log::info!(
        "session {} connected (subject {}, quiz {})",
        identity.session_id,
        identity.subject_id,
        identity.quiz_id
    );

    let entry = ctx.registry.register(identity, lease.url());
    session = session.with_stop_signal(entry.stop_signal());
    let mut sink = NdjsonSink::new(stream);
    let report = session.run(lease, &mut sink);
    log::info!(
        "session {} disconnected: {:?}, {} frames, {} incidents, {} violation records",
        report.identity.session_id,
        report.end,
        report.frames_processed,
        report.incident_count,
        report.violations.len()
    );
    drop(entry);
    Ok(())
}
