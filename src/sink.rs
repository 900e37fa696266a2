//! Violation sink: the HTTP service monitors report violation frames to.
//!
//! Routes:
//! - `POST /api/quiz/store-violation-frame`
//! - `GET /api/quiz/get-violation-frames?quiz_id=..`
//! - `GET /health`
//!
//! Requests are served one at a time on the accept thread, which owns the
//! SQLite connection.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::http::{read_request, write_json_response, HttpRequest};
use crate::server::resolve_addr;
use crate::store::{FrameQuery, NewViolationFrame, ViolationFrameStore};

pub const STORE_PATH: &str = "/api/quiz/store-violation-frame";
pub const QUERY_PATH: &str = "/api/quiz/get-violation-frames";

/// Requests are served one at a time, so a silent client holds up everyone
/// behind it for this long. Keep it well under the reporter's default
/// `report_timeout_ms` (3 s).
const REQUEST_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    pub addr: String,
    pub db_path: PathBuf,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:3000".to_string(),
            db_path: PathBuf::from("violations.db"),
        }
    }
}

#[derive(Debug)]
pub struct SinkHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl SinkHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("violation sink thread panicked"))?;
        }
        Ok(())
    }
}

pub struct SinkServer {
    config: SinkConfig,
}

impl SinkServer {
    pub fn new(config: SinkConfig) -> Self {
        Self { config }
    }

    /// Open the database and bind. Either failing is returned to the caller.
    pub fn spawn(self) -> Result<SinkHandle> {
        let db_path = self
            .config
            .db_path
            .to_str()
            .ok_or_else(|| anyhow!("db_path is not valid UTF-8"))?;
        let store = ViolationFrameStore::open(db_path)
            .map_err(|e| anyhow!("open violation store {}: {}", db_path, e))?;
        let configured_addr = resolve_addr(&self.config.addr)
            .map_err(|e| anyhow!("addr {:?} is not a socket address: {}", self.config.addr, e))?;
        let listener = TcpListener::bind(configured_addr)
            .map_err(|e| anyhow!("bind {}: {}", configured_addr, e))?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let join = std::thread::spawn(move || {
            if let Err(err) = run_sink(listener, store, shutdown_thread) {
                log::error!("violation sink stopped: {}", err);
            }
        });
        log::info!("violation sink listening on {} (db {})", addr, db_path);

        Ok(SinkHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_sink(
    listener: TcpListener,
    mut store: ViolationFrameStore,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                if let Err(err) = handle_connection(stream, &mut store) {
                    log::warn!("sink request from {} failed: {}", peer, err);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn handle_connection(mut stream: TcpStream, store: &mut ViolationFrameStore) -> Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(REQUEST_TIMEOUT))?;
    stream.set_write_timeout(Some(REQUEST_TIMEOUT))?;

    let request = read_request(&mut stream)?;
    let (status, body) = route(&request, store);
    write_json_response(&mut stream, status, &body.to_string())
}

fn route(request: &HttpRequest, store: &mut ViolationFrameStore) -> (u16, serde_json::Value) {
    match (request.method.as_str(), request.path.as_str()) {
        ("POST", STORE_PATH) => store_frame(request, store),
        ("GET", QUERY_PATH) => query_frames(request, store),
        ("GET", "/health") => (200, json!({"status": "ok"})),
        (_, STORE_PATH) | (_, QUERY_PATH) | (_, "/health") => (
            405,
            json!({"success": false, "message": "Method not allowed"}),
        ),
        _ => (404, json!({"success": false, "message": "Not found"})),
    }
}

fn store_frame(request: &HttpRequest, store: &mut ViolationFrameStore) -> (u16, serde_json::Value) {
    let frame: NewViolationFrame = match serde_json::from_slice(&request.body) {
        Ok(frame) => frame,
        Err(err) => {
            log::debug!("rejecting violation frame body: {}", err);
            return (
                400,
                json!({"success": false, "message": "Request body must be a JSON object"}),
            );
        }
    };
    if !frame.missing_fields().is_empty() {
        return (
            400,
            json!({
                "success": false,
                "message": "Missing required fields for storing violation frame",
            }),
        );
    }

    match store.insert(&frame) {
        Ok(id) => {
            log::info!(
                "stored {} frame {} for {} in quiz {}",
                frame.violation_type.as_deref().unwrap_or_default(),
                id,
                frame.student_username.as_deref().unwrap_or_default(),
                frame.quiz_id.as_deref().unwrap_or_default()
            );
            (
                200,
                json!({
                    "success": true,
                    "message": "Violation frame stored successfully",
                    "frameId": id,
                }),
            )
        }
        Err(err) => {
            log::error!("failed to store violation frame: {}", err);
            (
                500,
                json!({"success": false, "message": "Failed to store violation frame"}),
            )
        }
    }
}

fn query_frames(request: &HttpRequest, store: &ViolationFrameStore) -> (u16, serde_json::Value) {
    let Some(quiz_id) = request.query_param("quiz_id") else {
        return (400, json!({"success": false, "message": "Quiz ID is required"}));
    };
    let owned = |name: &str| request.query_param(name).map(str::to_string);
    let query = FrameQuery {
        quiz_id: quiz_id.to_string(),
        student_username: owned("student_username"),
        violation_type: owned("violation_type"),
        start_date: owned("start_date"),
        end_date: owned("end_date"),
    };

    match store.query(&query) {
        Ok(rows) => (
            200,
            json!({
                "success": true,
                "message": "Violation frames retrieved successfully",
                "data": rows,
            }),
        ),
        Err(err) => {
            log::error!("failed to query violation frames: {}", err);
            (
                500,
                json!({"success": false, "message": "Failed to retrieve violation frames"}),
            )
        }
    }
}
