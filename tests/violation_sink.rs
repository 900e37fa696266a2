use std::net::TcpStream;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use gaze_witness::sink::{SinkConfig, SinkHandle, SinkServer, QUERY_PATH, STORE_PATH};
use gaze_witness::{
    ChannelSink, DevicePool, Disposition, HttpReporter, MonitorConfig, MonitorSession,
    SessionIdentity, SyntheticCamera, ViolationReport, ViolationReporter,
};

fn spawn_sink(dir: &tempfile::TempDir) -> SinkHandle {
    SinkServer::new(SinkConfig {
        addr: "127.0.0.1:0".to_string(),
        db_path: dir.path().join("violations.db"),
    })
    .spawn()
    .expect("spawn sink")
}

fn get_json(url: &str) -> (u16, serde_json::Value) {
    let response = match ureq::get(url).call() {
        Ok(response) => response,
        Err(ureq::Error::Status(_, response)) => response,
        Err(err) => panic!("request failed: {}", err),
    };
    let status = response.status();
    let body = response.into_string().expect("body");
    (status, serde_json::from_str(&body).expect("json body"))
}

fn post_json(url: &str, body: &str) -> (u16, serde_json::Value) {
    let response = match ureq::post(url)
        .set("Content-Type", "application/json")
        .send_string(body)
    {
        Ok(response) => response,
        Err(ureq::Error::Status(_, response)) => response,
        Err(err) => panic!("request failed: {}", err),
    };
    let status = response.status();
    let body = response.into_string().expect("body");
    (status, serde_json::from_str(&body).expect("json body"))
}

#[test]
fn reporter_round_trip_and_filters() {
    let dir = tempfile::tempdir().unwrap();
    let sink = spawn_sink(&dir);
    let base = format!("http://{}", sink.addr);

    let reporter = HttpReporter::new(format!("{}{}", base, STORE_PATH), Duration::from_secs(2))
        .expect("reporter");
    for (student, kind, ts) in [
        ("alice", "early_warning", "2024-05-01T10:00:00.000Z"),
        ("alice", "major_violation", "2024-05-01T10:00:04.000Z"),
        ("bob", "early_warning", "2024-05-01T10:30:00.000Z"),
    ] {
        reporter
            .report(&ViolationReport {
                quiz_id: "quiz-7".to_string(),
                student_username: student.to_string(),
                violation_type: kind.to_string(),
                frame_data: "/9j/AAAA".to_string(),
                timestamp: ts.to_string(),
            })
            .expect("report accepted");
    }

    let (status, body) = get_json(&format!("{}{}?quiz_id=quiz-7", base, QUERY_PATH));
    assert_eq!(status, 200);
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], "Violation frames retrieved successfully");
    let rows = body["data"].as_array().expect("rows");
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0]["student_username"], "bob");
    assert_eq!(rows[2]["timestamp"], "2024-05-01T10:00:00.000Z");

    let (_, body) = get_json(&format!(
        "{}{}?quiz_id=quiz-7&student_username=alice&violation_type=major_violation",
        base, QUERY_PATH
    ));
    assert_eq!(body["data"].as_array().map(Vec::len), Some(1));

    let (_, body) = get_json(&format!(
        "{}{}?quiz_id=quiz-7&end_date=2024-05-01T10:00:01.000Z",
        base, QUERY_PATH
    ));
    assert_eq!(body["data"][0]["violation_type"], "early_warning");
    assert_eq!(body["data"].as_array().map(Vec::len), Some(1));

    let (_, body) = get_json(&format!("{}{}?quiz_id=other", base, QUERY_PATH));
    assert_eq!(body["data"].as_array().map(Vec::len), Some(0));

    sink.stop().unwrap();
}

#[test]
fn rejects_incomplete_requests() {
    let dir = tempfile::tempdir().unwrap();
    let sink = spawn_sink(&dir);
    let base = format!("http://{}", sink.addr);

    let (status, body) = post_json(
        &format!("{}{}", base, STORE_PATH),
        r#"{"quiz_id":"q","student_username":"alice"}"#,
    );
    assert_eq!(status, 400);
    assert_eq!(body["success"], false);
    assert_eq!(body["message"], "Missing required fields for storing violation frame");

    let (status, body) = get_json(&format!("{}{}", base, QUERY_PATH));
    assert_eq!(status, 400);
    assert_eq!(body["message"], "Quiz ID is required");

    let (status, body) = post_json(
        &format!("{}{}", base, STORE_PATH),
        r#"{"quiz_id":"q","student_username":"alice","violation_type":"early_warning","frame_data":"AA"}"#,
    );
    assert_eq!(status, 200);
    assert_eq!(body["message"], "Violation frame stored successfully");
    assert_eq!(body["frameId"], 1);

    sink.stop().unwrap();
}

#[test]
fn silent_client_does_not_starve_reporter() {
    let dir = tempfile::tempdir().unwrap();
    let sink = spawn_sink(&dir);

    // Connects and never sends a request line.
    let _idle = TcpStream::connect(sink.addr).expect("idle connect");
    std::thread::sleep(Duration::from_millis(100));

    let reporter = HttpReporter::new(
        format!("http://{}{}", sink.addr, STORE_PATH),
        Duration::from_secs(3),
    )
    .expect("reporter");
    reporter
        .report(&ViolationReport {
            quiz_id: "q".to_string(),
            student_username: "erin".to_string(),
            violation_type: "early_warning".to_string(),
            frame_data: "AA".to_string(),
            timestamp: "2024-05-01T10:00:00.000Z".to_string(),
        })
        .expect("report accepted behind an idle connection");

    sink.stop().unwrap();
}

#[test]
fn sink_binds_by_hostname() {
    let dir = tempfile::tempdir().unwrap();
    let sink = SinkServer::new(SinkConfig {
        addr: "localhost:0".to_string(),
        db_path: dir.path().join("violations.db"),
    })
    .spawn()
    .expect("spawn sink on localhost");
    let (status, _) = get_json(&format!("http://{}{}?quiz_id=q", sink.addr, QUERY_PATH));
    assert_eq!(status, 200);
    sink.stop().unwrap();
}

#[test]
fn stored_frames_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let sink = spawn_sink(&dir);
    let (status, _) = post_json(
        &format!("http://{}{}", sink.addr, STORE_PATH),
        r#"{"quiz_id":"q","student_username":"alice","violation_type":"early_warning","frame_data":"AA"}"#,
    );
    assert_eq!(status, 200);
    sink.stop().unwrap();

    let sink = spawn_sink(&dir);
    let (_, body) = get_json(&format!("http://{}{}?quiz_id=q", sink.addr, QUERY_PATH));
    assert_eq!(body["data"].as_array().map(Vec::len), Some(1));
    sink.stop().unwrap();
}

#[test]
fn monitor_reports_violations_to_sink() {
    let dir = tempfile::tempdir().unwrap();
    let sink = spawn_sink(&dir);

    let mut cfg = MonitorConfig::default();
    cfg.camera.url = "stub://webcam?script=away:30,attentive:1&loop=false".to_string();
    cfg.camera.target_fps = 50;
    cfg.camera.width = 160;
    cfg.camera.height = 120;
    cfg.debounce.early_warning_secs = 0.2;
    cfg.debounce.warning_secs = 0.4;
    cfg.capture.burst_interval_ms = 0;
    cfg.capture.burst_extra_frames = 1;
    cfg.capture.fallback_dir = dir.path().join("fallback");
    cfg.capture.report_url = Some(format!("http://{}{}", sink.addr, STORE_PATH));

    let pool = DevicePool::new();
    let lease = pool
        .acquire(Box::new(SyntheticCamera::new(&cfg.camera).unwrap()))
        .unwrap();
    let (mut status_sink, _rx) = ChannelSink::channel();
    let report = MonitorSession::new(
        SessionIdentity::new("attempt-3", "dana", "quiz-11"),
        &cfg,
        Arc::new(AtomicBool::new(false)),
    )
    .unwrap()
    .with_frame_limit(34)
    .run(lease, &mut status_sink);

    assert_eq!(report.violations.len(), 3);
    assert!(report
        .violations
        .iter()
        .all(|v| v.disposition == Disposition::Reported));
    assert!(!cfg.capture.fallback_dir.exists());

    let (_, body) = get_json(&format!(
        "http://{}{}?quiz_id=quiz-11&student_username=dana",
        sink.addr, QUERY_PATH
    ));
    let rows = body["data"].as_array().expect("rows");
    assert_eq!(rows.len(), 3);
    let majors = rows
        .iter()
        .filter(|r| r["violation_type"] == "major_violation")
        .count();
    assert_eq!(majors, 2);

    sink.stop().unwrap();
}
