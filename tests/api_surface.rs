use anyhow::Result;
use chrono::Utc;
use serde_json::Value;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use tempfile::tempdir;

use annotator_kernel::api::{ApiConfig, ApiHandle, ApiServer};
use annotator_kernel::{
    AnnotatorEngine, BoundingBox, EngineConfig, Frame, FrameFormat, RawDetection,
};

fn test_frame(n: u64) -> Frame {
    Frame {
        frame_number: n,
        width: 640,
        height: 480,
        format: FrameFormat::Rgb24,
        data: vec![0u8; 16],
        captured_at: Utc::now(),
    }
}

fn person_at(x: i32, y: i32) -> RawDetection {
    RawDetection {
        label: "person".to_string(),
        class_id: 0,
        bbox: BoundingBox {
            x1: x,
            y1: y,
            x2: x + 10,
            y2: y + 10,
        },
        confidence: 0.9,
    }
}

fn request(addr: std::net::SocketAddr, raw: &str) -> Result<(String, String)> {
    let mut stream = TcpStream::connect(addr)?;
    stream.write_all(raw.as_bytes())?;
    let mut response = String::new();
    stream.read_to_string(&mut response)?;
    let mut parts = response.splitn(2, "\r\n\r\n");
    let headers = parts.next().unwrap_or("").to_string();
    let body = parts.next().unwrap_or("").to_string();
    Ok((headers, body))
}

fn get(addr: std::net::SocketAddr, path: &str) -> Result<(String, String)> {
    request(
        addr,
        &format!("GET {path} HTTP/1.1\r\nHost: test\r\nConnection: close\r\n\r\n"),
    )
}

fn post(addr: std::net::SocketAddr, path: &str, body: &str) -> Result<(String, String)> {
    request(
        addr,
        &format!(
            "POST {path} HTTP/1.1\r\nHost: test\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        ),
    )
}

struct TestApi {
    _dir: tempfile::TempDir,
    engine: Arc<AnnotatorEngine>,
    handle: Option<ApiHandle>,
}

impl TestApi {
    fn new() -> Result<Self> {
        let dir = tempdir()?;
        let engine = Arc::new(AnnotatorEngine::new(EngineConfig {
            output_path: dir.path().join("annotations.json"),
            autosave_path: dir.path().join("autosave_annotations.json"),
            screenshots_dir: dir.path().join("screenshots"),
            ..EngineConfig::default()
        })?);
        engine.mark_running()?;
        let handle = ApiServer::new(
            ApiConfig {
                addr: "127.0.0.1:0".to_string(),
            },
            engine.clone(),
        )
        .spawn()?;
        Ok(Self {
            _dir: dir,
            engine,
            handle: Some(handle),
        })
    }

    fn addr(&self) -> std::net::SocketAddr {
        self.handle.as_ref().unwrap().addr
    }
}

impl Drop for TestApi {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.stop();
        }
    }
}

#[test]
fn health_and_stats_respond() -> Result<()> {
    let api = TestApi::new()?;

    let (headers, body) = get(api.addr(), "/health")?;
    assert!(headers.starts_with("HTTP/1.1 200"));
    assert_eq!(body, r#"{"status":"ok"}"#);

    api.engine
        .process_frame(&test_frame(1), &[person_at(0, 0)])?;

    let (headers, body) = get(api.addr(), "/stats")?;
    assert!(headers.starts_with("HTTP/1.1 200"));
    let stats: Value = serde_json::from_str(&body)?;
    assert_eq!(stats["total_frames"], 1);
    assert_eq!(stats["saved_frames"], 1);
    assert_eq!(stats["total_objects"], 1);
    assert_eq!(stats["is_paused"], false);
    Ok(())
}

#[test]
fn current_objects_and_recent_detections() -> Result<()> {
    let api = TestApi::new()?;
    api.engine
        .process_frame(&test_frame(1), &[person_at(0, 0)])?;
    api.engine
        .process_frame(&test_frame(2), &[person_at(200, 200)])?;

    let (headers, body) = get(api.addr(), "/objects/current")?;
    assert!(headers.starts_with("HTTP/1.1 200"));
    let objects: Value = serde_json::from_str(&body)?;
    assert_eq!(objects["person_0"]["x1"], 200);

    let (headers, body) = get(api.addr(), "/detections/recent?count=1")?;
    assert!(headers.starts_with("HTTP/1.1 200"));
    let recent: Value = serde_json::from_str(&body)?;
    assert_eq!(recent.as_array().map(Vec::len), Some(1));
    assert_eq!(recent[0]["label"], "person");

    let (headers, _) = get(api.addr(), "/detections/recent?count=abc")?;
    assert!(headers.starts_with("HTTP/1.1 400"));
    Ok(())
}

#[test]
fn pause_toggles_and_settings_update() -> Result<()> {
    let api = TestApi::new()?;

    let (headers, body) = post(api.addr(), "/pause", "")?;
    assert!(headers.starts_with("HTTP/1.1 200"));
    assert_eq!(body, r#"{"paused":true}"#);

    let (_, body) = post(api.addr(), "/pause", "")?;
    assert_eq!(body, r#"{"paused":false}"#);

    let (headers, body) = post(api.addr(), "/settings", r#"{"confidence":0.8}"#)?;
    assert!(headers.starts_with("HTTP/1.1 200"));
    let settings: Value = serde_json::from_str(&body)?;
    assert_eq!(settings["confidence"], 0.8);

    // Unknown fields are rejected before anything is applied.
    let (headers, _) = post(api.addr(), "/settings", r#"{"confidense":0.9}"#)?;
    assert!(headers.starts_with("HTTP/1.1 400"));
    let (_, body) = get(api.addr(), "/settings")?;
    let settings: Value = serde_json::from_str(&body)?;
    assert_eq!(settings["confidence"], 0.8);
    Ok(())
}

#[test]
fn save_and_export_round_trip() -> Result<()> {
    let api = TestApi::new()?;

    // Saving an empty session is an error.
    let (headers, _) = post(api.addr(), "/save", "")?;
    assert!(headers.starts_with("HTTP/1.1 500"));

    api.engine
        .process_frame(&test_frame(1), &[person_at(0, 0)])?;

    let (headers, body) = post(api.addr(), "/save", "")?;
    assert!(headers.starts_with("HTTP/1.1 200"));
    assert_eq!(body, r#"{"saved_frames":1}"#);

    let (headers, body) = get(api.addr(), "/export")?;
    assert!(headers.starts_with("HTTP/1.1 200"));
    let document: Value = serde_json::from_str(&body)?;
    assert_eq!(document["metadata"]["total_frames"], 1);
    assert!(document["frames"]["frame_1"]["objects"]["person_0"].is_object());
    Ok(())
}

#[test]
fn clear_and_reset_endpoints() -> Result<()> {
    let api = TestApi::new()?;
    api.engine
        .process_frame(&test_frame(1), &[person_at(0, 0)])?;

    let (headers, _) = post(api.addr(), "/annotations/clear", "")?;
    assert!(headers.starts_with("HTTP/1.1 200"));
    let (_, body) = get(api.addr(), "/objects/current")?;
    let objects: Value = serde_json::from_str(&body)?;
    assert_eq!(objects, serde_json::json!({}));

    let (headers, _) = post(api.addr(), "/stats/reset", "")?;
    assert!(headers.starts_with("HTTP/1.1 200"));
    let (_, body) = get(api.addr(), "/stats")?;
    let stats: Value = serde_json::from_str(&body)?;
    assert_eq!(stats["total_frames"], 0);
    Ok(())
}

#[test]
fn unknown_route_is_404() -> Result<()> {
    let api = TestApi::new()?;
    let (headers, body) = get(api.addr(), "/nope")?;
    assert!(headers.starts_with("HTTP/1.1 404"));
    let err: Value = serde_json::from_str(&body)?;
    assert_eq!(err["error"], "not_found");
    Ok(())
}
