//! Minimal HTTP/1.1 control surface for the annotator engine.
//!
//! Handlers only read engine snapshots or write settings / trigger saves;
//! they never touch the producer loop's per-iteration state. Errors are
//! surfaced to the caller as structured JSON failures, never swallowed.

use crate::engine::AnnotatorEngine;
use crate::settings::SettingsUpdate;
use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

const MAX_REQUEST_BYTES: usize = 65536;
const DEFAULT_RECENT_COUNT: usize = 10;

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8797".to_string(),
        }
    }
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct ApiServer {
    cfg: ApiConfig,
    engine: Arc<AnnotatorEngine>,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, engine: Arc<AnnotatorEngine>) -> Self {
        Self { cfg, engine }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self.cfg.addr.parse()?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let engine = self.engine;
        let join = std::thread::spawn(move || {
            if let Err(err) = run_api(listener, engine, shutdown_thread) {
                log::error!("control api stopped: {}", err);
            }
        });

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_api(
    listener: TcpListener,
    engine: Arc<AnnotatorEngine>,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, _)) => {
                if let Err(err) = handle_connection(stream, &engine) {
                    log::warn!("control api request failed: {}", err);
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

fn handle_connection(mut stream: TcpStream, engine: &Arc<AnnotatorEngine>) -> Result<()> {
    let request = match read_request(&mut stream) {
        Ok(request) => request,
        Err(err) => {
            write_error(&mut stream, 400, &format!("bad request: {err}"))?;
            return Ok(());
        }
    };

    match (request.method.as_str(), request.path.as_str()) {
        ("GET", "/health") => write_json_response(&mut stream, 200, r#"{"status":"ok"}"#),
        ("GET", "/stats") => respond_with(&mut stream, engine.stats()),
        ("GET", "/objects/current") => respond_with(&mut stream, engine.current_objects()),
        ("GET", "/detections/recent") => {
            let count = request
                .query_param("count")
                .map(|raw| raw.parse::<usize>())
                .transpose()
                .map_err(|_| anyhow!("count must be an integer"));
            match count {
                Ok(count) => respond_with(
                    &mut stream,
                    engine.recent_detections(count.unwrap_or(DEFAULT_RECENT_COUNT)),
                ),
                Err(err) => write_error(&mut stream, 400, &err.to_string()),
            }
        }
        ("GET", "/export") => respond_with(&mut stream, engine.export_session()),
        ("GET", "/settings") => respond_with(&mut stream, engine.settings()),
        ("POST", "/pause") => match engine.toggle_pause() {
            Ok(paused) => {
                write_json_response(&mut stream, 200, &format!(r#"{{"paused":{paused}}}"#))
            }
            Err(err) => write_error(&mut stream, 409, &format!("{err:#}")),
        },
        ("POST", "/settings") => {
            let update: std::result::Result<SettingsUpdate, _> =
                serde_json::from_slice(&request.body);
            match update {
                Ok(update) => match engine.update_settings(&update) {
                    Ok(applied) => respond_with(&mut stream, Ok(applied)),
                    Err(err) => write_error(&mut stream, 422, &format!("{err:#}")),
                },
                Err(err) => write_error(&mut stream, 400, &format!("invalid settings: {err}")),
            }
        }
        ("POST", "/save") => match engine.force_save() {
            Ok(count) => {
                write_json_response(&mut stream, 200, &format!(r#"{{"saved_frames":{count}}}"#))
            }
            Err(err) => write_error(&mut stream, 500, &format!("{err:#}")),
        },
        ("POST", "/snapshot") => match engine.take_snapshot() {
            Ok(filename) => respond_with_value(
                &mut stream,
                serde_json::json!({ "filename": filename }),
            ),
            Err(err) => write_error(&mut stream, 500, &format!("{err:#}")),
        },
        ("POST", "/annotations/clear") => match engine.clear_annotations() {
            Ok(()) => write_json_response(&mut stream, 200, r#"{"status":"ok"}"#),
            Err(err) => write_error(&mut stream, 409, &format!("{err:#}")),
        },
        ("POST", "/stats/reset") => match engine.reset_stats() {
            Ok(()) => write_json_response(&mut stream, 200, r#"{"status":"ok"}"#),
            Err(err) => write_error(&mut stream, 409, &format!("{err:#}")),
        },
        ("GET", _) | ("POST", _) => write_error(&mut stream, 404, "not_found"),
        _ => write_error(&mut stream, 405, "method_not_allowed"),
    }
}

fn respond_with<T: serde::Serialize>(stream: &mut TcpStream, result: Result<T>) -> Result<()> {
    match result {
        Ok(value) => respond_with_value(stream, serde_json::to_value(value)?),
        Err(err) => write_error(stream, 500, &format!("{err:#}")),
    }
}

fn respond_with_value(stream: &mut TcpStream, value: serde_json::Value) -> Result<()> {
    let payload = serde_json::to_vec(&value)?;
    write_response(stream, 200, "application/json", &payload)
}

fn write_error(stream: &mut TcpStream, status: u16, message: &str) -> Result<()> {
    let body = serde_json::to_vec(&serde_json::json!({ "error": message }))?;
    write_response(stream, status, "application/json", &body)
}

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    let header_end = loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break data
                .windows(4)
                .position(|w| w == b"\r\n\r\n")
                .ok_or_else(|| anyhow!("truncated request"))?;
        }
        data.extend_from_slice(&buf[..n]);
        if data.len() > MAX_REQUEST_BYTES {
            return Err(anyhow!("request too large"));
        }
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
    };

    let header_text = String::from_utf8_lossy(&data[..header_end]).to_string();
    let mut lines = header_text.split("\r\n");
    let request_line = lines.next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;

    let mut headers = HashMap::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }

    // Read the body up to Content-Length (bounded by the request cap).
    let content_length: usize = headers
        .get("content-length")
        .map(|v| v.parse())
        .transpose()
        .map_err(|_| anyhow!("invalid content-length"))?
        .unwrap_or(0);
    if content_length > MAX_REQUEST_BYTES {
        return Err(anyhow!("request body too large"));
    }
    let mut body = data[header_end + 4..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!("truncated request body"));
        }
        body.extend_from_slice(&buf[..n]);
    }
    body.truncate(content_length);

    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(HttpRequest {
        method: method.to_string(),
        path,
        raw_path: raw_path.to_string(),
        body,
    })
}

fn write_json_response(stream: &mut TcpStream, status: u16, body: &str) -> Result<()> {
    write_response(stream, status, "application/json", body.as_bytes())
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        400 => "HTTP/1.1 400 Bad Request",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        409 => "HTTP/1.1 409 Conflict",
        422 => "HTTP/1.1 422 Unprocessable Entity",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\n\r\n",
        status_line = status_line,
        content_type = content_type,
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    Ok(())
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    raw_path: String,
    body: Vec<u8>,
}

impl HttpRequest {
    fn query_param(&self, name: &str) -> Option<&str> {
        let query = self.raw_path.split('?').nth(1)?;
        for pair in query.split('&') {
            if let Some((k, v)) = pair.split_once('=') {
                if k == name {
                    return Some(v);
                }
            }
        }
        None
    }
}
