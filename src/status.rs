//! JSON status over HTTP.
//!
//! Read-only: every request takes a fresh snapshot from a [`MeterReader`],
//! which never blocks the pulse recorder. One request per connection, GET
//! only, `Connection: close`.

use crate::meter::{MeterReader, MeterSnapshot};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

pub const CONTENT_TYPE: &str = "application/json;charset=utf-8";
/// Request line and headers together may not exceed this.
const MAX_REQUEST_BYTES: u64 = 8 * 1024;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusConfig {
    pub bind: IpAddr,
    pub port: u16,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 7474,
        }
    }
}

impl StatusConfig {
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub pfc_level: u8,
    pub raw_pfc_level: u8,
    pub max_pfc_level: u8,
    pub current_power: f64,
    pub current_raw_power: f64,
    pub start_time: DateTime<Utc>,
    pub total_energy_wh: f64,
}

impl StatusSnapshot {
    pub fn new(snapshot: &MeterSnapshot, started_at: DateTime<Utc>) -> Self {
        Self {
            pfc_level: snapshot.effective_level,
            raw_pfc_level: snapshot.raw_level,
            max_pfc_level: snapshot.max_level,
            current_power: snapshot.effective_power_w,
            current_raw_power: snapshot.raw_power_w,
            start_time: started_at,
            total_energy_wh: snapshot.energy_wh,
        }
    }

    pub fn capture(meter: &MeterReader) -> Self {
        Self::new(&meter.snapshot(), meter.started_at())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub status: u16,
    pub status_text: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub body: String,
}

impl Response {
    fn json<T: Serialize>(status: u16, value: &T) -> Self {
        match serde_json::to_string(value) {
            Ok(body) => Self { status, body },
            Err(e) => {
                error!("could not serialise response: {}", e);
                Self {
                    status: 500,
                    body: r#"{"status":500,"statusText":"Internal error","message":""}"#.to_string(),
                }
            }
        }
    }

    fn error(status: u16, status_text: &str, message: &str) -> Self {
        Self::json(
            status,
            &ErrorResponse {
                status,
                status_text: status_text.to_string(),
                message: message.to_string(),
            },
        )
    }
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        _ => "Internal Server Error",
    }
}

/// Map a request to its response. Query strings are ignored.
pub fn route(method: &str, target: &str, meter: &MeterReader) -> Response {
    let path = target.split('?').next().unwrap_or(target);
    match (method, path) {
        ("GET", "/") => Response::json(200, &serde_json::json!({ "entries": ["status"] })),
        ("GET", "/status") => Response::json(200, &StatusSnapshot::capture(meter)),
        _ => Response::error(404, "Page not found", path),
    }
}

pub async fn bind(config: &StatusConfig) -> io::Result<TcpListener> {
    let listener = TcpListener::bind(config.addr()).await?;
    info!(addr = %listener.local_addr()?, "status server listening");
    Ok(listener)
}

pub async fn serve(listener: TcpListener, meter: MeterReader) -> io::Result<()> {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let meter = meter.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, &meter, REQUEST_TIMEOUT).await {
                        warn!("status client {} error: {}", addr, e);
                    }
                });
            }
            Err(e) => {
                error!("failed to accept status connection: {}", e);
            }
        }
    }
}

/// Read the request line and skip the headers. `None` if the client sent nothing.
async fn read_request<R: AsyncBufRead + Unpin>(reader: &mut R) -> io::Result<Option<String>> {
    let mut request_line = String::new();
    if reader.read_line(&mut request_line).await? == 0 {
        return Ok(None);
    }
    if !request_line.ends_with('\n') {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "request line too long or incomplete"));
    }

    let mut header = String::new();
    loop {
        header.clear();
        let n = reader.read_line(&mut header).await?;
        if n == 0 || header.trim_end().is_empty() {
            break;
        }
    }
    Ok(Some(request_line))
}

async fn handle_connection(stream: TcpStream, meter: &MeterReader, request_timeout: Duration) -> io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader.take(MAX_REQUEST_BYTES));

    let request_line = match tokio::time::timeout(request_timeout, read_request(&mut reader)).await {
        Ok(Ok(Some(line))) => line,
        Ok(Ok(None)) => return Ok(()),
        Ok(Err(e)) => return Err(e),
        Err(_) => return Err(io::Error::new(io::ErrorKind::TimedOut, "no complete request in time")),
    };

    let mut parts = request_line.split_whitespace();
    let response = match (parts.next(), parts.next()) {
        (Some(method), Some(target)) => {
            debug!(method, target, "status request");
            route(method, target, meter)
        }
        _ => Response::error(400, "Bad request", request_line.trim_end()),
    };

    let head = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        response.status,
        reason_phrase(response.status),
        CONTENT_TYPE,
        response.body.len()
    );
    writer.write_all(head.as_bytes()).await?;
    writer.write_all(response.body.as_bytes()).await?;
    writer.shutdown().await
}

/// Minimal HTTP/1.1 GET used by `heatctl` and the tests.
pub async fn http_get(addr: &str, path: &str) -> io::Result<Response> {
    let mut stream = TcpStream::connect(addr).await?;
    let request = format!("GET {path} HTTP/1.1\r\nHost: {addr}\r\nAccept: application/json\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await?;

    let mut raw = String::new();
    stream.read_to_string(&mut raw).await?;

    let invalid = |what: &str| io::Error::new(io::ErrorKind::InvalidData, format!("malformed HTTP response: {what}"));
    let (head, body) = raw.split_once("\r\n\r\n").ok_or_else(|| invalid("no header terminator"))?;
    let status = head
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse::<u16>().ok())
        .ok_or_else(|| invalid("no status code"))?;

    Ok(Response {
        status,
        body: body.to_string(),
    })
}
