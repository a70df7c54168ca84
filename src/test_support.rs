//! Local HTTP stand-in for the generation service.

use crate::engine::Retriever;
use crate::model::ServiceConfig;
use reqwest::Url;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

pub struct StubService {
    pub base_url: String,
    requests: Arc<Mutex<Vec<String>>>,
}

impl StubService {
    /// Answer every request with `status` and `body`.
    pub async fn spawn(status: u16, body: &str) -> Self {
        Self::spawn_delayed(status, body, Duration::ZERO).await
    }

    /// Like `spawn`, but wait `delay` before answering.
    pub async fn spawn_delayed(status: u16, body: &str, delay: Duration) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let recorded = requests.clone();
        let body = body.to_string();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let recorded = recorded.clone();
                let body = body.clone();
                tokio::spawn(async move {
                    let _ = serve(stream, status, &body, delay, recorded).await;
                });
            }
        });
        Self {
            base_url: format!("http://{addr}"),
            requests,
        }
    }

    /// A base URL nothing listens on.
    pub async fn unused_base_url() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("http://{addr}")
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

/// Remembers every URL it was asked to retrieve.
#[derive(Default)]
pub struct RecordingRetriever {
    urls: Mutex<Vec<Url>>,
}

impl RecordingRetriever {
    pub fn urls(&self) -> Vec<Url> {
        self.urls.lock().unwrap().clone()
    }
}

impl Retriever for RecordingRetriever {
    fn retrieve(&self, url: &Url) -> anyhow::Result<()> {
        self.urls.lock().unwrap().push(url.clone());
        Ok(())
    }
}

pub fn service_config(base_url: &str) -> ServiceConfig {
    ServiceConfig {
        base_url: base_url.to_string(),
        generate_path: "/generate-chart".into(),
        request_timeout: Duration::from_secs(5),
        download_dir: std::env::temp_dir(),
        user_agent: "chart-deck-test".into(),
        retrieve: false,
    }
}

async fn serve(
    mut stream: TcpStream,
    status: u16,
    body: &str,
    delay: Duration,
    recorded: Arc<Mutex<Vec<String>>>,
) -> std::io::Result<()> {
    let raw = read_request(&mut stream).await?;
    recorded
        .lock()
        .unwrap()
        .push(String::from_utf8_lossy(&raw).into_owned());
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
    let response = format!(
        "HTTP/1.1 {status} {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
        reason(status),
        body.len()
    );
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await
}

async fn read_request(stream: &mut TcpStream) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        if let Some(end) = find(&buf, b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buf[..end]).to_ascii_lowercase();
            let body_len = head
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok());
            let chunked = head.contains("transfer-encoding: chunked");
            let have = buf.len() - (end + 4);
            let complete = match body_len {
                Some(n) => have >= n,
                None if chunked => buf.ends_with(b"0\r\n\r\n"),
                None => true,
            };
            if complete {
                return Ok(buf);
            }
        }
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(buf);
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        _ => "Status",
    }
}
