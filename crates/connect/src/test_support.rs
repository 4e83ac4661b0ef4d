//! Scripted in-process HTTP server for client tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub(crate) struct CapturedRequest {
    pub method: String,
    pub target: String,
    pub headers: HashMap<String, String>,
    pub body: String,
    pub received_at: Instant,
}

impl CapturedRequest {
    /// Value of one query parameter in the request target.
    pub fn query_param(&self, name: &str) -> Option<String> {
        let (_, query) = self.target.split_once('?')?;
        query.split('&').find_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            (key == name).then(|| value.to_string())
        })
    }
}

#[derive(Debug, Clone)]
pub(crate) enum MockOutcome {
    DropConnection,
    /// Announce `declared_length` body bytes, send only `body`, then close.
    Truncated {
        status: u16,
        body: String,
        declared_length: usize,
    },
    Respond {
        status: u16,
        body: String,
        headers: Vec<(String, String)>,
    },
}

impl MockOutcome {
    pub fn json(status: u16, body: impl Into<String>) -> Self {
        Self::Respond {
            status,
            body: body.into(),
            headers: Vec::new(),
        }
    }

    pub fn json_with_header(
        status: u16,
        body: impl Into<String>,
        name: &str,
        value: impl Into<String>,
    ) -> Self {
        Self::Respond {
            status,
            body: body.into(),
            headers: vec![(name.to_string(), value.into())],
        }
    }
}

fn header_end_offset(buffer: &[u8]) -> Option<usize> {
    buffer.windows(4).position(|window| window == b"\r\n\r\n")
}

async fn read_http_request(stream: &mut TcpStream) -> Option<CapturedRequest> {
    let mut buffer = Vec::new();
    loop {
        let mut chunk = [0_u8; 2048];
        let read = stream.read(&mut chunk).await.ok()?;
        if read == 0 {
            return None;
        }
        buffer.extend_from_slice(&chunk[..read]);
        if header_end_offset(&buffer).is_some() {
            break;
        }
    }

    let header_end = header_end_offset(&buffer)?;
    let head = String::from_utf8_lossy(&buffer[..header_end]).to_string();
    let mut lines = head.lines();
    let mut request_line = lines.next()?.split_whitespace();
    let method = request_line.next()?.to_string();
    let target = request_line.next()?.to_string();

    let mut headers = HashMap::new();
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }

    let content_length = headers
        .get("content-length")
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(0);

    let mut body = buffer[header_end + 4..].to_vec();
    while body.len() < content_length {
        let mut chunk = [0_u8; 2048];
        let read = stream.read(&mut chunk).await.ok()?;
        if read == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..read]);
    }

    Some(CapturedRequest {
        method,
        target,
        headers,
        body: String::from_utf8_lossy(&body).to_string(),
        received_at: Instant::now(),
    })
}

fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        401 => "Unauthorized",
        404 => "Not Found",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "Error",
    }
}

async fn write_http_response(
    stream: &mut TcpStream,
    status: u16,
    body: &str,
    headers: &[(String, String)],
) -> std::io::Result<()> {
    let extra = headers
        .iter()
        .map(|(name, value)| format!("{}: {}\r\n", name, value))
        .collect::<String>();
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\n{}Connection: close\r\n\r\n{}",
        status,
        status_text(status),
        body.len(),
        extra,
        body
    );
    stream.write_all(response.as_bytes()).await?;
    stream.flush().await
}

pub(crate) struct MockServer {
    pub base_url: String,
    pub captured: Arc<Mutex<Vec<CapturedRequest>>>,
    handle: tokio::task::JoinHandle<()>,
}

impl MockServer {
    pub async fn start(outcomes: Vec<MockOutcome>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test listener");
        let addr = listener.local_addr().expect("listener addr");
        let captured = Arc::new(Mutex::new(Vec::<CapturedRequest>::new()));
        let scripted = Arc::new(Mutex::new(VecDeque::from(outcomes)));
        let captured_clone = Arc::clone(&captured);

        let handle = tokio::spawn(async move {
            loop {
                let (mut stream, _) = match listener.accept().await {
                    Ok(value) => value,
                    Err(_) => break,
                };
                let captured_inner = Arc::clone(&captured_clone);
                let scripted_inner = Arc::clone(&scripted);
                tokio::spawn(async move {
                    let Some(request) = read_http_request(&mut stream).await else {
                        return;
                    };
                    captured_inner.lock().await.push(request);

                    let outcome = scripted_inner
                        .lock()
                        .await
                        .pop_front()
                        .unwrap_or_else(|| MockOutcome::json(500, r#"{"error":"unexpected"}"#));

                    match outcome {
                        MockOutcome::DropConnection => {
                            let _ = stream.shutdown().await;
                        }
                        MockOutcome::Truncated {
                            status,
                            body,
                            declared_length,
                        } => {
                            let head = format!(
                                "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                                status,
                                status_text(status),
                                declared_length,
                                body
                            );
                            let _ = stream.write_all(head.as_bytes()).await;
                            let _ = stream.flush().await;
                            let _ = stream.shutdown().await;
                        }
                        MockOutcome::Respond {
                            status,
                            body,
                            headers,
                        } => {
                            let _ = write_http_response(&mut stream, status, &body, &headers).await;
                        }
                    }
                });
            }
        });

        Self {
            base_url: format!("http://{}", addr),
            captured,
            handle,
        }
    }

    pub async fn requests(&self) -> Vec<CapturedRequest> {
        // Give the accept loop a moment to record the last request.
        tokio::time::sleep(Duration::from_millis(10)).await;
        self.captured.lock().await.clone()
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
