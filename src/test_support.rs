//! Fixtures shared by the unit tests.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use crate::api::client::ApiTransport;
use crate::config::AppConfig;
use crate::errors::Result;

/// Defaults, minus any proxy picked up from the environment.
pub fn test_config() -> AppConfig {
    AppConfig {
        use_system_proxy: false,
        ..AppConfig::default()
    }
}

/// Loopback HTTP server that answers every request with the same response.
pub struct MediaServer {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<String>>>,
    hits: Arc<AtomicUsize>,
}

impl MediaServer {
    pub async fn start(status: u16, body: Vec<u8>) -> Self {
        Self::start_with_type(status, "audio/mpeg", body).await
    }

    pub async fn start_with_type(status: u16, content_type: &'static str, body: Vec<u8>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let hits = Arc::new(AtomicUsize::new(0));
        let body = Arc::new(body);

        let (seen, counter) = (requests.clone(), hits.clone());
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let (seen, counter, body) = (seen.clone(), counter.clone(), body.clone());
                tokio::spawn(async move {
                    let mut buf = Vec::new();
                    let mut chunk = [0u8; 4096];
                    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                        match socket.read(&mut chunk).await {
                            Ok(0) | Err(_) => break,
                            Ok(n) => buf.extend_from_slice(&chunk[..n]),
                        }
                    }
                    seen.lock().unwrap().push(String::from_utf8_lossy(&buf).into_owned());
                    counter.fetch_add(1, Ordering::SeqCst);

                    let reason = if status == 200 { "OK" } else { "Error" };
                    let head = format!(
                        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                        status,
                        reason,
                        content_type,
                        body.len()
                    );
                    let _ = socket.write_all(head.as_bytes()).await;
                    let _ = socket.write_all(&body).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        Self { addr, requests, hits }
    }

    /// Accepts connections and never answers, so downloads hang until dropped.
    pub async fn silent() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = hits.clone();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                held.push(socket);
            }
        });

        Self {
            addr,
            requests: Arc::new(Mutex::new(Vec::new())),
            hits,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Raw head of the most recent request.
    pub async fn last_request(&self) -> String {
        for _ in 0..50 {
            if let Some(last) = self.requests.lock().unwrap().last() {
                return last.clone();
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        String::new()
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

/// One call seen by [`FakeTransport`].
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub method: String,
    pub token: String,
    pub params: Vec<(String, String)>,
}

impl RecordedCall {
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

type Handler = Box<dyn Fn(&str, &[(&str, String)]) -> Result<Value> + Send + Sync>;

/// Scripted in-memory transport that records every call.
pub struct FakeTransport {
    handler: Handler,
    calls: Mutex<Vec<RecordedCall>>,
}

impl FakeTransport {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&str, &[(&str, String)]) -> Result<Value> + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Every list method answers from a single list of `total` tracks.
    pub fn tracks(total: usize) -> Self {
        Self::new(move |_, params| Ok(Self::track_page(total, params)))
    }

    /// `{count, items}` slice of a `total`-track list, honouring `offset`/`count`.
    pub fn track_page(total: usize, params: &[(&str, String)]) -> Value {
        let number = |key: &str| {
            Self::param_of(params, key)
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or(0)
        };
        let offset = number("offset");
        let end = (offset + number("count")).min(total);

        let items: Vec<Value> = (offset.min(end)..end)
            .map(|i| {
                json!({
                    "id": i,
                    "owner_id": 1,
                    "artist": format!("Artist {}", i),
                    "title": format!("Title {}", i),
                    "duration": 200,
                    "url": format!("https://cs.example/{}.mp3", i)
                })
            })
            .collect();

        json!({ "count": total, "items": items })
    }

    pub fn param_of<'a>(params: &'a [(&str, String)], key: &str) -> Option<&'a str> {
        params.iter().find(|(k, _)| *k == key).map(|(_, v)| v.as_str())
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl ApiTransport for FakeTransport {
    async fn call(&self, method: &str, token: &str, params: &[(&str, String)]) -> Result<Value> {
        self.calls.lock().unwrap().push(RecordedCall {
            method: method.to_string(),
            token: token.to_string(),
            params: params
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        });
        (self.handler)(method, params)
    }
}
