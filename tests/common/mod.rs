//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use microcomms::discovery::{
    DiscoveryProvider, ProviderError, ServiceInstance, ServiceRegistration, StaticProvider,
};
use microcomms::transport::{
    CallContext, MessageRequest, Payload, Transport, TransportError, TransportResponse,
};

/// What a [`MockTransport`] does on each send.
#[derive(Debug, Clone, Copy)]
pub enum Behavior {
    Succeed,
    FailConnect,
    FailStatus(u16),
    /// Never completes.
    Hang,
}

/// Transport with switchable behavior that records every call.
pub struct MockTransport {
    behavior: Mutex<Behavior>,
    calls: AtomicUsize,
    endpoints: Mutex<Vec<String>>,
}

impl MockTransport {
    pub fn new(behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            behavior: Mutex::new(behavior),
            calls: AtomicUsize::new(0),
            endpoints: Mutex::new(Vec::new()),
        })
    }

    pub fn set_behavior(&self, behavior: Behavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn endpoints(&self) -> Vec<String> {
        self.endpoints.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(
        &self,
        ctx: &CallContext,
        _request: &MessageRequest,
    ) -> Result<TransportResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.endpoints.lock().unwrap().push(ctx.endpoint().to_string());
        let behavior = *self.behavior.lock().unwrap();

        match behavior {
            Behavior::Succeed => Ok(TransportResponse {
                status_code: 200,
                payload: Payload::Text(format!("ok from {}", ctx.endpoint())),
                ..Default::default()
            }),
            Behavior::FailConnect => Err(TransportError::connect("connection refused")),
            Behavior::FailStatus(code) => Err(TransportError::status(code, "downstream failure")),
            Behavior::Hang => {
                std::future::pending::<Result<TransportResponse, TransportError>>().await
            }
        }
    }
}

/// Static provider that counts lookups and can be made slow or failing.
pub struct CountingProvider {
    inner: StaticProvider,
    lookups: AtomicUsize,
    failing: AtomicBool,
    delay: Duration,
}

impl CountingProvider {
    pub fn new(instances: &[(&str, &str, u16)], delay: Duration) -> Arc<Self> {
        let inner = StaticProvider::new();
        for (name, address, port) in instances {
            inner.insert(ServiceInstance::new(*name, *address, *port));
        }
        Arc::new(Self {
            inner,
            lookups: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
            delay,
        })
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl DiscoveryProvider for CountingProvider {
    async fn list_instances(&self, service: &str) -> Result<Vec<ServiceInstance>, ProviderError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(ProviderError::Unavailable("registry unreachable".into()));
        }
        self.inner.list_instances(service).await
    }

    async fn register_instance(&self, registration: ServiceRegistration) -> Result<(), ProviderError> {
        self.inner.register_instance(registration).await
    }

    async fn deregister_instance(&self, id: &str) -> Result<(), ProviderError> {
        self.inner.deregister_instance(id).await
    }
}

/// Start a programmable HTTP backend on an ephemeral port.
///
/// `f` is called once per connection and returns the status and body.
pub async fn start_programmable_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let f = f.clone();
                    tokio::spawn(async move {
                        read_request(&mut socket).await;

                        let (status, body) = f().await;
                        let status_text = match status {
                            200 => "200 OK",
                            404 => "404 Not Found",
                            500 => "500 Internal Server Error",
                            503 => "503 Service Unavailable",
                            _ => "200 OK",
                        };
                        let response = format!(
                            "HTTP/1.1 {}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            status_text,
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(response.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}

/// Consume one request: headers, then `Content-Length` bytes of body.
async fn read_request(socket: &mut tokio::net::TcpStream) {
    let mut data = Vec::new();
    let mut buf = [0u8; 4096];

    loop {
        let n = match socket.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        data.extend_from_slice(&buf[..n]);

        let Some(end) = data.windows(4).position(|w| w == b"\r\n\r\n") else {
            continue;
        };
        let head = String::from_utf8_lossy(&data[..end]).to_ascii_lowercase();
        let body_len = head
            .lines()
            .find_map(|line| line.strip_prefix("content-length:"))
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(0);
        if data.len() >= end + 4 + body_len {
            return;
        }
    }
}
