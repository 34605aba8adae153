//! Loopback RCON server for tests and local experiments
//!
//! Answers auth packets by comparing the secret and echoes commands back as
//! `ok: <command>`. Commands matching a failing prefix get a zero-size frame
//! (a protocol error on the client); silent prefixes get no answer at all.

use log::{debug, info, warn};
use shared::packet::{self, Packet, AUTH_REJECTED_ID, HEADER_LEN, SERVERDATA_AUTH, SERVERDATA_EXECCOMMAND};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Type the server uses for auth replies
pub const SERVERDATA_AUTH_RESPONSE: i32 = 2;
/// Type the server uses for command output
pub const SERVERDATA_RESPONSE_VALUE: i32 = 0;

#[derive(Debug, Clone, Default)]
pub struct MockConfig {
    pub secret: String,
    pub failing_prefixes: Vec<String>,
    pub silent_prefixes: Vec<String>,
    pub response_delay: Duration,
}

impl MockConfig {
    pub fn new(secret: &str) -> Self {
        Self {
            secret: secret.to_string(),
            ..Default::default()
        }
    }

    pub fn failing(mut self, prefix: &str) -> Self {
        self.failing_prefixes.push(prefix.to_string());
        self
    }

    pub fn silent(mut self, prefix: &str) -> Self {
        self.silent_prefixes.push(prefix.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.response_delay = delay;
        self
    }
}

#[derive(Default)]
struct MockStats {
    opened: AtomicUsize,
    closed: AtomicUsize,
    received: Mutex<Vec<String>>,
}

pub struct MockRconServer {
    addr: SocketAddr,
    stats: Arc<MockStats>,
    accept_task: JoinHandle<()>,
}

impl MockRconServer {
    /// Binds an ephemeral loopback port
    pub async fn start(config: MockConfig) -> io::Result<Self> {
        Self::bind("127.0.0.1:0", config).await
    }

    pub async fn bind(addr: &str, config: MockConfig) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?;
        let stats = Arc::new(MockStats::default());
        let config = Arc::new(config);

        let accept_task = {
            let stats = Arc::clone(&stats);
            tokio::spawn(async move {
                loop {
                    match listener.accept().await {
                        Ok((stream, peer)) => {
                            debug!("Mock RCON accepted {}", peer);
                            let stats = Arc::clone(&stats);
                            let config = Arc::clone(&config);
                            tokio::spawn(handle_connection(stream, config, stats));
                        }
                        Err(e) => {
                            warn!("Mock RCON accept failed: {}", e);
                            tokio::time::sleep(Duration::from_millis(10)).await;
                        }
                    }
                }
            })
        };

        info!("Mock RCON server listening on {}", addr);
        Ok(Self {
            addr,
            stats,
            accept_task,
        })
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn sessions_opened(&self) -> usize {
        self.stats.opened.load(Ordering::SeqCst)
    }

    pub fn sessions_closed(&self) -> usize {
        self.stats.closed.load(Ordering::SeqCst)
    }

    /// Commands received from authenticated clients, in arrival order
    pub async fn received(&self) -> Vec<String> {
        self.stats.received.lock().await.clone()
    }

    /// Waits up to five seconds for `count` connections to be closed by clients
    pub async fn wait_for_closed(&self, count: usize) {
        for _ in 0..500 {
            if self.sessions_closed() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl Drop for MockRconServer {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn handle_connection(mut stream: TcpStream, config: Arc<MockConfig>, stats: Arc<MockStats>) {
    stats.opened.fetch_add(1, Ordering::SeqCst);
    let mut authenticated = false;

    loop {
        let request = match read_packet(&mut stream).await {
            Ok(Some(request)) => request,
            Ok(None) => break,
            Err(e) => {
                debug!("Mock RCON read failed: {}", e);
                break;
            }
        };

        let reply = match request.kind {
            SERVERDATA_AUTH => {
                authenticated = request.body == config.secret.as_bytes();
                let id = if authenticated {
                    request.request_id
                } else {
                    AUTH_REJECTED_ID
                };
                Some(frame(id, SERVERDATA_AUTH_RESPONSE, b""))
            }
            SERVERDATA_EXECCOMMAND if !authenticated => {
                Some(frame(AUTH_REJECTED_ID, SERVERDATA_RESPONSE_VALUE, b""))
            }
            SERVERDATA_EXECCOMMAND => {
                let command = request.body_text();
                stats.received.lock().await.push(command.clone());

                if !config.response_delay.is_zero() {
                    tokio::time::sleep(config.response_delay).await;
                }

                if matches_any(&command, &config.silent_prefixes) {
                    None
                } else if matches_any(&command, &config.failing_prefixes) {
                    Some(0i32.to_le_bytes().to_vec())
                } else {
                    let body = format!("ok: {}", command);
                    Some(frame(
                        request.request_id,
                        SERVERDATA_RESPONSE_VALUE,
                        body.as_bytes(),
                    ))
                }
            }
            other => {
                debug!("Mock RCON ignoring packet type {}", other);
                None
            }
        };

        if let Some(bytes) = reply {
            if stream.write_all(&bytes).await.is_err() {
                break;
            }
        }
    }

    stats.closed.fetch_add(1, Ordering::SeqCst);
}

fn matches_any(command: &str, prefixes: &[String]) -> bool {
    prefixes.iter().any(|prefix| command.starts_with(prefix.as_str()))
}

fn frame(request_id: i32, kind: i32, body: &[u8]) -> Vec<u8> {
    // Mock replies never approach the frame limit
    packet::encode(request_id, kind, body).unwrap_or_default()
}

async fn read_packet(stream: &mut TcpStream) -> io::Result<Option<Packet>> {
    let mut header = [0u8; HEADER_LEN];
    match stream.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let size = packet::parse_size(header)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let mut payload = vec![0u8; size];
    stream.read_exact(&mut payload).await?;

    packet::decode_payload(&payload)
        .map(Some)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}
