//! One RCON connection to one server for one dispatch run
//!
//! A session moves through `Idle → Connecting → Connected → Authenticating →
//! Ready ⇄ Executing → Closed`; any step may end in `Failed`. Every blocking
//! network operation is bounded by the server's configured timeout.

use crate::error::{SessionError, SessionResult};
use log::{debug, info, warn};
use shared::packet::{self, Packet, HEADER_LEN};
use shared::config::MAX_TIMEOUT_SECS;
use shared::ServerTarget;
use std::fmt;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout, timeout_at, Instant};

/// Connection attempts before giving up on a server
pub const CONNECT_ATTEMPTS: u32 = 2;
/// Pause between connection attempts
pub const CONNECT_BACKOFF: Duration = Duration::from_secs(1);
/// Characters of the probe response returned to the operator
pub const PROBE_SNIPPET_LEN: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Connected,
    Authenticating,
    Ready,
    Executing,
    Closed,
    Failed,
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Authenticating => "authenticating",
            SessionState::Ready => "ready",
            SessionState::Executing => "executing",
            SessionState::Closed => "closed",
            SessionState::Failed => "failed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub struct Session {
    target: ServerTarget,
    stream: Option<TcpStream>,
    state: SessionState,
}

impl Session {
    pub fn new(target: ServerTarget) -> Self {
        Self {
            target,
            stream: None,
            state: SessionState::Idle,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Opens the TCP stream, retrying once after a fixed backoff
    pub async fn connect(&mut self) -> SessionResult<()> {
        self.expect_state(SessionState::Idle)?;
        if !self.target.is_complete() {
            self.state = SessionState::Failed;
            return Err(SessionError::Misconfigured(self.target.name.clone()));
        }

        self.state = SessionState::Connecting;
        let addr = self.target.address();
        let mut last_error = None;

        for attempt in 1..=CONNECT_ATTEMPTS {
            debug!(
                "Connection attempt {}/{} to {}",
                attempt, CONNECT_ATTEMPTS, addr
            );

            let connect = TcpStream::connect((self.target.host.as_str(), self.target.port));
            match timeout(self.target.timeout(), connect).await {
                Ok(Ok(stream)) => {
                    // Small request/response frames, don't wait for Nagle.
                    let _ = stream.set_nodelay(true);
                    self.stream = Some(stream);
                    self.state = SessionState::Connected;
                    return Ok(());
                }
                Ok(Err(e)) => {
                    warn!("Connection attempt to {} failed: {}", addr, e);
                    last_error = Some(SessionError::Connect {
                        addr: addr.clone(),
                        source: e,
                    });
                }
                Err(_) => {
                    warn!("Connection attempt to {} timed out", addr);
                    last_error = Some(SessionError::ConnectTimeout(addr.clone()));
                }
            }

            if attempt < CONNECT_ATTEMPTS {
                sleep(CONNECT_BACKOFF).await;
            }
        }

        self.state = SessionState::Failed;
        Err(last_error.unwrap_or(SessionError::ConnectTimeout(addr)))
    }

    /// Sends the shared secret and waits for the single auth response
    pub async fn authenticate(&mut self) -> SessionResult<()> {
        self.expect_state(SessionState::Connected)?;
        self.state = SessionState::Authenticating;

        let request = Packet::auth(&self.target.secret);
        match self.round_trip(&request).await {
            Ok(response) if response.is_auth_rejected() => {
                self.state = SessionState::Failed;
                Err(SessionError::AuthRejected)
            }
            Ok(_) => {
                self.state = SessionState::Ready;
                Ok(())
            }
            Err(e) => {
                self.state = SessionState::Failed;
                Err(e)
            }
        }
    }

    /// Runs one command. Failures leave the session usable for the next one.
    pub async fn execute(&mut self, command: &str) -> SessionResult<String> {
        self.expect_state(SessionState::Ready)?;
        self.state = SessionState::Executing;

        let result = self.round_trip(&Packet::exec(command)).await;
        self.state = SessionState::Ready;
        result.map(|response| response.body_text())
    }

    /// Shuts the socket down. Later calls are no-ops.
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                debug!("Shutdown of {} failed: {}", self.target.address(), e);
            }
            self.state = SessionState::Closed;
        }
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    async fn round_trip(&mut self, request: &Packet) -> SessionResult<Packet> {
        let frame = request.encode()?;
        let limit = self.target.timeout();
        let stream = self.stream.as_mut().ok_or(SessionError::Closed)?;

        match timeout(limit, stream.write_all(&frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(SessionError::Write(e)),
            Err(_) => return Err(SessionError::WriteTimeout),
        }

        read_frame(stream, deadline_after(limit)).await
    }

    fn expect_state(&self, expected: SessionState) -> SessionResult<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(SessionError::InvalidState {
                actual: self.state.name(),
                expected: expected.name(),
            })
        }
    }
}

/// Reads one frame; header and payload share a single deadline
async fn read_frame(stream: &mut TcpStream, deadline: Instant) -> SessionResult<Packet> {
    let mut header = [0u8; HEADER_LEN];
    fill(stream, &mut header, deadline, "header").await?;

    let size = packet::parse_size(header)?;
    let mut payload = vec![0u8; size];
    fill(stream, &mut payload, deadline, "payload").await?;

    Ok(packet::decode_payload(&payload)?)
}

/// Accumulates reads until `buf` is full; a frame may arrive in many segments
async fn fill(
    stream: &mut TcpStream,
    buf: &mut [u8],
    deadline: Instant,
    what: &'static str,
) -> SessionResult<()> {
    let mut filled = 0;
    while filled < buf.len() {
        match timeout_at(deadline, stream.read(&mut buf[filled..])).await {
            Err(_) => return Err(SessionError::ReadTimeout(what)),
            Ok(Ok(0)) => return Err(SessionError::Closed),
            Ok(Ok(n)) => filled += n,
            Ok(Err(e)) if e.kind() == io::ErrorKind::Interrupted => continue,
            Ok(Err(e)) => return Err(SessionError::Read(e)),
        }
    }
    Ok(())
}

/// Result of running a bucket of commands through one session
#[derive(Debug)]
pub struct BatchReport {
    /// One entry per command, in order
    pub results: Vec<SessionResult<String>>,
}

impl BatchReport {
    pub fn sent(&self) -> usize {
        self.results.iter().filter(|r| r.is_ok()).count()
    }
}

/// Connects, authenticates once and runs every command in order.
///
/// Returns `Err` only when connect or auth fails; per-command failures are in
/// the report. The socket is closed on every path.
pub async fn run_batch(target: &ServerTarget, commands: &[String]) -> SessionResult<BatchReport> {
    let mut session = Session::new(target.clone());
    session.connect().await?;

    if let Err(e) = session.authenticate().await {
        session.close().await;
        return Err(e);
    }

    info!(
        "Authenticated to {}, running {} commands",
        target.address(),
        commands.len()
    );

    let mut results = Vec::with_capacity(commands.len());
    for command in commands {
        results.push(session.execute(command).await);
    }

    session.close().await;
    Ok(BatchReport { results })
}

/// Connect + authenticate + one command, outside any order context.
/// Returns the start of the server's answer.
pub async fn probe(target: &ServerTarget, command: &str) -> SessionResult<String> {
    let mut report = run_batch(target, &[command.to_string()]).await?;
    let response = report
        .results
        .pop()
        .unwrap_or(Err(SessionError::Closed))?;
    Ok(response.chars().take(PROBE_SNIPPET_LEN).collect())
}

/// `now + limit`, capped for limits too large to represent
fn deadline_after(limit: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(limit)
        .unwrap_or_else(|| now + Duration::from_secs(MAX_TIMEOUT_SECS))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockConfig, MockRconServer};

    fn target_for(server: &MockRconServer, secret: &str) -> ServerTarget {
        ServerTarget::new("test", "127.0.0.1", server.port(), secret, 2)
    }

    #[tokio::test]
    async fn test_full_session_lifecycle() {
        let server = MockRconServer::start(MockConfig::new("pw")).await.unwrap();
        let mut session = Session::new(target_for(&server, "pw"));
        assert_eq!(session.state(), SessionState::Idle);

        session.connect().await.unwrap();
        assert_eq!(session.state(), SessionState::Connected);

        session.authenticate().await.unwrap();
        assert_eq!(session.state(), SessionState::Ready);

        let response = session.execute("say hello").await.unwrap();
        assert_eq!(response, "ok: say hello");
        assert_eq!(session.state(), SessionState::Ready);

        session.close().await;
        assert_eq!(session.state(), SessionState::Closed);
        assert!(!session.is_open());

        // Second close must not touch anything
        session.close().await;
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_wrong_secret_fails_session() {
        let server = MockRconServer::start(MockConfig::new("pw")).await.unwrap();
        let mut session = Session::new(target_for(&server, "nope"));

        session.connect().await.unwrap();
        let err = session.authenticate().await.unwrap_err();
        assert!(matches!(err, SessionError::AuthRejected));
        assert_eq!(session.state(), SessionState::Failed);
    }

    #[tokio::test]
    async fn test_execute_requires_auth() {
        let server = MockRconServer::start(MockConfig::new("pw")).await.unwrap();
        let mut session = Session::new(target_for(&server, "pw"));
        session.connect().await.unwrap();

        let err = session.execute("status").await.unwrap_err();
        assert!(matches!(err, SessionError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn test_failed_command_keeps_session_usable() {
        let server = MockRconServer::start(MockConfig::new("pw").failing("kick"))
            .await
            .unwrap();
        let commands = vec![
            "say a".to_string(),
            "kick bob".to_string(),
            "say b".to_string(),
        ];

        let report = run_batch(&target_for(&server, "pw"), &commands)
            .await
            .unwrap();

        assert_eq!(report.results.len(), 3);
        assert_eq!(report.sent(), 2);
        assert!(matches!(
            report.results[1],
            Err(SessionError::Protocol(_))
        ));
        assert_eq!(server.received().await, commands);
    }

    #[tokio::test]
    async fn test_read_timeout_is_reported() {
        let server = MockRconServer::start(MockConfig::new("pw").silent("hang"))
            .await
            .unwrap();
        let mut target = target_for(&server, "pw");
        target.timeout_secs = 1;

        let report = run_batch(&target, &["hang".to_string()]).await.unwrap();
        assert!(matches!(
            report.results[0],
            Err(SessionError::ReadTimeout("header"))
        ));
    }

    #[tokio::test]
    async fn test_batch_closes_after_auth_failure() {
        let server = MockRconServer::start(MockConfig::new("pw")).await.unwrap();

        let result = run_batch(&target_for(&server, "bad"), &["say x".to_string()]).await;
        assert!(matches!(result, Err(SessionError::AuthRejected)));

        server.wait_for_closed(1).await;
        assert_eq!(server.sessions_opened(), 1);
        assert_eq!(server.sessions_closed(), 1);
        assert!(server.received().await.is_empty());
    }

    #[tokio::test]
    async fn test_connect_refused_after_two_attempts() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let started = std::time::Instant::now();
        let mut session = Session::new(ServerTarget::new("gone", "127.0.0.1", port, "pw", 2));
        let err = session.connect().await.unwrap_err();

        assert!(matches!(err, SessionError::Connect { .. }));
        assert_eq!(session.state(), SessionState::Failed);
        assert!(started.elapsed() >= CONNECT_BACKOFF);
    }

    #[tokio::test]
    async fn test_connect_succeeds_on_second_attempt() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        // Server comes up during the backoff after the first refusal
        let late_server = tokio::spawn(async move {
            sleep(CONNECT_BACKOFF / 4).await;
            let listener = tokio::net::TcpListener::bind(("127.0.0.1", port))
                .await
                .unwrap();
            listener.accept().await.map(|_| ())
        });

        let started = std::time::Instant::now();
        let mut session = Session::new(ServerTarget::new("late", "127.0.0.1", port, "pw", 2));
        session.connect().await.unwrap();

        assert_eq!(session.state(), SessionState::Connected);
        assert!(started.elapsed() >= CONNECT_BACKOFF);
        late_server.await.unwrap().unwrap();
        session.close().await;
    }

    #[test]
    fn test_deadline_after_huge_limit_is_capped() {
        let before = Instant::now();
        let deadline = deadline_after(Duration::MAX);
        assert!(deadline >= before + Duration::from_secs(MAX_TIMEOUT_SECS));

        let deadline = deadline_after(Duration::from_secs(2));
        assert!(deadline <= Instant::now() + Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_hand_built_target_with_huge_timeout() {
        let server = MockRconServer::start(MockConfig::new("pw")).await.unwrap();
        let mut target = target_for(&server, "pw");
        target.timeout_secs = u64::MAX;

        let report = run_batch(&target, &["say big".to_string()]).await.unwrap();
        assert_eq!(report.sent(), 1);
    }

    #[tokio::test]
    async fn test_misconfigured_target_never_connects() {
        let mut session = Session::new(ServerTarget::new("blank", "", 1, "", 5));
        let err = session.connect().await.unwrap_err();
        assert!(matches!(err, SessionError::Misconfigured(_)));
    }

    #[tokio::test]
    async fn test_probe_truncates_response() {
        let server = MockRconServer::start(MockConfig::new("pw")).await.unwrap();
        let long = format!("say {}", "x".repeat(300));

        let snippet = probe(&target_for(&server, "pw"), &long).await.unwrap();
        assert_eq!(snippet.chars().count(), PROBE_SNIPPET_LEN);
        assert!(snippet.starts_with("ok: say"));
    }
}
