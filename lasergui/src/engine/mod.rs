//! Engine session: exclusive ownership of the engine conversation.
//!
//! The engine process is a single serial conversation partner. This module
//! owns its stdin/stdout pipes and exposes a blocking [`EngineSession::run`]
//! operation; a tokio `Mutex` (FIFO-fair) guarantees that exactly one
//! command is in flight at any instant and that overlapping callers never
//! interleave their command text on the pipe.
//!
//! The session performs the one-time `uci`/`uciok` handshake before
//! accepting any `run` call. After the engine terminates or times out the
//! conversation state is unknown, so the session reports itself permanently
//! unavailable rather than desynchronizing later requests; restart policy
//! is left to the surrounding deployment.

use crate::protocol::{self, EngineError, EngineReply, HANDSHAKE_ACK, HANDSHAKE_GREETING};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Default bound on how long a single `go` may search before the session
/// gives up on the reply.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(300);

/// Default bound on the startup handshake.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for an engine session.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Maximum time to wait for a terminal reply line.
    pub reply_timeout: Duration,

    /// Maximum time to wait for the `uciok` acknowledgment at startup.
    pub handshake_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }
}

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// The single conversation with the engine process.
pub struct EngineSession {
    conn: Mutex<Conn>,
    config: SessionConfig,
}

struct Conn {
    writer: BoxedWriter,
    lines: Lines<BufReader<BoxedReader>>,

    /// Keeps the subprocess handle alive so `kill_on_drop` fires when the
    /// session goes away. `None` when the session was built from raw
    /// streams.
    _child: Option<Child>,

    /// Set once the conversation is known to be broken; all later `run`
    /// calls fail fast with [`EngineError::Unavailable`].
    failed: bool,
}

impl std::fmt::Debug for EngineSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineSession").finish_non_exhaustive()
    }
}

impl EngineSession {
    /// Launches the engine subprocess and completes the startup handshake.
    pub async fn spawn(program: &Path, config: SessionConfig) -> Result<Self, EngineError> {
        let mut child = Command::new(program)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                EngineError::Unavailable(format!("failed to launch {}: {e}", program.display()))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| EngineError::Unavailable("engine stdin was not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::Unavailable("engine stdout was not captured".to_string()))?;

        info!(program = %program.display(), "engine process launched");
        Self::from_parts(Box::new(stdout), Box::new(stdin), Some(child), config).await
    }

    /// Builds a session over arbitrary reader/writer streams and completes
    /// the handshake. Used by tests to script the engine end of the
    /// conversation over an in-memory duplex.
    pub async fn connect<R, W>(reader: R, writer: W, config: SessionConfig) -> Result<Self, EngineError>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self::from_parts(Box::new(reader), Box::new(writer), None, config).await
    }

    async fn from_parts(
        reader: BoxedReader,
        writer: BoxedWriter,
        child: Option<Child>,
        config: SessionConfig,
    ) -> Result<Self, EngineError> {
        let mut conn = Conn {
            writer,
            lines: BufReader::new(reader).lines(),
            _child: child,
            failed: false,
        };
        handshake(&mut conn, config.handshake_timeout).await?;
        Ok(Self {
            conn: Mutex::new(conn),
            config,
        })
    }

    /// Writes `command` to the engine and blocks until its terminal reply.
    ///
    /// Acquires the single conversation slot; overlapping callers queue in
    /// FIFO order. A failed call leaves the session either consistent and
    /// idle (recoverable protocol errors) or marked unavailable (engine
    /// gone, or timed out with the conversation desynchronized).
    pub async fn run(&self, command: &str) -> Result<EngineReply, EngineError> {
        let mut conn = self.conn.lock().await;
        if conn.failed {
            return Err(EngineError::Unavailable(
                "engine session is closed".to_string(),
            ));
        }

        let written = write_command(&mut conn.writer, command).await;
        if let Err(err) = written {
            conn.failed = true;
            warn!(%err, "engine pipe write failed");
            return Err(err);
        }

        let replied =
            timeout(self.config.reply_timeout, protocol::read_reply(&mut conn.lines)).await;
        match replied {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(err)) => {
                if matches!(err, EngineError::Terminated | EngineError::Unavailable(_)) {
                    conn.failed = true;
                    warn!(%err, "engine conversation lost");
                }
                Err(err)
            }
            Err(_) => {
                // A late terminal line would answer the wrong command, so
                // the conversation cannot be resynchronized.
                conn.failed = true;
                let err = EngineError::Timeout(self.config.reply_timeout);
                warn!(%err, "engine reply timed out");
                Err(err)
            }
        }
    }

    /// Returns true if the session can still accept commands.
    pub async fn is_available(&self) -> bool {
        !self.conn.lock().await.failed
    }
}

async fn write_command(writer: &mut BoxedWriter, command: &str) -> Result<(), EngineError> {
    writer
        .write_all(command.as_bytes())
        .await
        .map_err(|e| EngineError::Unavailable(e.to_string()))?;
    writer
        .flush()
        .await
        .map_err(|e| EngineError::Unavailable(e.to_string()))
}

/// Sends the greeting and consumes lines until the acknowledgment arrives.
async fn handshake(conn: &mut Conn, bound: Duration) -> Result<(), EngineError> {
    let mut greeting = HANDSHAKE_GREETING.to_string();
    greeting.push('\n');
    write_command(&mut conn.writer, &greeting)
        .await
        .map_err(|e| EngineError::Handshake(e.to_string()))?;

    let lines = &mut conn.lines;
    let wait_for_ack = async {
        loop {
            match lines.next_line().await {
                Ok(Some(line)) if line.trim() == HANDSHAKE_ACK => return Ok(()),
                Ok(Some(line)) => debug!(%line, "handshake line skipped"),
                Ok(None) => {
                    return Err(EngineError::Handshake(format!(
                        "stream ended before {HANDSHAKE_ACK}"
                    )))
                }
                Err(e) => return Err(EngineError::Handshake(e.to_string())),
            }
        }
    };

    match timeout(bound, wait_for_ack).await {
        Ok(result) => result,
        Err(_) => Err(EngineError::Handshake(format!(
            "no {HANDSHAKE_ACK} within {bound:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};

    type EngineEnd = (
        Lines<BufReader<ReadHalf<DuplexStream>>>,
        WriteHalf<DuplexStream>,
    );

    /// Returns the session-facing stream halves plus the scripted engine's
    /// own line reader and writer.
    fn conversation() -> (ReadHalf<DuplexStream>, WriteHalf<DuplexStream>, EngineEnd) {
        let (local, remote) = tokio::io::duplex(4096);
        let (session_read, session_write) = tokio::io::split(local);
        let (engine_read, engine_write) = tokio::io::split(remote);
        let engine_lines = BufReader::new(engine_read).lines();
        (session_read, session_write, (engine_lines, engine_write))
    }

    async fn ack_handshake(engine: &mut EngineEnd) {
        let greeting = engine.0.next_line().await.unwrap().unwrap();
        assert_eq!(greeting, HANDSHAKE_GREETING);
        engine
            .1
            .write_all(b"id name scripted\nuciok\n")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_handshake_completes_before_run() {
        let (read, write, mut engine) = conversation();
        let driver = tokio::spawn(async move {
            ack_handshake(&mut engine).await;
            engine
        });

        let session = EngineSession::connect(read, write, SessionConfig::default())
            .await
            .unwrap();
        assert!(session.is_available().await);
        driver.await.unwrap();
    }

    #[tokio::test]
    async fn test_handshake_stream_end_is_a_startup_error() {
        let (read, write, mut engine) = conversation();
        let driver = tokio::spawn(async move {
            let greeting = engine.0.next_line().await.unwrap().unwrap();
            assert_eq!(greeting, HANDSHAKE_GREETING);
            engine.1.write_all(b"id name scripted\n").await.unwrap();
            // Drop both halves without ever acknowledging.
        });

        let err = EngineSession::connect(read, write, SessionConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Handshake(_)), "got {err:?}");
        driver.await.unwrap();
    }

    #[tokio::test]
    async fn test_silent_handshake_times_out() {
        let (read, write, mut engine) = conversation();
        let driver = tokio::spawn(async move {
            let _ = engine.0.next_line().await;
            // Stay alive without acknowledging so the handshake hits its
            // bound rather than end-of-stream.
            tokio::time::sleep(Duration::from_secs(5)).await;
            engine
        });

        let config = SessionConfig {
            handshake_timeout: Duration::from_millis(50),
            ..SessionConfig::default()
        };
        let err = EngineSession::connect(read, write, config)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Handshake(_)), "got {err:?}");
        driver.abort();
    }

    #[tokio::test]
    async fn test_run_returns_reply_and_diagnostics() {
        let (read, write, mut engine) = conversation();
        let driver = tokio::spawn(async move {
            ack_handshake(&mut engine).await;
            let position = engine.0.next_line().await.unwrap().unwrap();
            let go = engine.0.next_line().await.unwrap().unwrap();
            assert_eq!(position, "position startpos");
            assert_eq!(go, "go time 100 inc 5");
            engine
                .1
                .write_all(b"info depth 1\nbestmove e2e4\n")
                .await
                .unwrap();
            engine
        });

        let session = EngineSession::connect(read, write, SessionConfig::default())
            .await
            .unwrap();
        let reply = session
            .run("position startpos\ngo time 100 inc 5\n")
            .await
            .unwrap();
        assert_eq!(reply.best_move, "e2e4");
        assert_eq!(reply.diagnostics, vec!["info depth 1"]);
        driver.await.unwrap();
    }

    #[tokio::test]
    async fn test_engine_exit_fails_run_and_closes_session() {
        let (read, write, mut engine) = conversation();
        let driver = tokio::spawn(async move {
            ack_handshake(&mut engine).await;
            let _ = engine.0.next_line().await;
            let _ = engine.0.next_line().await;
            // Dropping both halves ends the reply stream mid-conversation.
        });

        let session = EngineSession::connect(read, write, SessionConfig::default())
            .await
            .unwrap();
        let err = session
            .run("position startpos\ngo time 100 inc 5\n")
            .await
            .unwrap_err();
        assert_eq!(err, EngineError::Terminated);

        // The session now fails fast instead of corrupting shared state.
        let err = session
            .run("position startpos\ngo time 100 inc 5\n")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Unavailable(_)));
        assert!(!session.is_available().await);
        driver.await.unwrap();
    }

    #[tokio::test]
    async fn test_silent_engine_times_out() {
        let (read, write, mut engine) = conversation();
        let driver = tokio::spawn(async move {
            ack_handshake(&mut engine).await;
            let _ = engine.0.next_line().await;
            let _ = engine.0.next_line().await;
            // Stay alive without answering so the read times out rather
            // than seeing end-of-stream.
            tokio::time::sleep(Duration::from_secs(5)).await;
            engine
        });

        let config = SessionConfig {
            reply_timeout: Duration::from_millis(50),
            ..SessionConfig::default()
        };
        let session = EngineSession::connect(read, write, config).await.unwrap();
        let err = session
            .run("position startpos\ngo time 100 inc 5\n")
            .await
            .unwrap_err();
        assert_eq!(err, EngineError::Timeout(Duration::from_millis(50)));
        assert!(!session.is_available().await);
        driver.abort();
    }

    #[tokio::test]
    async fn test_overlapping_runs_never_interleave_commands() {
        let (read, write, mut engine) = conversation();
        let driver = tokio::spawn(async move {
            ack_handshake(&mut engine).await;
            // Each command is two lines; reply pairs the move to the
            // position actually received, in arrival order.
            for _ in 0..2 {
                let position = engine.0.next_line().await.unwrap().unwrap();
                let go = engine.0.next_line().await.unwrap().unwrap();
                assert!(position.starts_with("position "), "got {position:?}");
                assert!(go.starts_with("go "), "got {go:?}");
                let mv = if position.ends_with('A') { "a1a2" } else { "b1b2" };
                engine
                    .1
                    .write_all(format!("bestmove {mv}\n").as_bytes())
                    .await
                    .unwrap();
            }
            engine
        });

        let session = std::sync::Arc::new(
            EngineSession::connect(read, write, SessionConfig::default())
                .await
                .unwrap(),
        );
        let first = {
            let session = session.clone();
            tokio::spawn(async move { session.run("position A\ngo time 1 inc 0\n").await })
        };
        let second = {
            let session = session.clone();
            tokio::spawn(async move { session.run("position B\ngo time 1 inc 0\n").await })
        };

        let first = first.await.unwrap().unwrap();
        let second = second.await.unwrap().unwrap();
        let mut moves = vec![first.best_move, second.best_move];
        moves.sort();
        assert_eq!(moves, vec!["a1a2", "b1b2"]);
        driver.await.unwrap();
    }
}
