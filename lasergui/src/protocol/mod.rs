//! Engine wire protocol: command encoding and reply parsing.
//!
//! The engine is an external, unmodifiable program driven over a
//! line-oriented, newline-terminated text protocol on its standard pipes:
//!
//! - Outbound: a `position` line (with a `moves` clause when a move history
//!   is present) followed by a `go` line carrying the time controls.
//! - Inbound: zero or more diagnostic lines, then one terminal line starting
//!   with `bestmove` whose second whitespace-separated field is the chosen
//!   move.
//! - Startup: outbound `uci`, inbound lines until `uciok`.
//!
//! This module owns the textual grammar only. Pipe ownership and exclusive
//! access live in [`crate::engine`]; diagnostics are accumulated per reply,
//! never shared across requests.

use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufRead, Lines};
use tracing::debug;

/// Reserved token that starts the engine's terminal reply line.
pub const TERMINAL_TOKEN: &str = "bestmove";

/// Greeting command sent once at session startup.
pub const HANDSHAKE_GREETING: &str = "uci";

/// Acknowledgment line expected before any other traffic.
pub const HANDSHAKE_ACK: &str = "uciok";

// =============================================================================
// Request / Reply Types
// =============================================================================

/// A move-computation request, immutable once submitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveRequest {
    /// Textual board description understood by the engine.
    pub position: String,

    /// Ordered move tokens already applied to `position`.
    pub moves: Vec<String>,

    /// Time budget for the search (`go time <n>`).
    pub time_budget: u64,

    /// Per-move time increment (`go ... inc <n>`).
    pub time_increment: u64,
}

impl MoveRequest {
    /// Creates a request from its parts.
    pub fn new(
        position: impl Into<String>,
        moves: Vec<String>,
        time_budget: u64,
        time_increment: u64,
    ) -> Self {
        Self {
            position: position.into(),
            moves,
            time_budget,
            time_increment,
        }
    }
}

/// A completed engine reply: the chosen move plus the diagnostic lines that
/// preceded the terminal line, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineReply {
    /// Move token extracted from the terminal line.
    pub best_move: String,

    /// Raw diagnostic lines for this request only.
    pub diagnostics: Vec<String>,
}

impl EngineReply {
    /// Renders the diagnostics as newline-terminated display text.
    pub fn diagnostics_text(&self) -> String {
        if self.diagnostics.is_empty() {
            return String::new();
        }
        let mut text = self.diagnostics.join("\n");
        text.push('\n');
        text
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Errors surfaced by the engine conversation.
///
/// Payloads are plain strings so outcomes can be stored and handed to a
/// later poll without keeping the underlying I/O error alive.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    /// The engine process is not running or a pipe operation failed.
    #[error("engine unavailable: {0}")]
    Unavailable(String),

    /// The reply stream ended before a terminal line arrived.
    #[error("engine terminated before sending a terminal reply line")]
    Terminated,

    /// No terminal line arrived within the configured bound.
    #[error("engine did not reply within {0:?}")]
    Timeout(Duration),

    /// A reply line violated the protocol grammar.
    #[error("invalid engine reply: {0}")]
    InvalidReply(String),

    /// The startup handshake did not complete.
    #[error("engine handshake failed: {0}")]
    Handshake(String),
}

// =============================================================================
// Encoding
// =============================================================================

/// Encodes a [`MoveRequest`] into the engine's command text.
///
/// The moves clause is optional: it is emitted only when the history is
/// non-empty. Both forms end with the same `go` directive.
pub fn encode(request: &MoveRequest) -> String {
    let mut text = String::with_capacity(64);
    text.push_str("position ");
    text.push_str(&request.position);
    if !request.moves.is_empty() {
        text.push_str(" moves ");
        text.push_str(&request.moves.join(" "));
    }
    text.push('\n');
    text.push_str(&format!(
        "go time {} inc {}\n",
        request.time_budget, request.time_increment
    ));
    text
}

// =============================================================================
// Reply Parsing
// =============================================================================

/// Reads reply lines until the terminal token, accumulating diagnostics.
///
/// Every non-terminal line is appended to the reply's diagnostics. End of
/// stream (or a bare empty line, which the engine never emits mid-search)
/// means the engine went away and yields [`EngineError::Terminated`] instead
/// of looping forever.
pub async fn read_reply<R>(lines: &mut Lines<R>) -> Result<EngineReply, EngineError>
where
    R: AsyncBufRead + Unpin,
{
    let mut diagnostics = Vec::new();
    loop {
        let line = lines
            .next_line()
            .await
            .map_err(|e| EngineError::Unavailable(e.to_string()))?;
        let line = match line {
            Some(line) => line.trim_end().to_string(),
            None => return Err(EngineError::Terminated),
        };
        if line.is_empty() {
            return Err(EngineError::Terminated);
        }

        debug!(target: "lasergui::protocol", %line, "engine");

        let mut fields = line.split_whitespace();
        if fields.next() == Some(TERMINAL_TOKEN) {
            let best_move = fields
                .next()
                .ok_or_else(|| EngineError::InvalidReply(line.clone()))?
                .to_string();
            return Ok(EngineReply {
                best_move,
                diagnostics,
            });
        }

        diagnostics.push(line);
    }
}
