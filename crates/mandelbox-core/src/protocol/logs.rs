// Protocol stdout handling: line reassembly, level detection and the
// network-hiccup heuristic.

use std::time::Duration;

use strum::{Display, EnumString};
use tokio::time::Instant;

/// NACKs closer together than this count as one burst.
pub const NACK_WINDOW: Duration = Duration::from_secs(3);
/// A burst with more NACKs than this means the network is unstable.
pub const NACK_THRESHOLD: u32 = 6;

const NACK_MARKER: &str = "NACKING";

// ── Line buffering ───────────────────────────────────────────────

/// Reassembles lines from arbitrarily split stdout chunks.
#[derive(Debug, Default)]
pub struct LineBuffer {
    partial: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line it completed, without the
    /// `\n` or `\r\n` terminator.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.partial.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(end) = self.partial.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.partial.drain(..=end).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        lines
    }

    /// The trailing partial line, once the stream has ended.
    pub fn finish(&mut self) -> Option<String> {
        if self.partial.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.partial);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}

// ── Levels ───────────────────────────────────────────────────────

/// Severity tag the protocol writes on each line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "UPPERCASE")]
pub enum ProtocolLevel {
    Error,
    Warning,
    Info,
    Debug,
}

/// Level of a protocol line: either its first token or a `| LEVEL |`
/// column. Matching is case-sensitive.
pub fn parse_level(line: &str) -> Option<ProtocolLevel> {
    let first = line.split_whitespace().next()?;
    if let Ok(level) = first.parse() {
        return Some(level);
    }
    line.split('|')
        .skip(1)
        .find_map(|column| column.trim().parse().ok())
}

/// Forward one line to the log at its own level.
pub fn forward_line(line: &str) {
    match parse_level(line) {
        Some(ProtocolLevel::Error) => tracing::error!(target: "protocol", "{line}"),
        Some(ProtocolLevel::Warning) => tracing::warn!(target: "protocol", "{line}"),
        Some(ProtocolLevel::Info) => tracing::info!(target: "protocol", "{line}"),
        Some(ProtocolLevel::Debug) | None => tracing::debug!(target: "protocol", "{line}"),
    }
}

// ── Network hiccups ──────────────────────────────────────────────

/// Tracks `NACKING` bursts in protocol output.
#[derive(Debug, Default)]
pub struct NackDetector {
    burst_start: Option<Instant>,
    count: u32,
}

impl NackDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one line; returns whether the network currently looks unstable.
    ///
    /// A NACK within the window of the burst's first NACK extends the
    /// burst, otherwise it starts a new one. Other lines report unstable
    /// while the latest burst is younger than the window.
    pub fn observe(&mut self, line: &str, now: Instant) -> bool {
        let recent = self
            .burst_start
            .is_some_and(|start| now.saturating_duration_since(start) < NACK_WINDOW);

        if line.contains(NACK_MARKER) {
            if recent {
                self.count += 1;
            } else {
                self.count = 1;
                self.burst_start = Some(now);
            }
            return self.count > NACK_THRESHOLD;
        }
        recent
    }
}
