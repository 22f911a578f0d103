//! Line classifier for probe output.

use regex::Captures;

use super::dialect::{Dialect, Patterns};
use super::NO_RTT;

/// What one output line means.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedLine {
    Reply { seq: u32, ttl: u8, rtt_ms: f64 },
    Unreachable { seq: u32 },
    Timeout { seq: u32 },
    Failure { detail: String },
    /// Kept for summary parsing.
    Unclassified,
}

/// Session-scoped classifier state.
///
/// Lines without a sequence number get one synthesized from a counter that
/// follows the last explicit sequence seen, starting at 1.
#[derive(Debug)]
pub struct OutputParser {
    patterns: &'static Patterns,
    last_seq: u32,
    unclassified: Vec<String>,
}

impl OutputParser {
    pub fn new(dialect: &'static Dialect) -> Self {
        Self {
            patterns: dialect.patterns(),
            last_seq: 0,
            unclassified: Vec::new(),
        }
    }

    /// Classify one line. Patterns are tried reply, unreachable, timeout,
    /// failure; the first match wins.
    pub fn classify(&mut self, line: &str) -> ParsedLine {
        let line = line.trim_end_matches(&['\r', '\n'][..]);
        let p = self.patterns;

        if let Some(caps) = p.reply.captures(line) {
            let seq = self.sequence(&caps);
            return ParsedLine::Reply {
                seq,
                ttl: number(&caps, "ttl").unwrap_or(0),
                rtt_ms: number(&caps, "time").unwrap_or(0.0),
            };
        }
        if let Some(caps) = p.unreachable.captures(line) {
            return ParsedLine::Unreachable {
                seq: self.sequence(&caps),
            };
        }
        if let Some(caps) = p.timeout.captures(line) {
            return ParsedLine::Timeout {
                seq: self.sequence(&caps),
            };
        }
        if let Some(caps) = p.failure.captures(line) {
            let detail = caps
                .name("detail")
                .map_or(line, |m| m.as_str())
                .trim()
                .to_string();
            return ParsedLine::Failure { detail };
        }

        self.unclassified.push(line.to_string());
        ParsedLine::Unclassified
    }

    pub fn unclassified(&self) -> &[String] {
        &self.unclassified
    }

    pub fn into_unclassified(self) -> Vec<String> {
        self.unclassified
    }

    fn sequence(&mut self, caps: &Captures<'_>) -> u32 {
        let seq = match caps.name("seq") {
            Some(m) => m.as_str().parse().unwrap_or(0),
            None => self.last_seq.saturating_add(1),
        };
        self.last_seq = seq;
        seq
    }
}

impl ParsedLine {
    /// Round-trip time to report for this line.
    pub fn rtt_ms(&self) -> f64 {
        match self {
            ParsedLine::Reply { rtt_ms, .. } => *rtt_ms,
            _ => NO_RTT,
        }
    }
}

/// Named group as a number; absent or malformed gives `None`.
pub(crate) fn number<T: std::str::FromStr>(caps: &Captures<'_>, name: &str) -> Option<T> {
    caps.name(name).and_then(|m| m.as_str().parse().ok())
}
