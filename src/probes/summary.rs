//! End-of-run statistics from the tool's own summary block.

use super::dialect::Dialect;
use super::parser::number;
use super::SummaryEvent;

/// Build the summary from the lines the parser did not classify.
///
/// Best effort: whatever cannot be found stays zero.
pub fn aggregate<S: AsRef<str>>(lines: &[S], dialect: &Dialect) -> SummaryEvent {
    let patterns = dialect.patterns();
    let mut summary = SummaryEvent::default();

    for line in lines {
        let line: &str = line.as_ref();
        if let Some(caps) = patterns.transmitted.captures(line) {
            summary.sent = number(&caps, "sent").unwrap_or(0);
            summary.recv = number(&caps, "recv").unwrap_or(0);
            summary.loss = number(&caps, "loss").unwrap_or(0.0);
        } else if let Some(caps) = patterns.rtt.captures(line) {
            summary.min = number(&caps, "min").unwrap_or(0.0);
            summary.avg = number(&caps, "avg").unwrap_or(0.0);
            summary.max = number(&caps, "max").unwrap_or(0.0);
        }
    }

    summary
}
