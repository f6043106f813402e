use std::io::{BufRead, BufReader};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use tracing::{debug, info, warn};

use crate::dispatch::DispatchHandle;
use crate::http_client::stream_client;
use crate::state::{Delta, FeedStatus};

/// Incremental `text/event-stream` decoder. Only `data:` fields matter here;
/// comments, `event:`, `id:` and `retry:` lines are ignored.
#[derive(Debug, Default)]
pub struct SseParser {
    data: Vec<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one line (without its terminator). Returns the joined data
    /// payload when the line completes an event.
    pub fn push_line(&mut self, line: &str) -> Option<String> {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.is_empty() {
            if self.data.is_empty() {
                return None;
            }
            return Some(std::mem::take(&mut self.data).join("\n"));
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        if field == "data" {
            self.data.push(value.to_string());
        }
        None
    }

    /// Flushes a trailing event left open when the stream ends.
    pub fn finish(&mut self) -> Option<String> {
        if self.data.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.data).join("\n"))
        }
    }
}

const STOP_POLL: Duration = Duration::from_millis(50);

/// Runs the SSE transport until `stop` is set. Each disconnect is followed
/// by a fixed backoff and a fresh connection; events missed in the gap are
/// not replayed.
pub fn spawn_stream_feed(
    url: String,
    handle: DispatchHandle,
    stop: Arc<AtomicBool>,
    backoff: Duration,
) -> JoinHandle<()> {
    thread::spawn(move || {
        run_with_reconnect(&handle, &stop, backoff, |handle, stop| {
            read_stream(&url, handle, stop)
        });
    })
}

/// Reconnect loop around one `session` (connect, read until the stream ends,
/// return the event count). Sessions share `handle`, so per-key engine state
/// carries across reconnects.
pub fn run_with_reconnect<F>(
    handle: &DispatchHandle,
    stop: &AtomicBool,
    backoff: Duration,
    mut session: F,
) where
    F: FnMut(&DispatchHandle, &AtomicBool) -> Result<u64>,
{
    let outbox = handle.outbox().clone();
    while !stop.load(Ordering::Relaxed) {
        outbox.push(Delta::FeedStatus(FeedStatus::Connecting));
        match session(handle, stop) {
            Ok(events) => {
                info!(events, "event stream closed");
                outbox.push(Delta::Log(format!(
                    "[INFO] Stream closed after {events} events"
                )));
            }
            Err(err) => {
                warn!(error = %err, "event stream failed");
                outbox.push(Delta::Log(format!("[WARN] Stream error: {err:#}")));
            }
        }
        outbox.push(Delta::FeedStatus(FeedStatus::Disconnected));
        sleep_unless_stopped(stop, backoff);
    }
    outbox.push(Delta::FeedStatus(FeedStatus::Finished));
}

fn sleep_unless_stopped(stop: &AtomicBool, total: Duration) {
    let deadline = Instant::now() + total;
    while !stop.load(Ordering::Relaxed) {
        let left = deadline.saturating_duration_since(Instant::now());
        if left.is_zero() {
            break;
        }
        thread::sleep(left.min(STOP_POLL));
    }
}

fn read_stream(url: &str, handle: &DispatchHandle, stop: &AtomicBool) -> Result<u64> {
    let client = stream_client()?;
    let resp = client
        .get(url)
        .header(ACCEPT, "text/event-stream")
        .header(CACHE_CONTROL, "no-cache")
        .send()
        .with_context(|| format!("connect failed: {url}"))?
        .error_for_status()
        .context("stream rejected")?;
    handle
        .outbox()
        .push(Delta::FeedStatus(FeedStatus::Connected));

    let mut parser = SseParser::new();
    let mut events = 0u64;
    for line in BufReader::new(resp).lines() {
        if stop.load(Ordering::Relaxed) {
            break;
        }
        // The stream client times out idle reads, so a quiet stream still
        // gets back here to observe `stop`.
        let line = match line {
            Ok(line) => line,
            Err(_) if stop.load(Ordering::Relaxed) => break,
            Err(err) => return Err(err).context("stream read failed"),
        };
        if let Some(payload) = parser.push_line(&line) {
            events += 1;
            forward(handle, &payload)?;
        }
    }
    if let Some(payload) = parser.finish() {
        events += 1;
        forward(handle, &payload)?;
    }
    Ok(events)
}

// Malformed payloads are already counted and logged by the handle; only a
// closed dispatcher ends the stream.
fn forward(handle: &DispatchHandle, payload: &str) -> Result<()> {
    if let Err(err) = handle.submit_raw(payload) {
        if err.downcast_ref::<crate::event::ObservationError>().is_none() {
            return Err(err);
        }
        debug!(error = %err, "skipped stream payload");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::SseParser;

    #[test]
    fn joins_multi_line_data_and_skips_comments() {
        let mut parser = SseParser::new();
        assert_eq!(parser.push_line(": keep-alive"), None);
        assert_eq!(parser.push_line("event: tick"), None);
        assert_eq!(parser.push_line("data: {\"a\":"), None);
        assert_eq!(parser.push_line("data:1}"), None);
        assert_eq!(parser.push_line(""), Some("{\"a\":\n1}".to_string()));
        assert_eq!(parser.push_line(""), None);
    }

    #[test]
    fn crlf_terminated_lines_are_handled() {
        let mut parser = SseParser::new();
        parser.push_line("data: x\r");
        assert_eq!(parser.push_line("\r"), Some("x".to_string()));
    }

    #[test]
    fn finish_flushes_open_event() {
        let mut parser = SseParser::new();
        parser.push_line("data: tail");
        assert_eq!(parser.finish(), Some("tail".to_string()));
        assert_eq!(parser.finish(), None);
    }
}
