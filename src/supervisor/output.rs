//! Bounded capture of the child's output with subscriber fan-out.

use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Mutex;

use tracing::{debug, error};

use super::log_sink::LogSink;

/// Callback invoked with each new output line.
pub type OutputCallback = Box<dyn Fn(&str) + Send + Sync>;

/// Append-only channel for the child's output lines.
///
/// Lines are kept in a FIFO buffer capped at `max_lines`; once the cap is
/// exceeded the oldest lines are discarded. Every appended line is first
/// made visible in the buffer, then mirrored to the log sink, then fanned
/// out to subscribers, so a subscriber reading the buffer mid-notification
/// already sees the line it was notified about.
pub struct OutputChannel {
    buffer: Mutex<VecDeque<String>>,
    max_lines: usize,
    subscribers: Mutex<Vec<OutputCallback>>,
    sink: LogSink,
}

impl OutputChannel {
    pub fn new(max_lines: usize, sink: LogSink) -> Self {
        Self {
            buffer: Mutex::new(VecDeque::new()),
            max_lines,
            subscribers: Mutex::new(Vec::new()),
            sink,
        }
    }

    /// Append a line, trimming the head once the cap is exceeded.
    pub fn append(&self, line: &str) {
        {
            let mut buffer = self.buffer.lock().expect("output buffer lock poisoned");
            buffer.push_back(line.to_string());
            while buffer.len() > self.max_lines {
                buffer.pop_front();
            }
        }
        self.sink.write_line(line);
        self.notify(line);
    }

    /// Copy-out snapshot of the buffer, optionally only the most recent
    /// `max` lines.
    pub fn snapshot(&self, max: Option<usize>) -> Vec<String> {
        let buffer = self.buffer.lock().expect("output buffer lock poisoned");
        match max {
            Some(n) => {
                let skip = buffer.len().saturating_sub(n);
                buffer.iter().skip(skip).cloned().collect()
            }
            None => buffer.iter().cloned().collect(),
        }
    }

    /// Register a callback for new output lines. Delivery happens on the
    /// worker that produced the line, in registration order.
    pub fn subscribe(&self, callback: OutputCallback) {
        self.subscribers
            .lock()
            .expect("output subscriber lock poisoned")
            .push(callback);
        debug!("output subscriber registered");
    }

    /// Push a lifecycle separator block through the channel. The block lands
    /// in the buffer, the log and every subscriber like ordinary lines.
    pub fn write_separator(&self, action: &str) {
        for line in LogSink::separator_lines(action) {
            self.append(&line);
        }
    }

    /// The log sink this channel mirrors into.
    pub fn sink(&self) -> &LogSink {
        &self.sink
    }

    fn notify(&self, line: &str) {
        let subscribers = self.subscribers.lock().expect("output subscriber lock poisoned");
        for callback in subscribers.iter() {
            if catch_unwind(AssertUnwindSafe(|| callback(line))).is_err() {
                error!("error in output callback; continuing with remaining subscribers");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn channel(max_lines: usize) -> OutputChannel {
        // Point the sink at a path that is never opened; appends skip it.
        OutputChannel::new(max_lines, LogSink::new("unused.log"))
    }

    #[test]
    fn cap_keeps_most_recent_lines() {
        let channel = channel(1000);
        for i in 1..=1500 {
            channel.append(&format!("line {i}"));
        }
        let lines = channel.snapshot(None);
        assert_eq!(lines.len(), 1000);
        assert_eq!(lines[0], "line 501");
        assert_eq!(lines[999], "line 1500");
    }

    #[test]
    fn snapshot_with_max_returns_tail() {
        let channel = channel(10);
        for i in 1..=5 {
            channel.append(&format!("line {i}"));
        }
        assert_eq!(channel.snapshot(Some(3)), vec!["line 3", "line 4", "line 5"]);
        assert_eq!(channel.snapshot(Some(99)).len(), 5);
        assert!(channel.snapshot(Some(0)).is_empty());
    }

    #[test]
    fn subscribers_run_in_registration_order() {
        let channel = Arc::new(channel(10));
        let order = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let order = order.clone();
            channel.subscribe(Box::new(move |_| order.lock().unwrap().push(tag)));
        }
        channel.append("x");

        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn panicking_subscriber_does_not_block_the_rest() {
        let channel = Arc::new(channel(10));
        let delivered = Arc::new(AtomicUsize::new(0));

        channel.subscribe(Box::new(|_| panic!("bad subscriber")));
        let counter = delivered.clone();
        channel.subscribe(Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        channel.append("x");
        channel.append("y");

        assert_eq!(delivered.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn subscriber_sees_line_already_in_buffer() {
        let channel = Arc::new(channel(10));
        let seen = Arc::new(Mutex::new(Vec::new()));

        let reader = channel.clone();
        let seen_by_callback = seen.clone();
        channel.subscribe(Box::new(move |line| {
            let snapshot = reader.snapshot(None);
            assert_eq!(snapshot.last().map(String::as_str), Some(line));
            seen_by_callback.lock().unwrap().push(line.to_string());
        }));

        channel.append("alpha");
        channel.append("beta");

        assert_eq!(*seen.lock().unwrap(), vec!["alpha", "beta"]);
    }

    #[test]
    fn separator_lands_in_buffer_and_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("svc.log");
        let channel = OutputChannel::new(10, LogSink::new(&path));

        channel.sink().open().unwrap();
        channel.write_separator("STARTING");
        channel.sink().close();

        let lines = channel.snapshot(None);
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "=".repeat(80));
        assert!(lines[1].ends_with("- STARTING"));

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 3);
    }
}
