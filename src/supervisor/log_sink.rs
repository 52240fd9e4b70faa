use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::Local;
use tracing::{debug, error};

// Width of the rule lines bracketing a lifecycle action in the log.
const SEPARATOR_WIDTH: usize = 80;

/// Append-only log file for the supervised service's output.
///
/// Every line is flushed as soon as it is written so the log survives a
/// crash of the launcher itself. Write failures are logged and swallowed;
/// losing the log must never take the service down with it.
pub struct LogSink {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl LogSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: Mutex::new(None),
        }
    }

    /// Open the sink in append mode, replacing any previously open handle.
    pub fn open(&self) -> std::io::Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        *self.file.lock().expect("log file lock poisoned") = Some(file);
        debug!("opened log file: {}", self.path.display());
        Ok(())
    }

    /// Append one line and flush. Failures are logged and swallowed.
    pub fn write_line(&self, line: &str) {
        let mut guard = self.file.lock().expect("log file lock poisoned");
        if let Some(file) = guard.as_mut()
            && let Err(e) = writeln!(file, "{line}").and_then(|()| file.flush())
        {
            error!("error writing to log file: {e}");
        }
    }

    /// Close the sink if it is open.
    pub fn close(&self) {
        let mut guard = self.file.lock().expect("log file lock poisoned");
        if let Some(mut file) = guard.take() {
            if let Err(e) = file.flush() {
                error!("error closing log file: {e}");
            }
            debug!("closed log file");
        }
    }

    /// The three lines of a separator block for a lifecycle action.
    pub fn separator_lines(action: &str) -> [String; 3] {
        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");
        let rule = "=".repeat(SEPARATOR_WIDTH);
        [rule.clone(), format!("{timestamp} - {action}"), rule]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_lines_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("svc.log");
        let sink = LogSink::new(&path);

        sink.open().unwrap();
        sink.write_line("first");
        sink.write_line("second");
        sink.close();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "first\nsecond\n");
    }

    #[test]
    fn reopen_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("svc.log");
        let sink = LogSink::new(&path);

        sink.open().unwrap();
        sink.write_line("run one");
        sink.close();

        sink.open().unwrap();
        sink.write_line("run two");
        sink.close();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "run one\nrun two\n");
    }

    #[test]
    fn write_when_closed_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("svc.log");
        let sink = LogSink::new(&path);

        sink.write_line("dropped");
        assert!(!path.exists());
    }

    #[test]
    fn open_fails_for_bad_path() {
        let sink = LogSink::new("/nonexistent-dir/deeper/svc.log");
        assert!(sink.open().is_err());
    }

    #[test]
    fn separator_block_shape() {
        let [top, middle, bottom] = LogSink::separator_lines("STARTING");
        assert_eq!(top, "=".repeat(80));
        assert_eq!(bottom, "=".repeat(80));
        assert!(middle.ends_with("- STARTING"));
        // Leading timestamp: "YYYY-MM-DD HH:MM:SS - STARTING"
        assert_eq!(middle.len(), "YYYY-MM-DD HH:MM:SS - STARTING".len());
    }
}
