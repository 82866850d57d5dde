use crate::config::PROGRESS_THROTTLE_MS;
use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::sync::broadcast;

/// One tick of an in-flight index run. All fields optional except the
/// counters, matching the union shape emitted across the run's lifetime.
#[derive(Debug, Clone, Serialize, Default)]
pub struct ProgressData {
    pub completed_chunks: usize,
    pub total_chunks: usize,
    pub total_files: usize,
    pub completed_files: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub waiting_for_rate_limit: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_cancelled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percentage: Option<u32>,
}

impl ProgressData {
    pub fn with_percentage(mut self) -> Self {
        self.percentage = Some(if self.total_chunks == 0 {
            0
        } else {
            (100 * self.completed_chunks / self.total_chunks) as u32
        });
        self
    }
}

/// The six event types a run can emit, in the shape appended to the log and
/// broadcast to HTTP console subscribers.
#[derive(Debug, Clone)]
pub enum ProgressMessage {
    Start { total_files: usize },
    Progress(ProgressData),
    Complete { total_files: usize, completed_files: usize },
    Cancelled(ProgressData),
    Error { message: String },
    Warning { message: String },
}

impl ProgressMessage {
    fn type_name(&self) -> &'static str {
        match self {
            ProgressMessage::Start { .. } => "start",
            ProgressMessage::Progress(_) => "progress",
            ProgressMessage::Complete { .. } => "complete",
            ProgressMessage::Cancelled(_) => "cancelled",
            ProgressMessage::Error { .. } => "error",
            ProgressMessage::Warning { .. } => "warning",
        }
    }

    fn data_json(&self) -> serde_json::Value {
        match self {
            ProgressMessage::Start { total_files } => serde_json::json!({ "total_files": total_files }),
            ProgressMessage::Progress(data) | ProgressMessage::Cancelled(data) => {
                serde_json::to_value(data).unwrap_or(serde_json::Value::Null)
            }
            ProgressMessage::Complete { total_files, completed_files } => {
                serde_json::json!({ "total_files": total_files, "completed_files": completed_files })
            }
            ProgressMessage::Error { message } => serde_json::json!({ "message": message }),
            ProgressMessage::Warning { message } => serde_json::json!({ "message": message }),
        }
    }
}

/// Append-only per-workspace JSON-lines progress log, truncated at engine
/// initialization, bridged to a broadcast channel for the HTTP console's
/// websocket. Writes never block indexing on I/O failure: append errors are
/// logged once and swallowed, matching the reporter's "best effort" contract.
pub struct ProgressReporter {
    log_path: PathBuf,
    sender: broadcast::Sender<ProgressMessage>,
    last_progress_emit: Mutex<Option<Instant>>,
}

impl ProgressReporter {
    pub fn new(data_dir: &Path, workspace_id: &str) -> std::io::Result<Self> {
        let log_path = data_dir.join("progress").join(format!("{workspace_id}.jsonl"));
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&log_path, "")?;
        let (sender, _) = broadcast::channel(256);
        Ok(Self {
            log_path,
            sender,
            last_progress_emit: Mutex::new(None),
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressMessage> {
        self.sender.subscribe()
    }

    /// Unthrottled emit, used for `start`/`complete`/`cancelled`/`error`/`warning`.
    pub fn emit(&self, message: ProgressMessage) {
        self.append(&message);
        let _ = self.sender.send(message);
    }

    /// Throttled `progress` tick: at most one per `PROGRESS_THROTTLE_MS`,
    /// unless `force` (end-of-batch boundary).
    pub fn emit_progress(&self, data: ProgressData, force: bool) {
        let now = Instant::now();
        {
            let mut last = self.last_progress_emit.lock();
            let elapsed_ok = last
                .map(|t| now.duration_since(t).as_millis() as u64 >= PROGRESS_THROTTLE_MS)
                .unwrap_or(true);
            if !force && !elapsed_ok {
                return;
            }
            *last = Some(now);
        }
        self.emit(ProgressMessage::Progress(data.with_percentage()));
    }

    fn append(&self, message: &ProgressMessage) {
        let envelope = serde_json::json!({
            "timestamp": Utc::now().to_rfc3339(),
            "type": message.type_name(),
            "data": message.data_json(),
        });
        let line = match serde_json::to_string(&envelope) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize progress event");
                return;
            }
        };
        if let Err(e) = append_line(&self.log_path, &line) {
            tracing::warn!(error = %e, path = %self.log_path.display(), "failed to append progress log line");
        }
    }
}

fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
    let mut file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{line}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn truncates_log_on_construction() {
        let dir = tempdir().unwrap();
        let reporter = ProgressReporter::new(dir.path(), "ws1").unwrap();
        reporter.emit(ProgressMessage::Start { total_files: 3 });
        let contents = std::fs::read_to_string(dir.path().join("progress/ws1.jsonl")).unwrap();
        assert_eq!(contents.lines().count(), 1);

        let reporter2 = ProgressReporter::new(dir.path(), "ws1").unwrap();
        let contents = std::fs::read_to_string(dir.path().join("progress/ws1.jsonl")).unwrap();
        assert!(contents.is_empty());
        drop(reporter2);
    }

    #[test]
    fn progress_throttling_drops_rapid_ticks() {
        let dir = tempdir().unwrap();
        let reporter = ProgressReporter::new(dir.path(), "ws1").unwrap();
        for _ in 0..20 {
            reporter.emit_progress(ProgressData::default(), false);
        }
        let contents = std::fs::read_to_string(dir.path().join("progress/ws1.jsonl")).unwrap();
        assert_eq!(contents.lines().count(), 1);
    }

    #[test]
    fn forced_progress_bypasses_throttle() {
        let dir = tempdir().unwrap();
        let reporter = ProgressReporter::new(dir.path(), "ws1").unwrap();
        reporter.emit_progress(ProgressData::default(), true);
        reporter.emit_progress(ProgressData::default(), true);
        let contents = std::fs::read_to_string(dir.path().join("progress/ws1.jsonl")).unwrap();
        assert_eq!(contents.lines().count(), 2);
    }

    #[test]
    fn percentage_is_zero_when_no_chunks() {
        let data = ProgressData::default().with_percentage();
        assert_eq!(data.percentage, Some(0));
    }

    #[test]
    fn percentage_floors() {
        let data = ProgressData {
            completed_chunks: 1,
            total_chunks: 3,
            ..Default::default()
        }
        .with_percentage();
        assert_eq!(data.percentage, Some(33));
    }
}
