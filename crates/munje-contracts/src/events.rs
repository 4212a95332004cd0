use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use serde_json::{json, Map, Value};

use crate::generation::{GenerationOutcome, GenerationReport};

pub type EventPayload = Map<String, Value>;

/// Append-only JSONL trail of one generation request.
///
/// Every line carries `type`, `request_id` and `ts`; payload keys are merged
/// last and may override them.
#[derive(Debug, Clone)]
pub struct EventLog {
    inner: Arc<EventLogInner>,
}

#[derive(Debug)]
struct EventLogInner {
    path: PathBuf,
    request_id: String,
    lock: Mutex<()>,
}

impl EventLog {
    pub fn new(path: impl Into<PathBuf>, request_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(EventLogInner {
                path: path.into(),
                request_id: request_id.into(),
                lock: Mutex::new(()),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn request_id(&self) -> &str {
        &self.inner.request_id
    }

    pub fn emit(&self, event_type: &str, payload: EventPayload) -> anyhow::Result<Value> {
        let mut event = Map::new();
        event.insert("type".to_string(), Value::String(event_type.to_string()));
        event.insert(
            "request_id".to_string(),
            Value::String(self.inner.request_id.clone()),
        );
        event.insert("ts".to_string(), Value::String(now_utc_iso()));
        event.extend(payload);

        if let Some(parent) = self.inner.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let line = serde_json::to_string(&event)?;
        let _guard = self
            .inner
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("event log lock poisoned"))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.inner.path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;

        Ok(Value::Object(event))
    }

    /// Writes one line per attempt (`model_attempt` or `model_failed`)
    /// followed by `generation_finished`.
    pub fn record_report(&self, report: &GenerationReport) -> anyhow::Result<()> {
        for attempt in &report.attempts {
            let event_type = if attempt.is_success() {
                "model_attempt"
            } else {
                "model_failed"
            };
            self.emit(event_type, attempt.to_payload())?;
        }
        let mut payload = Map::new();
        payload.insert("outcome".to_string(), json!(report.outcome.tag()));
        payload.insert("attempts".to_string(), json!(report.attempt_count()));
        match &report.outcome {
            GenerationOutcome::ProblemSet { problems, model } => {
                payload.insert("model".to_string(), json!(model));
                payload.insert("problems".to_string(), json!(problems.len()));
            }
            GenerationOutcome::NotMathProblem { .. } => {}
            GenerationOutcome::Failure(failure) => {
                payload.insert("failure_kind".to_string(), json!(failure.kind.as_str()));
                payload.insert("error".to_string(), json!(failure.user_message()));
                payload.insert("details".to_string(), json!(failure.diagnostic));
            }
        }
        self.emit("generation_finished", payload)?;
        Ok(())
    }
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::time::Duration;

    use chrono::DateTime;

    use super::*;
    use crate::generation::{AttemptError, AttemptRecord, GenerationFailure, Problem};

    fn read_lines(path: &Path) -> anyhow::Result<Vec<Value>> {
        let content = fs::read_to_string(path)?;
        content
            .lines()
            .map(|line| serde_json::from_str(line).map_err(Into::into))
            .collect()
    }

    #[test]
    fn emit_writes_compact_jsonl_line() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let log = EventLog::new(&path, "req-123");

        let mut payload = EventPayload::new();
        payload.insert("image_digest".to_string(), json!("ab12cd34"));
        let emitted = log.emit("generation_started", payload)?;

        let lines = read_lines(&path)?;
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0], emitted);
        assert_eq!(lines[0]["type"], json!("generation_started"));
        assert_eq!(lines[0]["request_id"], json!("req-123"));
        assert_eq!(lines[0]["image_digest"], json!("ab12cd34"));
        DateTime::parse_from_rfc3339(lines[0]["ts"].as_str().unwrap_or(""))?;
        Ok(())
    }

    #[test]
    fn payload_can_override_default_keys() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let log = EventLog::new(temp.path().join("events.jsonl"), "req-123");

        let mut payload = EventPayload::new();
        payload.insert("request_id".to_string(), json!("override"));
        let emitted = log.emit("generation_started", payload)?;
        assert_eq!(emitted["request_id"], json!("override"));
        Ok(())
    }

    #[test]
    fn report_writes_one_line_per_attempt_then_summary() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("nested").join("events.jsonl");
        let log = EventLog::new(&path, "req-9");

        let quota = AttemptError::Transport("request failed (429)".to_string());
        let report = GenerationReport {
            outcome: GenerationOutcome::ProblemSet {
                problems: vec![Problem {
                    question: "2x = 4".to_string(),
                    answer: "x = 2".to_string(),
                }],
                model: "second".to_string(),
            },
            attempts: vec![
                AttemptRecord::failed("first", Duration::from_millis(10), &quota),
                AttemptRecord::succeeded("second", Duration::from_millis(20)),
            ],
        };
        log.record_report(&report)?;

        let lines = read_lines(&path)?;
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["type"], json!("model_failed"));
        assert_eq!(lines[0]["failure_kind"], json!("quota_exceeded"));
        assert_eq!(lines[1]["type"], json!("model_attempt"));
        assert_eq!(lines[1]["model"], json!("second"));
        assert_eq!(lines[2]["type"], json!("generation_finished"));
        assert_eq!(lines[2]["outcome"], json!("problem_set"));
        assert_eq!(lines[2]["problems"], json!(1));
        Ok(())
    }

    #[test]
    fn failure_summary_keeps_mapped_and_raw_text() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let log = EventLog::new(&path, "req-10");
        let report = GenerationReport {
            outcome: GenerationOutcome::Failure(GenerationFailure::from_attempt(
                &AttemptError::Parse("model response is not valid JSON: eof".to_string()),
            )),
            attempts: Vec::new(),
        };
        log.record_report(&report)?;

        let lines = read_lines(&path)?;
        assert_eq!(lines[0]["outcome"], json!("failure"));
        assert_eq!(
            lines[0]["error"],
            json!(crate::generation::PARSE_FAILURE_MESSAGE)
        );
        assert_eq!(
            lines[0]["details"],
            json!("model response is not valid JSON: eof")
        );
        Ok(())
    }
}
