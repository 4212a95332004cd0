use std::time::Duration;

use serde_json::{json, Map, Value};

use super::failure::{AttemptError, FailureKind};
use super::outcome::GenerationOutcome;

/// One model call made while serving a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptRecord {
    pub model: String,
    pub elapsed: Duration,
    pub failure: Option<(FailureKind, String)>,
}

impl AttemptRecord {
    pub fn succeeded(model: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            model: model.into(),
            elapsed,
            failure: None,
        }
    }

    pub fn failed(model: impl Into<String>, elapsed: Duration, err: &AttemptError) -> Self {
        Self {
            model: model.into(),
            elapsed,
            failure: Some((err.classify(), err.diagnostic().to_string())),
        }
    }

    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    pub fn to_payload(&self) -> Map<String, Value> {
        let mut payload = Map::new();
        payload.insert("model".to_string(), Value::String(self.model.clone()));
        payload.insert(
            "elapsed_ms".to_string(),
            json!(self.elapsed.as_millis() as u64),
        );
        payload.insert("success".to_string(), Value::Bool(self.is_success()));
        if let Some((kind, diagnostic)) = &self.failure {
            payload.insert("failure_kind".to_string(), json!(kind.as_str()));
            payload.insert("diagnostic".to_string(), json!(diagnostic));
        }
        payload
    }
}

/// The outcome of one request plus the attempts that led to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationReport {
    pub outcome: GenerationOutcome,
    pub attempts: Vec<AttemptRecord>,
}

impl GenerationReport {
    pub fn attempt_count(&self) -> usize {
        self.attempts.len()
    }

    pub fn attempted_models(&self) -> Vec<&str> {
        self.attempts
            .iter()
            .map(|attempt| attempt.model.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::AttemptRecord;
    use crate::generation::AttemptError;

    #[test]
    fn failed_attempt_payload_carries_classification() {
        let record = AttemptRecord::failed(
            "gemini-2.5-flash",
            Duration::from_millis(1250),
            &AttemptError::Transport("Gemini request failed (429): quota".to_string()),
        );
        let payload = record.to_payload();
        assert_eq!(payload["model"], json!("gemini-2.5-flash"));
        assert_eq!(payload["elapsed_ms"], json!(1250));
        assert_eq!(payload["success"], json!(false));
        assert_eq!(payload["failure_kind"], json!("quota_exceeded"));
    }

    #[test]
    fn successful_attempt_payload_has_no_diagnostic() {
        let payload = AttemptRecord::succeeded("m", Duration::from_millis(5)).to_payload();
        assert_eq!(payload["success"], json!(true));
        assert!(payload.get("diagnostic").is_none());
    }
}
