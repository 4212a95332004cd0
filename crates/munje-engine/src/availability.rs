use std::time::{Duration, Instant};

use munje_contracts::generation::{AttemptError, FailureKind};
use munje_contracts::models::CandidateList;
use tracing::{info, warn};

use crate::error_chain_text;
use crate::provider::TextProvider;

pub const AVAILABILITY_PROMPT: &str = "Say 'Hello' in Korean";
const DIAGNOSTIC_MAX_CHARS: usize = 2000;

/// Result of sending the availability prompt to one model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelCheck {
    pub model: String,
    pub elapsed: Duration,
    pub result: Result<String, AttemptError>,
}

impl ModelCheck {
    pub fn is_available(&self) -> bool {
        self.result.is_ok()
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.result.as_ref().err().map(AttemptError::classify)
    }
}

/// Asks every candidate in order. Unlike generation, a failure never stops the
/// run: the point is to see which models the key can reach.
pub fn check_models<P: TextProvider>(
    provider: &P,
    candidates: &CandidateList,
) -> Vec<ModelCheck> {
    candidates
        .list()
        .map(|candidate| {
            let started = Instant::now();
            let result = provider
                .prompt_text(&candidate.name, AVAILABILITY_PROMPT)
                .map_err(|err| {
                    AttemptError::Transport(error_chain_text(&err, DIAGNOSTIC_MAX_CHARS))
                });
            let elapsed = started.elapsed();
            match &result {
                Ok(_) => info!(
                    model = %candidate.name,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "model available"
                ),
                Err(err) => warn!(
                    model = %candidate.name,
                    failure_kind = err.classify().as_str(),
                    diagnostic = err.diagnostic(),
                    "model unavailable"
                ),
            }
            ModelCheck {
                model: candidate.name.clone(),
                elapsed,
                result,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use anyhow::anyhow;

    use super::*;

    struct CannedText {
        prompts: Mutex<Vec<(String, String)>>,
    }

    impl TextProvider for CannedText {
        fn prompt_text(&self, model: &str, prompt: &str) -> anyhow::Result<String> {
            self.prompts
                .lock()
                .expect("prompts lock")
                .push((model.to_string(), prompt.to_string()));
            match model {
                "busy" => Err(anyhow!("Gemini request failed (429): RESOURCE_EXHAUSTED")),
                "gone" => Err(anyhow!("Gemini request failed (404): model not found")),
                _ => Ok("안녕하세요".to_string()),
            }
        }
    }

    #[test]
    fn every_candidate_is_checked_even_after_failures() {
        let provider = CannedText {
            prompts: Mutex::new(Vec::new()),
        };
        let candidates = CandidateList::from_names(["gone", "busy", "ok"]);
        let checks = check_models(&provider, &candidates);

        let asked = provider.prompts.lock().expect("prompts lock").clone();
        assert_eq!(
            asked,
            vec![
                ("gone".to_string(), AVAILABILITY_PROMPT.to_string()),
                ("busy".to_string(), AVAILABILITY_PROMPT.to_string()),
                ("ok".to_string(), AVAILABILITY_PROMPT.to_string()),
            ]
        );
        assert_eq!(checks.len(), 3);
        assert_eq!(checks[0].failure_kind(), Some(FailureKind::NonRetryable));
        assert_eq!(checks[1].failure_kind(), Some(FailureKind::QuotaExceeded));
        assert!(checks[2].is_available());
        assert_eq!(checks[2].result.as_deref(), Ok("안녕하세요"));
    }

    #[test]
    fn empty_candidate_list_checks_nothing() {
        let provider = CannedText {
            prompts: Mutex::new(Vec::new()),
        };
        assert!(check_models(&provider, &CandidateList::new(Vec::new())).is_empty());
    }
}
