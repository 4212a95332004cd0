use std::time::Instant;

use munje_contracts::generation::{
    parse_model_reply, AttemptError, AttemptRecord, GenerationFailure, GenerationOutcome,
    GenerationReport, ModelReply, INSTRUCTION_PROMPT,
};
use munje_contracts::models::CandidateList;
use tracing::{info, warn};

use crate::error_chain_text;
use crate::preprocess::ImagePayload;
use crate::provider::{InvokeRequest, VisionProvider};

const DIAGNOSTIC_MAX_CHARS: usize = 2000;
const NO_CANDIDATES_DIAGNOSTIC: &str = "no model candidates configured";

#[derive(Debug, Clone, PartialEq)]
pub struct GeneratorConfig {
    pub candidates: CandidateList,
    pub prompt: String,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            candidates: CandidateList::default(),
            prompt: INSTRUCTION_PROMPT.to_string(),
        }
    }
}

impl GeneratorConfig {
    pub fn with_candidates(mut self, candidates: CandidateList) -> Self {
        self.candidates = candidates;
        self
    }
}

/// Tries each candidate model in order until one produces a usable reply.
///
/// Only quota-classified failures move on to the next candidate; any other
/// failure ends the request immediately.
pub struct Generator<P> {
    config: GeneratorConfig,
    provider: P,
}

impl<P: VisionProvider> Generator<P> {
    pub fn new(config: GeneratorConfig, provider: P) -> Self {
        Self { config, provider }
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn generate(&self, image: &ImagePayload) -> GenerationReport {
        info!(
            provider = self.provider.name(),
            image_digest = %image.digest(),
            image_bytes = image.len(),
            candidates = self.config.candidates.len(),
            "generation started"
        );

        let mut attempts = Vec::new();
        let mut last_error = None;

        for candidate in self.config.candidates.list() {
            let request = InvokeRequest {
                model: &candidate.name,
                prompt: &self.config.prompt,
                image,
                params: &candidate.params,
            };
            let started = Instant::now();
            let result = self
                .provider
                .invoke(&request)
                .map_err(|err| {
                    AttemptError::Transport(error_chain_text(&err, DIAGNOSTIC_MAX_CHARS))
                })
                .and_then(|raw| parse_model_reply(&raw));
            let elapsed = started.elapsed();

            match result {
                Ok(reply) => {
                    attempts.push(AttemptRecord::succeeded(&candidate.name, elapsed));
                    let outcome = match reply {
                        ModelReply::Questions(problems) => {
                            info!(
                                model = %candidate.name,
                                problems = problems.len(),
                                elapsed_ms = elapsed.as_millis() as u64,
                                "model produced problem set"
                            );
                            GenerationOutcome::ProblemSet {
                                problems,
                                model: candidate.name.clone(),
                            }
                        }
                        ModelReply::NotMathProblem { message } => {
                            info!(model = %candidate.name, "image is not a math problem");
                            GenerationOutcome::NotMathProblem { message }
                        }
                    };
                    return GenerationReport { outcome, attempts };
                }
                Err(err) => {
                    let kind = err.classify();
                    warn!(
                        model = %candidate.name,
                        stage = err.stage(),
                        failure_kind = kind.as_str(),
                        elapsed_ms = elapsed.as_millis() as u64,
                        diagnostic = err.diagnostic(),
                        "model attempt failed"
                    );
                    attempts.push(AttemptRecord::failed(&candidate.name, elapsed, &err));
                    if !kind.is_retryable() {
                        return failure_report(&err, attempts);
                    }
                    last_error = Some(err);
                }
            }
        }

        let err = last_error
            .unwrap_or_else(|| AttemptError::Transport(NO_CANDIDATES_DIAGNOSTIC.to_string()));
        warn!(attempts = attempts.len(), "all model candidates failed");
        failure_report(&err, attempts)
    }
}

fn failure_report(err: &AttemptError, attempts: Vec<AttemptRecord>) -> GenerationReport {
    GenerationReport {
        outcome: GenerationOutcome::Failure(GenerationFailure::from_attempt(err)),
        attempts,
    }
}
