use serde::Serialize;
use thiserror::Error;

pub const MISSING_IMAGE_MESSAGE: &str = "이미지가 필요합니다.";
pub const MISSING_API_KEY_MESSAGE: &str = "API 키가 설정되지 않았습니다.";
pub const INVALID_API_KEY_MESSAGE: &str = "API 키가 유효하지 않습니다.";
pub const QUOTA_EXHAUSTED_MESSAGE: &str =
    "모든 모델의 API 할당량을 초과했습니다. 잠시 후 다시 시도해주세요.";
pub const PARSE_FAILURE_MESSAGE: &str = "AI 응답을 처리하는 중 오류가 발생했습니다.";
pub const GENERIC_FAILURE_MESSAGE: &str = "문제를 생성하는 도중 오류가 발생했습니다.";
pub const CLIENT_FALLBACK_MESSAGE: &str = "문제 생성 실패";

const QUOTA_MARKERS: [&str; 4] = ["429", "quota", "RESOURCE_EXHAUSTED", "rate limit"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Upstream capacity limit; the next candidate may still succeed.
    QuotaExceeded,
    NonRetryable,
}

impl FailureKind {
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::QuotaExceeded)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::QuotaExceeded => "quota_exceeded",
            Self::NonRetryable => "non_retryable",
        }
    }
}

/// Why a single model attempt did not produce a usable reply.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttemptError {
    /// The call itself failed: network, timeout or a non-2xx upstream status.
    #[error("{0}")]
    Transport(String),
    /// The call returned text that is not the expected JSON contract.
    #[error("{0}")]
    Parse(String),
}

impl AttemptError {
    pub fn diagnostic(&self) -> &str {
        match self {
            Self::Transport(text) | Self::Parse(text) => text,
        }
    }

    pub fn stage(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport",
            Self::Parse(_) => "parse",
        }
    }

    pub fn classify(&self) -> FailureKind {
        classify_failure(self.diagnostic())
    }
}

/// Matches upstream wording, so it breaks silently if the provider rephrases
/// its errors. Keep every rule here.
pub fn classify_failure(diagnostic: &str) -> FailureKind {
    if QUOTA_MARKERS
        .iter()
        .any(|marker| diagnostic.contains(marker))
    {
        return FailureKind::QuotaExceeded;
    }
    FailureKind::NonRetryable
}

/// Maps the last diagnostic of a failed request to the text shown to users.
pub fn user_facing_message(diagnostic: &str) -> &'static str {
    if diagnostic.contains("API_KEY") {
        INVALID_API_KEY_MESSAGE
    } else if diagnostic.contains("quota") || diagnostic.contains("429") {
        QUOTA_EXHAUSTED_MESSAGE
    } else if diagnostic.contains("JSON") {
        PARSE_FAILURE_MESSAGE
    } else {
        GENERIC_FAILURE_MESSAGE
    }
}
