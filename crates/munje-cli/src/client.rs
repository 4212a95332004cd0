use std::time::Duration;

use munje_contracts::generation::{
    interpret_reply, GenerationFailure, GenerationOutcome, ModelReply, Problem,
    CLIENT_FALLBACK_MESSAGE,
};
use munje_engine::ImagePayload;
use reqwest::blocking::multipart::{Form, Part};
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Value};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerateResult {
    Problems {
        problems: Vec<Problem>,
        model: Option<String>,
    },
    NotMathProblem {
        message: String,
    },
}

impl GenerateResult {
    /// Splits an in-process outcome into the same shape the server returns.
    pub fn from_outcome(outcome: GenerationOutcome) -> Result<Self, GenerationFailure> {
        match outcome {
            GenerationOutcome::ProblemSet { problems, model } => Ok(Self::Problems {
                problems,
                model: Some(model),
            }),
            GenerationOutcome::NotMathProblem { message } => Ok(Self::NotMathProblem { message }),
            GenerationOutcome::Failure(failure) => Err(failure),
        }
    }

    /// Body as served by `POST /api/generate`.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Problems { problems, model } => json!({
                "questions": problems,
                "model": model,
            }),
            Self::NotMathProblem { message } => json!({
                "notMathProblem": true,
                "message": message,
            }),
        }
    }
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("{message}")]
    Server {
        status: u16,
        message: String,
        details: Option<String>,
    },
    #[error("{prefix}: {0}", prefix = CLIENT_FALLBACK_MESSAGE)]
    Transport(#[from] reqwest::Error),
}

impl ClientError {
    pub fn details(&self) -> Option<&str> {
        match self {
            Self::Server { details, .. } => details.as_deref(),
            Self::Transport(_) => None,
        }
    }
}

/// Uploads `image` to a running server and returns its answer.
pub fn generate_questions(
    server: &str,
    image: &ImagePayload,
    timeout: Duration,
) -> Result<GenerateResult, ClientError> {
    let endpoint = format!("{}/api/generate", server.trim().trim_end_matches('/'));
    let part = Part::bytes(image.bytes.clone())
        .file_name(upload_file_name(&image.mime_type))
        .mime_str(&image.mime_type)?;
    let form = Form::new().part("image", part);

    let response = HttpClient::new()
        .post(&endpoint)
        .timeout(timeout)
        .multipart(form)
        .send()?;
    let status = response.status().as_u16();
    let body = response.text()?;
    parse_generate_response(status, &body)
}

pub fn parse_generate_response(status: u16, body: &str) -> Result<GenerateResult, ClientError> {
    let value = serde_json::from_str::<Value>(body).ok();

    if !(200..300).contains(&status) {
        let field = |key: &str| {
            value
                .as_ref()
                .and_then(|value| value.get(key))
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|text| !text.is_empty())
                .map(str::to_string)
        };
        return Err(ClientError::Server {
            status,
            message: field("error").unwrap_or_else(|| CLIENT_FALLBACK_MESSAGE.to_string()),
            details: field("details"),
        });
    }

    let reply = match value.as_ref() {
        Some(value) => interpret_reply(value).map_err(|err| err.to_string()),
        None => Err("server response is not valid JSON".to_string()),
    }
    .map_err(|details| ClientError::Server {
        status,
        message: CLIENT_FALLBACK_MESSAGE.to_string(),
        details: Some(details),
    })?;
    Ok(match reply {
        ModelReply::Questions(problems) => GenerateResult::Problems {
            problems,
            model: value
                .as_ref()
                .and_then(|value| value.get("model"))
                .and_then(Value::as_str)
                .map(str::to_string),
        },
        ModelReply::NotMathProblem { message } => GenerateResult::NotMathProblem { message },
    })
}

fn upload_file_name(mime_type: &str) -> String {
    let ext = match mime_type {
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "image/webp" => "webp",
        "image/gif" => "gif",
        "image/heic" => "heic",
        _ => "bin",
    };
    format!("image.{ext}")
}
