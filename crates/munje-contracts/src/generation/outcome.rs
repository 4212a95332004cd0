use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::failure::{user_facing_message, AttemptError, FailureKind};

pub const NOT_MATH_DEFAULT_MESSAGE: &str = "수학 문제가 아닌 이미지입니다.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Problem {
    #[serde(default)]
    pub question: String,
    /// Worked solution followed by the final result.
    #[serde(default)]
    pub answer: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationFailure {
    pub kind: FailureKind,
    pub diagnostic: String,
}

impl GenerationFailure {
    pub fn from_attempt(err: &AttemptError) -> Self {
        Self {
            kind: err.classify(),
            diagnostic: err.diagnostic().to_string(),
        }
    }

    pub fn user_message(&self) -> &'static str {
        user_facing_message(&self.diagnostic)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationOutcome {
    ProblemSet { problems: Vec<Problem>, model: String },
    NotMathProblem { message: String },
    Failure(GenerationFailure),
}

impl GenerationOutcome {
    pub fn tag(&self) -> &'static str {
        match self {
            Self::ProblemSet { .. } => "problem_set",
            Self::NotMathProblem { .. } => "not_math_problem",
            Self::Failure(_) => "failure",
        }
    }
}

/// A successfully parsed model response, before the orchestrator attaches the
/// model name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelReply {
    Questions(Vec<Problem>),
    NotMathProblem { message: String },
}

/// Removes every ```` ```json ```` and ```` ``` ```` marker (with one trailing
/// newline each) and trims the result.
pub fn strip_code_fences(text: &str) -> String {
    text.replace("```json\n", "")
        .replace("```json", "")
        .replace("```\n", "")
        .replace("```", "")
        .trim()
        .to_string()
}

pub fn parse_model_reply(raw: &str) -> Result<ModelReply, AttemptError> {
    let body = strip_code_fences(raw);
    let value: Value = serde_json::from_str(&body)
        .map_err(|err| AttemptError::Parse(format!("model response is not valid JSON: {err}")))?;
    interpret_reply(&value)
}

/// Reads an already-decoded reply object. No text is rewritten, so fence
/// markers inside problem text survive.
pub fn interpret_reply(value: &Value) -> Result<ModelReply, AttemptError> {
    if value.get("notMathProblem").map(is_truthy).unwrap_or(false) {
        let message = value
            .get("message")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .unwrap_or(NOT_MATH_DEFAULT_MESSAGE)
            .to_string();
        return Ok(ModelReply::NotMathProblem { message });
    }

    if let Some(items) = value.get("questions").filter(|items| items.is_array()) {
        let problems = Vec::<Problem>::deserialize(items).map_err(|err| {
            AttemptError::Parse(format!("questions in model JSON have an unexpected shape: {err}"))
        })?;
        return Ok(ModelReply::Questions(problems));
    }

    Err(AttemptError::Parse(
        "model JSON has neither `questions` nor `notMathProblem`".to_string(),
    ))
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().map(|n| n != 0.0).unwrap_or(true),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn fenced_empty_question_list_is_not_an_error() {
        let raw = "```json\n{\"questions\":[]}\n```";
        assert_eq!(strip_code_fences(raw), "{\"questions\":[]}");
        assert_eq!(parse_model_reply(raw), Ok(ModelReply::Questions(Vec::new())));
    }

    #[test]
    fn question_count_matches_input_exactly() -> anyhow::Result<()> {
        let items = (0..13)
            .map(|idx| json!({"question": format!("q{idx}"), "answer": format!("a{idx}")}))
            .collect::<Vec<_>>();
        let raw = serde_json::to_string(&json!({ "questions": items }))?;
        let ModelReply::Questions(problems) = parse_model_reply(&raw)? else {
            anyhow::bail!("expected questions");
        };
        assert_eq!(problems.len(), 13);
        assert_eq!(problems[12].question, "q12");
        assert_eq!(problems[12].answer, "a12");
        Ok(())
    }

    #[test]
    fn not_math_message_defaults_when_absent_or_blank() {
        assert_eq!(
            parse_model_reply(r#"{"notMathProblem": true}"#),
            Ok(ModelReply::NotMathProblem {
                message: NOT_MATH_DEFAULT_MESSAGE.to_string()
            })
        );
        assert_eq!(
            parse_model_reply(r#"{"notMathProblem": true, "message": ""}"#),
            Ok(ModelReply::NotMathProblem {
                message: NOT_MATH_DEFAULT_MESSAGE.to_string()
            })
        );
        assert_eq!(
            parse_model_reply(r#"{"notMathProblem": true, "message": "풍경 사진입니다."}"#),
            Ok(ModelReply::NotMathProblem {
                message: "풍경 사진입니다.".to_string()
            })
        );
    }

    #[test]
    fn not_math_flag_wins_over_questions() {
        let reply = parse_model_reply(r#"{"notMathProblem": true, "questions": []}"#);
        assert!(matches!(reply, Ok(ModelReply::NotMathProblem { .. })));
    }

    #[test]
    fn false_flag_falls_through_to_questions() {
        let reply = parse_model_reply(
            r#"{"notMathProblem": false, "questions": [{"question": "1+1", "answer": "2"}]}"#,
        );
        assert_eq!(
            reply,
            Ok(ModelReply::Questions(vec![Problem {
                question: "1+1".to_string(),
                answer: "2".to_string(),
            }]))
        );
    }

    #[test]
    fn invalid_json_is_a_parse_error_mentioning_json() {
        match parse_model_reply("Here are your problems!") {
            Err(AttemptError::Parse(text)) => assert!(text.contains("JSON")),
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn unrelated_shapes_are_rejected() {
        for raw in ["{}", r#"{"questions": null}"#, r#"{"problems": []}"#, "[]"] {
            assert!(
                matches!(parse_model_reply(raw), Err(AttemptError::Parse(_))),
                "{raw}"
            );
        }
    }

    #[test]
    fn missing_fields_in_items_default_to_empty_text() {
        let reply = parse_model_reply(r#"{"questions": [{"question": "only"}]}"#);
        assert_eq!(
            reply,
            Ok(ModelReply::Questions(vec![Problem {
                question: "only".to_string(),
                answer: String::new(),
            }]))
        );
    }

    #[test]
    fn failure_user_message_uses_diagnostic() {
        let failure = GenerationFailure::from_attempt(&AttemptError::Transport(
            "Gemini request failed (429): RESOURCE_EXHAUSTED".to_string(),
        ));
        assert_eq!(failure.kind, FailureKind::QuotaExceeded);
        assert_eq!(failure.user_message(), crate::generation::QUOTA_EXHAUSTED_MESSAGE);
    }
}
