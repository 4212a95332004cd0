mod failure;
mod outcome;
mod prompt;
mod report;

pub use failure::{
    classify_failure, user_facing_message, AttemptError, FailureKind, CLIENT_FALLBACK_MESSAGE,
    GENERIC_FAILURE_MESSAGE, INVALID_API_KEY_MESSAGE, MISSING_API_KEY_MESSAGE,
    MISSING_IMAGE_MESSAGE, PARSE_FAILURE_MESSAGE, QUOTA_EXHAUSTED_MESSAGE,
};
pub use outcome::{
    interpret_reply, parse_model_reply, strip_code_fences, GenerationFailure, GenerationOutcome,
    ModelReply, Problem, NOT_MATH_DEFAULT_MESSAGE,
};
pub use prompt::INSTRUCTION_PROMPT;
pub use report::{AttemptRecord, GenerationReport};
