mod candidates;

pub use candidates::{CandidateList, GenerationParams, ModelCandidate, DEFAULT_MODELS};
