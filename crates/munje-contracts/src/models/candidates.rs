use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Built-in priority order. Later entries are only tried after a quota failure.
pub const DEFAULT_MODELS: [&str; 3] = [
    "gemini-3-flash",
    "gemini-2.5-flash",
    "gemini-2.5-flash-lite",
];

/// Sampling settings sent with every attempt. Field names serialize to the
/// upstream `generationConfig` keys.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationParams {
    pub temperature: f64,
    pub top_k: u32,
    pub top_p: f64,
    pub max_output_tokens: u32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_k: 40,
            top_p: 0.95,
            max_output_tokens: 8192,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelCandidate {
    pub name: String,
    pub params: GenerationParams,
}

impl ModelCandidate {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: GenerationParams::default(),
        }
    }
}

/// Ordered, de-duplicated list of models to try for one request.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateList {
    models: IndexMap<String, ModelCandidate>,
}

impl Default for CandidateList {
    fn default() -> Self {
        Self::from_names(DEFAULT_MODELS)
    }
}

impl CandidateList {
    pub fn new(candidates: Vec<ModelCandidate>) -> Self {
        let mut models = IndexMap::new();
        for candidate in candidates {
            let name = candidate.name.trim().to_string();
            if name.is_empty() || models.contains_key(&name) {
                continue;
            }
            models.insert(
                name.clone(),
                ModelCandidate {
                    name,
                    params: candidate.params,
                },
            );
        }
        Self { models }
    }

    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::new(
            names
                .into_iter()
                .map(|name| ModelCandidate::new(name.as_ref()))
                .collect(),
        )
    }

    /// Parses a comma separated override such as `MUNJE_MODELS`. Returns `None`
    /// when nothing usable is listed.
    pub fn parse_override(raw: &str) -> Option<Self> {
        let list = Self::from_names(raw.split(','));
        if list.is_empty() {
            return None;
        }
        Some(list)
    }

    pub fn get(&self, name: &str) -> Option<&ModelCandidate> {
        self.models.get(name)
    }

    pub fn list(&self) -> impl Iterator<Item = &ModelCandidate> {
        self.models.values()
    }

    pub fn names(&self) -> Vec<String> {
        self.models.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}
