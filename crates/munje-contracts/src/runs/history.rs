use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Datelike, Local, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::generation::Problem;

pub const HISTORY_LIMIT: usize = 20;
pub const PREVIEW_MAX_CHARS: usize = 500;
/// Entries kept when writing the full history fails.
const HISTORY_FALLBACK_LIMIT: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedProblemSet {
    pub id: String,
    pub questions: Vec<Problem>,
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_preview: Option<String>,
}

/// Most-recent-first list of generated problem sets, stored as one JSON array.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    path: PathBuf,
    limit: usize,
}

impl HistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            limit: HISTORY_LIMIT,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit.max(1);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing or unreadable files read as an empty history.
    pub fn list(&self) -> Vec<SavedProblemSet> {
        read_entries(&self.path).unwrap_or_default()
    }

    pub fn save(
        &self,
        questions: Vec<Problem>,
        image_preview: Option<&str>,
    ) -> anyhow::Result<SavedProblemSet> {
        let entry = SavedProblemSet {
            id: Uuid::new_v4().simple().to_string(),
            questions,
            created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            image_preview: image_preview.map(|preview| truncate_chars(preview, PREVIEW_MAX_CHARS)),
        };

        let mut entries = vec![entry.clone()];
        entries.extend(self.list());
        entries.truncate(self.limit);

        if write_entries(&self.path, &entries).is_err() {
            entries.truncate(HISTORY_FALLBACK_LIMIT.min(self.limit));
            write_entries(&self.path, &entries)?;
        }
        Ok(entry)
    }

    /// Exact id match first, then the first entry whose id starts with `id`.
    pub fn get(&self, id: &str) -> Option<SavedProblemSet> {
        let id = id.trim();
        if id.is_empty() {
            return None;
        }
        let entries = self.list();
        if let Some(found) = entries.iter().find(|entry| entry.id == id) {
            return Some(found.clone());
        }
        entries.into_iter().find(|entry| entry.id.starts_with(id))
    }

    pub fn delete(&self, id: &str) -> anyhow::Result<bool> {
        let entries = self.list();
        let before = entries.len();
        let kept = entries
            .into_iter()
            .filter(|entry| entry.id != id)
            .collect::<Vec<_>>();
        if kept.len() == before {
            return Ok(false);
        }
        write_entries(&self.path, &kept)?;
        Ok(true)
    }

    pub fn clear(&self) -> anyhow::Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => {
                Err(err).with_context(|| format!("failed to remove {}", self.path.display()))
            }
        }
    }
}

/// Short Korean relative label used in history listings.
pub fn format_relative_time(created_at: &str, now: DateTime<Utc>) -> String {
    let Ok(parsed) = DateTime::parse_from_rfc3339(created_at) else {
        return created_at.to_string();
    };
    let created = parsed.with_timezone(&Utc);
    let diff = now.signed_duration_since(created);

    let minutes = diff.num_minutes();
    let hours = diff.num_hours();
    let days = diff.num_days();

    if minutes < 1 {
        return "방금 전".to_string();
    }
    if minutes < 60 {
        return format!("{minutes}분 전");
    }
    if hours < 24 {
        return format!("{hours}시간 전");
    }
    if days < 7 {
        return format!("{days}일 전");
    }
    let local = created.with_timezone(&Local);
    format!("{}월 {}일", local.month(), local.day())
}

fn read_entries(path: &Path) -> Option<Vec<SavedProblemSet>> {
    let raw = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&raw).ok()
}

fn write_entries(path: &Path, entries: &[SavedProblemSet]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(entries)?)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

fn truncate_chars(value: &str, max_chars: usize) -> String {
    value.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::*;

    fn problems(label: &str) -> Vec<Problem> {
        vec![Problem {
            question: format!("{label} question"),
            answer: format!("{label} answer"),
        }]
    }

    #[test]
    fn newest_entry_comes_first() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = HistoryStore::new(temp.path().join("history.json"));
        let first = store.save(problems("first"), None)?;
        let second = store.save(problems("second"), None)?;

        let entries = store.list();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].id, second.id);
        assert_eq!(entries[1].id, first.id);
        Ok(())
    }

    #[test]
    fn history_is_capped() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = HistoryStore::new(temp.path().join("history.json"));
        for idx in 0..(HISTORY_LIMIT + 3) {
            store.save(problems(&idx.to_string()), None)?;
        }
        let entries = store.list();
        assert_eq!(entries.len(), HISTORY_LIMIT);
        assert_eq!(
            entries[0].questions[0].question,
            format!("{} question", HISTORY_LIMIT + 2)
        );
        Ok(())
    }

    #[test]
    fn preview_is_truncated() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = HistoryStore::new(temp.path().join("history.json"));
        let preview = "x".repeat(PREVIEW_MAX_CHARS * 2);
        let saved = store.save(problems("p"), Some(&preview))?;
        assert_eq!(
            saved.image_preview.map(|text| text.chars().count()),
            Some(PREVIEW_MAX_CHARS)
        );
        Ok(())
    }

    #[test]
    fn get_matches_exact_id_or_prefix() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = HistoryStore::new(temp.path().join("history.json"));
        let saved = store.save(problems("p"), None)?;
        assert_eq!(store.get(&saved.id), Some(saved.clone()));
        assert_eq!(store.get(&saved.id[..6]), Some(saved));
        assert_eq!(store.get("zz-not-an-id"), None);
        assert_eq!(store.get("  "), None);
        Ok(())
    }

    #[test]
    fn delete_and_clear() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = HistoryStore::new(temp.path().join("history.json"));
        let keep = store.save(problems("keep"), None)?;
        let dropped = store.save(problems("dropped"), None)?;

        assert!(store.delete(&dropped.id)?);
        assert!(!store.delete(&dropped.id)?);
        assert_eq!(store.list(), vec![keep]);

        store.clear()?;
        assert!(store.list().is_empty());
        store.clear()?;
        Ok(())
    }

    #[test]
    fn corrupt_file_reads_as_empty() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("history.json");
        std::fs::write(&path, "{not json")?;
        let store = HistoryStore::new(&path);
        assert!(store.list().is_empty());
        store.save(problems("fresh"), None)?;
        assert_eq!(store.list().len(), 1);
        Ok(())
    }

    #[test]
    fn stored_json_uses_camel_case_keys() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("history.json");
        let store = HistoryStore::new(&path);
        store.save(problems("p"), Some("data:image/jpeg;base64,AAAA"))?;
        let raw: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        assert!(raw[0].get("createdAt").is_some());
        assert!(raw[0].get("imagePreview").is_some());
        assert_eq!(raw[0]["questions"][0]["answer"], "p answer");
        Ok(())
    }

    #[test]
    fn relative_time_labels() {
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap();
        let at = |delta: Duration| (now - delta).to_rfc3339();

        assert_eq!(format_relative_time(&at(Duration::seconds(30)), now), "방금 전");
        assert_eq!(format_relative_time(&at(Duration::minutes(5)), now), "5분 전");
        assert_eq!(format_relative_time(&at(Duration::hours(3)), now), "3시간 전");
        assert_eq!(format_relative_time(&at(Duration::days(2)), now), "2일 전");

        let old = now - Duration::days(30);
        let local = old.with_timezone(&Local);
        assert_eq!(
            format_relative_time(&old.to_rfc3339(), now),
            format!("{}월 {}일", local.month(), local.day())
        );
        assert_eq!(format_relative_time("yesterday", now), "yesterday");
    }
}
