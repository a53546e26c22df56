use std::path::PathBuf;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tokio::fs;
use tracing::{error, info};
use uuid::Uuid;

use crate::error::RubricStoreError;
use crate::rubric::is_criterion_line;

const PREVIEW_LEN: usize = 150;
const MAX_TITLE_LEN: usize = 80;

/// Identifiers are validated before any path is built from them.
static SAFE_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("id pattern"));

static NUMBERED_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*\d+\.").expect("numbered line pattern"));

/// Listing entry for a saved rubric.
#[derive(Debug, Clone, Serialize)]
pub struct RubricSummary {
    pub id: String,
    pub name: String,
    pub preview: String,
}

/// Flat-file rubric persistence: one `<id>.txt` per rubric inside a
/// dedicated directory.
#[derive(Clone, Debug)]
pub struct RubricStore {
    dir: PathBuf,
}

impl RubricStore {
    pub async fn new(dir: impl Into<PathBuf>) -> Result<Self, RubricStoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    /// Saves new rubric content under a fresh identifier. A provided name is
    /// prepended as a title line when it differs from the content's own
    /// first line.
    pub async fn create(
        &self,
        content: &str,
        name: Option<&str>,
    ) -> Result<String, RubricStoreError> {
        let id = Uuid::new_v4().to_string();
        self.write_rubric(&id, content, name).await?;
        Ok(id)
    }

    /// Replaces an existing rubric. Fails with `NotFound` when the
    /// identifier was never created.
    pub async fn update(
        &self,
        id: &str,
        content: &str,
        name: Option<&str>,
    ) -> Result<(), RubricStoreError> {
        let path = self.path_for(id)?;
        if !path.exists() {
            return Err(RubricStoreError::NotFound(id.to_string()));
        }
        self.write_rubric(id, content, name).await
    }

    /// Returns the rubric body and, when the first line looks like a title,
    /// that title as the display name.
    pub async fn read(&self, id: &str) -> Result<(String, Option<String>), RubricStoreError> {
        let path = self.path_for(id)?;
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(RubricStoreError::NotFound(id.to_string()));
            }
            Err(err) => return Err(err.into()),
        };

        Ok(split_title(&content))
    }

    /// Removes a rubric. `Ok(false)` means the identifier was valid but no
    /// file existed.
    pub async fn delete(&self, id: &str) -> Result<bool, RubricStoreError> {
        let path = self.path_for(id)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                info!(id, "deleted rubric file");
                Ok(true)
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// Lists saved rubrics sorted by display name. Unreadable files are
    /// skipped rather than failing the listing.
    pub async fn list(&self) -> Result<Vec<RubricSummary>, RubricStoreError> {
        let mut summaries = Vec::new();
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(summaries),
            Err(err) => return Err(err.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("txt") {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };

            let content = match fs::read_to_string(&path).await {
                Ok(content) => content,
                Err(err) => {
                    error!(?err, id, "failed to read rubric file, skipping");
                    continue;
                }
            };

            let name = first_nonempty_line(&content)
                .filter(|line| looks_like_title(line))
                .map(str::to_string)
                .unwrap_or_else(|| format!("Rubric {}", &id[..id.len().min(8)]));

            summaries.push(RubricSummary {
                id: id.to_string(),
                name,
                preview: make_preview(&content),
            });
        }

        summaries.sort_by_key(|summary| summary.name.to_lowercase());
        Ok(summaries)
    }

    async fn write_rubric(
        &self,
        id: &str,
        content: &str,
        name: Option<&str>,
    ) -> Result<(), RubricStoreError> {
        let path = self.path_for(id)?;

        let content = content.trim();
        let first_line = content.lines().next().unwrap_or("").trim();

        let to_save = match name.map(str::trim).filter(|n| !n.is_empty()) {
            Some(name) if name != first_line => format!("{name}\n\n{content}"),
            _ => content.to_string(),
        };

        fs::write(&path, to_save).await?;
        info!(id, "saved rubric file");
        Ok(())
    }

    fn path_for(&self, id: &str) -> Result<PathBuf, RubricStoreError> {
        if !SAFE_ID.is_match(id) {
            return Err(RubricStoreError::InvalidIdentifier);
        }
        Ok(self.dir.join(format!("{id}.txt")))
    }
}

fn first_nonempty_line(content: &str) -> Option<&str> {
    content.lines().map(str::trim).find(|line| !line.is_empty())
}

fn looks_like_title(line: &str) -> bool {
    !line.is_empty()
        && line.len() < MAX_TITLE_LEN
        && !NUMBERED_LINE.is_match(line)
        && !is_criterion_line(line)
}

/// Splits a stored rubric into (body, display name) when the first line is a
/// distinct title followed by real content.
fn split_title(content: &str) -> (String, Option<String>) {
    let trimmed = content.trim();
    let lines: Vec<&str> = trimmed.lines().collect();
    let first = lines.first().map(|line| line.trim()).unwrap_or("");

    if looks_like_title(first) && lines.len() > 1 {
        let rest = if lines[1].trim().is_empty() && lines.len() > 2 {
            lines[2..].join("\n")
        } else if !lines[1].trim().is_empty() {
            lines[1..].join("\n")
        } else {
            return (trimmed.to_string(), None);
        };
        return (rest.trim().to_string(), Some(first.to_string()));
    }

    (trimmed.to_string(), None)
}

fn make_preview(content: &str) -> String {
    let flat: String = content.chars().take(PREVIEW_LEN).collect();
    let flat = flat.replace('\n', " ");
    if content.chars().count() > PREVIEW_LEN {
        format!("{flat}...")
    } else {
        flat
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[tokio::test]
    async fn create_read_update_delete_round_trip() {
        let dir = tempdir().unwrap();
        let store = RubricStore::new(dir.path()).await.unwrap();

        let id = store
            .create("Depth (0-10):\n- looks deeply", Some("History Rubric"))
            .await
            .unwrap();

        let (content, name) = store.read(&id).await.unwrap();
        assert_eq!(name.as_deref(), Some("History Rubric"));
        assert!(content.starts_with("Depth (0-10):"));

        store
            .update(&id, "Breadth (0-20):", Some("Geography Rubric"))
            .await
            .unwrap();
        let (content, name) = store.read(&id).await.unwrap();
        assert_eq!(name.as_deref(), Some("Geography Rubric"));
        assert!(content.contains("Breadth"));

        assert!(store.delete(&id).await.unwrap());
        assert!(matches!(
            store.read(&id).await,
            Err(RubricStoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn update_of_missing_rubric_is_not_found() {
        let dir = tempdir().unwrap();
        let store = RubricStore::new(dir.path()).await.unwrap();
        assert!(matches!(
            store.update("no-such-id", "content", None).await,
            Err(RubricStoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn traversal_identifiers_are_rejected() {
        let dir = tempdir().unwrap();
        let store = RubricStore::new(dir.path()).await.unwrap();
        for bad in ["../etc/passwd", "a/b", "a.b", ""] {
            assert!(matches!(
                store.read(bad).await,
                Err(RubricStoreError::InvalidIdentifier)
            ));
        }
    }

    #[tokio::test]
    async fn delete_of_missing_rubric_returns_false() {
        let dir = tempdir().unwrap();
        let store = RubricStore::new(dir.path()).await.unwrap();
        assert!(!store.delete("absent").await.unwrap());
    }

    #[tokio::test]
    async fn listing_reports_names_and_previews() {
        let dir = tempdir().unwrap();
        let store = RubricStore::new(dir.path()).await.unwrap();
        store
            .create("Zoology Rubric\n\nAnatomy (0-10):", None)
            .await
            .unwrap();
        store
            .create("1. Argument (0-10):\n- thesis first", None)
            .await
            .unwrap();

        let listing = store.list().await.unwrap();
        assert_eq!(listing.len(), 2);
        // Criterion-shaped first lines fall back to an id-derived name and
        // sort after the real title.
        assert!(listing.iter().any(|s| s.name == "Zoology Rubric"));
        assert!(listing.iter().any(|s| s.name.starts_with("Rubric ")));
        assert!(listing.iter().all(|s| !s.preview.is_empty()));
    }

    #[test]
    fn title_splitting_requires_following_content() {
        let (content, name) = split_title("Just A Title");
        assert_eq!(name, None);
        assert_eq!(content, "Just A Title");

        let (content, name) = split_title("My Rubric\n\nDepth (0-10):");
        assert_eq!(name.as_deref(), Some("My Rubric"));
        assert_eq!(content, "Depth (0-10):");

        let (content, name) = split_title("My Rubric\nDepth (0-10):");
        assert_eq!(name.as_deref(), Some("My Rubric"));
        assert_eq!(content, "Depth (0-10):");
    }
}
