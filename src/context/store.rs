//! Requirement document discovery on the local filesystem.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// A requirements document and the path it was read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequirementDocument {
    /// Forward-slash path relative to the store root (e.g. "docs/srs/payments.md")
    pub id: String,
    pub text: String,
}

/// Source of requirement documents.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Return every readable document under the given path prefixes, in a
    /// deterministic order. Missing prefixes are not an error.
    async fn documents(&self, prefixes: &[String]) -> Vec<RequirementDocument>;
}

/// Conventional requirement file names checked directly under each prefix,
/// whatever their extension.
const WELL_KNOWN_NAMES: &[&str] = &[
    "SRS.md",
    "srs.md",
    "requirements.md",
    "REQUIREMENTS.md",
    "software_requirements.md",
    "project_requirements.md",
    "SRS.txt",
    "requirements.txt",
];

/// Reads documents from a directory tree (usually the PR checkout).
#[derive(Debug, Clone)]
pub struct FsDocumentStore {
    root: PathBuf,
    extensions: Vec<String>,
}

impl FsDocumentStore {
    pub fn new(root: impl Into<PathBuf>, extensions: &[String]) -> Self {
        Self {
            root: root.into(),
            extensions: extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
        }
    }

    fn accepts(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| self.extensions.iter().any(|a| a.eq_ignore_ascii_case(ext)))
    }

    /// Sorted, de-duplicated set of matching files.
    fn discover(&self, prefixes: &[String]) -> BTreeSet<PathBuf> {
        let mut found = BTreeSet::new();
        for prefix in prefixes {
            let dir = self.root.join(prefix);
            if !dir.exists() {
                debug!(path = %dir.display(), "document search path missing");
                continue;
            }
            for entry in WalkDir::new(&dir).follow_links(false).into_iter().filter_map(Result::ok) {
                if entry.file_type().is_file() && self.accepts(entry.path()) {
                    found.insert(entry.into_path());
                }
            }
            for name in WELL_KNOWN_NAMES {
                let candidate = dir.join(name);
                if candidate.is_file() {
                    found.insert(candidate);
                }
            }
        }
        found
    }

    fn relative_id(&self, path: &Path) -> String {
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        relative
            .components()
            .filter_map(|c| match c {
                std::path::Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("/")
    }

    fn read_all(&self, prefixes: &[String]) -> Vec<RequirementDocument> {
        let mut docs = Vec::new();
        for path in self.discover(prefixes) {
            match std::fs::read_to_string(&path) {
                Ok(text) => docs.push(RequirementDocument {
                    id: self.relative_id(&path),
                    text,
                }),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable document"),
            }
        }
        docs
    }
}

#[async_trait]
impl DocumentStore for FsDocumentStore {
    async fn documents(&self, prefixes: &[String]) -> Vec<RequirementDocument> {
        let store = self.clone();
        let prefixes = prefixes.to_vec();

        // walkdir is synchronous; keep it off the runtime so callers can time out
        match tokio::task::spawn_blocking(move || store.read_all(&prefixes)).await {
            Ok(docs) => docs,
            Err(e) => {
                warn!(error = %e, "document scan failed");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(root: &Path, rel: &str, text: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, text).unwrap();
    }

    fn prefixes(list: &[&str]) -> Vec<String> {
        list.iter().map(|p| p.to_string()).collect()
    }

    fn extensions() -> Vec<String> {
        prefixes(&["md", ".txt", "rst"])
    }

    #[tokio::test]
    async fn test_missing_paths_yield_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsDocumentStore::new(dir.path(), &extensions());
        assert!(store.documents(&prefixes(&["docs/srs/"])).await.is_empty());
    }

    #[tokio::test]
    async fn test_discovers_sorted_and_deduplicated() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "docs/srs/b.md", "B");
        write(dir.path(), "docs/srs/a.rst", "A");
        write(dir.path(), "docs/guide.txt", "G");
        write(dir.path(), "docs/diagram.png", "binary");

        let store = FsDocumentStore::new(dir.path(), &extensions());
        let docs = store.documents(&prefixes(&["docs/srs/", "docs/"])).await;
        let ids: Vec<&str> = docs.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["docs/guide.txt", "docs/srs/a.rst", "docs/srs/b.md"]);
        assert_eq!(docs[1].text, "A");
    }

    #[tokio::test]
    async fn test_well_known_names_ignore_extension_filter() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "reqs/requirements.txt", "R");
        let store = FsDocumentStore::new(dir.path(), &prefixes(&["md"]));
        let docs = store.documents(&prefixes(&["reqs"])).await;
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, "reqs/requirements.txt");
    }

    #[tokio::test]
    async fn test_large_tree_scan_can_time_out() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..3000 {
            write(dir.path(), &format!("docs/{}/req-{i}.md", i % 30), "The system shall respond.");
        }
        let store = FsDocumentStore::new(dir.path(), &extensions());

        let ctx = crate::context::load_documents(
            &store,
            &prefixes(&["docs"]),
            1000,
            std::time::Duration::from_millis(1),
        )
        .await;
        assert!(ctx.timed_out);

        let docs = store.documents(&prefixes(&["docs"])).await;
        assert_eq!(docs.len(), 3000);
    }
}
