//! Document discovery over a checked-out tree.
//!
//! Every regular file under the document root becomes one [`DocumentEntry`]
//! carrying the viewer that should render it and the public URL it is served
//! under. Listings are computed fresh on each call; nothing is cached.
//!
//! Version-control metadata is listed like any other file unless the indexer
//! is told to skip it with [`Indexer::skip_vcs_metadata`].

mod category;

use std::path::{Component, Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use walkdir::WalkDir;

pub use category::Category;

/// Public URL prefix documents are served under.
pub const DEFAULT_URL_PREFIX: &str = "/apis";

/// Names pruned by [`Indexer::skip_vcs_metadata`]: the repository directory
/// and the gitlink file a submodule checkout leaves behind.
const VCS_NAMES: [&str; 1] = [".git"];

/// Errors returned while listing documents.
#[derive(Error, Debug)]
pub enum IndexError {
    /// The directory walk failed (missing root, permission denied, ...).
    #[error("list documents failed at {path}: {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
    /// The root exists but is a file.
    #[error("document root is not a directory: {0}")]
    NotADirectory(PathBuf),
}

impl IndexError {
    /// Underlying IO error, if the failure came from the filesystem.
    pub fn io_error(&self) -> Option<&std::io::Error> {
        match self {
            IndexError::Walk { source, .. } => source.io_error(),
            IndexError::NotADirectory(_) => None,
        }
    }
}

/// One discovered document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentEntry {
    /// Viewer that renders this document.
    #[serde(rename = "app")]
    pub category: Category,
    /// Slash-separated URL under the public prefix.
    pub url: String,
}

/// Lists the documents under a root directory.
#[derive(Debug, Clone)]
pub struct Indexer {
    root: PathBuf,
    url_prefix: String,
    skip_vcs: bool,
}

impl Indexer {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            url_prefix: DEFAULT_URL_PREFIX.to_string(),
            skip_vcs: false,
        }
    }

    /// Serve documents under `prefix` instead of [`DEFAULT_URL_PREFIX`].
    ///
    /// Surrounding slashes are normalized, so `apis`, `/apis` and `/apis/`
    /// are equivalent. An empty prefix serves documents from `/`.
    pub fn with_url_prefix(mut self, prefix: &str) -> Self {
        let trimmed = prefix.trim_matches('/');
        self.url_prefix = if trimmed.is_empty() {
            String::new()
        } else {
            format!("/{}", trimmed)
        };
        self
    }

    /// Neither list nor descend into `.git` entries below the root.
    ///
    /// Meant for indexing a mirror's own working tree, where `.git` holds the
    /// object store rather than documents.
    pub fn skip_vcs_metadata(mut self) -> Self {
        self.skip_vcs = true;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Lazily walk the tree, yielding entries in depth-first, name-sorted order.
    ///
    /// Each call starts a fresh traversal. Errors are yielded in place; use
    /// [`Indexer::list`] to get all-or-nothing semantics.
    pub fn entries(&self) -> Entries<'_> {
        let walker = WalkDir::new(&self.root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(if self.skip_vcs {
                is_not_vcs_metadata as EntryFilter
            } else {
                list_everything
            });

        Entries {
            indexer: self,
            walker,
            checked_root: false,
        }
    }

    /// Collect every entry, or fail without exposing a partial listing.
    pub fn list(&self) -> Result<Vec<DocumentEntry>, IndexError> {
        let entries = self.entries().collect::<Result<Vec<_>, _>>()?;
        log::debug!(
            "Listed {} documents under {}",
            entries.len(),
            self.root.display()
        );
        Ok(entries)
    }

    /// Build the entry for a file at `relative` (relative to the root).
    fn entry_for(&self, relative: &Path) -> DocumentEntry {
        DocumentEntry {
            category: Category::for_path(relative),
            url: join_url(&self.url_prefix, relative),
        }
    }
}

type EntryFilter = fn(&walkdir::DirEntry) -> bool;

fn list_everything(_: &walkdir::DirEntry) -> bool {
    true
}

fn is_not_vcs_metadata(entry: &walkdir::DirEntry) -> bool {
    entry.depth() == 0
        || !entry
            .file_name()
            .to_str()
            .is_some_and(|name| VCS_NAMES.contains(&name))
}

/// Join `relative` onto `prefix` with `/`, whatever the host separator is.
fn join_url(prefix: &str, relative: &Path) -> String {
    let mut url = prefix.to_string();
    for component in relative.components() {
        if let Component::Normal(part) = component {
            url.push('/');
            url.push_str(&part.to_string_lossy());
        }
    }
    url
}

/// Lazy listing returned by [`Indexer::entries`].
pub struct Entries<'a> {
    indexer: &'a Indexer,
    walker: walkdir::FilterEntry<walkdir::IntoIter, EntryFilter>,
    checked_root: bool,
}

impl Iterator for Entries<'_> {
    type Item = Result<DocumentEntry, IndexError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = match self.walker.next()? {
                Ok(entry) => entry,
                Err(source) => {
                    let path = source
                        .path()
                        .unwrap_or(self.indexer.root.as_path())
                        .to_path_buf();
                    return Some(Err(IndexError::Walk { path, source }));
                }
            };

            if !self.checked_root {
                self.checked_root = true;
                if !entry.file_type().is_dir() {
                    return Some(Err(IndexError::NotADirectory(entry.into_path())));
                }
                continue;
            }

            if !entry.file_type().is_file() {
                continue;
            }

            let relative = entry
                .path()
                .strip_prefix(&self.indexer.root)
                .unwrap_or(entry.path());
            return Some(Ok(self.indexer.entry_for(relative)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn write(root: &Path, relative: &str, contents: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn classifies_api_directory() {
        let dir = tempdir().unwrap();
        write(dir.path(), "api/users.md", "# Users");
        write(dir.path(), "api/spec.yaml", "openapi: 3.0.0");
        write(dir.path(), "api/notes.txt", "notes");
        write(dir.path(), "api/README", "readme");

        let entries = Indexer::new(dir.path()).list().unwrap();

        let expected = vec![
            DocumentEntry {
                category: Category::Text,
                url: "/apis/api/README".to_string(),
            },
            DocumentEntry {
                category: Category::Text,
                url: "/apis/api/notes.txt".to_string(),
            },
            DocumentEntry {
                category: Category::Schema,
                url: "/apis/api/spec.yaml".to_string(),
            },
            DocumentEntry {
                category: Category::Markdown,
                url: "/apis/api/users.md".to_string(),
            },
        ];
        assert_eq!(entries, expected);
    }

    #[test]
    fn one_entry_per_regular_file() {
        let dir = tempdir().unwrap();
        write(dir.path(), "a.md", "");
        write(dir.path(), "nested/b.json", "{}");
        write(dir.path(), "nested/deeper/c.yml", "");
        write(dir.path(), "nested/deeper/d", "");
        fs::create_dir_all(dir.path().join("empty/dir")).unwrap();

        let entries = Indexer::new(dir.path()).list().unwrap();

        assert_eq!(entries.len(), 4);
        assert!(entries.iter().all(|e| !e.url.ends_with("/empty")));
    }

    #[test]
    fn order_is_depth_first_by_name() {
        let dir = tempdir().unwrap();
        write(dir.path(), "b.md", "");
        write(dir.path(), "a/z.md", "");
        write(dir.path(), "a/b/c.md", "");
        write(dir.path(), "c.md", "");

        let urls: Vec<String> = Indexer::new(dir.path())
            .list()
            .unwrap()
            .into_iter()
            .map(|e| e.url)
            .collect();

        assert_eq!(
            urls,
            vec!["/apis/a/b/c.md", "/apis/a/z.md", "/apis/b.md", "/apis/c.md"]
        );
    }

    #[test]
    fn git_metadata_is_listed_by_default() {
        let dir = tempdir().unwrap();
        write(dir.path(), ".git/config", "[core]");
        write(dir.path(), "docs/.git", "gitdir: ../.git/modules/docs");
        write(dir.path(), "a.md", "");

        let urls: Vec<String> = Indexer::new(dir.path())
            .list()
            .unwrap()
            .into_iter()
            .map(|e| e.url)
            .collect();

        assert_eq!(
            urls,
            vec!["/apis/.git/config", "/apis/a.md", "/apis/docs/.git"]
        );
    }

    #[test]
    fn git_metadata_is_skipped_on_request() {
        let dir = tempdir().unwrap();
        write(dir.path(), ".git/HEAD", "ref: refs/heads/main");
        write(dir.path(), "vendor/.git", "gitdir: ../.git/modules/vendor");
        write(dir.path(), "index.md", "");

        let entries = Indexer::new(dir.path())
            .skip_vcs_metadata()
            .list()
            .unwrap();

        assert_eq!(
            entries,
            vec![DocumentEntry {
                category: Category::Markdown,
                url: "/apis/index.md".to_string(),
            }]
        );
    }

    #[test]
    fn missing_root_fails_without_entries() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("missing");

        let err = Indexer::new(&missing)
            .list()
            .expect_err("listing a missing root must fail");
        assert!(matches!(err, IndexError::Walk { .. }));
        assert_eq!(
            err.io_error().map(|e| e.kind()),
            Some(std::io::ErrorKind::NotFound)
        );
    }

    #[test]
    fn file_root_is_rejected() {
        let dir = tempdir().unwrap();
        write(dir.path(), "single.md", "");

        let err = Indexer::new(dir.path().join("single.md"))
            .list()
            .expect_err("a file is not a document root");
        assert!(matches!(err, IndexError::NotADirectory(_)));
    }

    #[test]
    fn empty_root_lists_nothing() {
        let dir = tempdir().unwrap();
        assert!(Indexer::new(dir.path()).list().unwrap().is_empty());
    }

    #[test]
    fn entries_restart_on_every_call() {
        let dir = tempdir().unwrap();
        write(dir.path(), "first.md", "");
        let indexer = Indexer::new(dir.path());

        assert_eq!(indexer.entries().count(), 1);
        write(dir.path(), "second.md", "");
        assert_eq!(indexer.entries().count(), 2);
    }

    #[test]
    fn url_prefix_is_normalized() {
        let dir = tempdir().unwrap();
        write(dir.path(), "docs/a.md", "");

        for prefix in ["docs", "/docs", "/docs/"] {
            let entries = Indexer::new(dir.path())
                .with_url_prefix(prefix)
                .list()
                .unwrap();
            assert_eq!(entries[0].url, "/docs/docs/a.md");
        }

        let entries = Indexer::new(dir.path()).with_url_prefix("").list().unwrap();
        assert_eq!(entries[0].url, "/docs/a.md");
    }

    #[test]
    fn join_url_uses_forward_slashes() {
        let relative: PathBuf = ["api", "v1", "spec.json"].iter().collect();
        assert_eq!(join_url("/apis", &relative), "/apis/api/v1/spec.json");
    }

    #[test]
    fn entry_serializes_for_templates() {
        let entry = DocumentEntry {
            category: Category::Schema,
            url: "/apis/api/spec.yaml".to_string(),
        };
        assert_eq!(
            serde_json::to_string(&entry).unwrap(),
            r#"{"app":"swagger","url":"/apis/api/spec.yaml"}"#
        );
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_are_not_documents() {
        let dir = tempdir().unwrap();
        write(dir.path(), "real.md", "");
        std::os::unix::fs::symlink(dir.path().join("real.md"), dir.path().join("link.md"))
            .unwrap();

        let entries = Indexer::new(dir.path()).list().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].url, "/apis/real.md");
    }
}
