//! Programs under test.
//!
//! A PUT is a single Python module identified by a stable key (`he_0`);
//! the key doubles as the module name generated tests import from.

use crate::error::{ElenchusError, Result};
use std::path::{Path, PathBuf};

/// A single source unit tests are generated for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramUnderTest {
    /// Stable identifier, also the importable module name.
    pub id: String,
    /// Full source text.
    pub source: String,
}

impl ProgramUnderTest {
    pub fn new(id: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
        }
    }

    /// Module name generated tests use to import the unit under test.
    #[must_use]
    pub fn module_name(&self) -> &str {
        &self.id
    }
}

/// Lookup of PUT source by identifier.
///
/// A lookup failure is fatal for the session that requested it.
pub trait PutSource: Send + Sync {
    /// Load the PUT with the given identifier.
    ///
    /// # Errors
    ///
    /// Returns [`ElenchusError::PutNotFound`] if no such PUT exists.
    fn load(&self, put_id: &str) -> Result<ProgramUnderTest>;

    /// Directory that makes the PUT importable by its module name.
    fn module_root(&self) -> &Path;
}

/// PUT source backed by a directory of `{put_id}.py` files.
#[derive(Debug, Clone)]
pub struct DirectoryPutSource {
    root: PathBuf,
}

impl DirectoryPutSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Path of the source file for a PUT.
    #[must_use]
    pub fn path_for(&self, put_id: &str) -> PathBuf {
        self.root.join(format!("{put_id}.py"))
    }
}

impl PutSource for DirectoryPutSource {
    fn load(&self, put_id: &str) -> Result<ProgramUnderTest> {
        let path = self.path_for(put_id);
        if !path.is_file() {
            return Err(ElenchusError::PutNotFound {
                put_id: put_id.to_string(),
                path,
            });
        }

        let source = std::fs::read_to_string(&path)?;
        Ok(ProgramUnderTest::new(put_id, source))
    }

    fn module_root(&self) -> &Path {
        &self.root
    }
}

/// List the PUT identifiers available in a directory.
///
/// Identifiers are sorted numerically by the suffix after the last `_`
/// (`he_2` before `he_10`). Identifiers without a numeric suffix come first,
/// ordered by name. A missing directory yields an empty list.
pub fn list_put_ids(dir: &Path) -> Result<Vec<String>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut ids = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("py") {
            continue;
        }
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            if !stem.starts_with("test_") && !stem.starts_with("__") {
                ids.push(stem.to_string());
            }
        }
    }

    ids.sort_by(|a, b| numeric_key(a).cmp(&numeric_key(b)).then_with(|| a.cmp(b)));
    Ok(ids)
}

fn numeric_key(put_id: &str) -> Option<u64> {
    put_id.rsplit_once('_').and_then(|(_, n)| n.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_existing_put() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("he_0.py"), "def add(a, b):\n    return a + b\n").unwrap();

        let source = DirectoryPutSource::new(temp.path());
        let put = source.load("he_0").unwrap();
        assert_eq!(put.id, "he_0");
        assert_eq!(put.module_name(), "he_0");
        assert!(put.source.contains("return a + b"));
        assert_eq!(source.module_root(), temp.path());
    }

    #[test]
    fn test_load_missing_put() {
        let temp = TempDir::new().unwrap();
        let source = DirectoryPutSource::new(temp.path());

        let err = source.load("he_99").unwrap_err();
        match err {
            ElenchusError::PutNotFound { put_id, path } => {
                assert_eq!(put_id, "he_99");
                assert!(path.ends_with("he_99.py"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_list_put_ids_sorted_numerically() {
        let temp = TempDir::new().unwrap();
        for name in ["he_10.py", "he_2.py", "he_0.py", "notes.txt", "test_he_0.py", "misc.py"] {
            std::fs::write(temp.path().join(name), "").unwrap();
        }

        let ids = list_put_ids(temp.path()).unwrap();
        assert_eq!(ids, vec!["misc", "he_0", "he_2", "he_10"]);
    }

    #[test]
    fn test_list_put_ids_missing_dir() {
        let temp = TempDir::new().unwrap();
        let ids = list_put_ids(&temp.path().join("absent")).unwrap();
        assert!(ids.is_empty());
    }
}
