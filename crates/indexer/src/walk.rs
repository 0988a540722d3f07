use crate::error::Result;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};

/// One file discovered by the walker, with its modification time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkedFile {
    pub path: PathBuf,
    pub mtime_ms: i64,
}

/// Compiled ignore/extension filters for one silo, shared by the walker and
/// the watcher so both see the same file set.
#[derive(Debug)]
pub struct SiloFilters {
    extensions: HashSet<String>,
    ignore_dirs: GlobSet,
    ignore_files: GlobSet,
}

impl SiloFilters {
    pub fn new(
        extensions: &[String],
        ignore_patterns: &[String],
        ignore_file_patterns: &[String],
    ) -> Result<Self> {
        Ok(Self {
            extensions: extensions.iter().map(|e| e.to_lowercase()).collect(),
            ignore_dirs: build_globset(ignore_patterns)?,
            ignore_files: build_globset(ignore_file_patterns)?,
        })
    }

    /// Directory paths matching any ignore pattern are skipped wholesale.
    #[must_use]
    pub fn allows_dir(&self, path: &Path) -> bool {
        !self.ignore_dirs.is_match(path)
    }

    /// A file passes when its basename clears the file patterns and its
    /// extension is on the allow-list (an empty list allows everything).
    #[must_use]
    pub fn allows_file(&self, path: &Path) -> bool {
        if let Some(name) = path.file_name() {
            if self.ignore_files.is_match(Path::new(name)) {
                return false;
            }
        }
        if self.extensions.is_empty() {
            return true;
        }
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| self.extensions.contains(&ext.to_lowercase()))
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
        // Bare names like ".git" should also match anywhere in the tree.
        if !pattern.contains('/') && !pattern.starts_with("**") {
            builder.add(Glob::new(&format!("**/{pattern}"))?);
        }
    }
    Ok(builder.build()?)
}

/// Breadth-first walk over the silo's directories.
///
/// Entries are visited level by level, sorted by name within each directory
/// for deterministic output; unreadable directories are logged and skipped.
#[must_use]
pub fn walk_files(directories: &[PathBuf], filters: &SiloFilters) -> Vec<WalkedFile> {
    let mut files = Vec::new();
    let mut queue: VecDeque<PathBuf> = directories
        .iter()
        .filter(|dir| filters.allows_dir(dir))
        .cloned()
        .collect();

    while let Some(dir) = queue.pop_front() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) => {
                log::warn!("cannot read directory {}: {err}", dir.display());
                continue;
            }
        };

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .collect();
        paths.sort();

        for path in paths {
            match std::fs::metadata(&path) {
                Ok(meta) if meta.is_dir() => {
                    if filters.allows_dir(&path) {
                        queue.push_back(path);
                    }
                }
                Ok(meta) if meta.is_file() => {
                    if !filters.allows_file(&path) {
                        continue;
                    }
                    let mtime_ms = meta
                        .modified()
                        .ok()
                        .and_then(|m| m.duration_since(std::time::SystemTime::UNIX_EPOCH).ok())
                        .map_or(0, |d| d.as_millis() as i64);
                    files.push(WalkedFile { path, mtime_ms });
                }
                Ok(_) => {}
                Err(err) => log::warn!("cannot stat {}: {err}", path.display()),
            }
        }
    }

    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn touch(path: &Path, contents: &str) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, contents).unwrap();
    }

    #[test]
    fn walk_is_breadth_first_and_filtered() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        touch(&root.join("top.md"), "top");
        touch(&root.join("sub/inner.md"), "inner");
        touch(&root.join("sub/skip.log"), "log");
        touch(&root.join(".git/objects/blob.md"), "blob");

        let filters = SiloFilters::new(
            &["md".to_string()],
            &[".git".to_string()],
            &[],
        )
        .unwrap();

        let files = walk_files(&[root.to_path_buf()], &filters);
        let names: Vec<String> = files
            .iter()
            .map(|f| f.path.file_name().unwrap().to_string_lossy().to_string())
            .collect();

        // Top-level files come before nested ones; ignored trees never show.
        assert_eq!(names, vec!["top.md".to_string(), "inner.md".to_string()]);
    }

    #[test]
    fn file_basename_patterns_apply() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        touch(&root.join("keep.md"), "x");
        touch(&root.join("draft-keep.md"), "x");

        let filters =
            SiloFilters::new(&["md".to_string()], &[], &["draft-*".to_string()]).unwrap();
        let files = walk_files(&[root.to_path_buf()], &filters);
        assert_eq!(files.len(), 1);
        assert!(files[0].path.ends_with("keep.md"));
    }

    #[test]
    fn empty_extension_list_allows_all_files() {
        let filters = SiloFilters::new(&[], &[], &[]).unwrap();
        assert!(filters.allows_file(Path::new("/x/y.anything")));
        assert!(filters.allows_file(Path::new("/x/no_extension")));
    }
}
