//! Filesystem abstraction behind template loading.
//!
//! The engine only ever talks to [`TemplateFileSystem`], so templates
//! can come from disk, an in-memory map in tests, or anything a caller
//! implements. All paths are `/`-separated and resolved relative to the
//! backend's root; `.` and `..` segments are normalized away and can
//! never escape the root.

use std::collections::{HashMap, HashSet};
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::RwLock;

use crate::error::{PromptmlError, PromptmlResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStat {
    pub is_file: bool,
    pub is_dir: bool,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
}

/// Storage interface for template documents.
///
/// Implementations must be usable from multiple threads; the engine
/// shares one instance across concurrent renders.
pub trait TemplateFileSystem: Send + Sync {
    fn read_file(&self, path: &str) -> PromptmlResult<String>;
    fn write_file(&self, path: &str, contents: &str) -> PromptmlResult<()>;
    fn exists(&self, path: &str) -> bool;
    fn stat(&self, path: &str) -> PromptmlResult<FileStat>;
    fn read_dir(&self, path: &str) -> PromptmlResult<Vec<DirEntry>>;
    fn make_dir(&self, path: &str) -> PromptmlResult<()>;
    fn remove_file(&self, path: &str) -> PromptmlResult<()>;
    fn remove_dir(&self, path: &str) -> PromptmlResult<()>;
}

/// Collapses a `/`-separated path: drops empty and `.` segments, folds
/// `..` into its parent, and refuses to climb above the root.
pub(crate) fn normalize_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    segments.join("/")
}

fn not_found(path: &str) -> PromptmlError {
    PromptmlError::TemplateNotFound { name: path.to_string() }
}

/// In-memory backend. The natural choice for tests and for callers that
/// assemble templates programmatically.
#[derive(Debug, Default)]
pub struct MemoryFileSystem {
    files: RwLock<HashMap<String, String>>,
    dirs: RwLock<HashSet<String>>,
}

impl MemoryFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a filesystem pre-populated from `(path, contents)` pairs.
    pub fn from_files<I, P, C>(files: I) -> Self
    where
        I: IntoIterator<Item = (P, C)>,
        P: Into<String>,
        C: Into<String>,
    {
        let fs = Self::new();
        {
            let mut map = fs.files.write().unwrap_or_else(std::sync::PoisonError::into_inner);
            for (path, contents) in files {
                map.insert(normalize_path(&path.into()), contents.into());
            }
        }
        fs
    }

    /// Directories a path implies: `a/b/c.prompt` implies `a` and `a/b`.
    fn implied_dirs(path: &str) -> impl Iterator<Item = String> + '_ {
        path.match_indices('/').map(|(i, _)| path[..i].to_string())
    }

    fn is_dir(&self, normalized: &str) -> bool {
        if self.dirs.read().unwrap_or_else(std::sync::PoisonError::into_inner).contains(normalized)
        {
            return true;
        }
        let files = self.files.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        let prefix = format!("{normalized}/");
        files.keys().any(|k| k.starts_with(&prefix))
    }
}

impl TemplateFileSystem for MemoryFileSystem {
    fn read_file(&self, path: &str) -> PromptmlResult<String> {
        let normalized = normalize_path(path);
        self.files
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(&normalized)
            .cloned()
            .ok_or_else(|| not_found(path))
    }

    fn write_file(&self, path: &str, contents: &str) -> PromptmlResult<()> {
        let normalized = normalize_path(path);
        self.files
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(normalized, contents.to_string());
        Ok(())
    }

    fn exists(&self, path: &str) -> bool {
        let normalized = normalize_path(path);
        if self
            .files
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .contains_key(&normalized)
        {
            return true;
        }
        self.is_dir(&normalized)
    }

    fn stat(&self, path: &str) -> PromptmlResult<FileStat> {
        let normalized = normalize_path(path);
        let files = self.files.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(contents) = files.get(&normalized) {
            return Ok(FileStat { is_file: true, is_dir: false, size: contents.len() as u64 });
        }
        drop(files);
        if self.is_dir(&normalized) {
            return Ok(FileStat { is_file: false, is_dir: true, size: 0 });
        }
        Err(not_found(path))
    }

    fn read_dir(&self, path: &str) -> PromptmlResult<Vec<DirEntry>> {
        let normalized = normalize_path(path);
        if !normalized.is_empty() && !self.is_dir(&normalized) {
            return Err(not_found(path));
        }
        let prefix = if normalized.is_empty() { String::new() } else { format!("{normalized}/") };
        let mut seen = HashSet::new();
        let mut entries = Vec::new();

        let files = self.files.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        for key in files.keys() {
            let Some(rest) = key.strip_prefix(&prefix) else { continue };
            match rest.split_once('/') {
                Some((dir, _)) => {
                    if seen.insert(dir.to_string()) {
                        entries.push(DirEntry { name: dir.to_string(), is_dir: true });
                    }
                }
                None => {
                    if seen.insert(rest.to_string()) {
                        entries.push(DirEntry { name: rest.to_string(), is_dir: false });
                    }
                }
            }
        }
        drop(files);

        let dirs = self.dirs.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        for dir in dirs.iter() {
            let Some(rest) = dir.strip_prefix(&prefix) else { continue };
            let name = rest.split('/').next().unwrap_or(rest);
            if !name.is_empty() && seen.insert(name.to_string()) {
                entries.push(DirEntry { name: name.to_string(), is_dir: true });
            }
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn make_dir(&self, path: &str) -> PromptmlResult<()> {
        let normalized = normalize_path(path);
        let mut dirs = self.dirs.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        for implied in Self::implied_dirs(&normalized) {
            dirs.insert(implied);
        }
        if !normalized.is_empty() {
            dirs.insert(normalized);
        }
        Ok(())
    }

    fn remove_file(&self, path: &str) -> PromptmlResult<()> {
        let normalized = normalize_path(path);
        self.files
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(&normalized)
            .map(|_| ())
            .ok_or_else(|| not_found(path))
    }

    fn remove_dir(&self, path: &str) -> PromptmlResult<()> {
        let normalized = normalize_path(path);
        let prefix = format!("{normalized}/");
        self.files
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .retain(|k, _| !k.starts_with(&prefix));
        self.dirs
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .retain(|d| d != &normalized && !d.starts_with(&prefix));
        Ok(())
    }
}

/// Disk backend rooted at a directory. Every path is resolved inside
/// the root after normalization.
#[derive(Debug)]
pub struct DiskFileSystem {
    root: PathBuf,
}

impl DiskFileSystem {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(normalize_path(path))
    }

    fn map_io(path: &str, err: &std::io::Error) -> PromptmlError {
        if err.kind() == ErrorKind::NotFound {
            not_found(path)
        } else {
            PromptmlError::runtime(format!("Filesystem error at '{path}': {err}"))
        }
    }
}

impl TemplateFileSystem for DiskFileSystem {
    fn read_file(&self, path: &str) -> PromptmlResult<String> {
        std::fs::read_to_string(self.resolve(path)).map_err(|e| Self::map_io(path, &e))
    }

    fn write_file(&self, path: &str, contents: &str) -> PromptmlResult<()> {
        let full = self.resolve(path);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Self::map_io(path, &e))?;
        }
        std::fs::write(full, contents).map_err(|e| Self::map_io(path, &e))
    }

    fn exists(&self, path: &str) -> bool {
        self.resolve(path).exists()
    }

    fn stat(&self, path: &str) -> PromptmlResult<FileStat> {
        let meta = std::fs::metadata(self.resolve(path)).map_err(|e| Self::map_io(path, &e))?;
        Ok(FileStat { is_file: meta.is_file(), is_dir: meta.is_dir(), size: meta.len() })
    }

    fn read_dir(&self, path: &str) -> PromptmlResult<Vec<DirEntry>> {
        let mut entries = Vec::new();
        for entry in std::fs::read_dir(self.resolve(path)).map_err(|e| Self::map_io(path, &e))? {
            let entry = entry.map_err(|e| Self::map_io(path, &e))?;
            let is_dir = entry.file_type().map_err(|e| Self::map_io(path, &e))?.is_dir();
            entries.push(DirEntry { name: entry.file_name().to_string_lossy().into_owned(), is_dir });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn make_dir(&self, path: &str) -> PromptmlResult<()> {
        std::fs::create_dir_all(self.resolve(path)).map_err(|e| Self::map_io(path, &e))
    }

    fn remove_file(&self, path: &str) -> PromptmlResult<()> {
        std::fs::remove_file(self.resolve(path)).map_err(|e| Self::map_io(path, &e))
    }

    fn remove_dir(&self, path: &str) -> PromptmlResult<()> {
        std::fs::remove_dir_all(self.resolve(path)).map_err(|e| Self::map_io(path, &e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ntest::timeout(100)]
    fn paths_normalize_without_escaping_the_root() {
        assert_eq!(normalize_path("a/b/c"), "a/b/c");
        assert_eq!(normalize_path("./a//b/"), "a/b");
        assert_eq!(normalize_path("a/../b"), "b");
        assert_eq!(normalize_path("../../etc/passwd"), "etc/passwd");
        assert_eq!(normalize_path("/a/b"), "a/b");
    }

    #[test]
    #[ntest::timeout(100)]
    fn memory_fs_round_trips_files() {
        let fs = MemoryFileSystem::new();
        fs.write_file("prompts/hello.prompt", "Hi").unwrap();
        assert!(fs.exists("prompts/hello.prompt"));
        assert_eq!(fs.read_file("./prompts/hello.prompt").unwrap(), "Hi");
        let stat = fs.stat("prompts/hello.prompt").unwrap();
        assert!(stat.is_file);
        assert_eq!(stat.size, 2);
    }

    #[test]
    #[ntest::timeout(100)]
    fn memory_fs_missing_file_is_not_found() {
        let fs = MemoryFileSystem::new();
        let err = fs.read_file("ghost.prompt").unwrap_err();
        assert!(matches!(err, PromptmlError::TemplateNotFound { .. }), "got: {err}");
    }

    #[test]
    #[ntest::timeout(100)]
    fn memory_fs_lists_immediate_children() {
        let fs = MemoryFileSystem::from_files([
            ("a/one.prompt", "1"),
            ("a/two.prompt", "2"),
            ("a/sub/three.prompt", "3"),
        ]);
        let entries = fs.read_dir("a").unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["one.prompt", "sub", "two.prompt"]);
        assert!(entries.iter().find(|e| e.name == "sub").unwrap().is_dir);
    }

    #[test]
    #[ntest::timeout(100)]
    fn memory_fs_directories_exist_implicitly_and_explicitly() {
        let fs = MemoryFileSystem::from_files([("a/b/file.prompt", "x")]);
        assert!(fs.exists("a"));
        assert!(fs.exists("a/b"));
        assert!(fs.stat("a/b").unwrap().is_dir);

        fs.make_dir("empty/dir").unwrap();
        assert!(fs.exists("empty/dir"));
        assert!(fs.exists("empty"));
    }

    #[test]
    #[ntest::timeout(100)]
    fn memory_fs_removals() {
        let fs = MemoryFileSystem::from_files([("d/a.prompt", "a"), ("d/b.prompt", "b")]);
        fs.remove_file("d/a.prompt").unwrap();
        assert!(!fs.exists("d/a.prompt"));
        fs.remove_dir("d").unwrap();
        assert!(!fs.exists("d/b.prompt"));
        assert!(!fs.exists("d"));
    }

    #[test]
    #[ntest::timeout(100)]
    fn disk_fs_round_trips_files() {
        let dir = tempfile::tempdir().unwrap();
        let fs = DiskFileSystem::new(dir.path());
        fs.write_file("nested/greeting.prompt", "Hello").unwrap();
        assert!(fs.exists("nested/greeting.prompt"));
        assert_eq!(fs.read_file("nested/greeting.prompt").unwrap(), "Hello");

        let entries = fs.read_dir("nested").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "greeting.prompt");

        let err = fs.read_file("nested/missing.prompt").unwrap_err();
        assert!(matches!(err, PromptmlError::TemplateNotFound { .. }), "got: {err}");
    }

    #[test]
    #[ntest::timeout(100)]
    fn disk_fs_paths_stay_inside_the_root() {
        let dir = tempfile::tempdir().unwrap();
        let fs = DiskFileSystem::new(dir.path());
        fs.write_file("../escape.prompt", "contained").unwrap();
        assert!(dir.path().join("escape.prompt").is_file());
    }
}
