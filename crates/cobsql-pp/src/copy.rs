//! Copybook resolution across a search-path list.

use std::path::{Path, PathBuf};

use tracing::debug;

/// Resolves copybook names to files.
///
/// The starting directory (normally the directory of the main source
/// file) is searched first, then each configured copy directory in
/// order; within a directory the bare name is tried before each
/// configured extension. First hit wins. Extensions match
/// case-insensitively. The resolver keeps no cache.
#[derive(Debug, Clone, Default)]
pub struct CopyResolver {
    base_dir: PathBuf,
    copy_dirs: Vec<PathBuf>,
    extensions: Vec<String>,
    verbose: bool,
}

impl CopyResolver {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            copy_dirs: Vec::new(),
            extensions: Vec::new(),
            verbose: false,
        }
    }

    pub fn add_copy_dirs<I>(&mut self, dirs: I)
    where
        I: IntoIterator<Item = PathBuf>,
    {
        self.copy_dirs.extend(dirs);
    }

    pub fn set_extensions(&mut self, exts: Vec<String>) {
        self.extensions = exts;
    }

    pub fn copy_dirs(&self) -> &[PathBuf] {
        &self.copy_dirs
    }

    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    pub fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    /// Resolve `name` to an existing file.
    pub fn resolve(&self, name: &str) -> Option<PathBuf> {
        for dir in std::iter::once(&self.base_dir).chain(self.copy_dirs.iter()) {
            if let Some(hit) = self.probe_dir(dir, name) {
                if self.verbose {
                    debug!(copybook = name, path = %hit.display(), "copybook resolved");
                }
                return Some(hit);
            }
        }
        debug!(copybook = name, "copybook not found on search path");
        None
    }

    fn probe_dir(&self, dir: &Path, name: &str) -> Option<PathBuf> {
        let mut candidates: Vec<String> = Vec::new();
        // empty extension counts as "no extension"
        for stem in [name.to_string(), name.to_lowercase(), name.to_uppercase()] {
            if !candidates.contains(&stem) {
                candidates.push(stem);
            }
        }
        let bare = candidates.clone();
        for ext in &self.extensions {
            if ext.is_empty() {
                continue;
            }
            for stem in &bare {
                for e in [ext.clone(), ext.to_lowercase(), ext.to_uppercase()] {
                    let cand = format!("{stem}.{e}");
                    if !candidates.contains(&cand) {
                        candidates.push(cand);
                    }
                }
            }
        }

        for cand in candidates {
            let path = dir.join(&cand);
            if path.is_file() {
                return Some(path);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn resolves_bare_name_in_base_dir_first() {
        let base = tempdir().unwrap();
        let extra = tempdir().unwrap();
        fs::write(base.path().join("FOO"), "base copy").unwrap();
        fs::write(extra.path().join("FOO"), "extra copy").unwrap();

        let mut r = CopyResolver::new(base.path());
        r.add_copy_dirs(vec![extra.path().to_path_buf()]);

        let hit = r.resolve("FOO").unwrap();
        assert_eq!(hit, base.path().join("FOO"));
    }

    #[test]
    fn extension_list_is_ordered_and_case_insensitive() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("ACCT.cpy"), "01 X PIC X.").unwrap();

        let mut r = CopyResolver::new(dir.path());
        r.set_extensions(vec!["CPY".into(), "cob".into()]);

        let hit = r.resolve("ACCT").unwrap();
        assert_eq!(hit, dir.path().join("ACCT.cpy"));
    }

    #[test]
    fn unresolved_name_returns_none() {
        let dir = tempdir().unwrap();
        let r = CopyResolver::new(dir.path());
        assert!(r.resolve("MISSING").is_none());
    }

    #[test]
    fn lowercase_file_for_uppercase_reference() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("acct"), "01 X PIC X.").unwrap();

        let r = CopyResolver::new(dir.path());
        assert!(r.resolve("ACCT").is_some());
    }
}
