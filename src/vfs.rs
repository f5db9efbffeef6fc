use regex::Regex;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

/// File access used by every pass that touches the disk: include
/// resolution, costume and data-file loading, and project discovery.
pub trait SourceProvider {
    fn read_bytes(&self, path: &Path) -> io::Result<Vec<u8>>;

    fn is_file(&self, path: &Path) -> bool;

    fn is_dir(&self, path: &Path) -> bool;

    /// Direct children of `dir`, sorted.
    fn list_dir(&self, dir: &Path) -> io::Result<Vec<PathBuf>>;

    /// Every file below `dir`, recursively, sorted.
    fn walk_files(&self, dir: &Path) -> io::Result<Vec<PathBuf>>;

    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        let bytes = self.read_bytes(path)?;
        String::from_utf8(bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    /// Files under `base` whose base-relative path matches `pattern`,
    /// sorted by path.
    fn glob(&self, base: &Path, pattern: &str) -> io::Result<Vec<PathBuf>> {
        let matcher = glob_to_regex(pattern)?;
        let mut out = Vec::new();
        for file in self.walk_files(base)? {
            let Ok(relative) = file.strip_prefix(base) else {
                continue;
            };
            let relative = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            if matcher.is_match(&relative) {
                out.push(file);
            }
        }
        out.sort();
        Ok(out)
    }
}

pub struct FsProvider;

impl SourceProvider for FsProvider {
    fn read_bytes(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(path)
    }

    fn is_file(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn list_dir(&self, dir: &Path) -> io::Result<Vec<PathBuf>> {
        let mut entries = fs::read_dir(dir)?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<io::Result<Vec<_>>>()?;
        entries.sort();
        Ok(entries)
    }

    fn walk_files(&self, dir: &Path) -> io::Result<Vec<PathBuf>> {
        let mut out = Vec::new();
        let mut pending = vec![dir.to_path_buf()];
        while let Some(current) = pending.pop() {
            for entry in fs::read_dir(&current)? {
                let entry = entry?;
                // `file_type` does not follow links.
                let kind = entry.file_type()?;
                let path = entry.path();
                if kind.is_dir() {
                    pending.push(path);
                } else if kind.is_symlink() && path.is_dir() {
                    // Linked directories are not descended into.
                    continue;
                } else {
                    out.push(path);
                }
            }
        }
        out.sort();
        Ok(out)
    }
}

/// In-memory project tree. Paths are normalized lexically, so `a/./b` and
/// `a/x/../b` name the same file.
#[derive(Debug, Clone, Default)]
pub struct MemoryProvider {
    files: BTreeMap<PathBuf, Vec<u8>>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl AsRef<Path>, contents: impl Into<Vec<u8>>) {
        self.files.insert(normalize(path.as_ref()), contents.into());
    }

    pub fn with_file(mut self, path: impl AsRef<Path>, contents: impl Into<Vec<u8>>) -> Self {
        self.insert(path, contents);
        self
    }
}

impl SourceProvider for MemoryProvider {
    fn read_bytes(&self, path: &Path) -> io::Result<Vec<u8>> {
        self.files.get(&normalize(path)).cloned().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("'{}' not found", path.display()))
        })
    }

    fn is_file(&self, path: &Path) -> bool {
        self.files.contains_key(&normalize(path))
    }

    fn is_dir(&self, path: &Path) -> bool {
        let dir = normalize(path);
        self.files.keys().any(|f| f != &dir && f.starts_with(&dir))
    }

    fn list_dir(&self, dir: &Path) -> io::Result<Vec<PathBuf>> {
        let dir = normalize(dir);
        let mut out = Vec::new();
        for file in self.files.keys() {
            let Ok(rest) = file.strip_prefix(&dir) else {
                continue;
            };
            if let Some(first) = rest.components().next() {
                let child = dir.join(first.as_os_str());
                if out.last() != Some(&child) && !out.contains(&child) {
                    out.push(child);
                }
            }
        }
        out.sort();
        Ok(out)
    }

    fn walk_files(&self, dir: &Path) -> io::Result<Vec<PathBuf>> {
        let dir = normalize(dir);
        Ok(self
            .files
            .keys()
            .filter(|f| *f != &dir && f.starts_with(&dir))
            .cloned()
            .collect())
    }
}

pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// `**` crosses directories, `*` and `?` stay within one path segment.
pub fn glob_to_regex(pattern: &str) -> io::Result<Regex> {
    let mut out = String::from("^");
    let chars: Vec<char> = pattern.trim_start_matches("./").chars().collect();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' if chars.get(i + 1) == Some(&'*') => {
                if chars.get(i + 2) == Some(&'/') {
                    out.push_str("(?:.*/)?");
                    i += 3;
                } else {
                    out.push_str(".*");
                    i += 2;
                }
                continue;
            }
            '*' => out.push_str("[^/]*"),
            '?' => out.push_str("[^/]"),
            ch => out.push_str(&regex::escape(&ch.to_string())),
        }
        i += 1;
    }
    out.push('$');
    Regex::new(&out).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project() -> MemoryProvider {
        MemoryProvider::new()
            .with_file("proj/stage.gs", "costumes \"a.svg\";")
            .with_file("proj/lib/b.gs", "")
            .with_file("proj/lib/a.gs", "")
            .with_file("proj/lib/deep/c.gs", "")
            .with_file("proj/a.svg", "<svg/>")
    }

    #[test]
    fn star_stays_in_one_directory() {
        let fs = project();
        let found = fs.glob(Path::new("proj"), "lib/*.gs").unwrap();
        assert_eq!(
            found,
            vec![PathBuf::from("proj/lib/a.gs"), PathBuf::from("proj/lib/b.gs")]
        );
    }

    #[test]
    fn double_star_crosses_directories() {
        let fs = project();
        let found = fs.glob(Path::new("proj"), "lib/**/*.gs").unwrap();
        assert_eq!(found.len(), 3);
    }

    #[test]
    fn memory_provider_normalizes_paths() {
        let fs = project();
        assert!(fs.is_file(Path::new("proj/./lib/../a.svg")));
        assert!(fs.is_dir(Path::new("proj/lib")));
        assert_eq!(
            fs.list_dir(Path::new("proj")).unwrap(),
            vec![
                PathBuf::from("proj/a.svg"),
                PathBuf::from("proj/lib"),
                PathBuf::from("proj/stage.gs")
            ]
        );
    }

    #[cfg(unix)]
    #[test]
    fn linked_directories_are_not_walked() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("proj");
        fs::create_dir_all(root.join("lib")).unwrap();
        fs::write(root.join("lib/a.gs"), "").unwrap();
        std::os::unix::fs::symlink(&root, root.join("lib/loop")).unwrap();
        std::os::unix::fs::symlink(root.join("lib/a.gs"), root.join("alias.gs")).unwrap();

        let files = FsProvider.walk_files(&root).unwrap();
        assert_eq!(files, vec![root.join("alias.gs"), root.join("lib/a.gs")]);
        assert_eq!(FsProvider.glob(&root, "**/*.gs").unwrap().len(), 2);
    }
}
