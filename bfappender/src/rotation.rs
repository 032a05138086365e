use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    time::SystemTime,
};

/// The ordered list of archive files for one appender, oldest first, plus
/// their modification times. Maintained incrementally by [`ArchiveList::push`]
/// after each rotation and consulted by retention GC.
///
/// Total order: `SPEC_FULL.md` §3 invariant — (modtime asc, size desc, name
/// asc). This mirrors `archiveFiles` in
/// `original_source/bfappender/utils.go`.
#[derive(Debug, Default)]
pub(crate) struct ArchiveList {
    entries: Vec<PathBuf>,
    modified: HashMap<PathBuf, SystemTime>,
}

impl ArchiveList {
    pub fn paths(&self) -> &[PathBuf] {
        &self.entries
    }

    pub fn push(&mut self, path: PathBuf, modified: SystemTime) {
        self.modified.insert(path.clone(), modified);
        self.entries.push(path);
    }

    pub fn oldest(&self) -> Option<&PathBuf> {
        self.entries.first()
    }

    pub fn modified_of(&self, path: &Path) -> Option<SystemTime> {
        self.modified.get(path).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Drops the oldest entry, returning its path for deletion by the caller.
    pub fn pop_oldest(&mut self) -> Option<PathBuf> {
        if self.entries.is_empty() {
            return None;
        }
        let path = self.entries.remove(0);
        self.modified.remove(&path);
        Some(path)
    }
}

/// Scans the parent directory of `filename` for archive candidates: entries
/// whose name starts with the stem and ends with the extension, excluding
/// the active filename itself. Sorted by (modtime asc, size desc, name asc).
///
/// Ported from `archiveFiles` in `original_source/bfappender/utils.go`.
pub(crate) fn discover_archives(filename: &Path) -> ArchiveList {
    let dir = filename.parent().unwrap_or_else(|| Path::new("."));
    let active_name = match filename.file_name() {
        Some(n) => n,
        None => return ArchiveList::default(),
    };
    let fname = active_name.to_string_lossy().into_owned();
    let ext = filename
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let stem = &fname[..fname.len() - ext.len()];

    let mut candidates: Vec<(PathBuf, SystemTime, u64, String)> = Vec::new();
    if let Ok(read) = fs::read_dir(dir) {
        for entry in read.flatten() {
            let name = entry.file_name();
            let name_str = name.to_string_lossy().into_owned();
            if name_str == fname {
                continue;
            }
            if !name_str.starts_with(stem) || !name_str.ends_with(&ext) {
                continue;
            }
            let Ok(meta) = entry.metadata() else { continue };
            if meta.is_dir() {
                continue;
            }
            let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            candidates.push((entry.path(), modified, meta.len(), name_str));
        }
    }

    candidates.sort_by(|a, b| {
        a.1.cmp(&b.1)
            .then_with(|| b.2.cmp(&a.2))
            .then_with(|| a.3.cmp(&b.3))
    });

    let mut list = ArchiveList::default();
    for (path, modified, _, _) in candidates {
        list.push(path, modified);
    }
    list
}

/// Recovers `(last_scroll_index, last_scroll_time_bucket)` from the most
/// recent archive neighbor, per `SPEC_FULL.md` §4.7.2.
///
/// This reproduces the Go source's neighbor-name parsing verbatim, including
/// its documented quirk (see `SPEC_FULL.md` / `DESIGN.md` "Open question"):
/// the `.NNN` index and bucket segments are only recovered when the neighbor
/// name is strictly longer than the active file's name, since the parse
/// walks backward from the shared extension and falls out of bounds
/// otherwise.
pub(crate) fn recover_index_and_bucket(filename: &Path, archives: &ArchiveList) -> (i64, String) {
    let active_name = filename
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = filename
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    let neighbor = match archives.paths().last() {
        Some(last) => {
            let last_name = last
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            if last_name == active_name {
                // The active file itself sorted in (can't happen given
                // discover_archives excludes it, but mirrors the Go guard).
                if archives.paths().len() > 1 {
                    archives.paths()[archives.paths().len() - 2]
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                } else {
                    None
                }
            } else {
                Some(last_name)
            }
        }
        None => None,
    };

    let Some(neighbor) = neighbor else {
        return (0, String::new());
    };

    if neighbor.len() <= active_name.len() {
        return (0, String::new());
    }

    let without_ext = &neighbor[..neighbor.len() - ext.len()];
    let (without_idx, idx) = match without_ext.rfind('.') {
        Some(dot) => {
            let candidate = &without_ext[dot + 1..];
            if !candidate.is_empty() && candidate.bytes().all(|b| b.is_ascii_digit()) {
                (&without_ext[..dot], candidate.parse::<i64>().unwrap_or(0))
            } else {
                (without_ext, 0)
            }
        }
        None => (without_ext, 0),
    };

    let bucket = match without_idx.rfind('.') {
        Some(dot) => {
            let candidate = &without_idx[dot + 1..];
            if !candidate.is_empty() && candidate.bytes().all(|b| b.is_ascii_digit()) {
                candidate.to_string()
            } else {
                String::new()
            }
        }
        None => String::new(),
    };

    (idx, bucket)
}

/// Picks the next free archive path for `stem[.bucket][.index]ext` in `dir`,
/// skipping over any name that already exists on disk and incrementing
/// `index` each time, per `SPEC_FULL.md` §4.7 step 1 / `rename` in
/// `internal.go`.
pub(crate) fn next_archive_path(
    dir: &Path,
    stem: &str,
    bucket: &str,
    ext: &str,
    index: &mut i64,
) -> PathBuf {
    loop {
        let name = match (*index, bucket.is_empty()) {
            (0, true) => format!("{stem}{ext}"),
            (0, false) => format!("{stem}.{bucket}{ext}"),
            (_, true) => format!("{stem}.{index}{ext}"),
            (_, false) => format!("{stem}.{bucket}.{index}{ext}"),
        };
        let candidate = dir.join(name);
        if candidate.exists() {
            *index += 1;
            continue;
        }
        return candidate;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;

    #[test]
    fn discovers_and_sorts_archives() {
        let dir = tempfile::tempdir().unwrap();
        let active = dir.path().join("app.log");
        File::create(&active).unwrap();
        for name in ["app.1.log", "app.2.log", "app.3.log"] {
            let mut f = File::create(dir.path().join(name)).unwrap();
            f.write_all(b"x").unwrap();
        }
        let list = discover_archives(&active);
        assert_eq!(list.len(), 3);
        let names: Vec<_> = list
            .paths()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["app.1.log", "app.2.log", "app.3.log"]);
    }

    #[test]
    fn next_archive_path_skips_existing_names() {
        let dir = tempfile::tempdir().unwrap();
        File::create(dir.path().join("app.1.log")).unwrap();
        let mut idx = 1;
        let path = next_archive_path(dir.path(), "app", "", ".log", &mut idx);
        assert_eq!(path.file_name().unwrap().to_string_lossy(), "app.2.log");
        assert_eq!(idx, 2);
    }

    #[test]
    fn recover_index_and_bucket_requires_longer_neighbor() {
        let mut list = ArchiveList::default();
        list.push(PathBuf::from("/logs/a.log"), SystemTime::now());
        let (idx, bucket) = recover_index_and_bucket(Path::new("/logs/a.log"), &list);
        assert_eq!(idx, 0);
        assert_eq!(bucket, "");
    }

    #[test]
    fn recover_index_and_bucket_parses_trailing_index() {
        let mut list = ArchiveList::default();
        list.push(PathBuf::from("/logs/app.20240315.3.log"), SystemTime::now());
        let (idx, bucket) = recover_index_and_bucket(Path::new("/logs/app.log"), &list);
        assert_eq!(idx, 3);
        assert_eq!(bucket, "20240315");
    }
}
