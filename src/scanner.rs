use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct ScannedFile {
    pub path: String,
    pub mtime_ms: i64,
    pub size: u64,
}

fn build_glob_set(patterns: &[String]) -> GlobSet {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        if let Ok(glob) = Glob::new(pattern) {
            builder.add(glob);
        } else {
            tracing::warn!("ignoring invalid glob pattern: {}", pattern);
        }
    }
    builder.build().unwrap_or_else(|_| GlobSetBuilder::new().build().unwrap())
}

fn is_hidden(relative_path: &str) -> bool {
    relative_path
        .split('/')
        .any(|component| component.starts_with('.') && component != "." && component != "..")
}

/// Walk `root`, gitignore-aware, and yield every regular file whose
/// workspace-relative path matches at least one include pattern and no
/// exclude pattern. Hidden files/directories are skipped by default unless
/// an exclude pattern explicitly targets a leading-dot path.
pub fn scan(root: &Path, includes: &[String], excludes: &[String]) -> Vec<ScannedFile> {
    let include_set = build_glob_set(includes);
    let exclude_set = build_glob_set(excludes);
    let excludes_hidden = excludes.iter().any(|p| p.contains("/.") || p.starts_with('.'));

    WalkBuilder::new(root)
        .hidden(true)
        .git_ignore(true)
        .git_global(true)
        .git_exclude(true)
        .build()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_some_and(|ft| ft.is_file()))
        .filter_map(|entry| {
            let path = entry.path();
            let relative = path.strip_prefix(root).unwrap_or(path).to_string_lossy().replace('\\', "/");

            if !excludes_hidden && is_hidden(&relative) {
                return None;
            }
            if !include_set.is_match(&relative) || exclude_set.is_match(&relative) {
                return None;
            }

            let metadata = entry.metadata().ok()?;
            let mtime_ms = metadata
                .modified()
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_millis() as i64)
                .unwrap_or(0);

            Some(ScannedFile {
                path: relative,
                mtime_ms,
                size: metadata.len(),
            })
        })
        .collect()
}

/// Returns the subset of `paths` that still exist on disk under `root` and
/// still match the include/exclude patterns.
pub fn still_present(root: &Path, paths: &[String], includes: &[String], excludes: &[String]) -> Vec<String> {
    let include_set = build_glob_set(includes);
    let exclude_set = build_glob_set(excludes);

    paths
        .iter()
        .filter(|p| {
            let full = root.join(p.as_str());
            full.is_file() && include_set.is_match(p.as_str()) && !exclude_set.is_match(p.as_str())
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn scans_matching_files_and_excludes_others() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.md"), "hello").unwrap();
        fs::write(dir.path().join("b.txt"), "world").unwrap();
        fs::create_dir_all(dir.path().join("node_modules")).unwrap();
        fs::write(dir.path().join("node_modules/c.md"), "skip me").unwrap();

        let files = scan(
            dir.path(),
            &["**/*.md".to_string()],
            &["node_modules/**".to_string()],
        );

        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "a.md");
    }

    #[test]
    fn hidden_files_excluded_by_default() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(".hidden.md"), "secret").unwrap();

        let files = scan(dir.path(), &["**/*.md".to_string()], &[]);
        assert!(files.is_empty());
    }

    #[test]
    fn still_present_drops_deleted_paths() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.md"), "hello").unwrap();

        let result = still_present(
            dir.path(),
            &["a.md".to_string(), "gone.md".to_string()],
            &["**/*.md".to_string()],
            &[],
        );

        assert_eq!(result, vec!["a.md".to_string()]);
    }
}
