use crate::StoreError;
use std::path::{Path, PathBuf};

/// Resolve `.` and `..` components without touching the filesystem.
///
/// The archive may not exist yet, and the result must not depend on symlinks
/// present on the host. `..` never climbs above the path's root.
fn canonicalize_logical(path: &str) -> String {
    let (prefix, rest) = split_drive(path);
    let mut parts: Vec<&str> = Vec::new();
    for component in rest.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    format!("{prefix}/{}", parts.join("/"))
}

/// Split a `C:` drive prefix off a separator-normalized path.
fn split_drive(path: &str) -> (&str, &str) {
    let bytes = path.as_bytes();
    if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
        path.split_at(2)
    } else {
        ("", path)
    }
}

fn normalize_separators(path: &str) -> String {
    path.replace('\\', "/")
}

fn is_absolute_like(path: &str) -> bool {
    path.starts_with('/') || !split_drive(path).0.is_empty()
}

/// Join `relative` onto `root` and confine the result to `root`.
///
/// Both sides are separator-normalized and logically canonicalized; the result
/// must equal the root or sit strictly beneath it (`root/...`), compared
/// case-insensitively. Rejects an empty root, an empty relative path, and any
/// absolute relative path.
pub fn resolve_archive_path(root: &Path, relative: &str) -> Result<PathBuf, StoreError> {
    let root_str = normalize_separators(&root.to_string_lossy());
    if root_str.trim().is_empty() {
        return Err(StoreError::EmptyRoot);
    }
    let rel = normalize_separators(relative);
    if rel.trim().is_empty() {
        return Err(StoreError::EmptyRelativePath);
    }
    if is_absolute_like(&rel) {
        return Err(StoreError::AbsoluteRelativePath(relative.to_owned()));
    }

    let root_abs = if is_absolute_like(&root_str) {
        root_str
    } else {
        let cwd = std::env::current_dir()?;
        format!("{}/{root_str}", normalize_separators(&cwd.to_string_lossy()))
    };

    let canonical_root = canonicalize_logical(&root_abs);
    let canonical = canonicalize_logical(&format!("{canonical_root}/{rel}"));

    if !is_within(&canonical_root, &canonical) {
        return Err(StoreError::EscapesRoot {
            path: relative.to_owned(),
            root: canonical_root,
        });
    }
    Ok(PathBuf::from(canonical))
}

fn is_within(root: &str, candidate: &str) -> bool {
    let root = root.to_lowercase();
    let candidate = candidate.to_lowercase();
    if candidate == root {
        return true;
    }
    let prefix = if root.ends_with('/') {
        root
    } else {
        format!("{root}/")
    };
    candidate.starts_with(&prefix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_path_resolves_under_root() {
        let p = resolve_archive_path(Path::new("/mirror"), "tools/a.zip").unwrap();
        assert_eq!(p, PathBuf::from("/mirror/tools/a.zip"));
    }

    #[test]
    fn traversal_is_rejected() {
        let err = resolve_archive_path(Path::new("/mirror"), "../../etc/passwd").unwrap_err();
        assert!(matches!(err, StoreError::EscapesRoot { .. }));
        assert!(err.to_string().contains("escapes"));
    }

    #[test]
    fn inner_dot_segments_are_collapsed() {
        let p = resolve_archive_path(Path::new("/mirror/"), "./tools/../tools/./b.tar").unwrap();
        assert_eq!(p, PathBuf::from("/mirror/tools/b.tar"));
    }

    #[test]
    fn traversal_back_into_root_is_allowed() {
        let p = resolve_archive_path(Path::new("/mirror"), "tools/../../mirror/c.tar").unwrap();
        assert_eq!(p, PathBuf::from("/mirror/c.tar"));
    }

    #[test]
    fn resolving_to_root_itself_is_allowed() {
        let p = resolve_archive_path(Path::new("/mirror"), "tools/..").unwrap();
        assert_eq!(p, PathBuf::from("/mirror"));
    }

    #[test]
    fn sibling_with_shared_prefix_escapes() {
        let err = resolve_archive_path(Path::new("/mirror"), "../mirror-evil/a.tar").unwrap_err();
        assert!(matches!(err, StoreError::EscapesRoot { .. }));
    }

    #[test]
    fn backslash_separators_are_normalized() {
        let p = resolve_archive_path(Path::new("/mirror"), "tools\\win\\a.zip").unwrap();
        assert_eq!(p, PathBuf::from("/mirror/tools/win/a.zip"));
        assert!(resolve_archive_path(Path::new("/mirror"), "..\\..\\etc\\passwd").is_err());
    }

    #[test]
    fn prefix_comparison_ignores_case() {
        let p = resolve_archive_path(Path::new("C:\\Mirror"), "tools/A.zip").unwrap();
        assert_eq!(p, PathBuf::from("C:/Mirror/tools/A.zip"));
        assert!(is_within("C:/Mirror", "c:/mirror/tools"));
    }

    #[test]
    fn empty_inputs_are_rejected() {
        assert!(matches!(
            resolve_archive_path(Path::new(""), "a.tar"),
            Err(StoreError::EmptyRoot)
        ));
        assert!(matches!(
            resolve_archive_path(Path::new("/mirror"), "  "),
            Err(StoreError::EmptyRelativePath)
        ));
    }

    #[test]
    fn absolute_relative_path_is_rejected() {
        assert!(matches!(
            resolve_archive_path(Path::new("/mirror"), "/etc/passwd"),
            Err(StoreError::AbsoluteRelativePath(_))
        ));
        assert!(matches!(
            resolve_archive_path(Path::new("/mirror"), "D:\\tools\\a.zip"),
            Err(StoreError::AbsoluteRelativePath(_))
        ));
    }

    #[test]
    fn relative_root_is_anchored_at_cwd() {
        let p = resolve_archive_path(Path::new("mirror"), "a.tar").unwrap();
        assert!(p.is_absolute());
        assert!(p.ends_with("mirror/a.tar"));
    }
}
