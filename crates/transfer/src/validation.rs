use std::path::{Component, Path};

use crate::TransferError;

/// Validates that a relative file path does not escape its base directory.
///
/// Rejects:
/// - Empty paths
/// - Absolute paths (Unix `/` or Windows `C:\`)
/// - Parent directory traversal (`..`)
/// - Windows prefix components (`C:`, `\\server`)
pub fn validate_relative_path(file_path: &str) -> Result<(), TransferError> {
    if file_path.is_empty() {
        return Err(TransferError::InvalidPath("empty path".into()));
    }

    let path = Path::new(file_path);
    if path.is_absolute() {
        return Err(TransferError::InvalidPath(format!(
            "absolute path not allowed: {file_path}"
        )));
    }

    for component in path.components() {
        match component {
            Component::ParentDir => {
                return Err(TransferError::InvalidPath(format!(
                    "parent directory traversal not allowed: {file_path}"
                )));
            }
            Component::Prefix(_) | Component::RootDir => {
                return Err(TransferError::InvalidPath(format!(
                    "absolute path not allowed: {file_path}"
                )));
            }
            Component::CurDir | Component::Normal(_) => {}
        }
    }

    Ok(())
}

/// Turns a store-provided display name into a single safe file name.
///
/// Path separators and control characters become `_`. Names that are empty
/// or consist only of dots fall back to `download`.
pub fn artifact_file_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        "download".into()
    } else {
        cleaned
    }
}

/// Joins a remote folder path and an entry name: `/{name}` under the root,
/// `{parent}/{name}` elsewhere.
pub fn join_remote_path(parent: &str, name: &str) -> String {
    let parent = parent.trim_end_matches('/');
    if parent.is_empty() {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}

/// Splits a remote path into its parent folder and final name.
///
/// `/a/b.txt` yields `("/a", "b.txt")`; `/b.txt` yields `("/", "b.txt")`.
pub fn split_remote_path(path: &str) -> (String, String) {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rsplit_once('/') {
        Some(("", name)) => ("/".into(), name.into()),
        Some((parent, name)) => (parent.into(), name.into()),
        None => ("/".into(), trimmed.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_path() {
        assert!(validate_relative_path("").is_err());
    }

    #[test]
    fn rejects_parent_dir_traversal() {
        assert!(validate_relative_path("../../../etc/passwd").is_err());
        assert!(validate_relative_path("sub/../../escape").is_err());
        assert!(validate_relative_path("..").is_err());
    }

    #[test]
    fn rejects_absolute_unix_path() {
        assert!(validate_relative_path("/tmp/malicious").is_err());
    }

    #[test]
    fn accepts_plain_names() {
        assert!(validate_relative_path("report.pdf").is_ok());
        assert!(validate_relative_path("./report.pdf").is_ok());
        assert!(validate_relative_path(".hidden").is_ok());
        assert!(validate_relative_path("a/b.txt").is_ok());
    }

    #[test]
    fn artifact_name_strips_separators() {
        assert_eq!(artifact_file_name("../../etc/passwd"), ".._.._etc_passwd");
        assert_eq!(artifact_file_name("a\\b:c"), "a_b_c");
        assert!(validate_relative_path(&artifact_file_name("../x")).is_ok());
    }

    #[test]
    fn remote_path_join_and_split() {
        assert_eq!(join_remote_path("/", "a.txt"), "/a.txt");
        assert_eq!(join_remote_path("", "a.txt"), "/a.txt");
        assert_eq!(join_remote_path("/docs/", "a.txt"), "/docs/a.txt");
        assert_eq!(split_remote_path("/docs/a.txt"), ("/docs".into(), "a.txt".into()));
        assert_eq!(split_remote_path("/a.txt"), ("/".into(), "a.txt".into()));
        assert_eq!(split_remote_path("a.txt"), ("/".into(), "a.txt".into()));
        assert_eq!(split_remote_path("/docs/"), ("/".into(), "docs".into()));
    }

    #[test]
    fn artifact_name_fallback() {
        assert_eq!(artifact_file_name(""), "download");
        assert_eq!(artifact_file_name("  "), "download");
        assert_eq!(artifact_file_name(".."), "download");
        assert_eq!(artifact_file_name("photo.jpg"), "photo.jpg");
    }
}
