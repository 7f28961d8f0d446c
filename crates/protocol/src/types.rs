use serde::{Deserialize, Serialize};

/// A file or folder as listed by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    pub id: u64,
    pub name: String,
    pub path: String,
    pub is_dir: bool,
    #[serde(default)]
    pub size: u64,
    #[serde(default, rename = "type", skip_serializing_if = "String::is_empty")]
    pub kind: String,
}

impl FileEntry {
    /// Convenience constructor for a regular file.
    pub fn file(id: u64, name: impl Into<String>, path: impl Into<String>, size: u64) -> Self {
        Self {
            id,
            name: name.into(),
            path: path.into(),
            is_dir: false,
            size,
            kind: String::new(),
        }
    }

    /// Convenience constructor for a folder.
    pub fn folder(id: u64, name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            path: path.into(),
            is_dir: true,
            size: 0,
            kind: String::new(),
        }
    }
}

/// Contents of one folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderListing {
    pub path: String,
    #[serde(default)]
    pub contents: Vec<FileEntry>,
    #[serde(default)]
    pub total: u64,
}

/// How the store chose to serve a download request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadKind {
    Single,
    Multiple,
    Zip,
    Queue,
}

/// Per-file detail inside a download response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadDetail {
    pub id: u64,
    pub name: String,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dlink: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_entry_uses_type_key() {
        let json = r#"{"id":3,"name":"a.txt","path":"/a.txt","isDir":false,"size":12,"type":"text"}"#;
        let entry: FileEntry = serde_json::from_str(json).unwrap();
        assert_eq!(entry.kind, "text");
        assert!(!entry.is_dir);
        let back = serde_json::to_value(&entry).unwrap();
        assert_eq!(back["type"], "text");
        assert_eq!(back["isDir"], false);
    }

    #[test]
    fn folder_entry_defaults_size() {
        let json = r#"{"id":9,"name":"docs","path":"/docs","isDir":true}"#;
        let entry: FileEntry = serde_json::from_str(json).unwrap();
        assert_eq!(entry, FileEntry::folder(9, "docs", "/docs"));
    }

    #[test]
    fn download_kind_lowercase() {
        assert_eq!(serde_json::to_string(&DownloadKind::Zip).unwrap(), r#""zip""#);
        let parsed: DownloadKind = serde_json::from_str(r#""queue""#).unwrap();
        assert_eq!(parsed, DownloadKind::Queue);
    }
}
