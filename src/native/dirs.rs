//! Well-known directories of the host account and the engine

use std::path::{Path, PathBuf};

/// The user's documents directory
pub fn document_dir() -> PathBuf {
    dirs_next::document_dir()
        .or_else(|| dirs_next::home_dir().map(|home| home.join("Documents")))
        .unwrap_or_else(|| PathBuf::from("My Documents"))
}

/// Directory the engine stores received files under ("WeChat Files").
///
/// The engine records a custom location in the registry; without one the
/// files land in the documents directory.
pub fn engine_document_dir() -> PathBuf {
    registry_save_path()
        .unwrap_or_else(document_dir)
        .join("WeChat Files")
}

/// Agent working directory holding decoded media and outgoing blobs
pub fn default_workdir() -> PathBuf {
    document_dir().join("wechat-agent")
}

pub fn path_exists(path: &Path) -> bool {
    path.try_exists().unwrap_or(false)
}

#[cfg(windows)]
fn registry_save_path() -> Option<PathBuf> {
    let output = std::process::Command::new("reg")
        .args([
            "query",
            r"HKCU\SOFTWARE\Tencent\WeChat",
            "/v",
            "FileSavePath",
        ])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    parse_reg_value(&String::from_utf8_lossy(&output.stdout)).map(PathBuf::from)
}

#[cfg(not(windows))]
fn registry_save_path() -> Option<PathBuf> {
    None
}

/// Extract the data of a `reg query` value line:
/// `    FileSavePath    REG_SZ    D:\Files`
#[cfg_attr(not(windows), allow(dead_code))]
fn parse_reg_value(output: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let (_, rest) = line.split_once("REG_SZ")?;
        let value = rest.trim();
        (!value.is_empty() && value != "MyDocument:").then(|| value.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_reg_value() {
        let output = "\r\nHKEY_CURRENT_USER\\SOFTWARE\\Tencent\\WeChat\r\n    FileSavePath    REG_SZ    D:\\Chat Files\r\n\r\n";
        assert_eq!(parse_reg_value(output).as_deref(), Some("D:\\Chat Files"));
        assert_eq!(
            parse_reg_value("    FileSavePath    REG_SZ    MyDocument:"),
            None
        );
        assert_eq!(parse_reg_value("ERROR: not found"), None);
    }

    #[test]
    fn test_engine_document_dir() {
        assert!(engine_document_dir().ends_with("WeChat Files"));
    }

    #[test]
    fn test_path_exists() {
        let dir = tempfile::tempdir().unwrap();
        assert!(path_exists(dir.path()));
        assert!(!path_exists(&dir.path().join("missing")));
    }
}
