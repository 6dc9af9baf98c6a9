//! Corpus location and loading.
//!
//! The core only needs the corpus text. This module finds the file (an
//! explicit path or the per-user data directory) and decodes it.

use crate::error::{LensError, Result};
use directories_next::ProjectDirs;
use log::{info, warn};
use std::fs;
use std::path::{Path, PathBuf};

/// Subdirectory name within user's data directory
pub const DATA_SUBDIR: &str = "wordlens";
/// File name looked up in the data directory when no path is given.
pub const CORPUS_FILENAME: &str = "content.htm";

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Gets the project's data directory path.
/// Creates the directory if it doesn't exist.
pub fn get_data_dir() -> Result<PathBuf> {
    let proj_dirs =
        ProjectDirs::from("org", "WordLens", DATA_SUBDIR).ok_or(LensError::DataDirNotFound)?;
    let data_dir = proj_dirs.data_dir().to_path_buf();
    fs::create_dir_all(&data_dir)?;
    Ok(data_dir)
}

/// Path of the corpus in the data directory.
pub fn default_corpus_path() -> Result<PathBuf> {
    Ok(get_data_dir()?.join(CORPUS_FILENAME))
}

/// Reads a corpus file and decodes it as UTF-8.
///
/// Invalid sequences are replaced rather than rejected; a leading BOM is
/// dropped.
pub async fn read_corpus(path: &Path) -> Result<String> {
    if !path.exists() {
        return Err(LensError::DataFileNotFound(path.display().to_string()));
    }
    info!("Reading corpus file: {:?}", path);
    let bytes = tokio::fs::read(path).await?;
    Ok(decode_corpus(&bytes))
}

/// Decodes raw corpus bytes.
pub fn decode_corpus(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(e) => {
            warn!(
                "Corpus is not valid UTF-8 (first bad byte at {}); replacing invalid sequences.",
                e.valid_up_to()
            );
            String::from_utf8_lossy(bytes).into_owned()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_read_corpus_strips_bom() {
        let _ = env_logger::builder().is_test(true).try_init();
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let path = temp_dir.path().join("content.htm");
        let mut bytes = UTF8_BOM.to_vec();
        bytes.extend_from_slice("<p>△ ban=禁止</p>".as_bytes());
        fs::write(&path, bytes).unwrap();

        let text = read_corpus(&path).await.expect("corpus reads");
        assert_eq!(text, "<p>△ ban=禁止</p>");
    }

    #[tokio::test]
    async fn test_read_missing_corpus() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let result = read_corpus(&temp_dir.path().join("absent.htm")).await;
        assert!(matches!(result, Err(LensError::DataFileNotFound(_))));
    }

    #[test]
    fn test_decode_invalid_utf8_is_lossy() {
        let text = decode_corpus(b"<p>ab\xFFcd</p>");
        assert_eq!(text, "<p>ab\u{FFFD}cd</p>");
    }
}
