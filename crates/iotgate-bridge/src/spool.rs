//! Payload spooling to the local filesystem
//!
//! Every received MQTT message is appended to a per-topic file before any
//! forwarding happens, so raw payloads survive sink outages. Files live in a
//! flat directory; the topic's `/` separators are replaced with `_` to form
//! the file name, e.g. `devices/line1/env` becomes `devices_line1_env.txt`.

use crate::error::Result;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Append-only spool of raw MQTT payloads
#[derive(Debug, Clone)]
pub struct Spool {
    dir: PathBuf,
}

impl Spool {
    /// Create a spool rooted at the given directory
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Spool directory root
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File path a topic's payloads are appended to
    pub fn file_path(&self, topic: &str) -> PathBuf {
        self.dir.join(format!("{}.txt", topic.replace('/', "_")))
    }

    /// Append one payload to the topic's spool file, one line per message.
    ///
    /// The spool directory is created on first use. Payloads are written
    /// lossily as UTF-8; sensor payloads are line-oriented text.
    pub async fn append(&self, topic: &str, payload: &[u8]) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let path = self.file_path(topic);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        let mut line = String::from_utf8_lossy(payload).into_owned();
        line.push('\n');
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        debug!(topic = %topic, path = %path.display(), bytes = payload.len(), "Spooled payload");

        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_path_replaces_separators() {
        let spool = Spool::new("/data");
        assert_eq!(
            spool.file_path("devices/line1/env"),
            PathBuf::from("/data/devices_line1_env.txt")
        );
        assert_eq!(spool.file_path("env"), PathBuf::from("/data/env.txt"));
    }

    #[tokio::test]
    async fn test_append_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let spool = Spool::new(dir.path());

        let path = spool
            .append("devices/line1/env", b"0xBC;25.0,50.0,900")
            .await
            .unwrap();

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(content, "0xBC;25.0,50.0,900\n");
    }

    #[tokio::test]
    async fn test_append_accumulates_lines() {
        let dir = tempfile::tempdir().unwrap();
        let spool = Spool::new(dir.path());

        spool.append("devices/line1/rfid", b"RFID=12345").await.unwrap();
        spool.append("devices/line1/rfid", b"RFID=67890").await.unwrap();

        let path = spool.file_path("devices/line1/rfid");
        let content = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(content, "RFID=12345\nRFID=67890\n");
    }

    #[tokio::test]
    async fn test_append_separate_topics_separate_files() {
        let dir = tempfile::tempdir().unwrap();
        let spool = Spool::new(dir.path());

        spool.append("devices/line1/env", b"a").await.unwrap();
        spool.append("devices/line1/rfid", b"b").await.unwrap();

        assert!(spool.file_path("devices/line1/env").exists());
        assert!(spool.file_path("devices/line1/rfid").exists());
    }

    #[tokio::test]
    async fn test_append_creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("spool/sub");
        let spool = Spool::new(&nested);

        spool.append("devices/line1/env", b"x").await.unwrap();
        assert!(nested.exists());
    }

    #[tokio::test]
    async fn test_append_non_utf8_is_lossy() {
        let dir = tempfile::tempdir().unwrap();
        let spool = Spool::new(dir.path());

        let path = spool
            .append("devices/line1/env", &[0xff, 0xfe, b'o', b'k'])
            .await
            .unwrap();

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(content.ends_with("ok\n"));
    }
}
