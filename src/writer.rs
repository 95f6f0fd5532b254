use anyhow::{Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

#[derive(Debug, Serialize)]
struct OutputLine<'a> {
    text: &'a str,
}

/// Appends finished records to a JSONL file. Clones share one gate, so at
/// most one append touches the file at any time and lines never interleave.
#[derive(Debug, Clone)]
pub struct OutputWriter {
    path: Arc<PathBuf>,
    gate: Arc<Mutex<()>>,
}

impl OutputWriter {
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        ensure_parent_dir(&path).await?;
        Ok(Self {
            path: Arc::new(path),
            gate: Arc::new(Mutex::new(())),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append(&self, text: &str) -> Result<()> {
        let mut line = serde_json::to_string(&OutputLine { text })
            .with_context(|| "failed to serialize output line")?;
        line.push('\n');

        let _guard = self.gate.lock().await;
        ensure_parent_dir(&self.path).await?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path.as_path())
            .await
            .with_context(|| format!("failed to open output: {}", self.path.display()))?;
        file.write_all(line.as_bytes())
            .await
            .with_context(|| format!("failed to append to output: {}", self.path.display()))?;
        file.flush()
            .await
            .with_context(|| format!("failed to flush output: {}", self.path.display()))?;
        Ok(())
    }
}

async fn ensure_parent_dir(path: &Path) -> Result<()> {
    let Some(dir) = path.parent() else {
        return Ok(());
    };
    if dir.as_os_str().is_empty() {
        return Ok(());
    }
    fs::create_dir_all(dir)
        .await
        .with_context(|| format!("failed to create output directory: {}", dir.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tempfile::tempdir;

    #[tokio::test]
    async fn writes_one_json_object_per_line_without_escaping() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("nested/out/result.jsonl");
        let writer = OutputWriter::open(&path).await.expect("open writer");
        assert!(path.parent().unwrap().is_dir());

        writer.append("Hello world").await.unwrap();
        writer.append("残留 \"quoted\"\nnext").await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            content,
            "{\"text\":\"Hello world\"}\n{\"text\":\"残留 \\\"quoted\\\"\\nnext\"}\n"
        );
    }

    #[tokio::test]
    async fn recreates_missing_parent_directory() {
        let dir = tempdir().expect("tempdir");
        let out_dir = dir.path().join("out");
        let path = out_dir.join("result.jsonl");
        let writer = OutputWriter::open(&path).await.unwrap();
        std::fs::remove_dir_all(&out_dir).unwrap();

        writer.append("again").await.unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "{\"text\":\"again\"}\n"
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_appends_never_interleave() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("out.jsonl");
        let writer = OutputWriter::open(&path).await.unwrap();
        let count = 64;

        let mut handles = Vec::new();
        for index in 0..count {
            let writer = writer.clone();
            handles.push(tokio::spawn(async move {
                let text = format!("record {} {}", index, "翻译".repeat(200 + index));
                writer.append(&text).await
            }));
        }
        for handle in handles {
            handle.await.expect("join").expect("append");
        }

        let content = std::fs::read_to_string(&path).unwrap();
        let lines = content.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), count);
        let mut seen = HashSet::new();
        for line in lines {
            let value: serde_json::Value = serde_json::from_str(line).expect("well-formed line");
            let text = value["text"].as_str().expect("text field").to_string();
            assert_eq!(value.as_object().map(|object| object.len()), Some(1));
            seen.insert(text);
        }
        assert_eq!(seen.len(), count);
    }
}
