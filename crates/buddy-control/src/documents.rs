use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};

use futures_util::{Stream, StreamExt, pin_mut};
use tokio::io::AsyncWriteExt;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("no selected file")]
    MissingName,
    #[error("invalid file extension, supported extensions are: {allowed}")]
    InvalidExtension { allowed: String },
    #[error("upload interrupted: {0}")]
    Interrupted(BoxError),
    #[error("failed to write document: {0}")]
    Io(#[from] std::io::Error),
}

/// Uploaded source documents on local durable storage.
///
/// Files are renamed to `<uuid>.<ext>` on write, so the client-provided name only
/// contributes its extension.
#[derive(Debug, Clone)]
pub struct DocumentStore {
    root: PathBuf,
    allowed_extensions: BTreeSet<String>,
}

impl DocumentStore {
    pub fn new(root: impl Into<PathBuf>, allowed_extensions: BTreeSet<String>) -> Self {
        Self {
            root: root.into(),
            allowed_extensions,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn ensure_root(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.root).await
    }

    /// Checks an original file name against the allow-list and returns its
    /// normalized extension.
    pub fn validate_name(&self, original_name: &str) -> Result<String, DocumentError> {
        let name = original_name.trim();
        if name.is_empty() {
            return Err(DocumentError::MissingName);
        }

        let ext = file_extension(name)
            .filter(|ext| self.allowed_extensions.contains(ext))
            .ok_or_else(|| DocumentError::InvalidExtension {
                allowed: self
                    .allowed_extensions
                    .iter()
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(", "),
            })?;
        Ok(ext)
    }

    /// Writes an upload chunk by chunk as it arrives. A partially written file is
    /// removed again if the source or the disk fails.
    pub async fn store<S, B, E>(
        &self,
        chunks: S,
        original_name: &str,
    ) -> Result<PathBuf, DocumentError>
    where
        S: Stream<Item = Result<B, E>>,
        B: AsRef<[u8]>,
        E: Into<BoxError>,
    {
        let ext = self.validate_name(original_name)?;
        let path = self.root.join(format!("{}.{ext}", uuid::Uuid::new_v4()));

        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await?;

        pin_mut!(chunks);
        let written = async {
            while let Some(chunk) = chunks.next().await {
                let chunk = chunk.map_err(|e| DocumentError::Interrupted(e.into()))?;
                file.write_all(chunk.as_ref()).await?;
            }
            file.flush().await?;
            file.sync_all().await?;
            Ok::<_, DocumentError>(())
        }
        .await;

        if let Err(err) = written {
            drop(file);
            let _ = tokio::fs::remove_file(&path).await;
            return Err(err);
        }

        tracing::debug!(path = %path.display(), original_name, "stored document");
        Ok(path)
    }

    /// Best-effort removal. Missing files are already gone; other failures are
    /// logged and never reach the caller.
    pub async fn delete(&self, paths: &[PathBuf]) {
        for path in paths {
            if !self.is_managed(path) {
                tracing::warn!(path = %path.display(), "refusing to delete file outside upload root");
                continue;
            }

            match tokio::fs::remove_file(path).await {
                Ok(()) => tracing::debug!(path = %path.display(), "deleted document"),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    tracing::debug!(path = %path.display(), "document already deleted");
                }
                Err(err) => {
                    tracing::warn!(path = %path.display(), %err, "failed to delete document");
                }
            }
        }
    }

    fn is_managed(&self, path: &Path) -> bool {
        let Ok(rel) = path.strip_prefix(&self.root) else {
            return false;
        };
        let mut components = rel.components();
        matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        )
    }
}

fn file_extension(name: &str) -> Option<String> {
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    if !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_in(dir: &Path) -> DocumentStore {
        DocumentStore::new(dir, crate::config::parse_extensions("pdf,txt"))
    }

    fn body(bytes: &'static [u8]) -> impl Stream<Item = Result<&'static [u8], std::io::Error>> {
        futures_util::stream::iter([Ok(bytes)])
    }

    #[test]
    fn extension_must_be_allow_listed() {
        let store = store_in(Path::new("/uploads"));
        assert_eq!(store.validate_name("Lecture 1.PDF").unwrap(), "pdf");
        assert!(matches!(
            store.validate_name("notes.docx"),
            Err(DocumentError::InvalidExtension { .. })
        ));
        assert!(matches!(
            store.validate_name("pdf"),
            Err(DocumentError::InvalidExtension { .. })
        ));
        assert!(matches!(store.validate_name("  "), Err(DocumentError::MissingName)));
    }

    #[test]
    fn traversal_names_keep_only_the_extension() {
        assert_eq!(file_extension("../../etc/passwd.txt").as_deref(), Some("txt"));
        assert_eq!(file_extension("archive.tar/..").as_deref(), None);
        assert_eq!(file_extension(".pdf"), None);
    }

    #[tokio::test]
    async fn store_writes_under_a_fresh_name() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());

        let a = store.store(body(b"first"), "../escape.txt").await.unwrap();
        let b = store.store(body(b"second"), "../escape.txt").await.unwrap();

        assert_ne!(a, b);
        assert_eq!(a.parent(), Some(dir.path()));
        assert_eq!(a.extension().and_then(|e| e.to_str()), Some("txt"));
        assert_eq!(tokio::fs::read(&a).await.unwrap(), b"first");
    }

    #[tokio::test]
    async fn store_rejects_before_touching_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());

        let err = store.store(body(b"x"), "slides.pptx").await.unwrap_err();
        assert!(err.to_string().contains("pdf, txt"));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn chunks_are_concatenated() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        let chunks = futures_util::stream::iter([
            Ok::<_, std::io::Error>(b"cells ".to_vec()),
            Ok(b"divide".to_vec()),
        ]);

        let path = store.store(chunks, "notes.txt").await.unwrap();
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"cells divide");
    }

    #[tokio::test]
    async fn interrupted_upload_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        let chunks = futures_util::stream::iter([
            Ok(b"half a doc".to_vec()),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "client went away")),
        ]);

        let err = store.store(chunks, "notes.txt").await.unwrap_err();
        assert!(matches!(err, DocumentError::Interrupted(_)));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        let path = store.store(body(b"doc"), "a.pdf").await.unwrap();

        store.delete(std::slice::from_ref(&path)).await;
        assert!(!path.exists());
        store.delete(std::slice::from_ref(&path)).await;
    }

    #[tokio::test]
    async fn delete_ignores_paths_outside_the_root() {
        let root = tempfile::tempdir().unwrap();
        let other = tempfile::tempdir().unwrap();
        let outside = other.path().join("keep.txt");
        std::fs::write(&outside, b"keep").unwrap();

        store_in(root.path()).delete(&[outside.clone()]).await;
        assert!(outside.exists());
    }
}
