use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to extract text from {path}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("unsupported document type: {0}")]
    Unsupported(PathBuf),
}

/// Document types [`extract`] can read.
pub const SUPPORTED_EXTENSIONS: [&str; 3] = ["pdf", "txt", "md"];

/// Plain text of one uploaded document.
pub async fn extract(path: &Path) -> Result<String, ExtractError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    let bytes = tokio::fs::read(path).await.map_err(|source| ExtractError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    match ext.as_str() {
        "pdf" => {
            let owned = path.to_path_buf();
            // pdf-extract is synchronous and panics on some malformed inputs.
            tokio::task::spawn_blocking(move || {
                pdf_extract::extract_text_from_mem(&bytes).map_err(|e| e.to_string())
            })
            .await
            .map_err(|e| ExtractError::Parse {
                path: owned.clone(),
                message: format!("parser aborted: {e}"),
            })?
            .map_err(|message| ExtractError::Parse {
                path: owned,
                message,
            })
        }
        "txt" | "md" => Ok(String::from_utf8_lossy(&bytes).into_owned()),
        _ => Err(ExtractError::Unsupported(path.to_path_buf())),
    }
}

/// Concatenates all documents, each under a header line, and keeps at most
/// `max_chars` characters.
pub async fn extract_all(paths: &[PathBuf], max_chars: usize) -> Result<String, ExtractError> {
    let mut out = String::new();
    for (i, path) in paths.iter().enumerate() {
        let text = extract(path).await?;
        let text = collapse_blank_lines(&text);
        if text.is_empty() {
            tracing::debug!(path = %path.display(), "document has no extractable text");
            continue;
        }
        if !out.is_empty() {
            out.push_str("\n\n");
        }
        out.push_str(&format!("### Document {}\n", i + 1));
        out.push_str(&text);
    }
    Ok(truncate_chars(&out, max_chars))
}

fn collapse_blank_lines(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0usize;
    for line in text.lines() {
        let line = line.trim_end();
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(line);
        out.push('\n');
    }
    out.trim().to_string()
}

pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        None => s.to_string(),
        Some((end, _)) => s[..end].to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("abc", 0), "");
    }

    #[test]
    fn blank_runs_collapse_to_one() {
        assert_eq!(collapse_blank_lines("a\n\n\n\nb  \n"), "a\n\nb");
    }

    #[tokio::test]
    async fn text_documents_are_joined_with_headers() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.md");
        std::fs::write(&a, "Mitochondria make ATP.").unwrap();
        std::fs::write(&b, "# Cells\nRibosomes build proteins.").unwrap();

        let text = extract_all(&[a, b], 10_000).await.unwrap();
        assert!(text.starts_with("### Document 1\nMitochondria"));
        assert!(text.contains("### Document 2\n# Cells"));
    }

    #[tokio::test]
    async fn missing_document_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = extract(&dir.path().join("gone.txt")).await.unwrap_err();
        assert!(matches!(err, ExtractError::Read { .. }));
    }

    #[tokio::test]
    async fn unknown_extension_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deck.pptx");
        std::fs::write(&path, b"binary").unwrap();
        assert!(matches!(
            extract(&path).await.unwrap_err(),
            ExtractError::Unsupported(_)
        ));
    }
}
