use hybridrag_core::{Document, RagError, RagResult};
use std::path::Path;

/// Read documents from a JSON Lines file, one `{"id", "text", "metadata"}`
/// object per line. Blank lines are skipped.
pub async fn read_jsonl(path: &Path) -> RagResult<Vec<Document>> {
    let raw = tokio::fs::read_to_string(path).await?;
    parse_jsonl(&raw).map_err(|e| match e {
        RagError::InvalidArgument(msg) => {
            RagError::InvalidArgument(format!("{}: {msg}", path.display()))
        }
        other => other,
    })
}

fn parse_jsonl(raw: &str) -> RagResult<Vec<Document>> {
    raw.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            serde_json::from_str::<Document>(line)
                .map_err(|e| RagError::InvalidArgument(format!("line {}: {e}", n + 1)))
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_lines_with_metadata() {
        let raw = r#"{"id": "d1", "text": "red apple", "metadata": {"kind": "fruit"}}

{"id": "d2", "text": "blue car"}
"#;
        let docs = parse_jsonl(raw).unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].metadata["kind"], "fruit");
        assert!(docs[1].metadata.is_empty());
    }

    #[tokio::test]
    async fn test_bad_line_reports_position() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("docs.jsonl");
        tokio::fs::write(&path, "{\"id\": \"a\", \"text\": \"ok\"}\nnot json\n")
            .await
            .unwrap();

        let err = read_jsonl(&path).await.unwrap_err();
        assert!(matches!(err, RagError::InvalidArgument(msg) if msg.contains("line 2")));
    }
}
