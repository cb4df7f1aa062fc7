//! Result identity and per-list deduplication

use crate::engine::EngineHit;
use std::collections::HashSet;

/// Resolve the identity key of a chunk.
///
/// Explicit id first, then `documentId:knowledgeBaseId`, then the blake3 hash
/// of the content. Returns `None` when none of these is present.
pub fn identity_key(
    id: Option<&str>,
    document_id: Option<&str>,
    knowledge_base_id: Option<&str>,
    content: &str,
) -> Option<String> {
    if let Some(id) = id.map(str::trim).filter(|s| !s.is_empty()) {
        return Some(id.to_string());
    }

    if let Some(doc) = document_id.map(str::trim).filter(|s| !s.is_empty()) {
        let kb = knowledge_base_id.map(str::trim).unwrap_or("");
        return Some(format!("{}:{}", doc, kb));
    }

    if content.is_empty() {
        return None;
    }

    Some(blake3::hash(content.as_bytes()).to_hex().to_string())
}

/// Keep the first (best-ranked) occurrence of each identity, preserving order.
///
/// Hits without a resolvable identity are returned as `Err` with their index.
pub fn dedup_first(hits: Vec<EngineHit>) -> Result<Vec<(String, EngineHit)>, usize> {
    let mut seen: HashSet<String> = HashSet::with_capacity(hits.len());
    let mut unique = Vec::with_capacity(hits.len());

    for (index, hit) in hits.into_iter().enumerate() {
        let key = hit.identity().ok_or(index)?;
        if seen.insert(key.clone()) {
            unique.push((key, hit));
        }
    }

    Ok(unique)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_precedence() {
        assert_eq!(
            identity_key(Some("chunk-7"), Some("doc"), Some("kb"), "text"),
            Some("chunk-7".to_string())
        );
        assert_eq!(
            identity_key(None, Some("doc"), Some("kb"), "text"),
            Some("doc:kb".to_string())
        );
        assert_eq!(
            identity_key(Some("  "), Some("doc"), None, "text"),
            Some("doc:".to_string())
        );
        assert_eq!(
            identity_key(None, None, None, "text"),
            Some(blake3::hash(b"text").to_hex().to_string())
        );
        assert_eq!(identity_key(None, None, Some("kb"), ""), None);
    }

    #[test]
    fn test_identity_is_pure() {
        let a = identity_key(None, None, None, "same content");
        let b = identity_key(None, None, None, "same content");
        assert_eq!(a, b);
    }

    #[test]
    fn test_dedup_keeps_first() {
        let hits = vec![
            EngineHit::new("a", "first", 0.9),
            EngineHit::new("b", "second", 0.8),
            EngineHit::new("a", "again", 0.7),
        ];

        let unique = dedup_first(hits).unwrap();
        assert_eq!(unique.len(), 2);
        assert_eq!(unique[0].0, "a");
        assert_eq!(unique[0].1.score, 0.9);
        assert_eq!(unique[1].0, "b");
    }

    #[test]
    fn test_dedup_reports_unresolvable_hit() {
        let hits = vec![
            EngineHit::new("a", "first", 0.9),
            EngineHit {
                id: None,
                content: String::new(),
                ..EngineHit::new("", "", 0.5)
            },
        ];
        assert_eq!(dedup_first(hits).unwrap_err(), 1);
    }
}
