//! Relevance ranking of matched index documents.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;

/// One distinct document and how many index entries matched it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedDocument {
    /// Rendering of the document's `key` field used for grouping.
    pub key: String,
    /// First matched document with this key.
    pub document: Value,
    pub matches: usize,
}

/// The grouping key of a document: its `key` field, strings unquoted.
pub fn document_key(document: &Value) -> Option<String> {
    match document.get("key")? {
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Group by `key`, most matches first; ties keep encounter order.
///
/// Documents without a `key` field are dropped.
pub fn rank<I>(documents: I) -> Vec<RankedDocument>
where
    I: IntoIterator<Item = Value>,
{
    let mut ranked: Vec<RankedDocument> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();
    for document in documents {
        let Some(key) = document_key(&document) else {
            continue;
        };
        match positions.get(&key) {
            Some(&position) => ranked[position].matches += 1,
            None => {
                positions.insert(key.clone(), ranked.len());
                ranked.push(RankedDocument {
                    key,
                    document,
                    matches: 1,
                });
            }
        }
    }
    ranked.sort_by(|a, b| b.matches.cmp(&a.matches));
    ranked
}
