//! Structured metadata filters for index queries.

use std::collections::HashMap;

use serde_json::{json, Map, Value};

/// AND/OR tree of field-equality clauses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WhereFilter {
    Eq { key: String, value: String },
    And(Vec<WhereFilter>),
    Or(Vec<WhereFilter>),
}

impl WhereFilter {
    pub fn eq(key: impl Into<String>, value: impl Into<String>) -> Self {
        WhereFilter::Eq {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Conjunction of `clauses`. A single clause is returned as-is since
    /// Chroma rejects `$and` with fewer than two operands.
    pub fn all(mut clauses: Vec<WhereFilter>) -> Option<Self> {
        match clauses.len() {
            0 => None,
            1 => clauses.pop(),
            _ => Some(WhereFilter::And(clauses)),
        }
    }

    /// Disjunction of `clauses`, collapsed the same way as [`WhereFilter::all`].
    pub fn any(mut clauses: Vec<WhereFilter>) -> Option<Self> {
        match clauses.len() {
            0 => None,
            1 => clauses.pop(),
            _ => Some(WhereFilter::Or(clauses)),
        }
    }

    /// Render as a Chroma `where` document.
    pub fn to_chroma(&self) -> Value {
        match self {
            WhereFilter::Eq { key, value } => {
                let mut clause = Map::new();
                clause.insert(key.clone(), json!({ "$eq": value }));
                Value::Object(clause)
            }
            WhereFilter::And(clauses) => {
                json!({ "$and": clauses.iter().map(|c| c.to_chroma()).collect::<Vec<_>>() })
            }
            WhereFilter::Or(clauses) => {
                json!({ "$or": clauses.iter().map(|c| c.to_chroma()).collect::<Vec<_>>() })
            }
        }
    }

    /// Evaluate against stringified metadata. Missing keys never match.
    pub fn matches(&self, metadata: &HashMap<String, String>) -> bool {
        match self {
            WhereFilter::Eq { key, value } => metadata.get(key).is_some_and(|v| v == value),
            WhereFilter::And(clauses) => clauses.iter().all(|c| c.matches(metadata)),
            WhereFilter::Or(clauses) => clauses.iter().any(|c| c.matches(metadata)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_all_collapses_single_clause() {
        assert_eq!(WhereFilter::all(vec![]), None);
        assert_eq!(
            WhereFilter::all(vec![WhereFilter::eq("city", "Минск")]),
            Some(WhereFilter::eq("city", "Минск"))
        );
    }

    #[test]
    fn test_to_chroma_shapes() {
        let f = WhereFilter::all(vec![
            WhereFilter::eq("city", "Минск"),
            WhereFilter::eq("pharmacy_number", "5"),
        ])
        .unwrap();
        assert_eq!(
            f.to_chroma(),
            json!({"$and": [
                {"city": {"$eq": "Минск"}},
                {"pharmacy_number": {"$eq": "5"}}
            ]})
        );

        let single = WhereFilter::any(vec![WhereFilter::eq("street", "Ленина")]).unwrap();
        assert_eq!(single.to_chroma(), json!({"street": {"$eq": "Ленина"}}));
    }

    #[test]
    fn test_matches_and_or() {
        let m = meta(&[("city", "Минск"), ("street", "Ленина")]);
        let strict = WhereFilter::And(vec![
            WhereFilter::eq("city", "Минск"),
            WhereFilter::eq("street", "Советская"),
        ]);
        let relaxed = WhereFilter::Or(vec![
            WhereFilter::eq("city", "Минск"),
            WhereFilter::eq("street", "Советская"),
        ]);
        assert!(!strict.matches(&m));
        assert!(relaxed.matches(&m));
    }

    #[test]
    fn test_missing_key_does_not_match() {
        let m = meta(&[("city", "Минск")]);
        assert!(!WhereFilter::eq("house_number", "").matches(&m));
    }
}
