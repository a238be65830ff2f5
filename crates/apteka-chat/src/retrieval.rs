//! Retrieval cascade: strict filter, relaxed fallback, fuzzy post-filter.
//!
//! 1. Query with an AND of equality clauses on every known attribute.
//! 2. If nothing comes back, repeat with an OR of the same clauses.
//! 3. Keep only candidates whose metadata is within a per-field edit
//!    distance of every known attribute.
//!
//! Exactly one survivor resolves the topic.

use std::sync::Arc;

use apteka_core::config::{IndexConfig, RetrievalConfig};
use apteka_core::types::{CandidateRecord, SlotField, SlotSet};
use apteka_vector::{IndexQuery, SemanticIndex, WhereFilter};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::error::ChatError;

/// Summary line sent when retrieval found nothing.
pub const NOT_FOUND_SUMMARY: &str = "Информация по запросу не найдена в базе данных.";

// =============================================================================
// Configuration
// =============================================================================

/// Maximum edit distance accepted per field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldTolerances {
    pub name: usize,
    pub number: usize,
    pub city: usize,
    pub street: usize,
    pub house_number: usize,
}

impl FieldTolerances {
    pub fn get(&self, field: SlotField) -> usize {
        match field {
            SlotField::Name => self.name,
            SlotField::Number => self.number,
            SlotField::City => self.city,
            SlotField::Street => self.street,
            SlotField::HouseNumber => self.house_number,
        }
    }
}

impl Default for FieldTolerances {
    fn default() -> Self {
        Self::from(&RetrievalConfig::default())
    }
}

impl From<&RetrievalConfig> for FieldTolerances {
    fn from(config: &RetrievalConfig) -> Self {
        Self {
            name: config.name_tolerance,
            number: config.number_tolerance,
            city: config.city_tolerance,
            street: config.street_tolerance,
            house_number: config.house_number_tolerance,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CascadeConfig {
    /// Candidates requested per index query.
    pub top_n: usize,
    /// Maximum candidates summarized downstream.
    pub summary_cap: usize,
    pub tolerances: FieldTolerances,
}

impl CascadeConfig {
    pub fn from_config(index: &IndexConfig, retrieval: &RetrievalConfig) -> Self {
        Self {
            top_n: index.top_n,
            summary_cap: retrieval.summary_cap,
            tolerances: FieldTolerances::from(retrieval),
        }
    }
}

impl Default for CascadeConfig {
    fn default() -> Self {
        Self::from_config(&IndexConfig::default(), &RetrievalConfig::default())
    }
}

// =============================================================================
// Outcome
// =============================================================================

/// Which query produced the candidate set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Strict,
    Fallback,
    Unfiltered,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Resolved(CandidateRecord),
    NotFound,
    /// At most `summary_cap` of the survivors, best first.
    Ambiguous {
        candidates: Vec<CandidateRecord>,
        total: usize,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalOutcome {
    pub stage: Stage,
    pub resolution: Resolution,
}

impl RetrievalOutcome {
    pub fn is_resolved(&self) -> bool {
        matches!(self.resolution, Resolution::Resolved(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.resolution, Resolution::NotFound)
    }

    /// Survivors of the fuzzy filter, before the summary cap.
    pub fn total_matches(&self) -> usize {
        match &self.resolution {
            Resolution::Resolved(_) => 1,
            Resolution::NotFound => 0,
            Resolution::Ambiguous { total, .. } => *total,
        }
    }

    /// Candidates handed to the language service.
    pub fn summarized(&self) -> &[CandidateRecord] {
        match &self.resolution {
            Resolution::Resolved(c) => std::slice::from_ref(c),
            Resolution::NotFound => &[],
            Resolution::Ambiguous { candidates, .. } => candidates,
        }
    }

    /// Numbered plain-text summary of the candidates.
    pub fn summary_text(&self) -> String {
        let candidates = self.summarized();
        if candidates.is_empty() {
            return NOT_FOUND_SUMMARY.to_string();
        }
        let mut out = String::from("Найденная информация:\n");
        for (i, c) in candidates.iter().enumerate() {
            out.push_str(&format!("{}. {}\n", i + 1, c.document));
        }
        out
    }

    /// Function response payload for the second language-service call.
    pub fn tool_response(&self) -> Value {
        let status = match &self.resolution {
            Resolution::Resolved(_) => "resolved",
            Resolution::NotFound => "not_found",
            Resolution::Ambiguous { .. } => "ambiguous",
        };
        json!({
            "status": status,
            "total_matches": self.total_matches(),
            "search_results_summary": self.summary_text(),
        })
    }
}

// =============================================================================
// Query construction
// =============================================================================

/// Free-text query: city, street, house number, name, then labelled number.
/// Falls back to the transcription when no attribute is known.
pub fn build_query_text(slots: &SlotSet, transcription: &str) -> String {
    let mut parts: Vec<String> = [SlotField::City, SlotField::Street, SlotField::HouseNumber, SlotField::Name]
        .into_iter()
        .filter(|f| slots.has(*f))
        .map(|f| slots.get(f).to_string())
        .collect();
    if slots.has(SlotField::Number) {
        parts.push(format!("номер {}", slots.number));
    }

    if parts.is_empty() {
        transcription.trim().to_string()
    } else {
        parts.join(" ")
    }
}

fn clauses(slots: &SlotSet) -> Vec<WhereFilter> {
    slots
        .filled()
        .map(|(f, v)| WhereFilter::eq(f.key(), v))
        .collect()
}

/// Equality on every known attribute.
pub fn strict_filter(slots: &SlotSet) -> Option<WhereFilter> {
    WhereFilter::all(clauses(slots))
}

/// Equality on any known attribute.
pub fn fallback_filter(slots: &SlotSet) -> Option<WhereFilter> {
    WhereFilter::any(clauses(slots))
}

// =============================================================================
// Fuzzy matching
// =============================================================================

/// Lower-case and keep letters and digits only.
pub fn normalize(value: &str) -> String {
    value
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Levenshtein distance after [`normalize`].
pub fn normalized_distance(a: &str, b: &str) -> usize {
    strsim::levenshtein(&normalize(a), &normalize(b))
}

/// True when every known attribute is within tolerance of the candidate.
pub fn fuzzy_accepts(slots: &SlotSet, candidate: &CandidateRecord, tolerances: &FieldTolerances) -> bool {
    slots
        .filled()
        .all(|(field, value)| normalized_distance(value, candidate.field(field)) <= tolerances.get(field))
}

// =============================================================================
// Cascade
// =============================================================================

pub struct RetrievalCascade {
    index: Arc<dyn SemanticIndex>,
    config: CascadeConfig,
}

impl RetrievalCascade {
    pub fn new(index: Arc<dyn SemanticIndex>, config: CascadeConfig) -> Self {
        Self { index, config }
    }

    pub fn config(&self) -> &CascadeConfig {
        &self.config
    }

    async fn query(
        &self,
        text: &str,
        filter: Option<WhereFilter>,
    ) -> Result<Vec<CandidateRecord>, ChatError> {
        let query = IndexQuery {
            query_text: text.to_string(),
            n_results: self.config.top_n,
            filter,
        };
        self.index
            .query(&query)
            .await
            .map(|r| r.into_candidates())
            .map_err(|e| {
                warn!(error = %e, "Semantic index query failed");
                ChatError::Index(e.to_string())
            })
    }

    /// Run all stages for the given attributes.
    pub async fn run(
        &self,
        slots: &SlotSet,
        transcription: &str,
    ) -> Result<RetrievalOutcome, ChatError> {
        let text = build_query_text(slots, transcription);

        let (stage, candidates) = match strict_filter(slots) {
            None => (Stage::Unfiltered, self.query(&text, None).await?),
            Some(strict) => {
                let found = self.query(&text, Some(strict)).await?;
                if !found.is_empty() || slots.filled_count() < 2 {
                    (Stage::Strict, found)
                } else {
                    debug!(stage = "fallback", "Strict filter empty, relaxing to any attribute");
                    (Stage::Fallback, self.query(&text, fallback_filter(slots)).await?)
                }
            }
        };

        let retrieved = candidates.len();
        let mut survivors: Vec<CandidateRecord> = candidates
            .into_iter()
            .filter(|c| fuzzy_accepts(slots, c, &self.config.tolerances))
            .collect();

        let resolution = match survivors.len() {
            0 => Resolution::NotFound,
            1 => Resolution::Resolved(survivors.remove(0)),
            total => {
                survivors.truncate(self.config.summary_cap);
                Resolution::Ambiguous {
                    candidates: survivors,
                    total,
                }
            }
        };

        let outcome = RetrievalOutcome { stage, resolution };
        info!(
            stage = ?outcome.stage,
            retrieved,
            matches = outcome.total_matches(),
            "Retrieval cascade complete"
        );

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apteka_core::error::AptekaError;
    use apteka_vector::{IndexDocument, InMemoryIndex, MockEmbedding, QueryResult};
    use async_trait::async_trait;
    use std::sync::Mutex;

    fn pharmacy(id: &str, name: &str, number: &str, city: &str, street: &str, house: &str) -> IndexDocument {
        let metadata = [
            ("pharmacy_name", name),
            ("pharmacy_number", number),
            ("city", city),
            ("street", street),
            ("house_number", house),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        IndexDocument {
            id: id.to_string(),
            document: format!("Аптека {} №{}, {}, ул. {} {}", name, number, city, street, house),
            metadata,
        }
    }

    async fn index() -> InMemoryIndex<MockEmbedding> {
        let index = InMemoryIndex::new(MockEmbedding::new());
        index
            .add(vec![
                pharmacy("1", "Адель", "5", "Минск", "Ленина", "10"),
                pharmacy("2", "Белфармация", "12", "Минск", "Советская", "3"),
                pharmacy("3", "Планета Здоровья", "7", "Минск", "Притыцкого", "29"),
                pharmacy("4", "Адель", "5", "Гомель", "Мира", "1"),
            ])
            .await
            .unwrap();
        index
    }

    /// Records every query and delegates to an inner index.
    struct Recording<I> {
        inner: I,
        queries: Mutex<Vec<IndexQuery>>,
    }

    #[async_trait]
    impl<I: SemanticIndex> SemanticIndex for Recording<I> {
        async fn query(&self, query: &IndexQuery) -> Result<QueryResult, AptekaError> {
            self.queries.lock().unwrap().push(query.clone());
            self.inner.query(query).await
        }

        async fn add(&self, documents: Vec<IndexDocument>) -> Result<(), AptekaError> {
            self.inner.add(documents).await
        }
    }

    struct FailingIndex;

    #[async_trait]
    impl SemanticIndex for FailingIndex {
        async fn query(&self, _query: &IndexQuery) -> Result<QueryResult, AptekaError> {
            Err(AptekaError::Index("connection refused".to_string()))
        }

        async fn add(&self, _documents: Vec<IndexDocument>) -> Result<(), AptekaError> {
            Ok(())
        }
    }

    fn slots(pairs: &[(SlotField, &str)]) -> SlotSet {
        pairs.iter().fold(SlotSet::default(), |s, (f, v)| s.with(*f, *v))
    }

    // ---- Query construction ----

    #[test]
    fn test_query_text_order() {
        let s = slots(&[
            (SlotField::Number, "5"),
            (SlotField::Name, "Адель"),
            (SlotField::HouseNumber, "10"),
            (SlotField::Street, "Ленина"),
            (SlotField::City, "Минск"),
        ]);
        assert_eq!(build_query_text(&s, "ignored"), "Минск Ленина 10 Адель номер 5");
    }

    #[test]
    fn test_query_text_falls_back_to_transcription() {
        assert_eq!(
            build_query_text(&SlotSet::default(), " где купить аспирин "),
            "где купить аспирин"
        );
    }

    #[test]
    fn test_filters_use_metadata_keys() {
        let s = slots(&[(SlotField::City, "Минск"), (SlotField::Number, "5")]);
        assert_eq!(
            strict_filter(&s),
            Some(WhereFilter::And(vec![
                WhereFilter::eq("pharmacy_number", "5"),
                WhereFilter::eq("city", "Минск"),
            ]))
        );
        assert!(matches!(fallback_filter(&s), Some(WhereFilter::Or(ref c)) if c.len() == 2));
        assert_eq!(strict_filter(&SlotSet::default()), None);
    }

    // ---- Fuzzy matching ----

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("  Планета-Здоровья! "), "планетаздоровья");
        assert_eq!(normalize("23А"), "23а");
        assert_eq!(normalize(""), "");
    }

    #[test]
    fn test_equal_normalized_means_zero_distance() {
        let pairs = [("ул. Ленина", "Ул Ленина"), ("Адель", "АДЕЛЬ"), ("№ 5", "5")];
        for (a, b) in pairs {
            assert_eq!(normalize(a), normalize(b));
            assert_eq!(normalized_distance(a, b), 0);
        }
    }

    #[test]
    fn test_fuzzy_tolerances_per_field() {
        let tol = FieldTolerances::default();
        let c = CandidateRecord::new("doc")
            .with_field("pharmacy_name", "Планета Здоровья")
            .with_field("city", "Минск")
            .with_field("pharmacy_number", "12");

        // Name within 4 edits.
        assert!(fuzzy_accepts(&slots(&[(SlotField::Name, "Планета Здоровье")]), &c, &tol));
        // City off by 3 exceeds 2.
        assert!(!fuzzy_accepts(&slots(&[(SlotField::City, "Минскайя")]), &c, &tol));
        // Number off by one edit passes, two fails.
        assert!(fuzzy_accepts(&slots(&[(SlotField::Number, "13")]), &c, &tol));
        assert!(!fuzzy_accepts(&slots(&[(SlotField::Number, "45")]), &c, &tol));
        // Missing metadata compares against empty.
        assert!(!fuzzy_accepts(&slots(&[(SlotField::Street, "Ленина")]), &c, &tol));
        // No attributes: everything passes.
        assert!(fuzzy_accepts(&SlotSet::default(), &c, &tol));
    }

    // ---- Cascade ----

    #[tokio::test]
    async fn test_single_match_resolves_on_strict() {
        let cascade = RetrievalCascade::new(Arc::new(index().await), CascadeConfig::default());
        let outcome = cascade
            .run(&slots(&[(SlotField::City, "Минск"), (SlotField::Number, "5")]), "")
            .await
            .unwrap();
        assert_eq!(outcome.stage, Stage::Strict);
        match &outcome.resolution {
            Resolution::Resolved(c) => assert_eq!(c.field(SlotField::Street), "Ленина"),
            other => panic!("unexpected: {other:?}"),
        }
        assert!(outcome.summary_text().contains("Ленина"));
    }

    #[tokio::test]
    async fn test_several_matches_are_ambiguous() {
        let cascade = RetrievalCascade::new(Arc::new(index().await), CascadeConfig::default());
        let outcome = cascade
            .run(&slots(&[(SlotField::City, "Минск")]), "")
            .await
            .unwrap();
        match &outcome.resolution {
            Resolution::Ambiguous { candidates, total } => {
                assert_eq!(*total, 3);
                assert_eq!(candidates.len(), 3);
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(outcome.tool_response()["status"], "ambiguous");
    }

    #[tokio::test]
    async fn test_fallback_used_when_strict_empty() {
        let recording = Arc::new(Recording {
            inner: index().await,
            queries: Mutex::new(Vec::new()),
        });
        let cascade = RetrievalCascade::new(recording.clone(), CascadeConfig::default());

        // Typo in the street: strict AND misses, OR on city finds Минск rows,
        // fuzzy keeps only the Ленина one.
        let outcome = cascade
            .run(&slots(&[(SlotField::City, "Минск"), (SlotField::Street, "Ленена")]), "")
            .await
            .unwrap();

        assert_eq!(outcome.stage, Stage::Fallback);
        assert!(outcome.is_resolved());

        let queries = recording.queries.lock().unwrap();
        assert_eq!(queries.len(), 2);
        assert!(matches!(queries[0].filter, Some(WhereFilter::And(_))));
        assert!(matches!(queries[1].filter, Some(WhereFilter::Or(_))));
        assert_eq!(queries[0].query_text, queries[1].query_text);
        assert_eq!(queries[0].n_results, 10);
    }

    #[tokio::test]
    async fn test_single_attribute_skips_redundant_fallback() {
        let recording = Arc::new(Recording {
            inner: index().await,
            queries: Mutex::new(Vec::new()),
        });
        let cascade = RetrievalCascade::new(recording.clone(), CascadeConfig::default());
        let outcome = cascade
            .run(&slots(&[(SlotField::City, "Брест")]), "")
            .await
            .unwrap();
        assert!(outcome.is_not_found());
        assert_eq!(outcome.summary_text(), NOT_FOUND_SUMMARY);
        assert_eq!(recording.queries.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_no_attributes_queries_unfiltered() {
        let cascade = RetrievalCascade::new(Arc::new(index().await), CascadeConfig::default());
        let outcome = cascade.run(&SlotSet::default(), "аптека").await.unwrap();
        assert_eq!(outcome.stage, Stage::Unfiltered);
        assert!(matches!(outcome.resolution, Resolution::Ambiguous { total: 4, .. }));
    }

    #[tokio::test]
    async fn test_summary_capped() {
        let index = InMemoryIndex::new(MockEmbedding::new());
        let docs = (0..9)
            .map(|i| pharmacy(&i.to_string(), "Адель", &i.to_string(), "Минск", "Ленина", "1"))
            .collect();
        index.add(docs).await.unwrap();

        let cascade = RetrievalCascade::new(Arc::new(index), CascadeConfig::default());
        let outcome = cascade
            .run(&slots(&[(SlotField::Name, "Адель")]), "")
            .await
            .unwrap();

        match &outcome.resolution {
            Resolution::Ambiguous { candidates, total } => {
                assert_eq!(*total, 9);
                assert_eq!(candidates.len(), 5);
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(outcome.summary_text().lines().count(), 6);
        assert_eq!(outcome.tool_response()["total_matches"], 9);
    }

    #[tokio::test]
    async fn test_index_failure_surfaces() {
        let cascade = RetrievalCascade::new(Arc::new(FailingIndex), CascadeConfig::default());
        let err = cascade
            .run(&slots(&[(SlotField::City, "Минск")]), "")
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Index(ref m) if m.contains("connection refused")));
    }
}
