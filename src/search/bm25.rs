/// Okapi BM25 over an in-memory chunk slice.
///
/// The index is rebuilt per request from the chunks in scope; a single user's papers
/// fit comfortably in memory. Document length is the raw character count of the chunk
/// text (not its token count), and `avg_doc_length` is averaged the same way, so the
/// length normalization is biased toward character count. Scores stay comparable with
/// previously recorded rankings only if that convention is kept.

use std::collections::{HashMap, HashSet};

use crate::models::{RetrievalResult, RetrievalSource, TextChunk};
use super::tokenize::tokenize;

/// Term-frequency saturation.
pub const K1: f64 = 1.5;
/// Length normalization strength.
pub const B: f64 = 0.75;

/// One indexed chunk with its term frequencies.
#[derive(Debug)]
pub struct IndexedDoc<'a> {
    pub chunk: &'a TextChunk,
    pub term_freqs: HashMap<String, u32>,
    /// Raw character length of the chunk text
    pub length: usize,
}

/// Term statistics over a chunk set.
#[derive(Debug)]
pub struct Bm25Index<'a> {
    pub docs: Vec<IndexedDoc<'a>>,
    /// term -> number of chunks containing it (each chunk counts once)
    pub doc_freq: HashMap<String, usize>,
    pub avg_doc_length: f64,
    pub total_docs: usize,
}

/// Build the BM25 index for a chunk set.
pub fn build_index(chunks: &[TextChunk]) -> Bm25Index<'_> {
    let mut doc_freq: HashMap<String, usize> = HashMap::new();
    let mut docs = Vec::with_capacity(chunks.len());
    let mut total_length = 0usize;

    for chunk in chunks {
        let terms = tokenize(&chunk.text);

        let mut term_freqs: HashMap<String, u32> = HashMap::new();
        for term in &terms {
            *term_freqs.entry(term.clone()).or_default() += 1;
        }

        let distinct: HashSet<&String> = terms.iter().collect();
        for term in distinct {
            *doc_freq.entry(term.clone()).or_default() += 1;
        }

        let length = chunk.text.chars().count();
        total_length += length;

        docs.push(IndexedDoc {
            chunk,
            term_freqs,
            length,
        });
    }

    let total_docs = docs.len();
    let avg_doc_length = if total_docs == 0 {
        0.0
    } else {
        total_length as f64 / total_docs as f64
    };

    Bm25Index {
        docs,
        doc_freq,
        avg_doc_length,
        total_docs,
    }
}

impl Bm25Index<'_> {
    /// Inverse document frequency, always positive thanks to the +1 inside the log.
    pub fn idf(&self, term: &str) -> f64 {
        let n = self.total_docs as f64;
        let df = self.doc_freq.get(term).copied().unwrap_or(0) as f64;
        ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
    }

    /// BM25 score of one indexed document against the query terms.
    ///
    /// Repeated query terms contribute once per occurrence.
    pub fn score(&self, doc: &IndexedDoc<'_>, query_terms: &[String]) -> f64 {
        // All-empty corpora have no terms to match; avoid 0/0 in the length ratio.
        let avg = if self.avg_doc_length > 0.0 { self.avg_doc_length } else { 1.0 };
        let length_ratio = doc.length as f64 / avg;

        query_terms
            .iter()
            .filter_map(|term| {
                let tf = *doc.term_freqs.get(term)? as f64;
                let tf_norm = (tf * (K1 + 1.0)) / (tf + K1 * (1.0 - B + B * length_ratio));
                Some(self.idf(term) * tf_norm)
            })
            .sum()
    }
}

/// Score every chunk against `query`, drop zero scores, and keep the best `top_k`.
///
/// Equal scores keep their original chunk order.
pub fn search(query: &str, index: &Bm25Index<'_>, top_k: usize) -> Vec<RetrievalResult> {
    let query_terms = tokenize(query);
    if query_terms.is_empty() || index.total_docs == 0 {
        return Vec::new();
    }

    let mut scored: Vec<(&IndexedDoc<'_>, f64)> = index
        .docs
        .iter()
        .map(|doc| (doc, index.score(doc, &query_terms)))
        .filter(|(_, score)| *score > 0.0)
        .collect();

    // sort_by is stable, so ties stay in chunk order
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(top_k);

    tracing::debug!(
        query_terms = query_terms.len(),
        hits = scored.len(),
        "BM25 search complete"
    );

    scored
        .into_iter()
        .map(|(doc, score)| RetrievalResult::new(doc.chunk.clone(), score, RetrievalSource::Bm25))
        .collect()
}

/// Section multipliers for scholarly text. Order matters: the first entry whose key
/// appears (case-insensitively) in the section name wins.
pub const ACADEMIC_SECTION_BOOSTS: &[(&str, f64)] = &[
    ("abstract", 1.5),
    ("introduction", 1.3),
    ("conclusion", 1.3),
    ("results", 1.2),
    ("discussion", 1.2),
    ("materials and methods", 1.0),
    ("methodology", 1.0),
    ("methods", 1.0),
    ("references", 0.5),
    ("acknowledgments", 0.3),
    ("acknowledgements", 0.3),
];

/// Look up the multiplier for a section name in `table`; 1.0 when nothing matches.
pub fn section_boost(section: Option<&str>, table: &[(&str, f64)]) -> f64 {
    let Some(section) = section else {
        return 1.0;
    };
    let section = section.to_lowercase();
    table
        .iter()
        .find(|(key, _)| section.contains(key))
        .map(|(_, boost)| *boost)
        .unwrap_or(1.0)
}

/// Multiply each score by its section boost, then restore descending score order.
///
/// Fusion consumes rank positions, so the boosted order is what counts downstream.
/// Equal boosted scores keep their previous relative order.
pub fn apply_academic_boosts(results: &mut [RetrievalResult]) {
    for result in results.iter_mut() {
        result.score *= section_boost(result.chunk.section.as_deref(), ACADEMIC_SECTION_BOOSTS);
    }
    results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: &str, text: &str, section: Option<&str>) -> TextChunk {
        TextChunk {
            id: id.to_string(),
            paper_id: "p1".to_string(),
            paper_title: "Paper".to_string(),
            authors: None,
            year: None,
            text: text.to_string(),
            section: section.map(str::to_string),
            page_number: None,
            chunk_index: 0,
            embedding: None,
        }
    }

    fn corpus() -> Vec<TextChunk> {
        vec![
            chunk("c1", "Transformers rely on self-attention to model long sequences.", None),
            chunk("c2", "Convolutional networks dominate image classification benchmarks.", None),
            chunk("c3", "Attention heads in transformers capture syntactic structure.", None),
            chunk("c4", "We thank the reviewers for their comments.", None),
        ]
    }

    #[test]
    fn test_doc_freq_counts_each_chunk_once() {
        let chunks = vec![
            chunk("a", "protein protein protein folding", None),
            chunk("b", "protein structure", None),
        ];
        let index = build_index(&chunks);
        assert_eq!(index.doc_freq.get("protein"), Some(&2));
        assert_eq!(index.doc_freq.get("fold"), Some(&1));
        assert_eq!(index.docs[0].term_freqs.get("protein"), Some(&3));
    }

    #[test]
    fn test_avg_doc_length_uses_characters() {
        let chunks = vec![chunk("a", "abcd", None), chunk("b", "abcdefgh", None)];
        let index = build_index(&chunks);
        assert_eq!(index.total_docs, 2);
        assert!((index.avg_doc_length - 6.0).abs() < 1e-12);
    }

    #[test]
    fn test_idf_formula() {
        let chunks = corpus();
        let index = build_index(&chunks);
        // "transformer" appears in 2 of 4 chunks
        let expected = ((4.0 - 2.0 + 0.5) / (2.0 + 0.5) + 1.0f64).ln();
        assert!((index.idf("transformer") - expected).abs() < 1e-12);
        // Unseen terms get the maximum idf
        let unseen = ((4.0 + 0.5) / 0.5 + 1.0f64).ln();
        assert!((index.idf("zebra") - unseen).abs() < 1e-12);
    }

    #[test]
    fn test_single_term_score_matches_formula() {
        let chunks = vec![chunk("a", "graph neural graph", None), chunk("b", "other words here", None)];
        let index = build_index(&chunks);
        let doc = &index.docs[0];
        let tf = 2.0;
        let ratio = doc.length as f64 / index.avg_doc_length;
        let tf_norm = (tf * (K1 + 1.0)) / (tf + K1 * (1.0 - B + B * ratio));
        let expected = index.idf("graph") * tf_norm;
        let got = index.score(doc, &["graph".to_string()]);
        assert!((got - expected).abs() < 1e-12);
    }

    #[test]
    fn test_search_excludes_zero_scores_and_ranks() {
        let chunks = corpus();
        let index = build_index(&chunks);
        let results = search("attention in transformers", &index, 10);
        let ids: Vec<&str> = results.iter().map(|r| r.chunk.id.as_str()).collect();
        assert_eq!(results.len(), 2);
        assert!(ids.contains(&"c1"));
        assert!(ids.contains(&"c3"));
        assert!(results.iter().all(|r| r.source == RetrievalSource::Bm25));
        assert!(results[0].score >= results[1].score);
    }

    #[test]
    fn test_full_text_query_ranks_its_chunk_first() {
        let chunks = corpus();
        let index = build_index(&chunks);
        for target in &chunks {
            let results = search(&target.text, &index, 10);
            assert_eq!(results[0].chunk.id, target.id, "query: {}", target.text);
        }
    }

    #[test]
    fn test_ties_keep_chunk_order() {
        let chunks = vec![
            chunk("first", "identical text body", None),
            chunk("second", "identical text body", None),
        ];
        let index = build_index(&chunks);
        let results = search("identical", &index, 10);
        assert_eq!(results[0].chunk.id, "first");
        assert_eq!(results[1].chunk.id, "second");
    }

    #[test]
    fn test_truncates_to_top_k() {
        let chunks = corpus();
        let index = build_index(&chunks);
        assert_eq!(search("attention in transformers", &index, 1).len(), 1);
    }

    #[test]
    fn test_empty_inputs() {
        let empty: Vec<TextChunk> = Vec::new();
        let index = build_index(&empty);
        assert!(search("anything", &index, 5).is_empty());

        let chunks = corpus();
        let index = build_index(&chunks);
        assert!(search("a an", &index, 5).is_empty());
    }

    #[test]
    fn test_section_boost_first_match_wins() {
        let table = ACADEMIC_SECTION_BOOSTS;
        assert_eq!(section_boost(Some("ABSTRACT"), table), 1.5);
        // Contains both "introduction" and "results": introduction comes first
        assert_eq!(section_boost(Some("Introduction and Results"), table), 1.3);
        // "results" precedes "discussion"
        assert_eq!(section_boost(Some("Results and Discussion"), table), 1.2);
        assert_eq!(section_boost(Some("Materials and Methods"), table), 1.0);
        assert_eq!(section_boost(Some("References"), table), 0.5);
        assert_eq!(section_boost(Some("Acknowledgements"), table), 0.3);
        assert_eq!(section_boost(Some("Appendix B"), table), 1.0);
        assert_eq!(section_boost(None, table), 1.0);
    }

    #[test]
    fn test_apply_academic_boosts() {
        let mut results = vec![
            RetrievalResult::new(chunk("a", "x", Some("Abstract")), 2.0, RetrievalSource::Bm25),
            RetrievalResult::new(chunk("b", "x", Some("References")), 2.0, RetrievalSource::Bm25),
            RetrievalResult::new(chunk("c", "x", None), 2.0, RetrievalSource::Bm25),
        ];
        apply_academic_boosts(&mut results);
        let ids: Vec<&str> = results.iter().map(|r| r.chunk.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c", "b"]);
        assert!((results[0].score - 3.0).abs() < 1e-12);
        assert!((results[1].score - 2.0).abs() < 1e-12);
        assert!((results[2].score - 1.0).abs() < 1e-12);
    }
}
