//! In-memory document store and the indexing pipeline that feeds it.
//!
//! The [`DocumentStore`] keeps every passage together with the term
//! statistics BM25 needs (term frequencies, document frequencies, lengths).
//! The [`Indexer`] turns files on disk into passages and appends them.
//!
//! The store is append-only: ingesting the same file twice stores its
//! passages twice.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use thiserror::Error;
use walkdir::WalkDir;

use crate::chunk::split_passages;
use crate::extract::{self, ExtractError};
use crate::models::{DocumentKind, Passage};

/// Words too common to carry retrieval signal.
const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "did", "do", "does", "for", "from", "has",
    "have", "how", "in", "is", "it", "its", "of", "on", "or", "that", "the", "this", "to", "was",
    "were", "what", "when", "where", "which", "who", "whom", "why", "will", "with",
];

/// Lowercases `text` and splits it into alphanumeric terms, dropping stop words.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .filter(|t| !STOP_WORDS.contains(&t.as_str()))
        .collect()
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("unsupported file type: {0}")]
    Unsupported(PathBuf),
    #[error("failed to extract text from {name}: {source}")]
    Extract {
        name: String,
        #[source]
        source: ExtractError,
    },
}

/// A passage paired with its BM25 score for one query.
#[derive(Debug, Clone)]
pub struct ScoredPassage {
    pub passage: Passage,
    pub score: f64,
}

struct IndexedPassage {
    passage: Passage,
    term_freqs: HashMap<String, u32>,
    len: usize,
}

#[derive(Default)]
struct Inner {
    passages: Vec<IndexedPassage>,
    doc_freqs: HashMap<String, usize>,
    total_len: usize,
}

/// Thread-safe in-memory passage store with BM25 statistics.
#[derive(Default)]
pub struct DocumentStore {
    inner: RwLock<Inner>,
}

impl DocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends passages to the corpus.
    pub fn add_passages(&self, passages: Vec<Passage>) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        for passage in passages {
            let terms = tokenize(&passage.text);
            let mut term_freqs: HashMap<String, u32> = HashMap::new();
            for term in &terms {
                *term_freqs.entry(term.clone()).or_insert(0) += 1;
            }
            for term in term_freqs.keys() {
                *inner.doc_freqs.entry(term.clone()).or_insert(0) += 1;
            }
            inner.total_len += terms.len();
            inner.passages.push(IndexedPassage {
                passage,
                term_freqs,
                len: terms.len(),
            });
        }
    }

    /// Number of stored passages.
    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).passages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Distinct document names, in first-indexed order.
    pub fn documents(&self) -> Vec<String> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let mut seen = Vec::new();
        for p in &inner.passages {
            if !seen.contains(&p.passage.document) {
                seen.push(p.passage.document.clone());
            }
        }
        seen
    }

    /// Inverse document frequency of `term` (BM25 flavour, never negative).
    pub fn idf(&self, term: &str) -> f64 {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        idf(inner.passages.len(), inner.doc_freqs.get(term).copied().unwrap_or(0))
    }

    /// Scores every passage against `terms` with BM25 and returns the best
    /// `k`, highest score first. Passages with a zero score are omitted; ties
    /// keep insertion order.
    pub fn bm25_top_k(&self, terms: &[String], k: usize, k1: f64, b: f64) -> Vec<ScoredPassage> {
        if terms.is_empty() || k == 0 {
            return Vec::new();
        }
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let n = inner.passages.len();
        if n == 0 {
            return Vec::new();
        }
        let avg_len = (inner.total_len as f64 / n as f64).max(1.0);

        let term_idfs: Vec<(&str, f64)> = terms
            .iter()
            .map(|t| {
                let df = inner.doc_freqs.get(t.as_str()).copied().unwrap_or(0);
                (t.as_str(), idf(n, df))
            })
            .collect();

        let mut scored: Vec<ScoredPassage> = inner
            .passages
            .iter()
            .filter_map(|ip| {
                let dl = ip.len as f64;
                let score: f64 = term_idfs
                    .iter()
                    .map(|(term, idf)| {
                        let tf = ip.term_freqs.get(*term).copied().unwrap_or(0) as f64;
                        if tf == 0.0 {
                            return 0.0;
                        }
                        idf * (tf * (k1 + 1.0)) / (tf + k1 * (1.0 - b + b * dl / avg_len))
                    })
                    .sum();
                (score > 0.0).then(|| ScoredPassage {
                    passage: ip.passage.clone(),
                    score,
                })
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(k);
        scored
    }
}

fn idf(n: usize, df: usize) -> f64 {
    let n = n as f64;
    let df = df as f64;
    (1.0 + (n - df + 0.5) / (df + 0.5)).ln()
}

/// Counts from one ingestion run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub documents: usize,
    pub passages: usize,
}

impl std::ops::AddAssign for IngestStats {
    fn add_assign(&mut self, rhs: Self) {
        self.documents += rhs.documents;
        self.passages += rhs.passages;
    }
}

/// Converts files into passages and appends them to a [`DocumentStore`].
pub struct Indexer {
    store: std::sync::Arc<DocumentStore>,
    passage_tokens: usize,
}

impl Indexer {
    pub fn new(store: std::sync::Arc<DocumentStore>, passage_tokens: usize) -> Self {
        Self {
            store,
            passage_tokens,
        }
    }

    /// Ingests one or more files.
    ///
    /// All files are read and split before anything is stored, so a failure
    /// on any path leaves the store unchanged.
    pub fn ingest(&self, paths: &[PathBuf]) -> Result<IngestStats, IndexError> {
        let mut passages = Vec::new();
        let mut stats = IngestStats::default();
        for path in paths {
            let name = file_name(path);
            let kind = DocumentKind::from_name(&name)
                .ok_or_else(|| IndexError::Unsupported(path.clone()))?;
            let bytes = std::fs::read(path).map_err(|source| IndexError::Io {
                path: path.clone(),
                source,
            })?;
            let (docs, mut ps) = self.split(&name, kind, &bytes)?;
            stats.documents += docs;
            stats.passages += ps.len();
            passages.append(&mut ps);
        }
        self.store.add_passages(passages);
        tracing::debug!(
            documents = stats.documents,
            passages = stats.passages,
            "ingested files"
        );
        Ok(stats)
    }

    /// Ingests every supported file below `dir`.
    ///
    /// Files with other extensions are skipped, and files that fail to
    /// extract are logged and skipped rather than aborting the walk.
    pub fn ingest_dir(&self, dir: &Path) -> Result<IngestStats, IndexError> {
        let mut stats = IngestStats::default();
        for entry in WalkDir::new(dir).sort_by_file_name() {
            let entry = entry.map_err(|e| IndexError::Io {
                path: dir.to_path_buf(),
                source: e.into(),
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path().to_path_buf();
            if DocumentKind::from_name(&file_name(&path)).is_none() {
                tracing::debug!(path = %path.display(), "skipping unsupported file");
                continue;
            }
            match self.ingest(std::slice::from_ref(&path)) {
                Ok(s) => stats += s,
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping file"),
            }
        }
        Ok(stats)
    }

    fn split(
        &self,
        name: &str,
        kind: DocumentKind,
        bytes: &[u8],
    ) -> Result<(usize, Vec<Passage>), IndexError> {
        let extract_err = |source| IndexError::Extract {
            name: name.to_string(),
            source,
        };
        match kind {
            DocumentKind::Zip => {
                let entries = extract::extract_zip_entries(bytes).map_err(extract_err)?;
                let docs = entries.len();
                let passages = entries
                    .iter()
                    .flat_map(|(entry, text)| {
                        split_passages(&format!("{}/{}", name, entry), text, self.passage_tokens)
                    })
                    .collect();
                Ok((docs, passages))
            }
            DocumentKind::Pdf => {
                let text = extract::extract_pdf_text(bytes).map_err(extract_err)?;
                Ok((1, split_passages(name, &text, self.passage_tokens)))
            }
            DocumentKind::Text => {
                let text = extract::decode_text(name, bytes).map_err(extract_err)?;
                Ok((1, split_passages(name, &text, self.passage_tokens)))
            }
        }
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::fixtures::zip_with;
    use std::sync::Arc;

    fn passage(doc: &str, text: &str) -> Passage {
        split_passages(doc, text, 1000).remove(0)
    }

    #[test]
    fn tokenize_lowercases_and_drops_stop_words() {
        assert_eq!(
            tokenize("What is the Capital of France?"),
            vec!["capital", "france"]
        );
        assert!(tokenize("  ,.; ").is_empty());
    }

    #[test]
    fn bm25_prefers_matching_passages() {
        let store = DocumentStore::new();
        store.add_passages(vec![
            passage("a.txt", "Rust is a systems programming language."),
            passage("b.txt", "Python is popular for machine learning."),
            passage("c.txt", "Rust programs compile with cargo. Rust rust rust."),
        ]);
        let hits = store.bm25_top_k(&tokenize("rust cargo"), 5, 1.2, 0.75);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].passage.document, "c.txt");
        assert_eq!(hits[1].passage.document, "a.txt");
        assert!(hits[0].score > hits[1].score);
    }

    #[test]
    fn bm25_respects_k_and_skips_non_matches() {
        let store = DocumentStore::new();
        for i in 0..10 {
            store.add_passages(vec![passage(&format!("{i}.txt"), "shared term here")]);
        }
        store.add_passages(vec![passage("other.txt", "nothing relevant")]);
        let hits = store.bm25_top_k(&tokenize("shared"), 5, 1.2, 0.75);
        assert_eq!(hits.len(), 5);
        // Equal scores keep insertion order.
        let docs: Vec<_> = hits.iter().map(|h| h.passage.document.as_str()).collect();
        assert_eq!(docs, vec!["0.txt", "1.txt", "2.txt", "3.txt", "4.txt"]);
    }

    #[test]
    fn bm25_single_term_matches_formula() {
        let store = DocumentStore::new();
        store.add_passages(vec![passage("a.txt", "hello hello world")]);
        let hits = store.bm25_top_k(&["hello".to_string()], 1, 1.2, 0.75);
        let idf = (1.0f64 + (1.0 - 1.0 + 0.5) / (1.0 + 0.5)).ln();
        // Single document: dl == avgdl, so the length norm is 1.
        let expected = idf * (2.0 * 2.2) / (2.0 + 1.2);
        assert!((hits[0].score - expected).abs() < 1e-9);
    }

    #[test]
    fn empty_store_or_query_returns_nothing() {
        let store = DocumentStore::new();
        assert!(store.bm25_top_k(&tokenize("anything"), 5, 1.2, 0.75).is_empty());
        store.add_passages(vec![passage("a.txt", "text")]);
        assert!(store.bm25_top_k(&[], 5, 1.2, 0.75).is_empty());
        assert!(store.bm25_top_k(&tokenize("text"), 0, 1.2, 0.75).is_empty());
    }

    #[test]
    fn ingest_text_and_zip_files() {
        let tmp = tempfile::TempDir::new().unwrap();
        let txt = tmp.path().join("notes.txt");
        std::fs::write(&txt, "Winterfell is the seat of House Stark.").unwrap();
        let zip = tmp.path().join("bundle.zip");
        std::fs::write(
            &zip,
            zip_with(&[
                ("one.txt", b"first entry".as_slice()),
                ("two.txt", b"second entry".as_slice()),
            ]),
        )
        .unwrap();

        let store = Arc::new(DocumentStore::new());
        let indexer = Indexer::new(store.clone(), 200);
        let stats = indexer.ingest(&[txt, zip]).unwrap();
        assert_eq!(stats, IngestStats { documents: 3, passages: 3 });
        assert_eq!(
            store.documents(),
            vec!["notes.txt", "bundle.zip/one.txt", "bundle.zip/two.txt"]
        );
    }

    #[test]
    fn reingesting_duplicates_passages() {
        let tmp = tempfile::TempDir::new().unwrap();
        let txt = tmp.path().join("a.txt");
        std::fs::write(&txt, "duplicate me").unwrap();
        let store = Arc::new(DocumentStore::new());
        let indexer = Indexer::new(store.clone(), 200);
        indexer.ingest(std::slice::from_ref(&txt)).unwrap();
        indexer.ingest(std::slice::from_ref(&txt)).unwrap();
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn failed_batch_leaves_store_unchanged() {
        let tmp = tempfile::TempDir::new().unwrap();
        let good = tmp.path().join("good.txt");
        std::fs::write(&good, "good text").unwrap();
        let bad = tmp.path().join("bad.txt");
        std::fs::write(&bad, [0xffu8, 0xfe]).unwrap();

        let store = Arc::new(DocumentStore::new());
        let indexer = Indexer::new(store.clone(), 200);
        let err = indexer.ingest(&[good, bad]).unwrap_err();
        assert!(matches!(err, IndexError::Extract { .. }));
        assert!(store.is_empty());
    }

    #[test]
    fn unsupported_extension_is_rejected() {
        let store = Arc::new(DocumentStore::new());
        let indexer = Indexer::new(store, 200);
        let err = indexer.ingest(&[PathBuf::from("tool.exe")]).unwrap_err();
        assert!(matches!(err, IndexError::Unsupported(_)));
    }

    #[test]
    fn ingest_dir_skips_unsupported_and_broken_files() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("nested")).unwrap();
        std::fs::write(tmp.path().join("a.txt"), "alpha").unwrap();
        std::fs::write(tmp.path().join("nested/b.txt"), "beta").unwrap();
        std::fs::write(tmp.path().join("c.bin"), "ignored").unwrap();
        std::fs::write(tmp.path().join("d.txt"), [0xffu8]).unwrap();

        let store = Arc::new(DocumentStore::new());
        let indexer = Indexer::new(store.clone(), 200);
        let stats = indexer.ingest_dir(tmp.path()).unwrap();
        assert_eq!(stats.documents, 2);
        assert_eq!(store.len(), 2);
    }
}
