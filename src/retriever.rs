//! Lexical retriever: narrows the corpus to the top-K passages for a query.

use std::sync::Arc;

use crate::config::RetrievalConfig;
use crate::index::{tokenize, DocumentStore, ScoredPassage};

/// BM25 retriever over a shared [`DocumentStore`].
pub struct Bm25Retriever {
    store: Arc<DocumentStore>,
    k1: f64,
    b: f64,
}

impl Bm25Retriever {
    pub fn new(store: Arc<DocumentStore>, k1: f64, b: f64) -> Self {
        Self { store, k1, b }
    }

    pub fn from_config(store: Arc<DocumentStore>, config: &RetrievalConfig) -> Self {
        Self::new(store, config.bm25_k1, config.bm25_b)
    }

    /// Returns at most `top_k` passages, best first.
    pub fn retrieve(&self, query: &str, top_k: usize) -> Vec<ScoredPassage> {
        let terms = tokenize(query);
        let hits = self.store.bm25_top_k(&terms, top_k, self.k1, self.b);
        tracing::debug!(query, terms = terms.len(), hits = hits.len(), "retrieved passages");
        hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::split_passages;

    #[test]
    fn retrieve_caps_at_top_k() {
        let store = Arc::new(DocumentStore::new());
        for i in 0..8 {
            store.add_passages(split_passages(
                &format!("{i}.txt"),
                &format!("House Stark document number {i}"),
                200,
            ));
        }
        let retriever = Bm25Retriever::from_config(store, &RetrievalConfig::default());
        assert_eq!(retriever.retrieve("stark", 5).len(), 5);
        assert_eq!(retriever.retrieve("stark", 20).len(), 8);
        assert!(retriever.retrieve("lannister", 5).is_empty());
    }
}
