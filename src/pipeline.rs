//! Extractive question answering: retrieve, then read.
//!
//! 1. The [`Bm25Retriever`] narrows the corpus to `retriever_top_k` passages.
//! 2. The [`Reader`] extracts the best span from each passage.
//! 3. Spans are ranked by score (desc), ties by retrieval rank, and
//!    truncated to `reader_top_k`.

use std::sync::Arc;

use thiserror::Error;

use crate::config::RetrievalConfig;
use crate::models::Prediction;
use crate::reader::{Reader, ReaderError};
use crate::retriever::Bm25Retriever;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("query must not be empty")]
    EmptyQuery,
    #[error("{0} must be >= 1")]
    InvalidParam(&'static str),
    #[error(transparent)]
    Reader(#[from] ReaderError),
}

impl QueryError {
    pub fn is_client_error(&self) -> bool {
        matches!(self, QueryError::EmptyQuery | QueryError::InvalidParam(_))
    }
}

/// Breadth of the two pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryParams {
    pub retriever_top_k: usize,
    pub reader_top_k: usize,
}

impl Default for QueryParams {
    fn default() -> Self {
        Self {
            retriever_top_k: 5,
            reader_top_k: 1,
        }
    }
}

impl From<&RetrievalConfig> for QueryParams {
    fn from(config: &RetrievalConfig) -> Self {
        Self {
            retriever_top_k: config.retriever_top_k,
            reader_top_k: config.reader_top_k,
        }
    }
}

pub struct ExtractiveQaPipeline {
    retriever: Bm25Retriever,
    reader: Arc<dyn Reader>,
}

impl ExtractiveQaPipeline {
    pub fn new(retriever: Bm25Retriever, reader: Arc<dyn Reader>) -> Self {
        Self { retriever, reader }
    }

    pub async fn run(&self, query: &str, params: QueryParams) -> Result<Prediction, QueryError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(QueryError::EmptyQuery);
        }
        if params.retriever_top_k == 0 {
            return Err(QueryError::InvalidParam("retriever_top_k"));
        }
        if params.reader_top_k == 0 {
            return Err(QueryError::InvalidParam("reader_top_k"));
        }

        let candidates = self.retriever.retrieve(query, params.retriever_top_k);
        let mut answers = Vec::with_capacity(candidates.len());
        for candidate in &candidates {
            if let Some(answer) = self.reader.read(query, &candidate.passage).await? {
                answers.push(answer);
            }
        }

        // Stable sort: equal scores keep retrieval order.
        answers.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        answers.truncate(params.reader_top_k);

        tracing::info!(
            query,
            reader = self.reader.name(),
            passages = candidates.len(),
            answers = answers.len(),
            "answered query"
        );

        Ok(Prediction {
            query: query.to_string(),
            answers,
            passages_considered: candidates.len(),
        })
    }
}
