//! Readers: extract an answer span from a passage, given a question.
//!
//! - **[`LexicalReader`]**: offline; picks the sentence that covers the most
//!   IDF-weighted question terms.
//! - **[`HttpReader`]**: calls an extractive question-answering inference
//!   endpoint (the Hugging Face `question-answering` task shape) with retry
//!   and backoff.
//!
//! Use [`create_reader`] to build the one named in the configuration.
//!
//! # Retry Strategy
//!
//! The HTTP reader retries transient failures with exponential backoff:
//! - HTTP 429 and 5xx → retry
//! - other 4xx → fail immediately
//! - network errors → retry
//! - backoff: 1s, 2s, 4s, … (capped at 2^5)

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use crate::config::ReaderConfig;
use crate::index::{tokenize, DocumentStore};
use crate::models::{Answer, Offsets, Passage};

/// Environment variable holding an optional bearer token for the HTTP reader.
pub const READER_TOKEN_ENV: &str = "DOCQA_READER_TOKEN";

#[derive(Debug, Error)]
pub enum ReaderError {
    #[error("reader request failed: {0}")]
    Http(String),
    #[error("reader API error {status}: {body}")]
    Api { status: u16, body: String },
    #[error("invalid reader response: {0}")]
    InvalidResponse(String),
}

/// Extracts at most one answer span from a single passage.
#[async_trait]
pub trait Reader: Send + Sync {
    /// Identifier shown in logs (e.g. `"lexical"` or the model name).
    fn name(&self) -> &str;

    /// Returns the best span in `passage`, or `None` if nothing answers
    /// the question.
    async fn read(&self, question: &str, passage: &Passage) -> Result<Option<Answer>, ReaderError>;
}

/// Builds the reader selected by `config.provider`.
pub fn create_reader(config: &ReaderConfig, store: Arc<DocumentStore>) -> anyhow::Result<Arc<dyn Reader>> {
    match config.provider.as_str() {
        "lexical" => Ok(Arc::new(LexicalReader::new(store))),
        "http" => Ok(Arc::new(HttpReader::new(config)?)),
        other => bail!("Unknown reader provider: {}", other),
    }
}

// ============ Lexical Reader ============

/// Sentence-level extractive reader driven by term statistics.
///
/// Each sentence is scored by the share of the question's IDF mass it
/// contains, which yields a confidence in `[0, 1]`.
pub struct LexicalReader {
    store: Arc<DocumentStore>,
}

impl LexicalReader {
    pub fn new(store: Arc<DocumentStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Reader for LexicalReader {
    fn name(&self) -> &str {
        "lexical"
    }

    async fn read(&self, question: &str, passage: &Passage) -> Result<Option<Answer>, ReaderError> {
        let terms: BTreeSet<String> = tokenize(question).into_iter().collect();
        if terms.is_empty() {
            return Ok(None);
        }
        let weights: Vec<(String, f64)> = terms
            .into_iter()
            .map(|t| {
                let w = self.store.idf(&t).max(f64::EPSILON);
                (t, w)
            })
            .collect();
        let total: f64 = weights.iter().map(|(_, w)| w).sum();

        let mut best: Option<(f64, usize, usize)> = None;
        for (start, end) in sentence_spans(&passage.text) {
            let sentence_terms: BTreeSet<String> =
                tokenize(&passage.text[start..end]).into_iter().collect();
            let covered: f64 = weights
                .iter()
                .filter(|(t, _)| sentence_terms.contains(t))
                .map(|(_, w)| w)
                .sum();
            let score = covered / total;
            if score > 0.0 && best.map_or(true, |(s, _, _)| score > s) {
                best = Some((score, start, end));
            }
        }

        Ok(best.map(|(score, start, end)| Answer {
            answer: passage.text[start..end].to_string(),
            score,
            context: passage.text.clone(),
            document: passage.document.clone(),
            passage_id: passage.id.clone(),
            offsets_in_context: Offsets { start, end },
        }))
    }
}

/// Byte ranges of the trimmed sentences in `text`.
///
/// Sentences end at `.`, `!`, `?` followed by whitespace, or at a newline.
fn sentence_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        let boundary = match c {
            '\n' => Some(i),
            '.' | '!' | '?' => match chars.peek() {
                Some((_, next)) if next.is_whitespace() => Some(i + c.len_utf8()),
                None => Some(i + c.len_utf8()),
                _ => None,
            },
            _ => None,
        };
        if let Some(end) = boundary {
            push_trimmed(&mut spans, text, start, end);
            start = end;
        }
    }
    push_trimmed(&mut spans, text, start, text.len());
    spans
}

fn push_trimmed(spans: &mut Vec<(usize, usize)>, text: &str, start: usize, end: usize) {
    let slice = &text[start..end];
    let lead = slice.len() - slice.trim_start().len();
    let trimmed = slice.trim();
    if !trimmed.is_empty() {
        spans.push((start + lead, start + lead + trimmed.len()));
    }
}

// ============ HTTP Reader ============

/// Reader backed by an external extractive-QA model server.
///
/// Sends `{"inputs": {"question": …, "context": …}}` and accepts either a
/// single `{answer, score, start, end}` object or a list of them. Character
/// offsets in the response are converted to byte offsets.
pub struct HttpReader {
    url: String,
    model: String,
    token: Option<String>,
    max_retries: u32,
    client: reqwest::Client,
}

impl HttpReader {
    pub fn new(config: &ReaderConfig) -> anyhow::Result<Self> {
        let url = config
            .url
            .clone()
            .ok_or_else(|| anyhow::anyhow!("reader.url required for http reader"))?;
        let model = config.model.clone().unwrap_or_else(|| url.clone());
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            url,
            model,
            token: std::env::var(READER_TOKEN_ENV).ok(),
            max_retries: config.max_retries,
            client,
        })
    }
}

#[derive(Debug, Deserialize)]
struct QaSpan {
    answer: String,
    score: f64,
    start: usize,
    end: usize,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum QaResponse {
    One(QaSpan),
    Many(Vec<QaSpan>),
}

#[async_trait]
impl Reader for HttpReader {
    fn name(&self) -> &str {
        &self.model
    }

    async fn read(&self, question: &str, passage: &Passage) -> Result<Option<Answer>, ReaderError> {
        let body = serde_json::json!({
            "inputs": { "question": question, "context": passage.text },
        });

        let mut last_err = None;
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let mut req = self.client.post(&self.url).json(&body);
            if let Some(ref token) = self.token {
                req = req.bearer_auth(token);
            }

            match req.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let parsed: QaResponse = response
                            .json()
                            .await
                            .map_err(|e| ReaderError::InvalidResponse(e.to_string()))?;
                        return Ok(to_answer(parsed, passage));
                    }
                    let body_text = response.text().await.unwrap_or_default();
                    let err = ReaderError::Api {
                        status: status.as_u16(),
                        body: body_text.chars().take(500).collect(),
                    };
                    if status.as_u16() == 429 || status.is_server_error() {
                        tracing::warn!(attempt, error = %err, "reader request failed, retrying");
                        last_err = Some(err);
                        continue;
                    }
                    return Err(err);
                }
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "reader request failed, retrying");
                    last_err = Some(ReaderError::Http(e.to_string()));
                }
            }
        }

        Err(last_err.unwrap_or_else(|| ReaderError::Http("reader failed after retries".to_string())))
    }
}

fn to_answer(response: QaResponse, passage: &Passage) -> Option<Answer> {
    let best = match response {
        QaResponse::One(span) => Some(span),
        QaResponse::Many(spans) => spans
            .into_iter()
            .max_by(|a, b| a.score.partial_cmp(&b.score).unwrap_or(std::cmp::Ordering::Equal)),
    }?;
    if best.answer.trim().is_empty() {
        return None;
    }
    let start = char_to_byte(&passage.text, best.start);
    let end = char_to_byte(&passage.text, best.end).max(start);
    Some(Answer {
        answer: best.answer,
        score: best.score.clamp(0.0, 1.0),
        context: passage.text.clone(),
        document: passage.document.clone(),
        passage_id: passage.id.clone(),
        offsets_in_context: Offsets { start, end },
    })
}

fn char_to_byte(text: &str, char_idx: usize) -> usize {
    text.char_indices()
        .nth(char_idx)
        .map(|(i, _)| i)
        .unwrap_or(text.len())
}
