//! # docqa
//!
//! Ask questions about your own documents.
//!
//! docqa accepts plain-text, PDF, and ZIP uploads, keeps the originals in
//! an object store (S3 or compatible), indexes their text in memory, and
//! answers natural-language questions with an extractive retrieve-then-read
//! pipeline: BM25 picks candidate passages, a reader picks the answer span.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌──────────────┐
//! │  Upload  │──▶│ ObjectStore  │   │ DocumentStore │
//! │ handler  │──▶│  Indexer  ───┼──▶│  (BM25, mem)  │
//! └──────────┘   └──────────────┘   └──────┬───────┘
//!                                          │
//!                      ┌───────────────────┤
//!                      ▼                   ▼
//!                 ┌──────────┐       ┌──────────┐
//!                 │ Retriever│──────▶│  Reader  │
//!                 └──────────┘       └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! docqa serve                          # web UI on 127.0.0.1:8000
//! docqa ask "Who is the father of Arya Stark?"
//! docqa files list
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`extract`] | PDF / ZIP / text extraction |
//! | [`chunk`] | Passage splitting |
//! | [`index`] | In-memory document store and indexer |
//! | [`retriever`] | BM25 retriever |
//! | [`reader`] | Answer-span readers (lexical, HTTP) |
//! | [`pipeline`] | Retrieve-then-read query pipeline |
//! | [`storage`] | Object store gateway (S3, filesystem, memory) |
//! | [`upload`] | Upload validation and processing |
//! | [`session`] | Per-browser preview state |
//! | [`server`] | HTTP front end |

pub mod chunk;
pub mod config;
pub mod extract;
pub mod index;
pub mod models;
pub mod pipeline;
pub mod reader;
pub mod retriever;
pub mod server;
pub mod session;
pub mod storage;
pub mod upload;
