//! # kbase
//!
//! Retrieval-augmented question answering over uploaded documents.
//!
//! Documents are split into overlapping character windows, embedded, and
//! kept in a vector store. Questions are embedded the same way, matched by
//! cosine similarity, and the best chunks are assembled into a
//! citation-tagged context for a generation model.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌────────────────────┐   ┌──────────────┐
//! │ Uploads  │──▶│ Extract → Chunk →  │──▶│ VectorStore  │
//! │ CLI/HTTP │   │ Embed (timeout)    │   │ SQLite / mem │
//! └──────────┘   └────────────────────┘   └──────┬───────┘
//!                                                │ search
//!                ┌────────────────────┐          │
//!   question ───▶│ Retriever → Context│◀─────────┘
//!                │ Assembler → Answer │
//!                └────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! kb init
//! kb ingest ./docs
//! kb query "how do refunds work"
//! kb ask "how long do refunds take?"
//! kb serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`error`] | Typed pipeline errors |
//! | [`models`] | Core data types |
//! | [`extract`] | File-type detection and text extraction |
//! | [`chunk`] | Sliding-window chunker |
//! | [`embedding`] | Embedding gateways and vector utilities |
//! | [`generation`] | Answer generation gateways and prompt |
//! | [`store`] | Vector store trait, in-memory and SQLite backends |
//! | [`retrieval`] | Query validation, embedding, ranking |
//! | [`context`] | Context assembly under a character budget |
//! | [`ingest`] | Ingestion pipeline and per-document locks |
//! | [`knowledge`] | The [`KnowledgeBase`](knowledge::KnowledgeBase) facade |
//! | [`server`] | HTTP API |
//! | [`cli`] | `kb` command implementations |
//! | [`db`] | SQLite connection |
//! | [`migrate`] | Schema creation |

pub mod chunk;
pub mod cli;
pub mod config;
pub mod context;
pub mod db;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod generation;
pub mod ingest;
pub mod knowledge;
pub mod migrate;
pub mod models;
pub mod retrieval;
pub mod server;
pub mod store;

pub use error::{Error, Result};
