//! # Filedex
//!
//! An incremental semantic index over local filesystem trees.
//!
//! Filedex walks directories, extracts text from supported documents
//! (PDF, DOCX, plain text), embeds them through a local Ollama server,
//! and stores the results in a SQLite record table paired row-for-row
//! with a flat vector index. Queries run nearest-neighbor search over
//! the whole index or restricted to a path subtree, and long documents
//! can be reduced through bounded recursive summarization.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────────┐   ┌─────────────┐
//! │   Walk   │──▶│ Hash/Extract/ │──▶│ SQLite +    │
//! │ + ignore │   │    Embed      │   │ vector rows │
//! └──────────┘   └───────────────┘   └──────┬──────┘
//!                                           │
//!                          ┌────────────────┤
//!                          ▼                ▼
//!                     ┌─────────┐     ┌──────────┐
//!                     │   CLI   │     │   HTTP   │
//!                     │(filedex)│     │  (JSON)  │
//!                     └─────────┘     └──────────┘
//! ```
//!
//! The record table and the vector index are one logical store: a
//! record's id equals its vector's row, commits write both sides under
//! one lock, and removals tombstone the vector row so later ids never
//! shift.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`store`] | File records and ignore rules in SQLite |
//! | [`vector`] | Flat L2 vector index with snapshots |
//! | [`ignore`] | Ignore-rule evaluation with directory inheritance |
//! | [`change`] | Content-hash change detection |
//! | [`extract`] | Per-format text extraction |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`llm`] | Text generation and confidence ranking |
//! | [`summarize`] | Token chunking and recursive reduction |
//! | [`indexer`] | The walk/commit coordinator |
//! | [`search`] | Query-side search operations |
//! | [`server`] | JSON HTTP server |
//! | [`db`] | Database connection |

pub mod change;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod ignore;
pub mod indexer;
pub mod llm;
pub mod search;
pub mod server;
pub mod store;
pub mod summarize;
pub mod vector;
