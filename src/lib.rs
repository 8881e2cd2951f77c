//! # rag-agent
//!
//! A local retrieval-augmented agent. Documents in a folder are split into
//! chunks, embedded through an Ollama-compatible endpoint and kept in a
//! flat similarity index. Questions are answered by a chat model that sees
//! the closest chunks plus recent conversation history, and that may ask
//! for Lua code to be run when it needs to compute something.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────────┐   ┌──────────────────┐
//! │ docs_input │──▶│ extract+chunk│──▶│ SimilarityIndex  │
//! │ docx/pdf/md│   │   + embed    │   │ knowledge_db.json│
//! └────────────┘   └──────────────┘   └────────┬─────────┘
//!                                              │ top-k
//!             ┌───────────────┐        ┌───────▼────────┐       ┌─────────────┐
//!  question ─▶│ CLI / HTTP API│───────▶│   Agent loop   │◀─────▶│ Chat model  │
//!             └───────────────┘        └───┬────────┬───┘       └─────────────┘
//!                                          │        │
//!                                  ┌───────▼──┐  ┌──▼──────────────────┐
//!                                  │ Lua exec │  │ ConversationHistory │
//!                                  └──────────┘  │ chat_history.json   │
//!                                                └─────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! ragent sync                              # index ./docs_input
//! ragent ask "what does the contract say about renewal?"
//! ragent ask "how many days until 2027-01-01?" --steps
//! ragent serve                             # HTTP API on 127.0.0.1:12345
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`chunk`] | Fixed-size text chunking |
//! | [`inference`] | HTTP transport with retry for the inference service |
//! | [`embedding`] | Embedding client and cosine similarity |
//! | [`completion`] | Chat completion client |
//! | [`snapshot`] | Whole-file JSON persistence |
//! | [`index`] | Similarity index |
//! | [`history`] | Conversation history with retention |
//! | [`executor`] | Lua code executor |
//! | [`agent`] | Retrieve / generate / execute loop |
//! | [`extract`] | Text extraction for DOCX, PDF and plain text |
//! | [`ingest`] | Document sync into the index |
//! | [`app`] | Application context wiring |
//! | [`server`] | HTTP API |

pub mod agent;
pub mod app;
pub mod chunk;
pub mod completion;
pub mod config;
pub mod embedding;
pub mod executor;
pub mod extract;
pub mod history;
pub mod index;
pub mod inference;
pub mod ingest;
mod lua_runtime;
pub mod models;
pub mod server;
pub mod snapshot;
