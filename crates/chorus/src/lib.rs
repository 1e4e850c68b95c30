//! Chorus: fan one task out to several LLM backends.
//!
//! The run itself (admission, dispatch, aggregation, synthesis) lives in
//! the `coordination` crate. This crate supplies its collaborators:
//!
//! - [`providers`]: HTTP callers for OpenAI, Anthropic, Gemini and
//!   OpenRouter, a router and a retry decorator
//! - [`gather`]: context collection honouring `.gitignore`
//! - [`writer`]: Markdown output files
//! - [`audit`]: JSONL audit trail
//! - [`summary`]: console summary
//!
//! plus the CLI and settings layering in [`cli`] and [`config`].

pub mod audit;
pub mod cli;
pub mod config;
pub mod gather;
pub mod providers;
pub mod summary;
pub mod writer;
