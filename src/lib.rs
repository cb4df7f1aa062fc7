//! Meld - multi-engine retrieval fusion
//!
//! Queries a keyword engine and a vector engine, picks a strategy per query
//! from measured engine health, fuses the ranked lists, and shields callers
//! from engine failures with circuit breakers, retries and fallbacks. Results
//! are cached and identical concurrent requests share one execution.

pub mod cache;
pub mod cli;
pub mod concurrency;
pub mod config;
pub mod daemon;
pub mod engine;
pub mod error;
pub mod health;
pub mod orchestrator;
pub mod resilience;
pub mod retrieval;

pub use error::{MeldError, Result};
pub use orchestrator::{MeldService, SearchResponse};
pub use retrieval::SearchRequest;
