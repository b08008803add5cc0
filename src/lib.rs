//! Drover - decentralized compute marketplace coordinator
//!
//! The coordinator matches submitted tasks to registered runner nodes,
//! notifies the chosen runner over its webhook, prices reported resource
//! usage into rewards, and settles them through a best-effort ledger.
//! Federated-learning sessions ride on the same dispatch machinery, one
//! training task per participant per round, closed by a weighted average.

pub mod adapters;
pub mod api;
pub mod domain;
pub mod infrastructure;
pub mod services;
