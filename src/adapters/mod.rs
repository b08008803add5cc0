//! Adapters: concrete implementations of the domain ports.

pub mod ledger;
pub mod sqlite;
