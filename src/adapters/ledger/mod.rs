//! Best-effort ledger settlement adapters.

pub mod rpc_client;

pub use rpc_client::{NullLedger, RpcLedgerClient};
