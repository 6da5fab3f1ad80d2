pub mod ledger_client;
pub mod resilient_client;

pub use ledger_client::{LedgerClient, RpcLedgerClient};
pub use resilient_client::{with_retry, ResilientLedgerClient, RetryPolicy};
