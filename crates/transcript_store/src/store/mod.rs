mod job_store;
mod quota_ledger;

pub use job_store::{JobStore, StoreError};
pub use quota_ledger::QuotaLedger;
