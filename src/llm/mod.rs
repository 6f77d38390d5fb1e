//! Decision oracle client: prompt building, backends, backoff and reply parsing

pub mod client;
pub mod context;
pub mod oracle;
pub mod parser;
pub mod retry;

pub use client::{BackendSpec, CloudBackend, CompletionBackend, LocalBackend};
pub use context::{DecisionContext, PromptPair};
pub use oracle::{DecisionOracle, LlmOracle, OracleSet};
pub use parser::{parse_stratagem, sanitize_response, Stratagem, StratagemAction};
pub use retry::RetryPolicy;
