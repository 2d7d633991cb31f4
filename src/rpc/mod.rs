pub mod resilient_client;
pub mod retry;

pub use resilient_client::ResilientRpcClient;
pub use retry::{is_timeout, with_retries, CallTimedOut, RetryPolicy};
