// Policy module - DIAL RETRY
// Pluggable backoff strategies wrapped around connection attempts

mod retry;

pub use retry::{retry, ConstantBackoff, DialPolicy, ExponentialBackoff, MaxAttempts};
