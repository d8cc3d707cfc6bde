use serde::Deserialize;

/// Tunables for composing and submitting transactions. The retry settings
/// bound how long callers wait out read-after-write lag on the indexer.
#[derive(Deserialize, Clone, Debug)]
pub struct CompositionConfig {
    /// Fee target in shannons per 1000 bytes of serialized transaction.
    pub fee_rate: u64,
    pub retry_max_attempts: u32,
    pub retry_interval_ms: u64,
    /// Interval multiplier applied per attempt; 1 keeps a fixed interval.
    pub retry_backoff: u32,
}

impl Default for CompositionConfig {
    fn default() -> Self {
        CompositionConfig {
            fee_rate: 1000,
            retry_max_attempts: 5,
            retry_interval_ms: 1000,
            retry_backoff: 1,
        }
    }
}
