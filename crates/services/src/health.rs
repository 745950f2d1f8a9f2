use async_trait::async_trait;

use dm_domain::error::Result;

/// Lifecycle hooks shared by every external service adapter.
#[async_trait]
pub trait ServiceHealth: Send + Sync {
    /// One-time startup check/warm-up. Failures are reported to the
    /// caller, which decides whether to degrade or bail.
    async fn initialize(&self) -> Result<()>;

    /// Liveness probe: `(healthy, message)`.
    async fn is_healthy(&self) -> (bool, String);
}
