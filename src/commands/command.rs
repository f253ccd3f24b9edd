// Command trait - Defines the interface for all command implementations
// Licensed under GPL-3.0

use async_trait::async_trait;

/// One operational mode of the binary.
///
/// Commands own their arguments, load whatever configuration they need and
/// report failures as `anyhow::Error` so `main` can print them uniformly.
#[async_trait]
pub trait Command: Send + Sync {
    /// Execute the command asynchronously
    async fn execute(&self) -> anyhow::Result<()>;

    /// Get a human-readable name for this command (for logging/debugging)
    fn name(&self) -> &'static str;
}
