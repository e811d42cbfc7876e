use async_trait::async_trait;
use std::fmt::Debug;

use crate::error::Error;

#[async_trait]
pub trait BaseDbTrait: Send + Sync + Debug + 'static {
    /// Round-trips to the store.
    /// ---
    /// Backs the readiness probe.
    async fn ping(&self) -> Result<(), Error>;
}
