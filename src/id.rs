use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;

/// Produces ids for new upload records.
///
/// The raw metadata sent by the client is passed along so generators can
/// derive ids from it.
#[async_trait]
pub trait IdGenerator: Send + Sync {
    async fn generate(&self, raw_metadata: &str) -> Result<String>;
}

/// Random UUID v4 rendered as 32 lowercase hex characters.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidIdGenerator;

#[async_trait]
impl IdGenerator for UuidIdGenerator {
    async fn generate(&self, _raw_metadata: &str) -> Result<String> {
        Ok(Uuid::new_v4().simple().to_string())
    }
}

/// Adapts a plain closure into an [`IdGenerator`].
pub struct FnIdGenerator<F>(pub F);

#[async_trait]
impl<F> IdGenerator for FnIdGenerator<F>
where
    F: Fn(&str) -> String + Send + Sync,
{
    async fn generate(&self, raw_metadata: &str) -> Result<String> {
        Ok((self.0)(raw_metadata))
    }
}
