use async_trait::async_trait;

use crate::core::error::ProviderError;
use crate::core::types::{
    AdapterContext, CompletionRequest, CompletionResult, ProviderConfig, ProviderId,
};

/// Backend adapter contract: turn a canonical completion request into one
/// provider-specific HTTP exchange and return normalized text.
///
/// Adapters are stateless with respect to provider settings; base URL, model
/// and credential are read from the [`ProviderConfig`] snapshot handed in on
/// every call, so edits made through the registry apply to the next request.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Provider identifier this adapter serves.
    fn id(&self) -> ProviderId;

    /// Executes a single non-streaming completion.
    async fn complete(
        &self,
        config: &ProviderConfig,
        req: &CompletionRequest,
        ctx: &AdapterContext,
    ) -> Result<CompletionResult, ProviderError>;
}
