//! Application state for the gateway.

use std::sync::Arc;

use super::backend::McpBackend;
use super::llm::LanguageModel;

/// Shared application state.
///
/// Generic over `B: McpBackend` so handlers run against the remote client,
/// the embedded server, or a mock in tests.
pub struct AppState<B: McpBackend> {
    backend: Arc<B>,
    llm: Option<Arc<dyn LanguageModel>>,
    default_data_source: Option<String>,
}

// Manual Clone impl: only the Arcs are cloned, B need not be Clone.
impl<B: McpBackend> Clone for AppState<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            llm: self.llm.clone(),
            default_data_source: self.default_data_source.clone(),
        }
    }
}

impl<B: McpBackend> AppState<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend: Arc::new(backend),
            llm: None,
            default_data_source: None,
        }
    }

    pub fn with_llm(mut self, llm: Arc<dyn LanguageModel>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// Data source used when a request does not name one.
    pub fn with_default_data_source(mut self, name: Option<String>) -> Self {
        self.default_data_source = name;
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn llm(&self) -> Option<&Arc<dyn LanguageModel>> {
        self.llm.as_ref()
    }

    pub fn default_data_source(&self) -> Option<&str> {
        self.default_data_source.as_deref()
    }
}
