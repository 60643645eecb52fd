//! Registered transport adapters, one per transport kind

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use ferry_core::TransportKind;

use crate::Transport;

/// Set of transport adapters keyed by kind
#[derive(Clone, Default)]
pub struct TransportSet {
    adapters: HashMap<TransportKind, Arc<dyn Transport>>,
}

impl TransportSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an adapter, replacing any previous adapter of the same kind
    pub fn register(&mut self, transport: Arc<dyn Transport>) -> Option<Arc<dyn Transport>> {
        self.adapters.insert(transport.kind(), transport)
    }

    pub fn with(mut self, transport: Arc<dyn Transport>) -> Self {
        self.register(transport);
        self
    }

    pub fn get(&self, kind: TransportKind) -> Option<Arc<dyn Transport>> {
        self.adapters.get(&kind).cloned()
    }

    pub fn contains(&self, kind: TransportKind) -> bool {
        self.adapters.contains_key(&kind)
    }

    /// Configured kinds in fallback order
    pub fn kinds(&self) -> Vec<TransportKind> {
        TransportKind::FALLBACK_ORDER
            .iter()
            .copied()
            .filter(|k| self.adapters.contains_key(k))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

impl fmt::Debug for TransportSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportSet")
            .field("kinds", &self.kinds())
            .finish()
    }
}
