//! Per-run caller context: object identity, parameters and cancellation.

use crate::model::{Sysmeta, Value};
use indexmap::IndexMap;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared flag a caller flips to stop a run between check pipelines.
///
/// Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// What the caller knows about the document being assessed.
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    /// Identifier of the metadata object, recorded on the run
    pub object_identifier: String,
    /// Caller parameters, bound into rule code as `mdq_params`
    pub params: IndexMap<String, String>,
    /// Copied onto the run
    pub sysmeta: Option<Sysmeta>,
    pub cancellation: CancellationToken,
}

impl RunContext {
    pub fn new(object_identifier: impl Into<String>) -> Self {
        Self {
            object_identifier: object_identifier.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_sysmeta(mut self, sysmeta: Sysmeta) -> Self {
        self.sysmeta = Some(sysmeta);
        self
    }

    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// The `mdq_params` binding.
    pub(crate) fn params_value(&self) -> Value {
        Value::Map(
            self.params
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect::<BTreeMap<_, _>>(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_clones_share_state() {
        let token = CancellationToken::new();
        let ctx = RunContext::new("obj").with_cancellation(token.clone());
        assert!(!ctx.is_cancelled());
        token.cancel();
        assert!(ctx.is_cancelled());
    }

    #[test]
    fn test_params_binding() {
        let ctx = RunContext::new("obj").param("metadataId", "doi:1").param("nodeId", "urn:node:KNB");
        let Value::Map(map) = ctx.params_value() else {
            panic!("expected a map");
        };
        assert_eq!(map.get("nodeId"), Some(&Value::from("urn:node:KNB")));
        assert_eq!(map.len(), 2);
    }
}
