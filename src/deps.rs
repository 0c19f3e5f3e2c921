//! External-dependency bridge.
//!
//! Host-exposed functions are the only sanctioned non-deterministic
//! operation available to workflow code. Each injected function carries an
//! apply mode:
//!
//! - `Sync` — dispatched immediately in-sandbox through the registered
//!   native function; the value returns synchronously.
//! - `AsyncWithResult` — the call is buffered for the host and awaited
//!   through the completion table under the caller's current scope.
//! - `AsyncIgnored` — buffered for the host, result discarded.
//!
//! Buffered calls cross the activation boundary so the engine arbitrates
//! their ordering; results come back through
//! `resolve_external_dependencies`.

use crate::errors::EngineError;
use crate::proto::Payload;
use std::collections::HashMap;
use std::sync::Arc;

/// Host function reference for `Sync` dependencies.
pub type NativeFn = Arc<dyn Fn(Vec<Payload>) -> Result<Payload, String> + Send + Sync>;

/// How an injected dependency function is dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyMode {
    Sync,
    AsyncWithResult,
    AsyncIgnored,
}

/// One buffered call to a host-side dependency function.
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalCall {
    pub iface_name: String,
    pub fn_name: String,
    pub args: Vec<Payload>,
    /// Present for awaited calls; keys the completion the host must resolve.
    pub seq: Option<u64>,
}

/// Host-delivered result for an awaited external call.
#[derive(Debug, Clone)]
pub struct ExternalCallResult {
    pub seq: u64,
    pub result: Result<Payload, String>,
}

pub(crate) struct Dependency {
    pub mode: ApplyMode,
    pub func: Option<NativeFn>,
}

#[derive(Default)]
pub(crate) struct DependencyRegistry {
    map: HashMap<(String, String), Dependency>,
}

impl DependencyRegistry {
    pub fn register(
        &mut self,
        iface_name: &str,
        fn_name: &str,
        mode: ApplyMode,
        func: Option<NativeFn>,
    ) -> Result<(), EngineError> {
        if mode == ApplyMode::Sync && func.is_none() {
            return Err(EngineError::IllegalState(format!(
                "sync dependency {iface_name}.{fn_name} registered without a function reference"
            )));
        }
        self.map
            .insert((iface_name.to_string(), fn_name.to_string()), Dependency { mode, func });
        Ok(())
    }

    pub fn get(&self, iface_name: &str, fn_name: &str) -> Option<&Dependency> {
        self.map.get(&(iface_name.to_string(), fn_name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_registration_requires_function() {
        let mut registry = DependencyRegistry::default();
        assert!(registry
            .register("metrics", "count", ApplyMode::Sync, None)
            .is_err());

        let func: NativeFn = Arc::new(|_args| Ok(Payload::default()));
        assert!(registry
            .register("metrics", "count", ApplyMode::Sync, Some(func))
            .is_ok());
        assert_eq!(
            registry.get("metrics", "count").map(|d| d.mode),
            Some(ApplyMode::Sync)
        );
    }

    #[test]
    fn async_registration_without_function_is_fine() {
        let mut registry = DependencyRegistry::default();
        registry
            .register("logger", "info", ApplyMode::AsyncIgnored, None)
            .unwrap();
        registry
            .register("kv", "get", ApplyMode::AsyncWithResult, None)
            .unwrap();
        assert!(registry.get("kv", "get").is_some());
        assert!(registry.get("kv", "missing").is_none());
    }
}
