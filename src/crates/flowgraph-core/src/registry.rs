//! [`Registry`]: the process-wide name → [`AtomicTask`] table.
//!
//! Represented as an explicitly initialized resource behind a module-level
//! accessor ([`Registry::global`]), never an implicit lazy global — callers
//! that need isolation between tests call [`Registry::reset`] rather than
//! relying on process restart.

use crate::error::{GraphError, Result};
use crate::task::{AtomicFn, AtomicTask, Task};
use crate::types::TypeToken;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

struct RegistryState {
    /// The authoritative name -> task mapping.
    main: HashMap<String, Arc<AtomicTask>>,
    /// When `Some`, [`Registry::register`] writes here instead of `main` —
    /// used while deserializing a document so loading a source file does not
    /// pollute the main registry.
    redirect: Option<HashMap<String, Arc<AtomicTask>>>,
    /// While `true`, [`Registry::register`] is a silent no-op — used during
    /// iterative reloads that would otherwise re-register duplicates.
    muted: bool,
    /// Name -> function pointer, independent of which store currently holds
    /// the task metadata. This is what [`AtomicTask::reload`] consults; it
    /// stands in for "re-execute the source file".
    function_table: HashMap<String, AtomicFn>,
}

impl RegistryState {
    fn new() -> Self {
        RegistryState {
            main: HashMap::new(),
            redirect: None,
            muted: false,
            function_table: HashMap::new(),
        }
    }

    fn active_store_mut(&mut self) -> &mut HashMap<String, Arc<AtomicTask>> {
        self.redirect.as_mut().unwrap_or(&mut self.main)
    }

    fn active_store(&self) -> &HashMap<String, Arc<AtomicTask>> {
        self.redirect.as_ref().unwrap_or(&self.main)
    }
}

/// Process-wide mapping from atomic-task name to its executable payload;
/// supports redirection and muting during deserialization.
pub struct Registry {
    state: Mutex<RegistryState>,
}

static REGISTRY: OnceLock<Registry> = OnceLock::new();

impl Registry {
    /// The process-wide registry instance.
    pub fn global() -> &'static Registry {
        REGISTRY.get_or_init(|| Registry {
            state: Mutex::new(RegistryState::new()),
        })
    }

    /// Register a new atomic task. Fails with [`GraphError::DuplicateName`]
    /// if the name already exists in the active store, [`GraphError::BadType`]
    /// if a declared type token is malformed. If muted, this is a silent
    /// no-op; if `name` is `None`, a name is derived from `source_location`
    /// and a [`MissingNameWarning`] is logged once.
    pub fn register(
        &self,
        name: Option<String>,
        source_location: impl Into<String>,
        inputs: Vec<(String, String)>,
        output: Option<String>,
        func: AtomicFn,
    ) -> Result<Arc<AtomicTask>> {
        let source_location = source_location.into();
        let mut state = self.state.lock();

        let name = match name {
            Some(n) => n,
            None => {
                let derived = format!("{source_location}:anonymous");
                tracing::warn!(derived_name = %derived, "registered atomic task without an explicit name");
                derived
            }
        };

        // Muted registrations are a no-op: if the task is already present
        // (the common case — reloading a source file that re-registers
        // tasks it already owns), hand back the existing entry instead of
        // erroring.
        if state.muted {
            if let Some(existing) = state.active_store().get(&name) {
                return Ok(existing.clone());
            }
        } else if state.active_store().contains_key(&name) {
            return Err(GraphError::DuplicateName(name));
        }

        let mut typed_inputs = Vec::with_capacity(inputs.len());
        for (input_name, token) in inputs {
            typed_inputs.push((input_name, TypeToken::new(token)?));
        }
        let typed_output = output.map(TypeToken::new).transpose()?;

        let table_func = func.clone();
        let task = Arc::new(AtomicTask::new(
            name.clone(),
            source_location,
            typed_inputs,
            typed_output,
            move |values| func(values),
        )?);

        state.function_table.insert(name.clone(), table_func);
        state.active_store_mut().insert(name, task.clone());
        Ok(task)
    }

    /// Resolve a task by name, or fail with [`GraphError::Unknown`].
    pub fn resolve(&self, name: &str) -> Result<Arc<AtomicTask>> {
        self.state
            .lock()
            .active_store()
            .get(name)
            .cloned()
            .ok_or_else(|| GraphError::Unknown(name.to_string()))
    }

    /// Look up a bare function pointer by name, independent of which store
    /// currently owns the task metadata. Used by [`AtomicTask::reload`].
    pub fn function_table_lookup(&self, name: &str) -> Option<AtomicFn> {
        self.state.lock().function_table.get(name).cloned()
    }

    /// Drop every registration and function-table entry, clear redirection
    /// and muting. Intended for test isolation between scenarios.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        *state = RegistryState::new();
    }

    pub fn mute(&self) {
        self.state.lock().muted = true;
    }

    pub fn unmute(&self) {
        self.state.lock().muted = false;
    }

    /// Send subsequent registrations into a fresh, empty side-store instead
    /// of `main`. Used while deserializing a document.
    pub fn redirect(&self) {
        self.state.lock().redirect = Some(HashMap::new());
    }

    /// Drop the redirect store (discarding anything registered into it that
    /// the caller did not separately retain a handle to) and resume writing
    /// to `main`.
    pub fn clear_redirect(&self) {
        self.state.lock().redirect = None;
    }

    /// `true` while a redirect store is active.
    pub fn current_redirect(&self) -> bool {
        self.state.lock().redirect.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_registry_for_test() -> &'static Registry {
        let reg = Registry::global();
        reg.reset();
        reg
    }

    #[test]
    fn register_then_resolve_round_trips() {
        let reg = fresh_registry_for_test();
        reg.register(
            Some("get5".into()),
            "mem://get5",
            vec![],
            Some("int".into()),
            Arc::new(|_| Ok(serde_json::json!(5))),
        )
        .unwrap();
        let task = reg.resolve("get5").unwrap();
        assert_eq!(task.name(), "get5");
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let reg = fresh_registry_for_test();
        let register_once = || {
            reg.register(
                Some("dup".into()),
                "mem://dup",
                vec![],
                None,
                Arc::new(|_| Ok(crate::types::Value::Null)),
            )
        };
        register_once().unwrap();
        assert!(matches!(register_once(), Err(GraphError::DuplicateName(_))));
    }

    #[test]
    fn resolve_unknown_fails() {
        let reg = fresh_registry_for_test();
        assert!(matches!(reg.resolve("nope"), Err(GraphError::Unknown(_))));
    }

    #[test]
    fn redirect_isolates_registrations_from_main() {
        let reg = fresh_registry_for_test();
        reg.redirect();
        reg.register(
            Some("shadowed".into()),
            "mem://shadowed",
            vec![],
            None,
            Arc::new(|_| Ok(crate::types::Value::Null)),
        )
        .unwrap();
        reg.clear_redirect();
        assert!(reg.resolve("shadowed").is_err());
    }
}
