//! Race-free registration of search functions against the host module
//! system.
//!
//! All registry state lives behind one reader/writer lock: writers
//! (register, unregister, the bulk teardown) take the exclusive lock,
//! readers take the shared lock. Register and unregister of the same
//! module key are therefore mutually exclusive and ordered by lock
//! acquisition; operations on different keys serialize on the same
//! lock, trading throughput for simplicity.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use bimap::BiMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::error::{RemarqueError, Result};
use crate::function::{Classified, SearchFunction, classify};
use crate::script::ScriptEngine;

// ------------- Definitions and host boundary -------------
/// A stored script definition, as persisted by the administration
/// layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionScript {
    pub id: i64,
    pub name: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleDescriptor {
    pub module_key: String,
    pub function_name: String,
    pub list: bool,
}

/// Opaque handle the host returns for a live registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationHandle(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnregisterOutcome {
    Unregistered,
    /// The host no longer knew the handle; benign.
    AlreadyUnregistered,
}

pub trait ModuleHost: Send + Sync {
    fn register(&self, descriptor: ModuleDescriptor) -> Result<RegistrationHandle>;
    fn unregister(&self, handle: &RegistrationHandle) -> Result<UnregisterOutcome>;
}

/// Host stand-in keeping registered descriptors in memory.
#[derive(Default)]
pub struct InMemoryHost {
    next_handle: AtomicU64,
    modules: Mutex<HashMap<u64, ModuleDescriptor>>,
}

impl InMemoryHost {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn descriptors(&self) -> Vec<ModuleDescriptor> {
        match self.modules.lock() {
            Ok(modules) => modules.values().cloned().collect(),
            Err(_) => Vec::new(),
        }
    }
    pub fn len(&self) -> usize {
        self.modules.lock().map(|m| m.len()).unwrap_or(0)
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ModuleHost for InMemoryHost {
    fn register(&self, descriptor: ModuleDescriptor) -> Result<RegistrationHandle> {
        let handle = self.next_handle.fetch_add(1, Ordering::SeqCst);
        self.modules
            .lock()
            .map_err(|e| RemarqueError::Lock(e.to_string()))?
            .insert(handle, descriptor);
        Ok(RegistrationHandle(handle))
    }
    fn unregister(&self, handle: &RegistrationHandle) -> Result<UnregisterOutcome> {
        let removed = self
            .modules
            .lock()
            .map_err(|e| RemarqueError::Lock(e.to_string()))?
            .remove(&handle.0);
        Ok(match removed {
            Some(_) => UnregisterOutcome::Unregistered,
            None => UnregisterOutcome::AlreadyUnregistered,
        })
    }
}

// ------------- Registry -------------
// The three maps are always mutated together under the write lock:
// a module key is in `services` iff it is in `names`, and the name it
// maps to always has an entry in `functions`.
#[derive(Default)]
struct RegistryState {
    services: HashMap<String, RegistrationHandle>,
    names: BiMap<String, String>,
    functions: HashMap<String, Arc<dyn SearchFunction>>,
}

pub struct FunctionRegistry {
    state: RwLock<RegistryState>,
    host: Arc<dyn ModuleHost>,
    engine: Arc<dyn ScriptEngine>,
}

pub fn script_module_key(id: i64) -> String {
    format!("scripted-search-{id}")
}

impl FunctionRegistry {
    pub fn new(host: Arc<dyn ModuleHost>, engine: Arc<dyn ScriptEngine>) -> Self {
        Self { state: RwLock::new(RegistryState::default()), host, engine }
    }

    /// Compile, classify and register a stored script. Compilation or
    /// classification failures are logged and leave the registry
    /// untouched; they are never surfaced to the caller.
    pub fn register_script(&self, script: &FunctionScript) -> Result<()> {
        let module_key = script_module_key(script.id);
        let Some(function) = self.initialize(script, &module_key) else {
            return Ok(());
        };
        let descriptor = ModuleDescriptor {
            module_key,
            function_name: script.name.clone(),
            list: function.is_list(),
        };
        self.register_descriptor(descriptor, function)
    }

    /// Register a built-in function under its own declared module key.
    pub fn register_builtin(&self, function: Arc<dyn SearchFunction>) -> Result<()> {
        let descriptor = ModuleDescriptor {
            module_key: function.module_key().to_string(),
            function_name: function.name().to_string(),
            list: function.is_list(),
        };
        self.register_descriptor(descriptor, function)
    }

    pub fn unregister_script(&self, id: i64) -> Result<()> {
        let mut state = self.write()?;
        self.unregister_locked(&mut state, &script_module_key(id));
        Ok(())
    }

    /// Tear down every live registration. Per-registration failures
    /// are logged and do not abort the sweep.
    pub fn unregister_all(&self) -> Result<()> {
        let mut state = self.write()?;
        let module_keys: Vec<String> = state.services.keys().cloned().collect();
        for module_key in module_keys {
            self.unregister_locked(&mut state, &module_key);
        }
        Ok(())
    }

    /// Point-in-time snapshot of the registered functions by name. The
    /// snapshot may be superseded as soon as the lock is released.
    pub fn functions(&self) -> Result<HashMap<String, Arc<dyn SearchFunction>>> {
        let state = self.state.read().map_err(|e| RemarqueError::Lock(e.to_string()))?;
        Ok(state.functions.clone())
    }

    pub fn function(&self, name: &str) -> Result<Option<Arc<dyn SearchFunction>>> {
        let state = self.state.read().map_err(|e| RemarqueError::Lock(e.to_string()))?;
        Ok(state.functions.get(name).map(Arc::clone))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, RegistryState>> {
        self.state.write().map_err(|e| RemarqueError::Lock(e.to_string()))
    }

    fn initialize(
        &self,
        script: &FunctionScript,
        module_key: &str,
    ) -> Option<Arc<dyn SearchFunction>> {
        let compiled = match self.engine.compile(&script.body, false, &[]) {
            Ok(compiled) => compiled,
            Err(e) => {
                error!(name = %script.name, id = script.id, error = %e,
                    "unable to initialize function");
                return None;
            }
        };
        match classify(compiled, module_key.to_string(), script.name.clone()) {
            Classified::Values(adapter) => Some(Arc::new(adapter)),
            Classified::Query(adapter) => Some(Arc::new(adapter)),
            Classified::Rejected { reason, script: compiled } => {
                self.engine.release(&compiled);
                error!(name = %script.name, id = script.id, %reason,
                    "script is not a search function");
                None
            }
        }
    }

    fn register_descriptor(
        &self,
        descriptor: ModuleDescriptor,
        function: Arc<dyn SearchFunction>,
    ) -> Result<()> {
        debug!(name = %descriptor.function_name, "registering function");
        let mut state = self.write()?;
        self.unregister_locked(&mut state, &descriptor.module_key);

        let handle = self.host.register(descriptor.clone())?;
        state.services.insert(descriptor.module_key.clone(), handle);
        match state
            .names
            .insert(descriptor.module_key.clone(), descriptor.function_name.clone())
        {
            // A different module already owned this function name; its
            // registration is evicted so key <-> name stays bijective.
            bimap::Overwritten::Right(old_key, _) | bimap::Overwritten::Pair(old_key, _) => {
                if old_key != descriptor.module_key {
                    if let Some(old_handle) = state.services.remove(&old_key) {
                        if let Err(e) = self.host.unregister(&old_handle) {
                            warn!(module_key = %old_key, error = %e,
                                "unable to unregister displaced module");
                        }
                    }
                    if let Some(displaced) = state.functions.remove(&descriptor.function_name) {
                        if let Some(script) = displaced.retained_script() {
                            self.engine.release(script);
                        }
                    }
                }
            }
            _ => (),
        }
        state.functions.insert(descriptor.function_name.clone(), function);
        Ok(())
    }

    fn unregister_locked(&self, state: &mut RegistryState, module_key: &str) {
        let Some(handle) = state.services.remove(module_key) else {
            return;
        };
        match self.host.unregister(&handle) {
            Ok(UnregisterOutcome::AlreadyUnregistered) => {
                debug!(module_key, "already unregistered");
            }
            Ok(UnregisterOutcome::Unregistered) => (),
            Err(e) => error!(module_key, error = %e, "unable to unregister module"),
        }
        if let Some((_, function_name)) = state.names.remove_by_left(module_key) {
            debug!(name = %function_name, "unregistering function");
            if let Some(function) = state.functions.remove(&function_name) {
                if let Some(script) = function.retained_script() {
                    self.engine.release(script);
                }
            }
        }
    }
}

/// Load every `*.json` script definition in a directory into the
/// registry. Entries that cannot be read or parsed are skipped with a
/// warning; the number of submitted definitions is returned.
pub fn load_scripts_from_dir(registry: &FunctionRegistry, dir: &Path) -> Result<usize> {
    let mut submitted = 0;
    let entries = fs::read_dir(dir)
        .map_err(|e| RemarqueError::Registry(format!("unable to read {}: {e}", dir.display())))?;
    for entry in entries {
        let path = match entry {
            Ok(entry) => entry.path(),
            Err(e) => {
                warn!(error = %e, "unable to read directory entry");
                continue;
            }
        };
        if path.extension().is_none_or(|ext| ext != "json") {
            continue;
        }
        let script: FunctionScript = match fs::read_to_string(&path)
            .map_err(|e| e.to_string())
            .and_then(|text| serde_json::from_str(&text).map_err(|e| e.to_string()))
        {
            Ok(script) => script,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "skipping unreadable script definition");
                continue;
            }
        };
        registry.register_script(&script)?;
        submitted += 1;
    }
    Ok(submitted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::LuaScriptEngine;

    fn values_script(id: i64, name: &str) -> FunctionScript {
        FunctionScript {
            id,
            name: name.to_string(),
            body: format!("function get_values(args) return {{ \"{id}\" }} end"),
        }
    }

    fn setup() -> (Arc<InMemoryHost>, Arc<LuaScriptEngine>, FunctionRegistry) {
        let host = Arc::new(InMemoryHost::new());
        let engine = Arc::new(LuaScriptEngine::new());
        let registry = FunctionRegistry::new(host.clone(), engine.clone());
        (host, engine, registry)
    }

    #[test]
    fn invariant_holds_after_concurrent_churn_on_distinct_keys() {
        let (_host, _engine, registry) = setup();
        let registry = Arc::new(registry);

        let mut workers = Vec::new();
        for worker in 0..4i64 {
            let registry = Arc::clone(&registry);
            workers.push(std::thread::spawn(move || {
                for round in 0..10i64 {
                    let id = worker * 100 + round;
                    let script = values_script(id, &format!("fn_{id}"));
                    registry.register_script(&script).unwrap();
                    if round % 2 == 0 {
                        registry.unregister_script(id).unwrap();
                    }
                }
            }));
        }
        for worker in workers {
            worker.join().unwrap();
        }

        let state = registry.state.read().unwrap();
        assert_eq!(state.services.len(), state.names.len());
        for (module_key, _) in &state.services {
            let function_name = state
                .names
                .get_by_left(module_key)
                .expect("registered module key has a name");
            let function = state
                .functions
                .get(function_name)
                .expect("mapped name has a function");
            assert_eq!(function.module_key(), module_key);
        }
    }

    #[test]
    fn rejected_script_releases_its_chunk() {
        let (host, engine, registry) = setup();
        let script = FunctionScript {
            id: 1,
            name: "nothing".to_string(),
            body: "local x = 1".to_string(),
        };
        registry.register_script(&script).unwrap();
        assert!(registry.functions().unwrap().is_empty());
        assert!(host.is_empty());
        assert!(!engine.is_loaded(&script.body));
    }
}
