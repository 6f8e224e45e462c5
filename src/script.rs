//! Compilation of operator-authored function scripts.
//!
//! Scripts are Lua chunks. Compiling evaluates the chunk in a fresh,
//! scrubbed state so the globals it defines can be probed and invoked
//! later. The engine fingerprints every compiled source and keeps the
//! fingerprint until the chunk is explicitly released, which makes
//! leak reclamation on unregistration an observable contract instead
//! of a garbage-collection accident.

use std::collections::HashSet;
use std::sync::Mutex;

use mlua::{Lua, Value};
use tracing::{debug, warn};

use crate::error::{RemarqueError, Result};

/// What probing a global of a compiled chunk found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    Function,
    NotCallable,
    Absent,
}

/// A successfully compiled script, ready to be classified and invoked.
pub struct CompiledScript {
    fingerprint: String,
    lua: Lua,
}

impl CompiledScript {
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn probe(&self, name: &str) -> Probe {
        match self.lua.globals().get::<Value>(name) {
            Ok(Value::Function(_)) => Probe::Function,
            Ok(Value::Nil) | Err(_) => Probe::Absent,
            Ok(_) => Probe::NotCallable,
        }
    }

    /// Run the chunk's zero-argument `init`, if it defined one.
    pub fn call_init(&self) -> Result<()> {
        if self.probe("init") == Probe::Function {
            let init: mlua::Function = self.lua.globals().get("init")?;
            init.call::<()>(())?;
        }
        Ok(())
    }

    /// Invoke the value-producing capability.
    pub fn call_values(&self, args: &[String]) -> Result<Vec<String>> {
        let get_values: mlua::Function = self.lua.globals().get("get_values")?;
        Ok(get_values.call::<Vec<String>>(args.to_vec())?)
    }

    /// Invoke the query-producing capability; the returned string is a
    /// raw predicate for the lowering engine.
    pub fn call_query(&self, args: &[String]) -> Result<String> {
        let get_query: mlua::Function = self.lua.globals().get("get_query")?;
        Ok(get_query.call::<String>(args.to_vec())?)
    }
}

pub fn fingerprint(source: &str) -> String {
    blake3::hash(source.as_bytes()).to_hex().to_string()
}

// ------------- ScriptEngine -------------
pub trait ScriptEngine: Send + Sync {
    /// Compile `source`. With `static_only` the chunk is syntax-checked
    /// but not evaluated, so no capability can be probed afterwards.
    /// `bindings` become string globals visible to the chunk.
    fn compile(
        &self,
        source: &str,
        static_only: bool,
        bindings: &[(String, String)],
    ) -> Result<CompiledScript>;
    /// Forget a compiled chunk. Failing to release is a soft leak and
    /// is only ever logged.
    fn release(&self, script: &CompiledScript);
    /// Whether a source's compiled chunk is still accounted for.
    fn is_loaded(&self, source: &str) -> bool;
}

#[derive(Default)]
pub struct LuaScriptEngine {
    loaded: Mutex<HashSet<String>>,
}

impl LuaScriptEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn fresh_state(bindings: &[(String, String)]) -> Result<Lua> {
        let lua = Lua::new();
        // scripts only compute over their arguments
        for global in ["os", "io", "package"] {
            lua.globals().set(global, Value::Nil)?;
        }
        for (name, value) in bindings {
            lua.globals().set(name.as_str(), value.as_str())?;
        }
        Ok(lua)
    }
}

impl ScriptEngine for LuaScriptEngine {
    fn compile(
        &self,
        source: &str,
        static_only: bool,
        bindings: &[(String, String)],
    ) -> Result<CompiledScript> {
        let lua = Self::fresh_state(bindings)?;
        if static_only {
            lua.load(source).into_function()?;
        } else {
            lua.load(source).exec()?;
        }
        let fingerprint = fingerprint(source);
        self.loaded
            .lock()
            .map_err(|e| RemarqueError::Lock(e.to_string()))?
            .insert(fingerprint.clone());
        Ok(CompiledScript { fingerprint, lua })
    }

    fn release(&self, script: &CompiledScript) {
        match self.loaded.lock() {
            Ok(mut loaded) => {
                if !loaded.remove(script.fingerprint()) {
                    debug!(fingerprint = %script.fingerprint(), "chunk already released");
                }
            }
            Err(e) => warn!(error = %e, "unable to release compiled chunk"),
        }
    }

    fn is_loaded(&self, source: &str) -> bool {
        match self.loaded.lock() {
            Ok(loaded) => loaded.contains(&fingerprint(source)),
            Err(_) => false,
        }
    }
}
