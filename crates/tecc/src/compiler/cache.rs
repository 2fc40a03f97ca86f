use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use log::debug;

use crate::compiler::artifact::CompiledArtifact;
use crate::compiler::key::CacheKey;
use crate::compiler::names::{mangle, NameSupply};
use crate::compiler::schedule;
use crate::error::{LowerError, LowerResult};
use crate::ir::{GlobalVar, IrModule};
use crate::op::OpRegistry;
use crate::runtime::{CodegenBackend, PackedFunc};
use crate::target::Target;
use crate::tir::{LoweredFunc, LoweredModule};

struct CacheEntry {
    artifact: Option<Arc<CompiledArtifact>>,
    use_count: usize,
    packed_func: Option<PackedFunc>,
    gate: Arc<Mutex<()>>,
}

impl CacheEntry {
    fn new(use_count: usize) -> Self {
        Self {
            artifact: None,
            use_count,
            packed_func: None,
            gate: Arc::new(Mutex::new(())),
        }
    }
}

/// Point-in-time view of one cache entry.
#[derive(Debug, Clone)]
pub struct CacheEntrySnapshot {
    pub key: CacheKey,
    pub use_count: usize,
    pub artifact: Option<Arc<CompiledArtifact>>,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
enum KeySpace {
    Main,
    ShapeFunc,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<CacheKey, CacheEntry>,
    shape_entries: HashMap<CacheKey, CacheEntry>,
    /// Keys whose lowering failed; they are answered with the same error.
    failures: HashMap<(KeySpace, CacheKey), LowerError>,
    device_contexts: BTreeMap<GlobalVar, String>,
    current_key: Option<CacheKey>,
}

impl CacheState {
    fn space(&mut self, space: KeySpace) -> &mut HashMap<CacheKey, CacheEntry> {
        match space {
            KeySpace::Main => &mut self.entries,
            KeySpace::ShapeFunc => &mut self.shape_entries,
        }
    }

    fn failure(&self, space: KeySpace, key: &CacheKey) -> Option<LowerError> {
        self.failures.get(&(space, key.clone())).cloned()
    }
}

/// Memoizing compiler from `(function, target)` to lowered artifacts.
///
/// Each key is lowered at most once for the lifetime of the cache. Requests
/// for a key whose lowering is in flight wait on that key's gate and receive
/// the same artifact; different keys lower independently. A failed lowering
/// leaves no entry behind and later requests get the recorded error.
pub struct TeCompiler {
    ops: Arc<OpRegistry>,
    state: Mutex<CacheState>,
    names: Mutex<NameSupply>,
}

impl TeCompiler {
    pub fn new(ops: Arc<OpRegistry>) -> Self {
        Self {
            ops,
            state: Mutex::new(CacheState::default()),
            names: Mutex::new(NameSupply::new()),
        }
    }

    /// A compiler whose generated names never collide with globals of `module`.
    pub fn for_module(ops: Arc<OpRegistry>, module: &IrModule) -> Self {
        Self {
            ops,
            state: Mutex::new(CacheState::default()),
            names: Mutex::new(NameSupply::for_module(module)),
        }
    }

    pub fn ops(&self) -> &OpRegistry {
        &self.ops
    }

    /// Lowers `key`, passing every generated name through `mangle_fn` first.
    pub fn lower(
        &self,
        key: &CacheKey,
        mangle_fn: &dyn Fn(&str) -> String,
    ) -> LowerResult<Arc<CompiledArtifact>> {
        self.lower_in(KeySpace::Main, key, mangle_fn)
    }

    pub fn lower_for_module(
        &self,
        key: &CacheKey,
        module_name: &str,
    ) -> LowerResult<Arc<CompiledArtifact>> {
        self.lower(key, &|name| mangle(module_name, name))
    }

    /// Lowers the shape function of `key`; keys here normally carry the host target.
    pub fn lower_shape_func(&self, key: &CacheKey) -> LowerResult<Arc<CompiledArtifact>> {
        self.lower_in(KeySpace::ShapeFunc, key, &|name| name.to_string())
    }

    fn lower_in(
        &self,
        space: KeySpace,
        key: &CacheKey,
        mangle_fn: &dyn Fn(&str) -> String,
    ) -> LowerResult<Arc<CompiledArtifact>> {
        debug!(
            "lowering {}for target {}:\n{}",
            if space == KeySpace::ShapeFunc {
                "dynamic shape function "
            } else {
                ""
            },
            key.target(),
            key.source()
        );
        let gate = {
            let mut state = self.state.lock().expect("te compiler cache poisoned");
            if let Some(err) = state.failure(space, key) {
                return Err(err);
            }
            match state.space(space).get_mut(key) {
                Some(entry) => {
                    entry.use_count += 1;
                    if let Some(artifact) = &entry.artifact {
                        debug!("already lowered to name {}", artifact.prim_fn_var);
                        return Ok(Arc::clone(artifact));
                    }
                    Arc::clone(&entry.gate)
                }
                None => {
                    let entry = CacheEntry::new(match space {
                        KeySpace::Main => 1,
                        KeySpace::ShapeFunc => 0,
                    });
                    let gate = Arc::clone(&entry.gate);
                    state.space(space).insert(key.clone(), entry);
                    gate
                }
            }
        };
        let _gate_lock = gate.lock().expect("te compiler gate poisoned");

        {
            let mut state = self.state.lock().expect("te compiler cache poisoned");
            if let Some(err) = state.failure(space, key) {
                return Err(err);
            }
            if let Some(artifact) = state
                .space(space)
                .get(key)
                .and_then(|entry| entry.artifact.clone())
            {
                return Ok(artifact);
            }
            state.current_key = Some(key.clone());
        }

        let lowered = match space {
            KeySpace::Main => self.build(key, mangle_fn),
            KeySpace::ShapeFunc => {
                let mut fresh = |name: &str| {
                    self.names
                        .lock()
                        .expect("te compiler name supply poisoned")
                        .fresh(&mangle_fn(name))
                };
                schedule::lower_shape_func(&self.ops, key.source(), key.target(), &mut fresh)
            }
        }
        .map_err(|err| LowerError::lowering(key.source(), key.target(), err));
        let artifact = match lowered {
            Ok(artifact) => Arc::new(artifact),
            Err(err) => {
                let mut state = self.state.lock().expect("te compiler cache poisoned");
                state.space(space).remove(key);
                state.failures.insert((space, key.clone()), err.clone());
                return Err(err);
            }
        };
        debug!(
            "lowered to name {} with {} definition(s)",
            artifact.prim_fn_var,
            artifact.funcs.len()
        );

        let mut state = self.state.lock().expect("te compiler cache poisoned");
        if space == KeySpace::Main && artifact.is_external() {
            if let Some(compiler) = &key.source().attrs.compiler {
                state
                    .device_contexts
                    .insert(artifact.prim_fn_var.clone(), compiler.clone());
            }
        }
        match state.space(space).get_mut(key) {
            Some(entry) => entry.artifact = Some(Arc::clone(&artifact)),
            None => {
                // Cleared while lowering; keep the result reachable for this caller only.
                debug!("cache cleared while lowering {}", artifact.prim_fn_var);
            }
        }
        Ok(artifact)
    }

    fn build(
        &self,
        key: &CacheKey,
        mangle_fn: &dyn Fn(&str) -> String,
    ) -> LowerResult<CompiledArtifact> {
        let source = key.source();
        if let Some(compiler) = &source.attrs.compiler {
            // External functions keep their symbol verbatim; the toolchain binds it.
            let symbol = source.attrs.global_symbol.clone().ok_or_else(|| {
                LowerError::MissingGlobalSymbol {
                    function: source.to_string(),
                }
            })?;
            let prim_fn_var = GlobalVar::new(symbol);
            let mut funcs = LoweredModule::new();
            funcs.add(prim_fn_var.clone(), LoweredFunc::External(source.clone()));
            debug!("deferring {prim_fn_var} to external codegen `{compiler}`");
            return Ok(CompiledArtifact {
                target: Target::ext_dev(),
                prim_fn_var,
                inputs: Vec::new(),
                outputs: Vec::new(),
                schedule: None,
                prim_func: None,
                shape_func_param_states: Vec::new(),
                funcs,
            });
        }

        let mut fresh = |name: &str| {
            self.names
                .lock()
                .expect("te compiler name supply poisoned")
                .fresh(&mangle_fn(name))
        };
        schedule::lower_primitive(&self.ops, source, key.target(), &mut fresh)
    }

    /// Lowers `key` and builds an invocable function for it, at most once per entry.
    pub fn jit(&self, key: &CacheKey, codegen: &dyn CodegenBackend) -> LowerResult<PackedFunc> {
        let artifact = self.lower(key, &|name| name.to_string())?;
        let gate = {
            let state = self.state.lock().expect("te compiler cache poisoned");
            match state.entries.get(key) {
                Some(entry) => {
                    if let Some(packed) = &entry.packed_func {
                        return Ok(packed.clone());
                    }
                    Arc::clone(&entry.gate)
                }
                None => Arc::new(Mutex::new(())),
            }
        };
        let _gate_lock = gate.lock().expect("te compiler gate poisoned");
        if let Some(packed) = self
            .state
            .lock()
            .expect("te compiler cache poisoned")
            .entries
            .get(key)
            .and_then(|entry| entry.packed_func.clone())
        {
            return Ok(packed);
        }

        let module = artifact.targeted_funcs();
        let runtime = codegen.build(&module, &artifact.target)?;
        let symbol = artifact.prim_fn_var.name().to_string();
        if !runtime.has_function(&symbol, false) {
            return Err(LowerError::MissingSymbol {
                symbol,
                target: artifact.target.to_string(),
            });
        }
        let packed = PackedFunc {
            module: runtime,
            symbol,
        };
        if let Some(entry) = self
            .state
            .lock()
            .expect("te compiler cache poisoned")
            .entries
            .get_mut(key)
        {
            entry.packed_func = Some(packed.clone());
        }
        Ok(packed)
    }

    /// Every compiled low-level function, annotated with its target.
    /// External placeholders are not included.
    pub fn lowered_functions(&self) -> LoweredModule {
        let state = self.state.lock().expect("te compiler cache poisoned");
        let mut module = LoweredModule::new();
        let artifacts = state
            .entries
            .values()
            .chain(state.shape_entries.values())
            .filter_map(|entry| entry.artifact.as_ref());
        for artifact in artifacts {
            for (global, func) in artifact.targeted_funcs().iter() {
                module.add(global.clone(), func.clone());
            }
        }
        module
    }

    pub fn device_contexts(&self) -> BTreeMap<GlobalVar, String> {
        self.state
            .lock()
            .expect("te compiler cache poisoned")
            .device_contexts
            .clone()
    }

    /// Lowered name to number of lookups, for the main cache.
    pub fn op_weights(&self) -> BTreeMap<String, usize> {
        self.state
            .lock()
            .expect("te compiler cache poisoned")
            .entries
            .values()
            .filter_map(|entry| {
                entry
                    .artifact
                    .as_ref()
                    .map(|artifact| (artifact.prim_fn_var.name().to_string(), entry.use_count))
            })
            .collect()
    }

    pub fn entries(&self) -> Vec<CacheEntrySnapshot> {
        self.state
            .lock()
            .expect("te compiler cache poisoned")
            .entries
            .iter()
            .map(|(key, entry)| CacheEntrySnapshot {
                key: key.clone(),
                use_count: entry.use_count,
                artifact: entry.artifact.clone(),
            })
            .collect()
    }

    /// The key most recently picked up for lowering.
    pub fn current_key(&self) -> Option<CacheKey> {
        self.state
            .lock()
            .expect("te compiler cache poisoned")
            .current_key
            .clone()
    }

    pub fn use_count(&self, key: &CacheKey) -> Option<usize> {
        self.state
            .lock()
            .expect("te compiler cache poisoned")
            .entries
            .get(key)
            .map(|entry| entry.use_count)
    }

    pub fn shape_func_use_count(&self, key: &CacheKey) -> Option<usize> {
        self.state
            .lock()
            .expect("te compiler cache poisoned")
            .shape_entries
            .get(key)
            .map(|entry| entry.use_count)
    }

    /// Drops every entry. No lowering may be in flight.
    pub fn clear(&self) {
        let mut state = self.state.lock().expect("te compiler cache poisoned");
        state.entries.clear();
        state.shape_entries.clear();
        state.failures.clear();
    }

    pub(crate) fn external_entries(&self) -> Vec<(CacheKey, Arc<CompiledArtifact>)> {
        let state = self.state.lock().expect("te compiler cache poisoned");
        let mut pending = state
            .entries
            .iter()
            .filter(|(key, _)| key.source().is_external())
            .filter_map(|(key, entry)| {
                entry
                    .artifact
                    .as_ref()
                    .map(|artifact| (key.clone(), Arc::clone(artifact)))
            })
            .collect::<Vec<_>>();
        pending.sort_by(|a, b| a.1.prim_fn_var.cmp(&b.1.prim_fn_var));
        pending
    }

    pub(crate) fn remove_entries(&self, keys: &[CacheKey]) {
        let mut state = self.state.lock().expect("te compiler cache poisoned");
        for key in keys {
            state.entries.remove(key);
        }
    }
}

impl Default for TeCompiler {
    fn default() -> Self {
        Self::new(Arc::new(OpRegistry::builtin()))
    }
}
