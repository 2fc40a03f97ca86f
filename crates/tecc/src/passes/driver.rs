use std::collections::BTreeMap;

use log::debug;

use crate::compiler::{add_extern_stubs, ExternalCodegenRegistry, TeCompiler};
use crate::env;
use crate::error::{LowerError, LowerResult};
use crate::ir::{BaseFunc, IrModule};
use crate::passes::lower_te::{LowerTensorExprRewriter, ProcessedFunction};
use crate::target::{Target, VirtualDevice};
use crate::tir::{LoweredFunc, LoweredModule};

/// Settings for one run of [`lower_te`].
#[derive(Debug, Clone)]
pub struct LowerTeConfig {
    /// Prefix applied to every generated global name.
    pub module_name: String,
    /// Where shape functions run.
    pub host_device: VirtualDevice,
    pub workspace_byte_alignment: u64,
    /// Record per-function use counts on the output module.
    pub capture_op_weights: bool,
}

impl LowerTeConfig {
    pub fn new(module_name: impl Into<String>, host_target: Target) -> Self {
        Self {
            module_name: module_name.into(),
            host_device: VirtualDevice::new(host_target),
            workspace_byte_alignment: env::workspace_alignment(),
            capture_op_weights: env::capture_op_weights(),
        }
    }

    pub fn host_target(&self) -> Target {
        self.host_device
            .target
            .clone()
            .unwrap_or_else(|| Target::new("llvm"))
    }
}

impl Default for LowerTeConfig {
    fn default() -> Self {
        Self::new("default", Target::new("llvm"))
    }
}

/// Lowers every primitive and external call reachable from the module's
/// graph functions and returns the rewritten module.
///
/// The output holds the rewritten graph functions, symbol-only stubs for
/// externally compiled functions, the low-level functions this run called,
/// the runtime units returned by external toolchains and the device contexts
/// of the external functions it called. `process_fn` observes each distinct
/// lowered callee once. Artifacts other runs left in `compiler` stay out of
/// the output, so one compiler can serve several modules and a rewritten
/// module can be passed through again.
pub fn lower_te<F>(
    module: &IrModule,
    compiler: &TeCompiler,
    codegens: &ExternalCodegenRegistry,
    config: &LowerTeConfig,
    process_fn: F,
) -> LowerResult<IrModule>
where
    F: FnMut(&ProcessedFunction) -> LowerResult<()>,
{
    let mut rewriter = LowerTensorExprRewriter::new(
        module,
        compiler,
        &config.module_name,
        config.host_target(),
        process_fn,
    );

    let mut updates = Vec::new();
    for (global, func) in module.functions() {
        let BaseFunc::Relay(func) = func else {
            continue;
        };
        if func.is_primitive() || func.is_external() || func.attrs.external_symbol.is_some() {
            continue;
        }
        debug!("lowering calls in {global}");
        updates.push((global.clone(), rewriter.rewrite_function(global.name(), func)?));
    }
    let reached = rewriter.into_reached();

    let mut out = module.clone();
    for (global, func) in updates {
        out.add(global, BaseFunc::Relay(func));
    }

    add_extern_stubs(&mut out, reached.lowered.values().map(|artifact| artifact.as_ref()));

    for (global, func) in reached.lowered_functions().prim_funcs() {
        match out.lookup(global) {
            None => {}
            Some(BaseFunc::Prim(existing)) if existing == func => continue,
            Some(_) => {
                return Err(LowerError::DuplicateBinding {
                    name: global.name().to_string(),
                })
            }
        }
        out.add(global.clone(), BaseFunc::Prim(func.clone()));
    }

    if config.capture_op_weights {
        let weights = compiler.op_weights();
        for global in reached.lowered.keys() {
            if let Some(weight) = weights.get(global.name()) {
                out.attrs.op_weights.insert(global.name().to_string(), *weight);
            }
        }
    }

    let external_mods = compiler.lower_external_functions(codegens)?;
    debug!("collected {} external runtime unit(s)", external_mods.len());
    out.attrs.external_mods.extend(external_mods);

    let contexts = compiler.device_contexts();
    for global in reached.lowered.keys() {
        let Some(context) = contexts.get(global) else {
            continue;
        };
        match out.attrs.device_contexts.get(global) {
            None => {}
            Some(existing) if existing == context => continue,
            Some(_) => {
                return Err(LowerError::DuplicateBinding {
                    name: global.name().to_string(),
                })
            }
        }
        out.attrs
            .device_contexts
            .insert(global.clone(), context.clone());
    }

    Ok(out)
}

/// Groups the module's low-level functions by the target they were lowered for.
pub fn per_target_modules(module: &IrModule) -> LowerResult<BTreeMap<Target, LoweredModule>> {
    let mut per_target: BTreeMap<Target, LoweredModule> = BTreeMap::new();
    for (global, func) in module.functions() {
        let BaseFunc::Prim(prim) = func else {
            continue;
        };
        let target = prim
            .target()
            .cloned()
            .ok_or_else(|| LowerError::MissingAnnotation {
                annotation: "target",
                function: global.name().to_string(),
            })?;
        per_target
            .entry(target)
            .or_default()
            .add(global.clone(), LoweredFunc::Prim(prim.clone()));
    }
    Ok(per_target)
}
