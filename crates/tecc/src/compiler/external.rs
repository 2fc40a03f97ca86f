//! Batched dispatch of externally tagged functions to their toolchains.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use log::{debug, warn};

use crate::compiler::artifact::CompiledArtifact;
use crate::compiler::cache::TeCompiler;
use crate::error::{LowerError, LowerResult};
use crate::ir::{BaseFunc, FuncAttrs, Function, GlobalVar, IrModule};
use crate::runtime::RuntimeModule;
use crate::tir::LoweredFunc;

pub const EXTERNAL_CODEGEN_PREFIX: &str = "relay.ext.";

/// Compiles one tagged function. `None` means the toolchain emitted its
/// artifacts out of band.
pub type ExternalCodegenFn =
    Arc<dyn Fn(&Function) -> LowerResult<Option<Arc<dyn RuntimeModule>>> + Send + Sync>;

pub fn external_codegen_name(compiler: &str) -> String {
    format!("{EXTERNAL_CODEGEN_PREFIX}{compiler}")
}

/// Toolchain callbacks keyed by their registered name (`relay.ext.<compiler>`).
#[derive(Default)]
pub struct ExternalCodegenRegistry {
    codegens: RwLock<HashMap<String, ExternalCodegenFn>>,
}

impl ExternalCodegenRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: impl Into<String>, codegen: ExternalCodegenFn) {
        self.codegens
            .write()
            .expect("external codegen registry poisoned")
            .insert(name.into(), codegen);
    }

    /// Registers `codegen` under the conventional name for `compiler`.
    pub fn register_compiler(&self, compiler: &str, codegen: ExternalCodegenFn) {
        self.register(external_codegen_name(compiler), codegen);
    }

    pub fn get(&self, name: &str) -> Option<ExternalCodegenFn> {
        self.codegens
            .read()
            .expect("external codegen registry poisoned")
            .get(name)
            .cloned()
    }

    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .codegens
            .read()
            .expect("external codegen registry poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

impl fmt::Debug for ExternalCodegenRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternalCodegenRegistry")
            .field("codegens", &self.list())
            .finish()
    }
}

impl TeCompiler {
    /// Compiles every deferred external function and drops it from the cache.
    pub fn lower_external_functions(
        &self,
        registry: &ExternalCodegenRegistry,
    ) -> LowerResult<Vec<Arc<dyn RuntimeModule>>> {
        let pending = self.external_entries();
        let mut modules = Vec::new();
        let mut flushed = Vec::with_capacity(pending.len());

        for (key, _) in &pending {
            let source = key.source();
            let Some(compiler) = source.attrs.compiler.clone() else {
                continue;
            };
            let symbol = source.attrs.global_symbol.clone().ok_or_else(|| {
                LowerError::MissingGlobalSymbol {
                    function: source.to_string(),
                }
            })?;
            debug!("using external codegen `{compiler}` for `{symbol}`:\n{source}");

            let ext_name = external_codegen_name(&compiler);
            let codegen = registry
                .get(&ext_name)
                .ok_or_else(|| LowerError::MissingExternalCodegen {
                    name: ext_name.clone(),
                    compiler: compiler.clone(),
                })?;

            let mut stripped = source.clone();
            stripped.attrs.compiler = None;
            match codegen(&stripped)? {
                Some(module) => {
                    if !module.has_function(&symbol, true) {
                        debug!(
                            "runtime unit from external codegen `{compiler}` does not define `{symbol}`"
                        );
                    }
                    modules.push(module);
                }
                None => {
                    warn!("no external runtime unit was generated by external codegen `{compiler}`");
                }
            }
            flushed.push(key.clone());
        }

        self.remove_entries(&flushed);
        Ok(modules)
    }

    /// Replaces externally tagged definitions in `module` with symbol-only stubs.
    pub fn add_externs(&self, module: &mut IrModule) {
        let pending = self.external_entries();
        add_extern_stubs(module, pending.iter().map(|(_, artifact)| artifact.as_ref()));
    }
}

/// Drops externally tagged definitions from `module` and binds a stub for
/// every external placeholder of `artifacts`.
pub(crate) fn add_extern_stubs<'a>(
    module: &mut IrModule,
    artifacts: impl IntoIterator<Item = &'a CompiledArtifact>,
) {
    let tagged = module
        .functions()
        .filter(|(_, func)| matches!(func, BaseFunc::Relay(func) if func.is_external()))
        .map(|(global, _)| global.clone())
        .collect::<Vec<GlobalVar>>();
    for global in &tagged {
        module.remove(global);
    }

    for artifact in artifacts {
        for (global, func) in artifact.funcs.iter() {
            if let LoweredFunc::External(func) = func {
                let stub = Function::new(
                    func.params.clone(),
                    func.body.clone(),
                    func.ret_type.clone(),
                )
                .with_attrs(FuncAttrs {
                    external_symbol: Some(global.name().to_string()),
                    ..FuncAttrs::default()
                });
                module.add(global.clone(), BaseFunc::Relay(stub));
            }
        }
    }
}
