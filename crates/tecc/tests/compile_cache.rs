use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tecc::compiler::{mangle, NameSupply};
use tecc::ir::{
    BaseFunc, DType, Dimension, Expr, FuncAttrs, Function, IrModule, Shape, TensorType, Type, Var,
};
use tecc::op::{DirectLowering, OpDef, OpPattern, OpRegistry};
use tecc::runtime::{CodegenBackend, RuntimeModule};
use tecc::tir::{calculate_workspace_bytes, Buffer, LoweredModule, PrimFunc, Stmt};
use tecc::{CacheKey, LowerError, LowerResult, Target, TeCompiler};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn f32(dims: &[u64]) -> Type {
    Type::tensor(DType::F32, dims)
}

fn add_relu() -> Function {
    let x = Var::new("x", f32(&[4]));
    let y = Var::new("y", f32(&[4]));
    let sum = Expr::call(Expr::op("add"), vec![Expr::var(&x), Expr::var(&y)]).with_type(f32(&[4]));
    let body = Expr::call(Expr::op("nn.relu"), vec![sum]).with_type(f32(&[4]));
    Function::new(vec![x, y], body, f32(&[4])).with_attrs(FuncAttrs::primitive())
}

fn single_op(op: &str) -> Function {
    let x = Var::new("x", f32(&[8]));
    let body = Expr::call(Expr::op(op), vec![Expr::var(&x)]).with_type(f32(&[8]));
    Function::new(vec![x], body, f32(&[8])).with_attrs(FuncAttrs::primitive())
}

fn llvm() -> Target {
    Target::new("llvm")
}

#[derive(Debug)]
struct StubModule {
    symbols: Vec<String>,
}

impl RuntimeModule for StubModule {
    fn type_key(&self) -> &str {
        "stub"
    }

    fn has_function(&self, symbol: &str, _query_imports: bool) -> bool {
        self.symbols.iter().any(|exported| exported == symbol)
    }
}

struct StubBackend {
    builds: AtomicUsize,
    export: bool,
}

impl StubBackend {
    fn new(export: bool) -> Self {
        Self {
            builds: AtomicUsize::new(0),
            export,
        }
    }
}

impl CodegenBackend for StubBackend {
    fn build(&self, module: &LoweredModule, _target: &Target) -> LowerResult<Arc<dyn RuntimeModule>> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        let symbols = if self.export {
            module.global_vars().map(|global| global.name().to_string()).collect()
        } else {
            Vec::new()
        };
        let runtime: Arc<dyn RuntimeModule> = Arc::new(StubModule { symbols });
        Ok(runtime)
    }
}

#[test]
fn structurally_equal_functions_share_one_artifact() {
    init_logging();
    let compiler = TeCompiler::default();
    let first = compiler
        .lower_for_module(&CacheKey::new(add_relu(), llvm()), "tvmgen_default")
        .expect("lower");
    let second = compiler
        .lower_for_module(&CacheKey::new(add_relu(), llvm()), "tvmgen_default")
        .expect("lower again");

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.prim_fn_var.name(), "tvmgen_default_fused_add_nn_relu");
    assert_eq!(
        compiler.use_count(&CacheKey::new(add_relu(), llvm())),
        Some(2)
    );
    assert_eq!(compiler.entries().len(), 1);
}

#[test]
fn use_count_tracks_every_lookup() {
    let compiler = TeCompiler::default();
    let key = CacheKey::new(add_relu(), llvm());
    for _ in 0..5 {
        compiler.lower(&key, &|name| name.to_string()).expect("lower");
    }
    assert_eq!(compiler.use_count(&key), Some(5));

    let weights = compiler.op_weights();
    assert_eq!(weights.get("fused_add_nn_relu"), Some(&5));
}

#[test]
fn targets_partition_the_cache_and_names_stay_unique() {
    let compiler = TeCompiler::default();
    let cpu = compiler
        .lower_for_module(&CacheKey::new(add_relu(), llvm()), "mod")
        .expect("cpu");
    let gpu = compiler
        .lower_for_module(&CacheKey::new(add_relu(), Target::new("cuda")), "mod")
        .expect("gpu");

    assert!(!Arc::ptr_eq(&cpu, &gpu));
    assert_eq!(cpu.prim_fn_var.name(), "mod_fused_add_nn_relu");
    assert_eq!(gpu.prim_fn_var.name(), "mod_fused_add_nn_relu_1");
    assert_eq!(gpu.target, Target::new("cuda"));

    let lowered = compiler.lowered_functions();
    assert_eq!(lowered.len(), 2);
    for (_, func) in lowered.prim_funcs() {
        assert!(func.target().is_some());
    }
}

#[test]
fn concurrent_requests_lower_a_key_once() {
    init_logging();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let direct: DirectLowering = Arc::new(move |_: &Function, _: &Target| -> Option<PrimFunc> {
        counter.fetch_add(1, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(20));
        Some(PrimFunc::new(
            vec![Buffer::new("x", DType::F32, Shape::fixed(&[8]))],
            Stmt::Nop,
        ))
    });
    let ops = OpRegistry::builtin();
    ops.register(OpDef::new("test.slow", OpPattern::Opaque).with_direct_lowering(direct));
    let compiler = Arc::new(TeCompiler::new(Arc::new(ops)));
    let func = single_op("test.slow");

    let artifacts = thread::scope(|scope| {
        let handles = (0..8)
            .map(|_| {
                let compiler = Arc::clone(&compiler);
                let key = CacheKey::new(func.clone(), llvm());
                scope.spawn(move || compiler.lower_for_module(&key, "mod").expect("lower"))
            })
            .collect::<Vec<_>>();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("worker panicked"))
            .collect::<Vec<_>>()
    });

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    for artifact in &artifacts[1..] {
        assert!(Arc::ptr_eq(&artifacts[0], artifact));
    }
    assert_eq!(
        compiler.use_count(&CacheKey::new(func.clone(), llvm())),
        Some(8)
    );
    assert!(artifacts[0].prim_func.is_some());
    assert!(artifacts[0].schedule.is_none());
}

#[test]
fn shape_function_cache_counts_from_zero() {
    let n = Dimension::dynamic("n");
    let dyn_ty = Type::Tensor(TensorType::new(DType::F32, Shape::new(vec![n])));
    let x = Var::new("x", dyn_ty.clone());
    let body = Expr::call(Expr::op("nn.relu"), vec![Expr::var(&x)]).with_type(dyn_ty.clone());
    let func = Function::new(vec![x], body, dyn_ty).with_attrs(FuncAttrs::primitive());

    let compiler = TeCompiler::default();
    let key = CacheKey::new(func, llvm());
    let first = compiler.lower_shape_func(&key).expect("shape func");
    assert_eq!(compiler.shape_func_use_count(&key), Some(0));
    let second = compiler.lower_shape_func(&key).expect("shape func again");
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(compiler.shape_func_use_count(&key), Some(1));
    assert_eq!(compiler.use_count(&key), None);

    assert_eq!(first.prim_fn_var.name(), "fused_nn_relu_shape_func");
    assert_eq!(first.shape_func_param_states.len(), 1);
    assert_eq!(first.inputs[0].name, "x_shape");
    assert_eq!(first.outputs[0].ty, TensorType::fixed(DType::I64, &[1]));
}

#[test]
fn intermediates_become_scratch_allocations() {
    let compiler = TeCompiler::default();
    let artifact = compiler
        .lower(&CacheKey::new(add_relu(), llvm()), &|name| name.to_string())
        .expect("lower");
    let prim = artifact
        .funcs
        .get(&artifact.prim_fn_var)
        .and_then(|func| func.as_prim())
        .expect("primary function");

    assert_eq!(prim.params, vec!["x", "y", "T_nn_relu"]);
    match &prim.body {
        Stmt::Allocate { buffer, body, .. } => {
            assert_eq!(buffer, "T_add");
            assert!(matches!(body.as_ref(), Stmt::Seq(stmts) if stmts.len() == 2));
        }
        other => panic!("expected a scratch allocation, got {other:?}"),
    }
    let schedule = artifact.schedule.as_ref().expect("schedule");
    assert_eq!(schedule.op_names().collect::<Vec<_>>(), vec!["add", "nn.relu"]);

    assert_eq!(calculate_workspace_bytes(prim, 64), 64);
    assert_eq!(calculate_workspace_bytes(prim, 1), 16);
}

#[test]
fn helper_operators_produce_extra_functions() {
    let compiler = TeCompiler::default();
    let artifact = compiler
        .lower_for_module(&CacheKey::new(single_op("nn.contrib_extern"), llvm()), "mod")
        .expect("lower");

    let names = artifact
        .all_prim_fn_vars()
        .iter()
        .map(|global| global.name().to_string())
        .collect::<Vec<_>>();
    assert_eq!(names.len(), 2);
    assert!(names.contains(&"mod_fused_nn_contrib_extern".to_string()));
    assert!(names.contains(&"mod_fused_nn_contrib_extern_nn_contrib_extern".to_string()));

    let prim = artifact
        .funcs
        .get(&artifact.prim_fn_var)
        .and_then(|func| func.as_prim())
        .expect("primary function");
    assert!(matches!(&prim.body, Stmt::Seq(stmts) if matches!(stmts[0], Stmt::CallPrim { .. })));
}

#[test]
fn external_functions_become_placeholders() {
    let mut func = single_op("nn.relu");
    func.attrs = FuncAttrs::external("ccompiler", "ccompiler_main_0");

    let compiler = TeCompiler::default();
    let artifact = compiler
        .lower_for_module(&CacheKey::new(func, llvm()), "tvmgen_default")
        .expect("lower");

    assert!(artifact.is_external());
    assert_eq!(artifact.target, Target::ext_dev());
    assert_eq!(artifact.prim_fn_var.name(), "ccompiler_main_0");
    assert!(artifact.schedule.is_none());
    assert_eq!(
        compiler.device_contexts().get(&artifact.prim_fn_var).map(String::as_str),
        Some("ccompiler")
    );
    assert!(compiler.lowered_functions().is_empty());
}

#[test]
fn add_externs_swaps_tagged_definitions_for_stubs() {
    let mut func = single_op("nn.relu");
    func.attrs = FuncAttrs::external("ccompiler", "ccompiler_main_0");
    let mut module = IrModule::new();
    let tagged = module.add_relay("ccompiler_main_0", func.clone());
    let unused = module.add_relay(
        "ccompiler_main_1",
        Function {
            attrs: FuncAttrs::external("ccompiler", "ccompiler_main_1"),
            ..func.clone()
        },
    );

    let compiler = TeCompiler::default();
    compiler
        .lower_for_module(&CacheKey::new(func, llvm()), "tvmgen_default")
        .expect("lower");
    compiler.add_externs(&mut module);

    let stub = module
        .lookup(&tagged)
        .and_then(BaseFunc::as_relay)
        .expect("stub");
    assert_eq!(stub.attrs.external_symbol.as_deref(), Some("ccompiler_main_0"));
    assert!(!stub.is_external());
    assert!(!module.contains(&unused));
}

#[test]
fn external_function_without_symbol_fails() {
    let mut func = single_op("nn.relu");
    func.attrs.compiler = Some("ccompiler".to_string());

    let compiler = TeCompiler::default();
    let err = compiler
        .lower_for_module(&CacheKey::new(func, llvm()), "mod")
        .expect_err("no global symbol");
    match err {
        LowerError::Lowering { source, .. } => {
            assert!(matches!(*source, LowerError::MissingGlobalSymbol { .. }))
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn failed_lowering_is_remembered() {
    let ops = Arc::new(OpRegistry::builtin());
    let compiler = TeCompiler::new(Arc::clone(&ops));
    let key = CacheKey::new(single_op("test.late"), llvm());

    let first = compiler
        .lower_for_module(&key, "mod")
        .expect_err("unregistered op");
    assert!(compiler.entries().is_empty());
    assert_eq!(compiler.use_count(&key), None);

    // A second attempt would now succeed; the recorded failure is returned instead.
    ops.register(OpDef::new("test.late", OpPattern::ElemWise));
    let second = compiler
        .lower_for_module(&key, "mod")
        .expect_err("failure is kept");
    assert_eq!(first.to_string(), second.to_string());
    assert!(matches!(
        second,
        LowerError::Lowering { ref source, .. }
            if matches!(**source, LowerError::UnknownOp { ref op } if op == "test.late")
    ));
    assert!(compiler.entries().is_empty());
    assert!(compiler.op_weights().is_empty());

    compiler.clear();
    compiler
        .lower_for_module(&key, "mod")
        .expect("lowers once the failure is cleared");
    assert_eq!(compiler.use_count(&key), Some(1));
}

#[test]
fn unknown_operator_is_reported_with_context() {
    let compiler = TeCompiler::default();
    let err = compiler
        .lower_for_module(&CacheKey::new(single_op("nn.mystery"), llvm()), "mod")
        .expect_err("unknown op");
    match err {
        LowerError::Lowering { source, target, .. } => {
            assert_eq!(target, "llvm");
            assert!(matches!(*source, LowerError::UnknownOp { ref op } if op == "nn.mystery"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn jit_builds_each_entry_once() {
    let compiler = TeCompiler::default();
    let backend = StubBackend::new(true);
    let key = CacheKey::new(add_relu(), llvm());

    let first = compiler.jit(&key, &backend).expect("jit");
    let second = compiler.jit(&key, &backend).expect("jit again");
    assert_eq!(first.symbol(), "fused_add_nn_relu");
    assert_eq!(second.symbol(), first.symbol());
    assert_eq!(backend.builds.load(Ordering::SeqCst), 1);
}

#[test]
fn jit_rejects_units_missing_the_entry_symbol() {
    let compiler = TeCompiler::default();
    let backend = StubBackend::new(false);
    let err = compiler
        .jit(&CacheKey::new(add_relu(), llvm()), &backend)
        .expect_err("symbol missing");
    assert!(matches!(err, LowerError::MissingSymbol { ref symbol, .. } if symbol == "fused_add_nn_relu"));
}

#[test]
fn clear_forgets_entries_but_not_names() {
    let compiler = TeCompiler::default();
    let key = CacheKey::new(add_relu(), llvm());
    let before = compiler.lower_for_module(&key, "mod").expect("lower");
    assert!(compiler.current_key().is_some());

    compiler.clear();
    assert_eq!(compiler.use_count(&key), None);

    let after = compiler.lower_for_module(&key, "mod").expect("relower");
    assert!(!Arc::ptr_eq(&before, &after));
    assert_eq!(after.prim_fn_var.name(), "mod_fused_add_nn_relu_1");
}

#[test]
fn name_supply_appends_counters() {
    let mut names = NameSupply::new();
    assert_eq!(names.fresh("fused.add"), "fused_add");
    assert_eq!(names.fresh("fused.add"), "fused_add_1");
    assert_eq!(names.fresh("fused_add"), "fused_add_2");
    assert_eq!(mangle("", "fused_add"), "fused_add");
    assert_eq!(mangle("tvmgen_default", "fused_add"), "tvmgen_default_fused_add");
}

#[test]
fn long_fused_names_are_truncated() {
    let mut body = None;
    let x = Var::new("x", f32(&[4]));
    for _ in 0..20 {
        let input = body.take().unwrap_or_else(|| Expr::var(&x));
        body = Some(Expr::call(Expr::op("nn.relu"), vec![input]).with_type(f32(&[4])));
    }
    let func = Function::new(vec![x], body.expect("body"), f32(&[4])).with_attrs(FuncAttrs::primitive());

    let compiler = TeCompiler::default();
    let artifact = compiler
        .lower(&CacheKey::new(func, llvm()), &|name| name.to_string())
        .expect("lower");
    let name = artifact.prim_fn_var.name();
    assert!(name.starts_with("fused_nn_relu_nn_relu"));
    assert!(name.len() <= 80 + 18);
    assert!(name.ends_with('_'));
}
