use std::sync::{Arc, Mutex};

use tecc::compiler::ExternalCodegenFn;
use tecc::ir::{
    BaseFunc, DType, Dimension, Expr, ExprKind, FuncAttrs, Function, GlobalVar, IrModule,
    OpAttrs, Shape, ShapeFuncParamState, TensorType, Type, Var,
};
use tecc::op::OpRegistry;
use tecc::passes::{ProcessedSource, ScopeStack};
use tecc::runtime::RuntimeModule;
use tecc::tir::{PrimFunc, Stmt};
use tecc::{
    lower_te, per_target_modules, DeviceType, ExternalCodegenRegistry, LowerError, LowerResult,
    LowerTeConfig, ProcessedFunction, Target, TeCompiler, VirtualDevice,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn f32(dims: &[u64]) -> Type {
    Type::tensor(DType::F32, dims)
}

fn llvm() -> Target {
    Target::new("llvm")
}

fn config() -> LowerTeConfig {
    LowerTeConfig::new("tvmgen_default", llvm())
}

fn add_relu() -> Function {
    let x = Var::new("x", f32(&[4]));
    let y = Var::new("y", f32(&[4]));
    let sum = Expr::call(Expr::op("add"), vec![Expr::var(&x), Expr::var(&y)]).with_type(f32(&[4]));
    let body = Expr::call(Expr::op("nn.relu"), vec![sum]).with_type(f32(&[4]));
    Function::new(vec![x, y], body, f32(&[4])).with_attrs(FuncAttrs::primitive())
}

fn relu_with_attrs(attrs: FuncAttrs) -> Function {
    let x = Var::new("x", f32(&[4]));
    let body = Expr::call(Expr::op("nn.relu"), vec![Expr::var(&x)]).with_type(f32(&[4]));
    Function::new(vec![x], body, f32(&[4])).with_attrs(attrs)
}

fn on_llvm() -> FuncAttrs {
    FuncAttrs::default().with_result_device(VirtualDevice::new(llvm()))
}

/// `main(a, b) = callee(a, b)` placed on the CPU.
fn main_calling(callee: Expr) -> Function {
    let a = Var::new("a", f32(&[4]));
    let b = Var::new("b", f32(&[4]));
    let call = Expr::call(callee, vec![Expr::var(&a), Expr::var(&b)]).with_type(f32(&[4]));
    Function::new(vec![a, b], call, f32(&[4])).with_attrs(on_llvm())
}

fn module_with_main(main: Function) -> IrModule {
    let mut module = IrModule::new();
    module.add_relay("main", main);
    module
}

fn main_body(module: &IrModule) -> Expr {
    module
        .lookup_name("main")
        .and_then(BaseFunc::as_relay)
        .map(|func| func.body.clone())
        .expect("main")
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

fn recording_codegen(seen: Arc<Mutex<Vec<Function>>>, emit: bool) -> ExternalCodegenFn {
    Arc::new(
        move |func: &Function| -> LowerResult<Option<Arc<dyn RuntimeModule>>> {
            seen.lock().expect("seen poisoned").push(func.clone());
            if !emit {
                return Ok(None);
            }
            let symbol = func.attrs.global_symbol.clone().unwrap_or_default();
            let module: Arc<dyn RuntimeModule> = Arc::new(StubModule {
                symbols: vec![symbol],
            });
            Ok(Some(module))
        },
    )
}

#[test]
fn primitive_calls_become_lowered_calls() {
    init_logging();
    let module = module_with_main(main_calling(Expr::function(add_relu())));
    let compiler = TeCompiler::for_module(Arc::new(OpRegistry::builtin()), &module);
    let mut processed = Vec::new();
    let out = lower_te(
        &module,
        &compiler,
        &ExternalCodegenRegistry::new(),
        &config(),
        |func| {
            processed.push(func.clone());
            Ok(())
        },
    )
    .expect("lower_te");

    let body = main_body(&out);
    let ExprKind::CallLowered(call) = body.kind() else {
        panic!("expected a lowered call, got {body}");
    };
    assert_eq!(call.callee.name(), "tvmgen_default_fused_add_nn_relu");
    assert_eq!(call.args.len(), 2);
    assert_eq!(call.attrs.target, Some(llvm()));
    assert_eq!(call.attrs.all_prim_fn_vars, vec![call.callee.clone()]);
    assert!(call.attrs.shape_func.is_none());
    assert!(call.attrs.relay_attrs.primitive);
    assert_eq!(body.checked_type(), Some(&f32(&[4])));

    let prim = out
        .lookup(&call.callee)
        .and_then(BaseFunc::as_prim)
        .expect("lowered definition");
    assert_eq!(prim.target(), Some(&llvm()));

    assert_eq!(processed.len(), 1);
    assert!(matches!(processed[0].source, ProcessedSource::Relay(_)));
    assert_eq!(processed[0].prim_fn_var.as_ref(), Some(&call.callee));
    assert_eq!(processed[0].target, Some(llvm()));
}

#[test]
fn repeated_callees_are_processed_once() {
    let prim = add_relu();
    let a = Var::new("a", f32(&[4]));
    let b = Var::new("b", f32(&[4]));
    let f = Var::new("f", prim.func_type());
    let t = Var::new("t", f32(&[4]));
    let second = Expr::call(Expr::var(&f), vec![Expr::var(&t), Expr::var(&b)]);
    let first = Expr::call(Expr::var(&f), vec![Expr::var(&a), Expr::var(&b)]);
    let body = Expr::let_(
        f.clone(),
        Expr::function(prim),
        Expr::let_(t.clone(), first, second),
    );
    let module = module_with_main(Function::new(vec![a, b], body, f32(&[4])).with_attrs(on_llvm()));

    let compiler = TeCompiler::default();
    let mut count = 0;
    let out = lower_te(
        &module,
        &compiler,
        &ExternalCodegenRegistry::new(),
        &config(),
        |_| {
            count += 1;
            Ok(())
        },
    )
    .expect("lower_te");
    assert_eq!(count, 1);

    let ExprKind::Let { body: inner, .. } = main_body(&out).kind().clone() else {
        panic!("expected the outer let");
    };
    let ExprKind::Let { value, body, .. } = inner.kind() else {
        panic!("expected the inner let");
    };
    for call in [value, body] {
        let ExprKind::CallLowered(call) = call.kind() else {
            panic!("expected a lowered call, got {call}");
        };
        assert_eq!(call.callee.name(), "tvmgen_default_fused_add_nn_relu");
    }

    let entries = compiler.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].use_count, 2);
}

#[test]
fn lowering_twice_changes_nothing() {
    let module = module_with_main(main_calling(Expr::function(add_relu())));
    let registry = ExternalCodegenRegistry::new();
    let compiler = TeCompiler::default();
    let mut config = config();
    config.capture_op_weights = true;
    let once = lower_te(&module, &compiler, &registry, &config, |_| Ok(())).expect("first run");

    let mut processed = 0;
    let twice = lower_te(&once, &compiler, &registry, &config, |_| {
        processed += 1;
        Ok(())
    })
    .expect("second run over the same cache");

    assert_eq!(processed, 0);
    assert_eq!(once, twice);
    assert_eq!(
        twice.attrs.op_weights.get("tvmgen_default_fused_add_nn_relu"),
        Some(&1)
    );
}

fn lowered_names(module: &IrModule) -> Vec<String> {
    module
        .functions()
        .filter(|(_, func)| matches!(func, BaseFunc::Prim(_)))
        .map(|(global, _)| global.name().to_string())
        .collect()
}

#[test]
fn modules_sharing_a_compiler_only_receive_their_own_functions() {
    let registry = ExternalCodegenRegistry::new();
    let compiler = TeCompiler::default();
    let mut config = config();
    config.capture_op_weights = true;

    let first = module_with_main(main_calling(Expr::function(add_relu())));
    let first_out =
        lower_te(&first, &compiler, &registry, &config, |_| Ok(())).expect("first module");
    assert_eq!(lowered_names(&first_out), vec!["tvmgen_default_fused_add_nn_relu"]);

    let a = Var::new("a", f32(&[4]));
    let call = Expr::call(
        Expr::function(relu_with_attrs(FuncAttrs::primitive())),
        vec![Expr::var(&a)],
    );
    let second = module_with_main(Function::new(vec![a], call, f32(&[4])).with_attrs(on_llvm()));
    let second_out =
        lower_te(&second, &compiler, &registry, &config, |_| Ok(())).expect("second module");

    assert_eq!(lowered_names(&second_out), vec!["tvmgen_default_fused_nn_relu"]);
    assert_eq!(
        second_out.attrs.op_weights.keys().collect::<Vec<_>>(),
        vec!["tvmgen_default_fused_nn_relu"]
    );
    assert_eq!(compiler.entries().len(), 2);

    config.capture_op_weights = false;
    let again = lower_te(&first, &compiler, &registry, &config, |_| Ok(()))
        .expect("first module from a warm cache");
    assert_eq!(lowered_names(&again), lowered_names(&first_out));
    assert_eq!(main_body(&again), main_body(&first_out));
}

#[test]
fn rewritten_external_calls_survive_a_second_run() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let codegens = ExternalCodegenRegistry::new();
    codegens.register_compiler("ccompiler", recording_codegen(Arc::clone(&seen), true));

    let mut module = IrModule::new();
    let ext = module.add_relay(
        "ccompiler_main_0",
        relu_with_attrs(FuncAttrs::external("ccompiler", "ccompiler_main_0")),
    );
    let a = Var::new("a", f32(&[4]));
    let call = Expr::call(Expr::global(ext), vec![Expr::var(&a)]).with_type(f32(&[4]));
    module.add_relay("main", Function::new(vec![a], call, f32(&[4])).with_attrs(on_llvm()));

    let compiler = TeCompiler::default();
    let once = lower_te(&module, &compiler, &codegens, &config(), |_| Ok(())).expect("first run");
    let twice = lower_te(&once, &compiler, &codegens, &config(), |_| Ok(())).expect("second run");

    assert_eq!(once, twice);
    assert_eq!(seen.lock().expect("seen poisoned").len(), 1);
}

#[test]
fn debug_wrappers_are_not_lowered() {
    let x = Var::new("x", f32(&[4]));
    let body = Expr::call(Expr::op("debug"), vec![Expr::var(&x)]).with_type(f32(&[4]));
    let wrapper = Function::new(vec![x], body, f32(&[4])).with_attrs(FuncAttrs::primitive());
    let a = Var::new("a", f32(&[4]));
    let call = Expr::call(Expr::function(wrapper), vec![Expr::var(&a)]);
    let module = module_with_main(Function::new(vec![a], call, f32(&[4])).with_attrs(on_llvm()));

    let compiler = TeCompiler::default();
    let out = lower_te(
        &module,
        &compiler,
        &ExternalCodegenRegistry::new(),
        &config(),
        |_| panic!("debug wrappers have nothing to process"),
    )
    .expect("lower_te");

    assert!(matches!(main_body(&out).kind(), ExprKind::Call { .. }));
    assert!(compiler.entries().is_empty());
    assert_eq!(out.len(), 1);
}

fn device_copy_fn() -> Function {
    let x = Var::new("x", f32(&[4]));
    let attrs = OpAttrs::DeviceCopy {
        src: VirtualDevice::new(llvm()),
        dst: VirtualDevice::new(Target::new("cuda")),
    };
    let body = Expr::call_with_attrs(Expr::op("device_copy"), vec![Expr::var(&x)], attrs)
        .with_type(f32(&[4]));
    Function::new(vec![x], body, f32(&[4])).with_attrs(FuncAttrs::primitive())
}

#[test]
fn device_copies_become_copy_nodes() {
    let a = Var::new("a", f32(&[4]));
    let call = Expr::call(Expr::function(device_copy_fn()), vec![Expr::var(&a)]);
    let module = module_with_main(Function::new(vec![a.clone()], call, f32(&[4])).with_attrs(on_llvm()));

    let compiler = TeCompiler::default();
    let out = lower_te(
        &module,
        &compiler,
        &ExternalCodegenRegistry::new(),
        &config(),
        |_| Ok(()),
    )
    .expect("lower_te");

    let body = main_body(&out);
    let ExprKind::DeviceCopy { body: copied, src, dst } = body.kind() else {
        panic!("expected a device copy, got {body}");
    };
    assert_eq!(copied.as_var(), Some(&a));
    assert_eq!(src.device_type, DeviceType::CPU);
    assert_eq!(dst.target, Some(Target::new("cuda")));
    assert!(compiler.entries().is_empty());
}

#[test]
fn device_copy_with_two_arguments_is_rejected() {
    let a = Var::new("a", f32(&[4]));
    let call = Expr::call(
        Expr::function(device_copy_fn()),
        vec![Expr::var(&a), Expr::var(&a)],
    );
    let module = module_with_main(Function::new(vec![a], call, f32(&[4])).with_attrs(on_llvm()));

    let err = lower_te(
        &module,
        &TeCompiler::default(),
        &ExternalCodegenRegistry::new(),
        &config(),
        |_| Ok(()),
    )
    .expect_err("bad device copy");
    assert!(matches!(err, LowerError::InvalidDeviceCopy { found: 2 }));
}

#[test]
fn calls_outside_any_device_are_rejected() {
    let mut main = main_calling(Expr::function(add_relu()));
    main.attrs.result_device = None;
    let module = module_with_main(main);

    let err = lower_te(
        &module,
        &TeCompiler::default(),
        &ExternalCodegenRegistry::new(),
        &config(),
        |_| Ok(()),
    )
    .expect_err("no device");
    assert!(matches!(err, LowerError::UnconstrainedDevice { ref function } if function == "main"));
}

#[test]
fn on_device_annotations_pick_the_target() {
    let cuda = Target::new("cuda");
    let a = Var::new("a", f32(&[4]));
    let b = Var::new("b", f32(&[4]));
    let call = Expr::call(Expr::function(add_relu()), vec![Expr::var(&a), Expr::var(&b)]);
    let body = Expr::on_device(call, VirtualDevice::new(cuda.clone()));
    let module = module_with_main(Function::new(vec![a, b], body, f32(&[4])).with_attrs(on_llvm()));

    let out = lower_te(
        &module,
        &TeCompiler::default(),
        &ExternalCodegenRegistry::new(),
        &config(),
        |_| Ok(()),
    )
    .expect("lower_te");

    let body = main_body(&out);
    let ExprKind::OnDevice { body: inner, .. } = body.kind() else {
        panic!("expected the device annotation to survive");
    };
    let ExprKind::CallLowered(call) = inner.kind() else {
        panic!("expected a lowered call");
    };
    assert_eq!(call.attrs.target, Some(cuda.clone()));

    let grouped = per_target_modules(&out).expect("grouping");
    assert_eq!(grouped.len(), 1);
    assert!(grouped[&cuda].contains(&call.callee));
}

#[test]
fn dynamic_results_carry_shape_functions() {
    let dyn_ty = Type::Tensor(TensorType::new(
        DType::F32,
        Shape::new(vec![Dimension::dynamic("n")]),
    ));
    let x = Var::new("x", dyn_ty.clone());
    let relu = Expr::call(Expr::op("nn.relu"), vec![Expr::var(&x)]).with_type(dyn_ty.clone());
    let prim = Function::new(vec![x], relu, dyn_ty.clone()).with_attrs(FuncAttrs::primitive());

    let a = Var::new("a", dyn_ty.clone());
    let call = Expr::call(Expr::function(prim), vec![Expr::var(&a)]);
    let module = module_with_main(Function::new(vec![a], call, dyn_ty).with_attrs(on_llvm()));

    let out = lower_te(
        &module,
        &TeCompiler::default(),
        &ExternalCodegenRegistry::new(),
        &config(),
        |_| Ok(()),
    )
    .expect("lower_te");

    let body = main_body(&out);
    let ExprKind::CallLowered(call) = body.kind() else {
        panic!("expected a lowered call");
    };
    let shape = call.attrs.shape_func.as_ref().expect("shape function info");
    assert_eq!(shape.param_states, vec![ShapeFuncParamState::NeedInputShape]);
    assert_eq!(shape.num_inputs, 1);
    assert_eq!(shape.num_outputs, 1);
    assert_eq!(shape.all_prim_shape_fn_vars, vec![shape.prim_shape_fn_var.clone()]);

    let shape_fn = out
        .lookup(&shape.prim_shape_fn_var)
        .and_then(BaseFunc::as_prim)
        .expect("shape function is merged into the module");
    assert_eq!(shape_fn.target(), Some(&llvm()));
}

#[test]
fn data_dependent_shapes_need_input_values() {
    let dyn_ty = Type::Tensor(TensorType::new(
        DType::F32,
        Shape::new(vec![Dimension::dynamic("m")]),
    ));
    let x = Var::new("x", f32(&[2, 3]));
    let new_shape = Var::new("new_shape", Type::tensor(DType::I64, &[1]));
    let reshape = Expr::call(
        Expr::op("dyn.reshape"),
        vec![Expr::var(&x), Expr::var(&new_shape)],
    )
    .with_type(dyn_ty.clone());
    let prim = Function::new(vec![x, new_shape], reshape, dyn_ty.clone())
        .with_attrs(FuncAttrs::primitive());

    let a = Var::new("a", f32(&[2, 3]));
    let s = Var::new("s", Type::tensor(DType::I64, &[1]));
    let call = Expr::call(Expr::function(prim), vec![Expr::var(&a), Expr::var(&s)]);
    let module = module_with_main(Function::new(vec![a, s], call, dyn_ty).with_attrs(on_llvm()));

    let out = lower_te(
        &module,
        &TeCompiler::default(),
        &ExternalCodegenRegistry::new(),
        &config(),
        |_| Ok(()),
    )
    .expect("lower_te");

    let body = main_body(&out);
    let ExprKind::CallLowered(call) = body.kind() else {
        panic!("expected a lowered call");
    };
    let shape = call.attrs.shape_func.as_ref().expect("shape function info");
    assert_eq!(shape.param_states.len(), 2);
    assert!(shape.param_states.iter().all(|state| state.needs_data()));
    assert_eq!(shape.num_inputs, 2);
}

#[test]
fn external_functions_are_dispatched_and_stubbed() {
    init_logging();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let codegens = ExternalCodegenRegistry::new();
    codegens.register_compiler("ccompiler", recording_codegen(Arc::clone(&seen), true));

    let mut module = IrModule::new();
    let ext = module.add_relay(
        "ccompiler_main_0",
        relu_with_attrs(FuncAttrs::external("ccompiler", "ccompiler_main_0")),
    );
    let a = Var::new("a", f32(&[4]));
    let call = Expr::call(Expr::global(ext.clone()), vec![Expr::var(&a)]).with_type(f32(&[4]));
    module.add_relay("main", Function::new(vec![a], call, f32(&[4])).with_attrs(on_llvm()));

    let compiler = TeCompiler::default();
    let mut processed: Vec<ProcessedFunction> = Vec::new();
    let out = lower_te(&module, &compiler, &codegens, &config(), |func| {
        processed.push(func.clone());
        Ok(())
    })
    .expect("lower_te");

    let body = main_body(&out);
    let ExprKind::CallLowered(call) = body.kind() else {
        panic!("expected a lowered call");
    };
    assert_eq!(call.callee, ext);
    assert_eq!(call.attrs.target, Some(Target::ext_dev()));
    assert!(call.attrs.all_prim_fn_vars.is_empty());
    assert!(!call.attrs.reshape_only);

    let stub = out.lookup(&ext).and_then(BaseFunc::as_relay).expect("stub");
    assert_eq!(stub.attrs.external_symbol.as_deref(), Some("ccompiler_main_0"));
    assert!(stub.attrs.compiler.is_none());

    assert_eq!(out.attrs.external_mods.len(), 1);
    assert!(out.attrs.external_mods[0].has_function("ccompiler_main_0", true));
    assert_eq!(
        out.attrs.device_contexts.get(&ext).map(String::as_str),
        Some("ccompiler")
    );

    let seen = seen.lock().expect("seen poisoned");
    assert_eq!(seen.len(), 1);
    assert!(seen[0].attrs.compiler.is_none());
    assert_eq!(seen[0].attrs.global_symbol.as_deref(), Some("ccompiler_main_0"));

    assert_eq!(processed.len(), 1);
    assert_eq!(processed[0].prim_funcs.as_ref().map(|funcs| funcs.len()), Some(0));
    assert_eq!(processed[0].target, Some(Target::ext_dev()));
    assert!(compiler.entries().is_empty());
}

#[test]
fn missing_external_codegen_is_fatal() {
    let a = Var::new("a", f32(&[4]));
    let ext = relu_with_attrs(FuncAttrs::external("foo", "foo_0"));
    let call = Expr::call(Expr::function(ext), vec![Expr::var(&a)]);
    let module = module_with_main(Function::new(vec![a], call, f32(&[4])).with_attrs(on_llvm()));

    let err = lower_te(
        &module,
        &TeCompiler::default(),
        &ExternalCodegenRegistry::new(),
        &config(),
        |_| Ok(()),
    )
    .expect_err("no codegen for foo");
    assert!(matches!(
        err,
        LowerError::MissingExternalCodegen { ref name, ref compiler }
            if name == "relay.ext.foo" && compiler == "foo"
    ));
}

#[test]
fn empty_external_units_are_skipped() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let codegens = ExternalCodegenRegistry::new();
    codegens.register_compiler("foo", recording_codegen(Arc::clone(&seen), false));

    let a = Var::new("a", f32(&[4]));
    let ext = relu_with_attrs(FuncAttrs::external("foo", "foo_0"));
    let call = Expr::call(Expr::function(ext), vec![Expr::var(&a)]);
    let module = module_with_main(Function::new(vec![a], call, f32(&[4])).with_attrs(on_llvm()));

    let compiler = TeCompiler::default();
    let out = lower_te(&module, &compiler, &codegens, &config(), |_| Ok(()))
        .expect("lower_te");

    assert!(out.attrs.external_mods.is_empty());
    assert_eq!(seen.lock().expect("seen poisoned").len(), 1);
    assert!(compiler.entries().is_empty());
    assert!(out.lookup_name("foo_0").is_some());
}

#[test]
fn pre_lowered_callees_are_called_directly() {
    let mut module = IrModule::new();
    let kernel = GlobalVar::new("hand_written");
    module.add(
        kernel.clone(),
        BaseFunc::Prim(PrimFunc::new(Vec::new(), Stmt::Nop).with_target(llvm())),
    );
    let a = Var::new("a", f32(&[4]));
    let call = Expr::call(Expr::global(kernel.clone()), vec![Expr::var(&a)]).with_type(f32(&[4]));
    module.add_relay("main", Function::new(vec![a], call, f32(&[4])).with_attrs(on_llvm()));

    let mut processed: Vec<ProcessedFunction> = Vec::new();
    let out = lower_te(
        &module,
        &TeCompiler::default(),
        &ExternalCodegenRegistry::new(),
        &config(),
        |func| {
            processed.push(func.clone());
            Ok(())
        },
    )
    .expect("lower_te");

    let body = main_body(&out);
    let ExprKind::CallLowered(call) = body.kind() else {
        panic!("expected a lowered call");
    };
    assert_eq!(call.callee, kernel);
    assert_eq!(call.attrs.all_prim_fn_vars, vec![kernel.clone()]);
    assert_eq!(processed.len(), 1);
    assert!(matches!(processed[0].source, ProcessedSource::Prim(_)));
}

#[test]
fn colliding_global_names_are_fatal() {
    let mut module = module_with_main(main_calling(Expr::function(add_relu())));
    let x = Var::new("x", f32(&[4]));
    module.add_relay(
        "tvmgen_default_fused_add_nn_relu",
        Function::new(vec![x.clone()], Expr::var(&x), f32(&[4])),
    );

    let err = lower_te(
        &module,
        &TeCompiler::default(),
        &ExternalCodegenRegistry::new(),
        &config(),
        |_| Ok(()),
    )
    .expect_err("duplicate");
    assert!(matches!(err, LowerError::DuplicateBinding { .. }));

    let compiler = TeCompiler::for_module(Arc::new(OpRegistry::builtin()), &module);
    let out = lower_te(
        &module,
        &compiler,
        &ExternalCodegenRegistry::new(),
        &config(),
        |_| Ok(()),
    )
    .expect("module-aware names");
    assert!(out.lookup_name("tvmgen_default_fused_add_nn_relu_1").is_some());
}

#[test]
fn op_weights_are_captured_on_request() {
    let prim = add_relu();
    let a = Var::new("a", f32(&[4]));
    let b = Var::new("b", f32(&[4]));
    let first = Expr::call(Expr::function(prim.clone()), vec![Expr::var(&a), Expr::var(&b)]);
    let second = Expr::call(Expr::function(prim), vec![first, Expr::var(&b)]);
    let module = module_with_main(Function::new(vec![a, b], second, f32(&[4])).with_attrs(on_llvm()));

    let mut config = config();
    config.capture_op_weights = true;
    let out = lower_te(
        &module,
        &TeCompiler::default(),
        &ExternalCodegenRegistry::new(),
        &config,
        |_| Ok(()),
    )
    .expect("lower_te");
    assert_eq!(
        out.attrs.op_weights.get("tvmgen_default_fused_add_nn_relu"),
        Some(&2)
    );
}

#[test]
fn scope_stack_shadows_and_keeps_the_root() {
    let mut scopes = ScopeStack::new();
    scopes.bind("x", 1);
    scopes.push_frame();
    scopes.bind("x", 2);
    assert_eq!(scopes.lookup(&"x"), Some(&2));
    scopes.pop_frame();
    assert_eq!(scopes.lookup(&"x"), Some(&1));
    scopes.pop_frame();
    assert_eq!(scopes.depth(), 1);
    assert_eq!(scopes.lookup(&"x"), Some(&1));
}
