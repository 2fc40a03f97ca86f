//! Per-target workspace, IO and constant byte totals for lowered functions.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use log::debug;
use smallvec::SmallVec;

use crate::error::{LowerError, LowerResult};
use crate::ir::{BaseFunc, Expr, ExprKind, Function, GlobalVar, IrModule};
use crate::passes::{ProcessedFunction, ProcessedSource};
use crate::target::{get_target_from_device_type, DeviceType, Target, TargetMap};
use crate::tir::{calculate_workspace_bytes, PrimFunc};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FunctionInfo {
    pub workspace_sizes: BTreeMap<Target, u64>,
    pub io_sizes: BTreeMap<Target, u64>,
    pub constant_sizes: BTreeMap<Target, u64>,
    pub tir_primfuncs: BTreeMap<Target, PrimFunc>,
    pub relay_primfuncs: BTreeMap<Target, Function>,
}

impl fmt::Display for FunctionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let render = |sizes: &BTreeMap<Target, u64>| {
            sizes
                .iter()
                .map(|(target, bytes)| format!("{target}: {bytes}"))
                .collect::<Vec<_>>()
                .join(", ")
        };
        write!(
            f,
            "FunctionInfo(workspace={{{}}}, io={{{}}}, constants={{{}}})",
            render(&self.workspace_sizes),
            render(&self.io_sizes),
            render(&self.constant_sizes)
        )
    }
}

/// One storage slot assigned by the storage planner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StorageSlot {
    pub storage_id: i64,
    pub device_type: DeviceType,
}

/// Slots backing one expression; tuples occupy several.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageInfo {
    pub slots: SmallVec<[StorageSlot; 2]>,
}

impl StorageInfo {
    pub fn new(slots: impl IntoIterator<Item = (i64, DeviceType)>) -> Self {
        Self {
            slots: slots
                .into_iter()
                .map(|(storage_id, device_type)| StorageSlot {
                    storage_id,
                    device_type,
                })
                .collect(),
        }
    }
}

/// Storage-planning output for the expressions of `main`, in planner order.
#[derive(Debug, Clone, Default)]
pub struct StorageInfoMap {
    entries: Vec<(Expr, StorageInfo)>,
}

impl StorageInfoMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, expr: Expr, info: StorageInfo) {
        match self.entries.iter_mut().find(|(existing, _)| existing.same_as(&expr)) {
            Some((_, slot)) => *slot = info,
            None => self.entries.push((expr, info)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Expr, &StorageInfo)> {
        self.entries.iter().map(|(expr, info)| (expr, info))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn expr_bytes(expr: &Expr) -> u64 {
    expr.checked_type()
        .and_then(|ty| ty.size_in_bytes())
        .unwrap_or(0)
}

fn add_per_target(
    sizes: &mut BTreeMap<Target, u64>,
    per_device: &BTreeMap<DeviceType, u64>,
    targets: &TargetMap,
) -> LowerResult<()> {
    for (device, bytes) in per_device {
        let target = get_target_from_device_type(*device, targets)?;
        *sizes.entry(target).or_insert(0) += bytes;
    }
    Ok(())
}

/// Sizes the workspace, IO and constants of the module's `main` function.
///
/// Constants and IO (parameters and the result) add up per device. Scratch
/// tensors sharing a storage id are never live together, so each id counts
/// once at its largest tensor; the ids are then summed per device. Only
/// targets holding at least one storage id get an entry.
pub fn update_main_workspace_size(
    module: &IrModule,
    targets: &TargetMap,
    storage: &StorageInfoMap,
) -> LowerResult<FunctionInfo> {
    let main = match module.lookup_name("main") {
        Some(BaseFunc::Relay(func)) => func,
        _ => {
            return Err(LowerError::UnknownGlobal {
                name: "main".to_string(),
            })
        }
    };

    let mut sid_workspace: BTreeMap<DeviceType, HashMap<i64, u64>> = BTreeMap::new();
    let mut device_io: BTreeMap<DeviceType, u64> = BTreeMap::new();
    let mut device_consts: BTreeMap<DeviceType, u64> = BTreeMap::new();

    for (_, info) in storage.iter() {
        for slot in &info.slots {
            sid_workspace
                .entry(slot.device_type)
                .or_default()
                .entry(slot.storage_id)
                .or_insert(0);
            device_io.entry(slot.device_type).or_insert(0);
            device_consts.entry(slot.device_type).or_insert(0);
        }
    }

    for (expr, info) in storage.iter() {
        let bytes = expr_bytes(expr);
        match expr.kind() {
            ExprKind::Constant(_) => {
                for slot in &info.slots {
                    *device_consts.entry(slot.device_type).or_insert(0) += bytes;
                }
            }
            ExprKind::Var(_) => {
                for slot in &info.slots {
                    *device_io.entry(slot.device_type).or_insert(0) += bytes;
                }
            }
            _ if expr.same_as(&main.body) => {
                for slot in &info.slots {
                    *device_io.entry(slot.device_type).or_insert(0) += bytes;
                }
            }
            _ => {
                for slot in &info.slots {
                    let peak = sid_workspace
                        .entry(slot.device_type)
                        .or_default()
                        .entry(slot.storage_id)
                        .or_insert(0);
                    *peak = (*peak).max(bytes);
                }
            }
        }
    }

    let device_workspace = sid_workspace
        .iter()
        .map(|(device, sids)| (*device, sids.values().sum::<u64>()))
        .collect::<BTreeMap<_, _>>();

    let mut info = FunctionInfo::default();
    add_per_target(&mut info.workspace_sizes, &device_workspace, targets)?;
    for device in device_workspace.keys() {
        let target = get_target_from_device_type(*device, targets)?;
        info.relay_primfuncs.insert(target, main.clone());
    }
    add_per_target(&mut info.io_sizes, &device_io, targets)?;
    add_per_target(&mut info.constant_sizes, &device_consts, targets)?;

    debug!("main function info: {info}");
    Ok(info)
}

fn param_bytes(func: &PrimFunc) -> u64 {
    func.params
        .iter()
        .filter_map(|param| func.param_buffer(param))
        .map(|buffer| buffer.size_in_bytes().unwrap_or(0))
        .sum()
}

/// Records the metadata of one lowered function under its lowered name.
///
/// Workspace per target is the largest requirement among its low-level
/// functions, IO is the total size of their bound parameters, constants are
/// always zero.
pub fn update_function_metadata(
    processed: &ProcessedFunction,
    metadata: &mut BTreeMap<String, FunctionInfo>,
    workspace_byte_alignment: u64,
) -> LowerResult<()> {
    let describe = || match &processed.source {
        ProcessedSource::Relay(func) => func.to_string(),
        ProcessedSource::Prim(func) => func.to_string(),
    };
    let prim_funcs: &BTreeMap<GlobalVar, PrimFunc> =
        processed
            .prim_funcs
            .as_ref()
            .ok_or_else(|| LowerError::MissingAnnotation {
                annotation: "prim_funcs",
                function: describe(),
            })?;
    let prim_fn_var = processed
        .prim_fn_var
        .as_ref()
        .ok_or_else(|| LowerError::MissingAnnotation {
            annotation: "prim_fn_var",
            function: describe(),
        })?;
    let relay_target = processed
        .target
        .as_ref()
        .ok_or_else(|| LowerError::MissingAnnotation {
            annotation: "target",
            function: describe(),
        })?;

    let mut info = FunctionInfo::default();
    for prim in prim_funcs.values() {
        let target = prim.target().unwrap_or(relay_target).clone();
        let workspace = calculate_workspace_bytes(prim, workspace_byte_alignment);
        let slot = info.workspace_sizes.entry(target.clone()).or_insert(0);
        *slot = (*slot).max(workspace);
        *info.io_sizes.entry(target.clone()).or_insert(0) += param_bytes(prim);
        info.constant_sizes.insert(target.clone(), 0);
        info.tir_primfuncs.insert(target.clone(), prim.clone());
        if let ProcessedSource::Relay(func) = &processed.source {
            info.relay_primfuncs.insert(target, func.clone());
        }
    }

    debug!("function info for {prim_fn_var}: {info}");
    metadata.insert(prim_fn_var.name().to_string(), info);
    Ok(())
}
