use crate::ir::extents_bytes;
use crate::tir::{PrimFunc, Stmt};

/// Peak scratch bytes needed to run `func`.
///
/// Nested allocations are live together and add up; sibling statements reuse
/// the same space so only the largest counts. Every allocation is rounded up
/// to `alignment`. Any dynamically sized allocation, or a total past
/// `u64::MAX`, makes the total unknown, reported as 0.
pub fn calculate_workspace_bytes(func: &PrimFunc, alignment: u64) -> u64 {
    peak_bytes(&func.body, alignment.max(1)).unwrap_or(0)
}

fn peak_bytes(stmt: &Stmt, alignment: u64) -> Option<u64> {
    match stmt {
        Stmt::Seq(stmts) => stmts.iter().try_fold(0u64, |peak, stmt| {
            peak_bytes(stmt, alignment).map(|bytes| peak.max(bytes))
        }),
        Stmt::Allocate {
            dtype,
            extents,
            body,
            ..
        } => {
            let bytes = extents_bytes(*dtype, extents)?
                .div_ceil(alignment)
                .checked_mul(alignment)?;
            bytes.checked_add(peak_bytes(body, alignment)?)
        }
        Stmt::Kernel { .. } | Stmt::CallPrim { .. } | Stmt::Nop => Some(0),
    }
}
