use std::collections::BTreeMap;
use std::fmt;

use tecc::ir::extents_bytes;
use tecc::tir::Stmt;

use crate::buffer::{BufferInfo, BufferInfoId, BufferInfoSet};

/// Buffers found in a program, the allocation each came from and the peak
/// number of bytes live at once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BufferInfoAnalysis {
    pub buffers: BufferInfoSet,
    pub buffer_info_stmts: BTreeMap<BufferInfoId, Stmt>,
    pub memory_pressure: u64,
}

impl BufferInfoAnalysis {
    pub fn new(
        buffers: BufferInfoSet,
        buffer_info_stmts: BTreeMap<BufferInfoId, Stmt>,
        memory_pressure: u64,
    ) -> Self {
        Self {
            buffers,
            buffer_info_stmts,
            memory_pressure,
        }
    }

    pub fn stmt_for(&self, id: BufferInfoId) -> Option<&Stmt> {
        self.buffer_info_stmts.get(&id)
    }
}

impl fmt::Display for BufferInfoAnalysis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "BufferInfoAnalysis(")?;
        for id in self.buffer_info_stmts.keys() {
            if let Some(info) = self.buffers.get(*id) {
                writeln!(f, "  {id}: {info}")?;
            }
        }
        write!(f, "  memory_pressure={})", self.memory_pressure)
    }
}

/// The buffers that have an originating statement, in id order.
pub fn create_array_buffer_info(analysis: &BufferInfoAnalysis) -> Vec<BufferInfo> {
    analysis
        .buffer_info_stmts
        .keys()
        .filter_map(|id| analysis.buffers.get(*id).cloned())
        .collect()
}

/// Bytes reserved by an allocation statement.
///
/// `None` for anything that is not an allocation and for allocations with a
/// dynamic extent or a size past `u64::MAX`.
pub fn calculate_extents_size(stmt: &Stmt) -> Option<u64> {
    let Stmt::Allocate { dtype, extents, .. } = stmt else {
        return None;
    };
    extents_bytes(*dtype, extents)
}
