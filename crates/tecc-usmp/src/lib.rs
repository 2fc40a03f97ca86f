//! Descriptors exchanged with the unified static memory planner.
//!
//! Buffers describe allocation requests and the pools they may live in;
//! pools describe the memory regions available per target. The planner
//! itself is external: it consumes these tables and produces
//! [`PoolAllocation`]s.

pub mod analysis;
pub mod buffer;
pub mod error;
pub mod pool;

pub use analysis::{calculate_extents_size, create_array_buffer_info, BufferInfoAnalysis};
pub use buffer::{BufferInfo, BufferInfoId, BufferInfoSet};
pub use error::{UsmpError, UsmpResult};
pub use pool::{PoolAccess, PoolAllocation, PoolInfo};
