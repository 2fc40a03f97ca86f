use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tecc::Target;

/// How a target may touch a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PoolAccess {
    #[serde(rename = "rw")]
    ReadWrite,
    #[serde(rename = "ro")]
    ReadOnly,
}

impl PoolAccess {
    pub fn as_str(self) -> &'static str {
        match self {
            PoolAccess::ReadWrite => "rw",
            PoolAccess::ReadOnly => "ro",
        }
    }
}

impl fmt::Display for PoolAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A memory region the planner may place buffers in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolInfo {
    pub pool_name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub target_access: BTreeMap<Target, PoolAccess>,
    /// Upper bound the planner should respect; `None` leaves the pool unbounded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_hint_bytes: Option<u64>,
}

impl PoolInfo {
    pub fn new(pool_name: impl Into<String>) -> Self {
        Self {
            pool_name: pool_name.into(),
            target_access: BTreeMap::new(),
            size_hint_bytes: None,
        }
    }

    pub fn with_access(mut self, target: Target, access: PoolAccess) -> Self {
        self.target_access.insert(target, access);
        self
    }

    pub fn with_size_hint(mut self, bytes: u64) -> Self {
        self.size_hint_bytes = Some(bytes);
        self
    }

    pub fn access_for(&self, target: &Target) -> Option<PoolAccess> {
        self.target_access.get(target).copied()
    }

    pub fn is_writable_by(&self, target: &Target) -> bool {
        self.access_for(target) == Some(PoolAccess::ReadWrite)
    }
}

impl fmt::Display for PoolInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let access = self
            .target_access
            .iter()
            .map(|(target, access)| format!("{target}: {access}"))
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "PoolInfo(pool_name={}, target_access={{{access}}}", self.pool_name)?;
        match self.size_hint_bytes {
            Some(bytes) => write!(f, ", size_hint_bytes={bytes})"),
            None => f.write_str(")"),
        }
    }
}

/// Final placement of one buffer, as produced by the planner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolAllocation {
    pub pool_info: Arc<PoolInfo>,
    pub byte_offset: u64,
}

impl PoolAllocation {
    pub fn new(pool_info: Arc<PoolInfo>, byte_offset: u64) -> Self {
        Self {
            pool_info,
            byte_offset,
        }
    }
}

impl fmt::Display for PoolAllocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PoolAllocation(pool={}, byte_offset={})",
            self.pool_info.pool_name, self.byte_offset
        )
    }
}
