use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tecc::tir::DEFAULT_WORKSPACE_ALIGNMENT;

use crate::error::{UsmpError, UsmpResult};
use crate::pool::PoolInfo;

/// Index of a buffer inside its [`BufferInfoSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BufferInfoId(pub usize);

impl fmt::Display for BufferInfoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One allocation request handed to the planner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferInfo {
    pub name_hint: String,
    pub size_bytes: u64,
    pub pool_candidates: Vec<Arc<PoolInfo>>,
    pub alignment: u64,
    /// Buffers whose live ranges overlap this one.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    conflicts: BTreeSet<BufferInfoId>,
}

impl BufferInfo {
    pub fn new(
        name_hint: impl Into<String>,
        size_bytes: u64,
        pool_candidates: Vec<Arc<PoolInfo>>,
    ) -> Self {
        Self {
            name_hint: name_hint.into(),
            size_bytes,
            pool_candidates,
            alignment: DEFAULT_WORKSPACE_ALIGNMENT,
            conflicts: BTreeSet::new(),
        }
    }

    pub fn with_alignment(mut self, alignment: u64) -> Self {
        self.alignment = alignment;
        self
    }

    pub fn conflicts(&self) -> &BTreeSet<BufferInfoId> {
        &self.conflicts
    }

    pub fn conflicts_with(&self, other: BufferInfoId) -> bool {
        self.conflicts.contains(&other)
    }
}

impl fmt::Display for BufferInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pools = self
            .pool_candidates
            .iter()
            .map(|pool| pool.pool_name.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        write!(
            f,
            "BufferInfo(name_hint={}, size_bytes={}, pool_candidates=[{pools}], alignment={})",
            self.name_hint, self.size_bytes, self.alignment
        )
    }
}

/// Owns a group of buffers and the conflict graph between them.
///
/// Conflicts are edges between ids of the same set. `add_conflict` records
/// both directions. `set_conflicts` replaces one buffer's edges as given and
/// leaves the others untouched, so a caller using it owns symmetry and can
/// check it with `verify_conflicts` before handing the set to the planner.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferInfoSet {
    buffers: Vec<BufferInfo>,
}

impl BufferInfoSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, info: BufferInfo) -> BufferInfoId {
        self.buffers.push(info);
        BufferInfoId(self.buffers.len() - 1)
    }

    pub fn get(&self, id: BufferInfoId) -> Option<&BufferInfo> {
        self.buffers.get(id.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (BufferInfoId, &BufferInfo)> {
        self.buffers
            .iter()
            .enumerate()
            .map(|(idx, info)| (BufferInfoId(idx), info))
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    fn check(&self, id: BufferInfoId) -> UsmpResult<()> {
        if id.0 < self.buffers.len() {
            Ok(())
        } else {
            Err(UsmpError::UnknownBuffer { id })
        }
    }

    fn self_conflict(&self, id: BufferInfoId) -> UsmpError {
        UsmpError::SelfConflict {
            buffer: self.buffers[id.0].name_hint.clone(),
        }
    }

    /// Replaces the conflict set of `id`.
    pub fn set_conflicts(
        &mut self,
        id: BufferInfoId,
        conflicts: impl IntoIterator<Item = BufferInfoId>,
    ) -> UsmpResult<()> {
        self.check(id)?;
        let conflicts = conflicts.into_iter().collect::<BTreeSet<_>>();
        for other in &conflicts {
            self.check(*other)?;
        }
        if conflicts.contains(&id) {
            return Err(self.self_conflict(id));
        }
        self.buffers[id.0].conflicts = conflicts;
        Ok(())
    }

    /// Marks `a` and `b` as live at the same time.
    pub fn add_conflict(&mut self, a: BufferInfoId, b: BufferInfoId) -> UsmpResult<()> {
        self.check(a)?;
        self.check(b)?;
        if a == b {
            return Err(self.self_conflict(a));
        }
        self.buffers[a.0].conflicts.insert(b);
        self.buffers[b.0].conflicts.insert(a);
        Ok(())
    }

    /// Checks that every conflict edge points at a member and has its reverse.
    pub fn verify_conflicts(&self) -> UsmpResult<()> {
        for (id, info) in self.iter() {
            for other in &info.conflicts {
                let peer = self.get(*other).ok_or(UsmpError::UnknownBuffer { id: *other })?;
                if !peer.conflicts.contains(&id) {
                    return Err(UsmpError::AsymmetricConflict {
                        buffer: info.name_hint.clone(),
                        other: peer.name_hint.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}
