use std::fmt;
use std::hash::{Hash, Hasher};

use crate::ir::structural;
use crate::ir::Function;
use crate::target::Target;

/// Identifies one lowering: a source function (up to variable renaming) and
/// the target it is compiled for.
#[derive(Clone)]
pub struct CacheKey {
    source: Function,
    target: Target,
    hash: u64,
}

impl CacheKey {
    pub fn new(source: Function, target: Target) -> Self {
        let hash = structural::function_hash(&source);
        Self {
            source,
            target,
            hash,
        }
    }

    pub fn source(&self) -> &Function {
        &self.source
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn fingerprint(&self) -> u64 {
        self.hash
    }
}

impl PartialEq for CacheKey {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
            && self.target == other.target
            && structural::function_eq(&self.source, &other.source)
    }
}

impl Eq for CacheKey {}

impl Hash for CacheKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
        self.target.hash(state);
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheKey")
            .field("target", &self.target)
            .field("hash", &format_args!("{:016x}", self.hash))
            .finish()
    }
}
