use std::collections::HashMap;

use crate::hashing::hash_value;
use crate::ir::IrModule;

pub const MAX_FUNC_NAME_LENGTH: usize = 80;

/// Hands out unique global names: `name`, `name_1`, `name_2`, ...
#[derive(Debug, Clone, Default)]
pub struct NameSupply {
    used: HashMap<String, usize>,
}

impl NameSupply {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the supply with every global already defined in `module`.
    pub fn for_module(module: &IrModule) -> Self {
        let mut supply = Self::new();
        for global in module.global_vars() {
            supply.reserve(global.name());
        }
        supply
    }

    pub fn reserve(&mut self, name: &str) {
        self.used.entry(name.to_string()).or_insert(1);
    }

    pub fn fresh(&mut self, candidate: &str) -> String {
        let mut name = candidate.replace('.', "_");
        loop {
            match self.used.get_mut(&name) {
                None => {
                    self.used.insert(name.clone(), 1);
                    return name;
                }
                Some(counter) => {
                    name = format!("{name}_{counter}");
                    *counter += 1;
                }
            }
        }
    }
}

/// Prefixes `name` with the module name, if any.
pub fn mangle(module_name: &str, name: &str) -> String {
    if module_name.is_empty() {
        name.to_string()
    } else {
        format!("{module_name}_{name}")
    }
}

/// Caps an over-long candidate name, keeping it distinct with a hash suffix.
pub fn truncate_name(candidate: &str) -> String {
    if candidate.len() <= MAX_FUNC_NAME_LENGTH {
        return candidate.to_string();
    }
    let cut = candidate
        .char_indices()
        .map(|(idx, _)| idx)
        .take_while(|idx| *idx <= MAX_FUNC_NAME_LENGTH)
        .last()
        .unwrap_or(0);
    format!("{}_{:016x}_", &candidate[..cut], hash_value(candidate))
}

pub fn sanitize_symbol(value: &str) -> String {
    if value.is_empty() {
        return "fused".to_string();
    }
    let lead = value.starts_with(|ch: char| ch.is_ascii_digit());
    let body = value
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() { ch } else { '_' });
    if lead {
        std::iter::once('_').chain(body).collect()
    } else {
        body.collect()
    }
}
