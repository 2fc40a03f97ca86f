use std::collections::HashMap;
use std::hash::Hash;

/// Lexically scoped bindings; inner frames shadow outer ones.
#[derive(Debug)]
pub struct ScopeStack<K, V> {
    frames: Vec<HashMap<K, V>>,
}

impl<K: Eq + Hash, V> ScopeStack<K, V> {
    pub fn new() -> Self {
        Self {
            frames: vec![HashMap::new()],
        }
    }

    pub fn push_frame(&mut self) {
        self.frames.push(HashMap::new());
    }

    pub fn pop_frame(&mut self) {
        if self.frames.len() > 1 {
            self.frames.pop();
        }
    }

    /// Binds in the innermost frame.
    pub fn bind(&mut self, key: K, value: V) {
        if let Some(frame) = self.frames.last_mut() {
            frame.insert(key, value);
        }
    }

    pub fn lookup(&self, key: &K) -> Option<&V> {
        self.frames.iter().rev().find_map(|frame| frame.get(key))
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }
}

impl<K: Eq + Hash, V> Default for ScopeStack<K, V> {
    fn default() -> Self {
        Self::new()
    }
}
