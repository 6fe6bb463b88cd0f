// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

use core::slice;
use std::{mem, vec};

use readout_common::ModuleId;

/// Per-module storage backed by a [`Vec`] kept sorted by module.
///
/// There are at most [`ModuleId::COUNT`] entries, so lookups are a binary
/// search over a handful of items. Iteration always follows ascending module
/// order, which makes every per-module traversal deterministic.
#[derive(Clone, Debug, PartialEq)]
pub struct ModuleMap<V>(Vec<(ModuleId, V)>);

impl<V> Default for ModuleMap<V> {
    fn default() -> Self {
        ModuleMap(Vec::new())
    }
}

impl<V> ModuleMap<V> {
    pub fn new() -> ModuleMap<V> {
        ModuleMap(Vec::new())
    }

    pub fn modules(&self) -> impl Iterator<Item = ModuleId> {
        self.0.iter().map(|(k, _)| *k)
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.0.iter().map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (ModuleId, &V)> {
        self.0.iter().map(|(k, v)| (*k, v))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (ModuleId, &mut V)> {
        self.0.iter_mut().map(|(k, v)| (*k, v))
    }

    /// Insert the given value. Returns the old value for the same module.
    pub fn insert(&mut self, module: ModuleId, mut v: V) -> Option<V> {
        match self.0.binary_search_by(|(probe, _)| probe.cmp(&module)) {
            Ok(idx) => {
                mem::swap(&mut self.0[idx].1, &mut v);
                Some(v)
            }
            Err(idx) => {
                self.0.insert(idx, (module, v));
                None
            }
        }
    }

    pub fn get(&self, module: ModuleId) -> Option<&V> {
        self.0
            .binary_search_by(|(probe, _)| probe.cmp(&module))
            .ok()
            .map(|idx| &self.0[idx].1)
    }

    pub fn get_mut(&mut self, module: ModuleId) -> Option<&mut V> {
        self.0
            .binary_search_by(|(probe, _)| probe.cmp(&module))
            .ok()
            .map(|idx| &mut self.0[idx].1)
    }

    pub fn remove(&mut self, module: ModuleId) -> Option<V> {
        self.0
            .binary_search_by(|(probe, _)| probe.cmp(&module))
            .ok()
            .map(|idx| self.0.remove(idx).1)
    }

    pub fn contains(&self, module: ModuleId) -> bool {
        self.get(module).is_some()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Transform every value, keeping the module keys.
    pub fn map<W>(self, mut f: impl FnMut(ModuleId, V) -> W) -> ModuleMap<W> {
        ModuleMap(self.0.into_iter().map(|(k, v)| (k, f(k, v))).collect())
    }
}

impl<V> FromIterator<(ModuleId, V)> for ModuleMap<V> {
    /// Later entries replace earlier ones for the same module.
    fn from_iter<I: IntoIterator<Item = (ModuleId, V)>>(iter: I) -> Self {
        let mut map = ModuleMap::new();
        for (module, value) in iter {
            map.insert(module, value);
        }
        map
    }
}

impl<V> IntoIterator for ModuleMap<V> {
    type Item = (ModuleId, V);
    type IntoIter = vec::IntoIter<(ModuleId, V)>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a, V> IntoIterator for &'a ModuleMap<V> {
    type Item = &'a (ModuleId, V);
    type IntoIter = slice::Iter<'a, (ModuleId, V)>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
