//! Runtime status bookkeeping: the only mutable part of the synthetic engine.
//!
//! Holds the desired status of every stack and optional per-service
//! overrides. It knows nothing about containers.

use crate::types::StackStatus;
use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

/// Point-in-time copy of the whole store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateSnapshot {
    pub stacks: BTreeMap<String, StackStatus>,
    /// Keyed by `(stack, service)`.
    pub services: BTreeMap<(String, String), StackStatus>,
}

impl StateSnapshot {
    /// A stack absent from the map is inactive.
    pub fn stack(&self, stack: &str) -> StackStatus {
        self.stacks
            .get(stack)
            .copied()
            .unwrap_or(StackStatus::Inactive)
    }

    pub fn service(&self, stack: &str, service: &str) -> Option<StackStatus> {
        self.services
            .get(&(stack.to_string(), service.to_string()))
            .copied()
    }
}

#[derive(Debug)]
pub struct RuntimeStateStore {
    inner: RwLock<StateSnapshot>,
    defaults: RwLock<StateSnapshot>,
}

impl Default for RuntimeStateStore {
    fn default() -> Self {
        Self::new(BTreeMap::new())
    }
}

impl RuntimeStateStore {
    /// Creates a store seeded with stack statuses; the seed is what `reset`
    /// restores.
    pub fn new(seed: BTreeMap<String, StackStatus>) -> Self {
        let defaults = StateSnapshot {
            stacks: seed,
            services: BTreeMap::new(),
        };
        Self {
            inner: RwLock::new(defaults.clone()),
            defaults: RwLock::new(defaults),
        }
    }

    // A panicked writer cannot leave the maps half-updated, so poisoning is
    // ignored.
    fn read(&self) -> RwLockReadGuard<'_, StateSnapshot> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, StateSnapshot> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self, stack: &str) -> StackStatus {
        self.read().stack(stack)
    }

    /// Sets a stack's status and drops every service override under it.
    pub fn set(&self, stack: &str, status: StackStatus) {
        let mut state = self.write();
        state.stacks.insert(stack.to_string(), status);
        state.services.retain(|(s, _), _| s != stack);
        debug!(stack, %status, "Stack status set");
    }

    pub fn set_service(&self, stack: &str, service: &str, status: StackStatus) {
        self.write()
            .services
            .insert((stack.to_string(), service.to_string()), status);
        debug!(stack, service, %status, "Service status set");
    }

    pub fn get_service(&self, stack: &str, service: &str) -> Option<StackStatus> {
        self.read().service(stack, service)
    }

    /// Removes a single service override; returns whether one existed.
    pub fn clear_service(&self, stack: &str, service: &str) -> bool {
        self.write()
            .services
            .remove(&(stack.to_string(), service.to_string()))
            .is_some()
    }

    /// Forgets a stack entirely, which reads back as inactive.
    pub fn remove(&self, stack: &str) {
        let mut state = self.write();
        state.stacks.remove(stack);
        state.services.retain(|(s, _), _| s != stack);
    }

    pub fn snapshot_all(&self) -> StateSnapshot {
        self.read().clone()
    }

    /// Restores the construction-time seed.
    pub fn reset(&self) {
        let defaults = self
            .defaults
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        *self.write() = defaults;
        debug!("Runtime state reset to defaults");
    }

    /// Seeds a stack that appeared after construction (e.g. an ad hoc stack),
    /// both live and in the reset defaults.
    pub fn seed(&self, stack: &str, status: StackStatus) {
        self.defaults
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .stacks
            .insert(stack.to_string(), status);
        self.write().stacks.insert(stack.to_string(), status);
    }

    /// Drops a stack from both the live map and the reset defaults.
    pub fn unseed(&self, stack: &str) {
        self.defaults
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .stacks
            .remove(stack);
        self.remove(stack);
    }
}
