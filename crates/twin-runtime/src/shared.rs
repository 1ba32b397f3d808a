//! Shared handle serializing access to one twin.

use crate::FactoryTwin;
use std::sync::{Arc, PoisonError, RwLock};

/// Cloneable handle. Mutations take the write lock, so commands never
/// interleave; reads share the read lock.
#[derive(Clone)]
pub struct SharedTwin {
    inner: Arc<RwLock<FactoryTwin>>,
}

impl SharedTwin {
    pub fn new(twin: FactoryTwin) -> Self {
        Self {
            inner: Arc::new(RwLock::new(twin)),
        }
    }

    pub fn read<R>(&self, f: impl FnOnce(&FactoryTwin) -> R) -> R {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    pub fn write<R>(&self, f: impl FnOnce(&mut FactoryTwin) -> R) -> R {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }
}
