//! Server-side context handle table
//!
//! A context handle on the wire is 20 opaque bytes (see [`ndr::ContextHandle`]).
//! The server issues one per opened object: a zero attributes word followed
//! by a random UUID. The table maps each issued handle to the application
//! object and the interface that created it. Each association owns one table
//! and drops it, with every object in it, when the connection ends.

use crate::error::{Result, RpcError};
use ndr::ContextHandle;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::trace;
use uuid::Uuid;

type Object = Arc<dyn Any + Send + Sync>;

struct Entry {
    interface: Uuid,
    object: Object,
}

/// Handles issued on one association
#[derive(Default)]
pub struct ContextHandleTable {
    entries: Mutex<HashMap<ContextHandle, Entry>>,
}

impl ContextHandleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a new handle for `object`, owned by `interface`
    pub fn create<T: Any + Send + Sync>(&self, interface: Uuid, object: T) -> ContextHandle {
        self.insert(interface, Arc::new(object))
    }

    /// Issue a new handle for an already shared object
    pub fn insert(&self, interface: Uuid, object: Object) -> ContextHandle {
        let mut entries = self.entries.lock();
        let handle = loop {
            let handle = new_handle();
            if !entries.contains_key(&handle) {
                break handle;
            }
        };
        entries.insert(handle, Entry { interface, object });
        trace!("issued context handle {:?} for {}", handle, interface);
        handle
    }

    /// Resolve `handle` to its object.
    ///
    /// Fails with `ContextMismatch` when the handle is null, unknown, was
    /// issued by another interface, or holds an object of another type.
    pub fn get<T: Any + Send + Sync>(&self, handle: &ContextHandle, interface: Uuid) -> Result<Arc<T>> {
        if handle.is_null() {
            return Err(RpcError::ContextMismatch);
        }
        let object = {
            let entries = self.entries.lock();
            let entry = entries.get(handle).ok_or(RpcError::ContextMismatch)?;
            if entry.interface != interface {
                return Err(RpcError::ContextMismatch);
            }
            Arc::clone(&entry.object)
        };
        object.downcast::<T>().map_err(|_| RpcError::ContextMismatch)
    }

    /// Release `handle`. Returns the object it referred to.
    pub fn close(&self, handle: &ContextHandle, interface: Uuid) -> Result<Object> {
        let mut entries = self.entries.lock();
        match entries.get(handle) {
            Some(entry) if entry.interface == interface => {}
            _ => return Err(RpcError::ContextMismatch),
        }
        let entry = entries.remove(handle).ok_or(RpcError::ContextMismatch)?;
        trace!("closed context handle {:?}", handle);
        Ok(entry.object)
    }

    pub fn contains(&self, handle: &ContextHandle) -> bool {
        self.entries.lock().contains_key(handle)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Drop every handle, as on association teardown
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl std::fmt::Debug for ContextHandleTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextHandleTable")
            .field("len", &self.len())
            .finish()
    }
}

fn new_handle() -> ContextHandle {
    let mut raw = [0u8; ContextHandle::SIZE];
    raw[4..].copy_from_slice(Uuid::new_v4().as_bytes());
    ContextHandle::new(raw)
}
