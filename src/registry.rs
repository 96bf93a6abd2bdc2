//! Host-side record of device buffers
//!
//! Every buffer created through a [`Context`](crate::Context) is registered
//! with its element type, length and access mode, so a readback can allocate
//! a matching host array without the caller restating the type.

use rustc_hash::FxHashMap;
use serde::Serialize;

use crate::error::{KernelError, Result};
use crate::runtime::{BufferId, MemAccess};
use crate::types::ElementType;

/// Metadata recorded for one device buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BufferMeta {
    pub element_type: ElementType,
    pub len: usize,
    pub access: MemAccess,
}

impl BufferMeta {
    pub fn byte_len(&self) -> usize {
        self.len * self.element_type.byte_width()
    }
}

#[derive(Debug, Default)]
pub struct BufferRegistry {
    entries: FxHashMap<BufferId, BufferMeta>,
}

impl BufferRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a buffer. Handles are unique per device, so an existing entry
    /// is only replaced if the device reused a released handle.
    pub fn register(&mut self, handle: BufferId, meta: BufferMeta) {
        self.entries.insert(handle, meta);
    }

    pub fn get(&self, handle: BufferId) -> Option<&BufferMeta> {
        self.entries.get(&handle)
    }

    /// Metadata for `handle`, or `UnknownBufferType` if it was never registered
    pub fn require(&self, handle: BufferId) -> Result<BufferMeta> {
        self.get(handle)
            .copied()
            .ok_or(KernelError::UnknownBufferType(handle))
    }

    pub fn remove(&mut self, handle: BufferId) -> Option<BufferMeta> {
        self.entries.remove(&handle)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registered handles in creation order
    pub fn handles(&self) -> Vec<BufferId> {
        let mut handles: Vec<BufferId> = self.entries.keys().copied().collect();
        handles.sort();
        handles
    }

    /// Remove every entry, returning the handles
    pub fn drain(&mut self) -> Vec<BufferId> {
        let handles = self.handles();
        self.entries.clear();
        handles
    }
}
