//! Typed views over device memory
//!
//! Global buffers and work-group local arrays are both byte regions shared
//! between work-items. A [`Memory`] pairs one region with the element type
//! the kernel declared for it and checks every access against its length.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::ast::ScalarType;
use crate::runtime::GpuError;

use super::value::Value;

/// Shared byte storage for one device buffer
pub type SharedBytes = Arc<Mutex<Vec<u8>>>;

/// A region of memory viewed as an array of `ty`
#[derive(Debug, Clone)]
pub struct Memory {
    name: String,
    ty: ScalarType,
    data: SharedBytes,
    read_only: bool,
}

impl Memory {
    pub fn new(name: impl Into<String>, ty: ScalarType, data: SharedBytes, read_only: bool) -> Self {
        Self {
            name: name.into(),
            ty,
            data,
            read_only,
        }
    }

    /// Fresh zero-filled region of `len` elements
    pub fn zeroed(name: impl Into<String>, ty: ScalarType, len: usize) -> Self {
        let data = Arc::new(Mutex::new(vec![0u8; len * ty.byte_width()]));
        Self::new(name, ty, data, false)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn element_type(&self) -> ScalarType {
        self.ty
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Number of whole elements in the region
    pub fn len(&self) -> usize {
        self.data.lock().len() / self.ty.byte_width()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn load(&self, index: i64) -> Result<Value, GpuError> {
        let bytes = self.data.lock();
        let range = self.element_range(index, bytes.len())?;
        Ok(Value::read_le(self.ty, &bytes[range]))
    }

    pub fn store(&self, index: i64, value: Value) -> Result<Value, GpuError> {
        if self.read_only {
            return Err(GpuError::Execution(format!(
                "write to read-only buffer `{}`",
                self.name
            )));
        }
        let mut bytes = self.data.lock();
        let range = self.element_range(index, bytes.len())?;
        let stored = value.convert(self.ty);
        stored.write_le(self.ty, &mut bytes[range]);
        Ok(stored)
    }

    fn element_range(&self, index: i64, byte_len: usize) -> Result<std::ops::Range<usize>, GpuError> {
        let width = self.ty.byte_width();
        let len = byte_len / width;
        match usize::try_from(index) {
            Ok(i) if i < len => Ok(i * width..(i + 1) * width),
            _ => Err(GpuError::OutOfBounds {
                name: self.name.clone(),
                index,
                len,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out_of_bounds_reports_name_and_length() {
        let mem = Memory::zeroed("scratch", ScalarType::Int, 4);
        assert_eq!(mem.len(), 4);
        let err = mem.load(4).unwrap_err();
        assert_eq!(
            err,
            GpuError::OutOfBounds {
                name: "scratch".to_string(),
                index: 4,
                len: 4
            }
        );
        assert!(mem.load(-1).is_err());
    }

    #[test]
    fn test_store_converts_to_element_type() {
        let mem = Memory::zeroed("out", ScalarType::UChar, 2);
        let stored = mem.store(1, Value::int(300)).unwrap();
        assert_eq!(stored.as_i64(), 44);
        assert_eq!(mem.load(1).unwrap().as_i64(), 44);
    }

    #[test]
    fn test_read_only_rejects_store() {
        let data = Arc::new(Mutex::new(vec![0u8; 8]));
        let mem = Memory::new("x", ScalarType::Float, data, true);
        assert!(mem.store(0, Value::double(1.0)).is_err());
    }
}
