//! Explicit shape metadata for stored blocks.
//!
//! Payload bytes are opaque to the store. When a producer knows the payload
//! is, say, a 300x240x3 image, it attaches a [`ShapeMetadata`] which is
//! anchored with the item's ledger record. The block itself stays bare.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Element type of a dense array payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementType {
    U8,
    U16,
    U32,
    F32,
    F64,
}

impl ElementType {
    /// Size of one element in bytes.
    pub const fn size(self) -> u64 {
        match self {
            ElementType::U8 => 1,
            ElementType::U16 => 2,
            ElementType::U32 | ElementType::F32 => 4,
            ElementType::F64 => 8,
        }
    }
}

/// Dimensions and element type of a payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShapeMetadata {
    pub dims: Vec<u32>,
    pub element: ElementType,
}

impl ShapeMetadata {
    /// Create shape metadata.
    pub fn new(dims: Vec<u32>, element: ElementType) -> Self {
        Self { dims, element }
    }

    /// Byte length implied by the shape, or `None` on overflow.
    pub fn byte_len(&self) -> Option<u64> {
        self.dims
            .iter()
            .try_fold(self.element.size(), |acc, &d| acc.checked_mul(u64::from(d)))
    }

    /// Whether a payload of `len` bytes has this shape.
    pub fn fits(&self, len: usize) -> bool {
        self.byte_len() == Some(len as u64)
    }

    /// Encode as CBOR.
    pub fn to_cbor(&self) -> Result<Vec<u8>, CoreError> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf)
            .map_err(|e| CoreError::EncodingError(e.to_string()))?;
        Ok(buf)
    }

    /// Decode from CBOR.
    pub fn from_cbor(bytes: &[u8]) -> Result<Self, CoreError> {
        ciborium::from_reader(bytes).map_err(|e| CoreError::DecodingError(e.to_string()))
    }
}
