//! Multipart wire codec for data items.
//!
//! ```text
//! frame 0: label      UTF-8, non-empty
//! frame 1: payload    opaque bytes
//! frame 2: timestamp  big-endian unsigned, microseconds since epoch
//! frame 3: shape      optional, CBOR ShapeMetadata
//! ```
//!
//! A message with no frames or an empty label frame carries no item and
//! decodes to `Ok(None)`. Timestamps are written as 8 bytes; on read any width
//! is accepted as long as the value fits in a `u64`.

use bytes::Bytes;

use crate::error::WireError;
use crate::item::DataItem;
use crate::shape::ShapeMetadata;
use crate::types::Label;

/// A message as a sequence of frames.
pub type Multipart = Vec<Bytes>;

/// Width of an encoded timestamp frame.
pub const TIMESTAMP_WIDTH: usize = 8;

/// Encode an item into frames.
///
/// Shape metadata that cannot be encoded is left out; the payload frames are
/// always produced.
pub fn encode_item(item: &DataItem) -> Multipart {
    let mut frames = vec![
        Bytes::copy_from_slice(item.label.as_str().as_bytes()),
        item.payload.clone(),
        Bytes::copy_from_slice(&item.timestamp.to_be_bytes()),
    ];
    if let Some(shape) = &item.shape {
        if let Ok(encoded) = shape.to_cbor() {
            frames.push(Bytes::from(encoded));
        }
    }
    frames
}

/// Decode frames into an item.
///
/// Returns `Ok(None)` when the label frame is missing or empty.
pub fn decode_item(frames: &[Bytes]) -> Result<Option<DataItem>, WireError> {
    let Some(label_frame) = frames.first() else {
        return Ok(None);
    };
    if label_frame.is_empty() {
        return Ok(None);
    }
    if !(3..=4).contains(&frames.len()) {
        return Err(WireError::FrameCount(frames.len()));
    }

    let label = std::str::from_utf8(label_frame).map_err(|_| WireError::LabelNotUtf8)?;
    // Non-empty was checked above, so construction cannot fail.
    let label = Label::new(label).map_err(|_| WireError::LabelNotUtf8)?;
    let payload = frames[1].clone();
    let timestamp = decode_timestamp(&frames[2])?;

    let shape = match frames.get(3) {
        Some(frame) => {
            let shape = ShapeMetadata::from_cbor(frame)
                .map_err(|e| WireError::InvalidShape(e.to_string()))?;
            if !shape.fits(payload.len()) {
                return Err(WireError::ShapeMismatch {
                    dims: shape.dims,
                    len: payload.len(),
                });
            }
            Some(shape)
        }
        None => None,
    };

    Ok(Some(DataItem {
        label,
        payload,
        timestamp,
        shape,
    }))
}

/// Decode a big-endian timestamp of any width.
pub fn decode_timestamp(frame: &[u8]) -> Result<u64, WireError> {
    if frame.is_empty() {
        return Err(WireError::EmptyTimestamp);
    }
    let significant = match frame.iter().position(|&b| b != 0) {
        Some(start) => &frame[start..],
        None => return Ok(0),
    };
    if significant.len() > TIMESTAMP_WIDTH {
        return Err(WireError::TimestampOverflow(significant.len()));
    }
    Ok(significant
        .iter()
        .fold(0u64, |acc, &b| (acc << 8) | u64::from(b)))
}
