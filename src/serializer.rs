//! # Serializer Port
//!
//! Converts a commit's event sequence and header map to and from the single
//! opaque blobs the backends persist. The engine and the record mappers only
//! ever see bytes on one side and entity values on the other; the byte
//! layout belongs entirely to the serializer implementation.
//!
//! Round-trip identity is required: `deserialize(serialize(v)) == v`.

use crate::error::Result;
use crate::types::{EventData, Headers};

// =============================================================================
// Port
// =============================================================================

/// Payload translation used by every backend.
pub trait Serializer: Send + Sync + 'static {
    /// Encodes an ordered event sequence into one blob.
    fn serialize_events(&self, events: &[EventData]) -> Result<Vec<u8>>;

    /// Decodes an event blob back into the ordered sequence.
    fn deserialize_events(&self, bytes: &[u8]) -> Result<Vec<EventData>>;

    /// Encodes a header map into one blob.
    fn serialize_headers(&self, headers: &Headers) -> Result<Vec<u8>>;

    /// Decodes a header blob back into the map.
    fn deserialize_headers(&self, bytes: &[u8]) -> Result<Headers>;
}

// =============================================================================
// JSON Implementation
// =============================================================================

/// The default serializer: JSON via serde.
///
/// Event bodies and metadata are `Vec<u8>` fields and serialize as JSON
/// arrays of numbers; callers who care about blob size plug in their own
/// [`Serializer`].
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn serialize_events(&self, events: &[EventData]) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(events)?)
    }

    fn deserialize_events(&self, bytes: &[u8]) -> Result<Vec<EventData>> {
        Ok(serde_json::from_slice(bytes)?)
    }

    fn serialize_headers(&self, headers: &Headers) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(headers)?)
    }

    fn deserialize_headers(&self, bytes: &[u8]) -> Result<Headers> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

// =============================================================================
// Tests
// =============================================================================
