mod cbor;

use crate::error::{ErrorClass, ErrorOrigin, InternalError};
use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error as ThisError;

/// Generic CBOR serialization used for side-channel blobs.
///
/// This module is format-level only; callers that need bounded decode pass
/// explicit limits.

///
/// SerializeError
///

#[derive(Debug, ThisError)]
pub enum SerializeError {
    #[error("serialize error: {0}")]
    Serialize(String),

    #[error("deserialize error: {0}")]
    Deserialize(String),

    #[error("deserialize size limit exceeded: {len} bytes (limit {max_bytes})")]
    DeserializeSizeLimitExceeded { len: usize, max_bytes: usize },
}

impl From<SerializeError> for InternalError {
    fn from(err: SerializeError) -> Self {
        let class = match err {
            SerializeError::Serialize(_) => ErrorClass::Internal,
            SerializeError::Deserialize(_) | SerializeError::DeserializeSizeLimitExceeded { .. } => {
                ErrorClass::Corruption
            }
        };

        Self::new(class, ErrorOrigin::Serialize, err.to_string())
    }
}

/// Serialize a value into CBOR bytes.
pub fn serialize<T>(ty: &T) -> Result<Vec<u8>, SerializeError>
where
    T: Serialize,
{
    cbor::serialize(ty)
}

/// Deserialize a value produced by [`serialize`].
pub fn deserialize<T>(bytes: &[u8]) -> Result<T, SerializeError>
where
    T: DeserializeOwned,
{
    cbor::deserialize_bounded(bytes, cbor::MAX_BLOB_BYTES)
}

/// Deserialize a value produced by [`serialize`], with an explicit size limit.
pub fn deserialize_bounded<T>(bytes: &[u8], max_bytes: usize) -> Result<T, SerializeError>
where
    T: DeserializeOwned,
{
    cbor::deserialize_bounded(bytes, max_bytes)
}
