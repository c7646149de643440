use crate::serialize::SerializeError;
use serde::{Serialize, de::DeserializeOwned};
use serde_cbor::{from_slice, to_vec};
use std::panic::{AssertUnwindSafe, catch_unwind};

/// Upper bound for one side-channel blob.
pub(super) const MAX_BLOB_BYTES: usize = 16 * 1024 * 1024;

pub(super) fn serialize<T>(t: &T) -> Result<Vec<u8>, SerializeError>
where
    T: Serialize,
{
    to_vec(t).map_err(|e| SerializeError::Serialize(e.to_string()))
}

/// Deserialize CBOR bytes into a value.
///
/// Input size is bounded before decode, and a panic inside the decoder is
/// reported as a deserialize error.
pub(super) fn deserialize_bounded<T>(bytes: &[u8], max_bytes: usize) -> Result<T, SerializeError>
where
    T: DeserializeOwned,
{
    if bytes.len() > max_bytes {
        return Err(SerializeError::DeserializeSizeLimitExceeded {
            len: bytes.len(),
            max_bytes,
        });
    }

    match catch_unwind(AssertUnwindSafe(|| from_slice(bytes))) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(SerializeError::Deserialize(err.to_string())),
        Err(_) => Err(SerializeError::Deserialize(
            "panic during CBOR deserialization".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn oversized_payload_is_rejected_before_decode() {
        let bytes = vec![0u8; 32];
        let err = deserialize_bounded::<BTreeMap<String, u8>>(&bytes, 8)
            .expect_err("oversized payload should fail");

        assert!(matches!(
            err,
            SerializeError::DeserializeSizeLimitExceeded { len: 32, max_bytes: 8 }
        ));
    }

    #[test]
    fn garbage_is_a_deserialize_error() {
        let err = deserialize_bounded::<BTreeMap<String, u8>>(&[0xff, 0x00, 0x13], 64)
            .expect_err("garbage should fail");

        assert!(matches!(err, SerializeError::Deserialize(_)));
    }
}
