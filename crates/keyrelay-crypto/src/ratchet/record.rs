//! On-disk ratchet record: a CBOR array `[index: uint, secret: bstr]`.

use ciborium::value::{Integer, Value};
use zeroize::{Zeroize, Zeroizing};

use crate::{error::RatchetError, keygen::SECRET_SIZE};

/// Encode `(index, secret)` as one record.
pub(crate) fn encode(index: u64, secret: &[u8]) -> Result<Zeroizing<Vec<u8>>, RatchetError> {
    let mut value =
        Value::Array(vec![Value::Integer(Integer::from(index)), Value::Bytes(secret.to_vec())]);

    // Upper bound: 1 (array) + 9 (uint) + 2 (bstr header) + 32 (secret)
    let mut out = Zeroizing::new(Vec::with_capacity(44));
    let result = ciborium::into_writer(&value, &mut *out);
    wipe(&mut value);
    result.map_err(|e| RatchetError::CorruptRecord(e.to_string()))?;

    Ok(out)
}

/// Decode a record into `(index, secret)`.
///
/// Only the first CBOR item is read. Empty input means the store was never
/// seeded; truncated or malformed input is a corrupt record.
pub(crate) fn decode(bytes: &[u8]) -> Result<(u64, Zeroizing<Vec<u8>>), RatchetError> {
    if bytes.is_empty() {
        return Err(RatchetError::CorruptRecord(
            "ratchet store is empty; seed it with an initial record".to_string(),
        ));
    }

    let value: Value =
        ciborium::from_reader(bytes).map_err(|e| RatchetError::CorruptRecord(e.to_string()))?;

    let Value::Array(mut items) = value else {
        return Err(RatchetError::CorruptRecord("record is not an array".to_string()));
    };

    let fields = match items.as_mut_slice() {
        [Value::Integer(index), Value::Bytes(secret)] => {
            Some((u64::try_from(*index), Zeroizing::new(std::mem::take(secret))))
        },
        _ => None,
    };

    let Some((index, secret)) = fields else {
        wipe_items(&mut items);
        return Err(RatchetError::CorruptRecord("expected [index: uint, secret: bytes]".to_string()));
    };

    let index = index
        .map_err(|_| RatchetError::CorruptRecord("index is not an unsigned 64-bit integer".into()))?;

    if secret.len() != SECRET_SIZE {
        return Err(RatchetError::InvalidSecretSource(format!(
            "stored secret is {} bytes, expected {SECRET_SIZE}",
            secret.len()
        )));
    }

    Ok((index, secret))
}

fn wipe(value: &mut Value) {
    if let Value::Array(items) = value {
        wipe_items(items);
    }
}

fn wipe_items(items: &mut [Value]) {
    for item in items {
        if let Value::Bytes(bytes) = item {
            bytes.zeroize();
        }
    }
}
