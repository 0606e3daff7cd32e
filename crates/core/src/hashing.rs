//! SHA-256 digests over ordered `key=value` field lists.

use sha2::{Digest, Sha256};

/// Byte placed between fields before hashing.
pub const FIELD_SEPARATOR: u8 = b'|';

/// Lowercase hex SHA-256 of `fields` joined by [`FIELD_SEPARATOR`].
///
/// Field order is significant; callers canonicalise before hashing.
pub fn digest_fields<'a, I>(fields: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let mut hasher = Sha256::new();
    for (i, field) in fields.into_iter().enumerate() {
        if i > 0 {
            hasher.update([FIELD_SEPARATOR]);
        }
        hasher.update(field.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}
