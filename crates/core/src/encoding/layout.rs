//! CRC32 fingerprint of an encoding spec's column layout.
//!
//! Any change to the column list or its order changes the signature.

use crc32fast::Hasher;

pub fn layout_signature<S: AsRef<str>>(version: &str, columns: &[S]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(version.as_bytes());
    hasher.update(&[0]);
    for column in columns {
        hasher.update(column.as_ref().as_bytes());
        hasher.update(&[0]);
    }
    hasher.finalize()
}
