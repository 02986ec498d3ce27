//! Content fingerprints.
//!
//! Every part is length-prefixed before hashing so that adjacent parts cannot bleed into each
//! other (`"ab" + "c"` and `"a" + "bc"` hash differently). Absent parts hash as a fixed marker.

use crate::status::Status;

pub type Fingerprint = String;

const ABSENT: &str = "-";

fn encode_part(part: &str) -> String {
    format!("{}:{}", part.len(), part)
}

fn encode_optional(part: Option<&str>) -> String {
    part.map(encode_part).unwrap_or_else(|| ABSENT.to_string())
}

/// Hash over the ordered non-phase child fingerprints; `None` when there are no children.
pub fn execution_fingerprint(children: &[Fingerprint]) -> Option<Fingerprint> {
    if children.is_empty() {
        return None;
    }
    let mut hasher = blake3::Hasher::new();
    for child in children {
        hasher.update(encode_part(child).as_bytes());
    }
    Some(hasher.finalize().to_hex().to_string())
}

#[derive(Clone, Copy, Debug)]
pub struct FingerprintInput<'a> {
    /// Full name, or `library.name` for keywords.
    pub hashing_name: &'a str,
    pub setup: Option<&'a str>,
    pub execution: Option<&'a str>,
    pub teardown: Option<&'a str>,
    pub status: Status,
    pub arguments: &'a [String],
}

pub fn item_fingerprint(input: FingerprintInput<'_>) -> Fingerprint {
    let mut hasher = blake3::Hasher::new();
    hasher.update(encode_part(input.hashing_name).as_bytes());
    hasher.update(encode_optional(input.setup).as_bytes());
    hasher.update(encode_optional(input.execution).as_bytes());
    hasher.update(encode_optional(input.teardown).as_bytes());
    hasher.update(encode_part(input.status.as_str()).as_bytes());
    hasher.update(encode_part(&input.arguments.len().to_string()).as_bytes());
    for argument in input.arguments {
        hasher.update(encode_part(argument).as_bytes());
    }
    hasher.finalize().to_hex().to_string()
}
