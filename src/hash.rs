//! Content-addressed ids for prompts and cases, random ids for runs and tests.

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt::Write as _;

/// Length of every short id, in hex characters.
pub const ID_LEN: usize = 8;

/// Hash a string and keep the first [`ID_LEN`] hex characters.
pub fn hash_id(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    let mut out = String::with_capacity(ID_LEN);
    for byte in digest.iter().take(ID_LEN / 2) {
        let _ = write!(&mut out, "{byte:02x}");
    }
    out
}

/// Id of a prompt: hash of its templates joined by newlines.
///
/// Message boundaries are not part of the id: `["a", "b"]` and `["a\nb"]`
/// hash the same.
pub fn prompt_id(templates: &[String]) -> String {
    hash_id(&templates.join("\n"))
}

/// Id of a case: hash of its key-sorted compact JSON form.
pub fn case_id(case: &BTreeMap<String, String>) -> String {
    // BTreeMap serializes in key order, which is the canonical form.
    let canonical = serde_json::to_string(case).unwrap_or_default();
    hash_id(&canonical)
}

/// Fresh run id that does not collide with any id in `existing`.
pub fn generate_run_id<'a, I>(existing: I) -> String
where
    I: IntoIterator<Item = &'a str> + Clone,
{
    for _ in 0..100 {
        let id = short_uuid();
        if !existing.clone().into_iter().any(|e| e == id) {
            return id;
        }
    }
    uuid::Uuid::new_v4().simple().to_string()
}

/// Fresh identifier for a new test matrix.
pub fn generate_test_id() -> String {
    short_uuid()
}

fn short_uuid() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..ID_LEN].to_string()
}
