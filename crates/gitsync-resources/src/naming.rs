//! Name generation for objects declared with `generateName`

use std::collections::HashSet;

use sha2::{Digest, Sha256};

const SUFFIX_LEN: usize = 5;
const ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Assigns names unique within one batch (a pull, or one file request).
///
/// Suffixes derive from the repository, the file path and an attempt
/// counter, so the same file always gets the same name in a fresh batch.
#[derive(Debug, Default)]
pub struct NameGenerator {
    taken: HashSet<String>,
}

impl NameGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a name that is already in use in this batch.
    pub fn reserve(&mut self, name: &str) {
        self.taken.insert(name.to_string());
    }

    /// Generate `prefix` + 5 base36 characters, avoiding reserved names.
    pub fn generate(&mut self, prefix: &str, repository: &str, path: &str) -> String {
        let mut attempt: u64 = 0;
        loop {
            let candidate = format!("{prefix}{}", suffix(repository, path, attempt));
            if self.taken.insert(candidate.clone()) {
                return candidate;
            }
            attempt += 1;
        }
    }
}

fn suffix(repository: &str, path: &str, attempt: u64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(repository.as_bytes());
    hasher.update([0]);
    hasher.update(path.as_bytes());
    hasher.update(attempt.to_le_bytes());
    hasher
        .finalize()
        .iter()
        .take(SUFFIX_LEN)
        .map(|byte| ALPHABET[(*byte as usize) % ALPHABET.len()] as char)
        .collect()
}
