//! Response cache key derivation.
//!
//! The key is a pure function over the exact request shape: prompt text, model
//! identifier, and the explicit struct of decision-relevant parameters. Call
//! options that do not change the output (timeouts, connection settings) are
//! not part of [`CallParams`] and therefore can never fragment the cache.

use crate::model::CallParams;
use sha2::{Digest, Sha256};

pub fn response_key(model: &str, prompt: &str, params: &CallParams) -> String {
    let mut h = Sha256::new();
    h.update(model.as_bytes());
    h.update(b"\n");
    h.update(prompt.as_bytes());
    h.update(b"\n");
    h.update(params.fingerprint().as_bytes());
    format!("{:x}", h.finalize())
}
