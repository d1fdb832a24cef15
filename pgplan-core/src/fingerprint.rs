//! Deterministic fingerprint of a normalized catalog.
//!
//! The fingerprint is a SHA-256 over the canonical JSON serialization of the
//! IR. `BTreeMap` collections plus fixed serde field order make the
//! serialization stable, so an unchanged database always hashes the same.
//! A normalizer change legitimately changes fingerprints; plans are
//! short-lived artifacts created immediately before apply.

use sha2::{Digest, Sha256};

use crate::model::Catalog;

/// Compute the hex-encoded SHA-256 fingerprint of a catalog.
pub fn fingerprint(catalog: &Catalog) -> String {
    let json = serde_json::to_vec(catalog).expect("catalog serialization cannot fail");
    let hash = Sha256::digest(&json);
    hex::encode(hash)
}
