//! Content fingerprints.
//!
//! Two files with identical bytes share a fingerprint regardless of name;
//! the fingerprint is what makes a ticket unique.

use ticketwave_types::Fingerprint;

/// BLAKE3 hash of the raw file bytes.
pub fn fingerprint(data: &[u8]) -> Fingerprint {
    Fingerprint(*blake3::hash(data).as_bytes())
}
