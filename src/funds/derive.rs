//! Deterministic deposit address derivation.
//!
//! Addresses are derived from a per-network root key and a monotonically
//! increasing index, so the wallet backend can re-derive the matching
//! private key from the same (root, network, index) tuple. The core
//! never holds private keys.

use sha2::{Digest, Sha256};

use crate::types::{CoreError, CoreResult};

/// Derive the deposit address for `index` on `network`.
pub fn derive_address(root_key: &str, network: &str, index: i64) -> CoreResult<String> {
    let mut hasher = Sha256::new();
    hasher.update(root_key.as_bytes());
    hasher.update(b":");
    hasher.update(network.as_bytes());
    hasher.update(b":");
    hasher.update(index.to_be_bytes());
    let digest = hasher.finalize();
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();

    match network {
        // Tron hex form: 0x41 prefix over a 20-byte body.
        "TRC20" => Ok(format!("41{}", &hex[..40])),
        "ERC20" | "BEP20" => Ok(format!("0x{}", &hex[..40])),
        other => Err(CoreError::Config(format!(
            "address derivation unsupported for network {other}"
        ))),
    }
}
