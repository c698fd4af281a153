//! Login signatures.
//!
//! The syncing replica proves knowledge of the shared document secret by
//! sending an HMAC-SHA256 of its current timestamp. The peer rejects stale
//! timestamps, so a captured login cannot be replayed for long.

use base64::{engine::general_purpose::STANDARD, Engine};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use sync_types::{LoginRequest, Timestamp, MAX_CLOCK_SKEW_MS, PROTOCOL_VERSION};
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Why a login was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoginRejection {
    /// Both ends speak different protocol versions.
    #[error("protocol version mismatch: client={client}, server={server}")]
    VersionMismatch {
        /// Caller's version.
        client: u32,
        /// Our version.
        server: u32,
    },

    /// The caller's clock is too far from ours.
    #[error("clock skew of {skew_ms}ms exceeds the 5000ms limit")]
    ClockSkew {
        /// Observed difference.
        skew_ms: u64,
    },

    /// The signature does not match the shared secret.
    #[error("invalid login signature")]
    BadSignature,
}

fn mac_for(secret: &[u8], timestamp: Timestamp) -> HmacSha256 {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts keys of any length");
    mac.update(timestamp.as_millis().to_string().as_bytes());
    mac
}

/// Base64 HMAC-SHA256 of the decimal timestamp under `secret`.
pub fn sign_login(secret: &[u8], timestamp: Timestamp) -> String {
    STANDARD.encode(mac_for(secret, timestamp).finalize().into_bytes())
}

/// Validate a login request against our clock and secret.
///
/// Checks run in order: protocol version, clock skew, signature.
pub fn check_login(
    request: &LoginRequest,
    now: Timestamp,
    secret: &[u8],
) -> Result<(), LoginRejection> {
    if request.protocol_version != PROTOCOL_VERSION {
        return Err(LoginRejection::VersionMismatch {
            client: request.protocol_version,
            server: PROTOCOL_VERSION,
        });
    }

    let skew_ms = now.abs_diff(request.timestamp);
    if skew_ms > MAX_CLOCK_SKEW_MS {
        return Err(LoginRejection::ClockSkew { skew_ms });
    }

    let signature = STANDARD
        .decode(&request.hash)
        .map_err(|_| LoginRejection::BadSignature)?;
    mac_for(secret, request.timestamp)
        .verify_slice(&signature)
        .map_err(|_| LoginRejection::BadSignature)
}
