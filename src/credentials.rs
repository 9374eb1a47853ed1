//! Stateless session credentials.
//!
//! A credential is `base64url(claims_json) + "." + hex(hmac_sha256(secret,
//! claims_segment))`. Nothing is stored server-side: validity is determined
//! purely by the signature and the expiry embedded in the claims, so there is
//! no token table and no background eviction.

use crate::models::Claims;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

/// Credential lifetime: 30 days.
pub const CREDENTIAL_TTL_SECS: u64 = 30 * 24 * 60 * 60;

/// Signs and verifies session credentials with an HMAC-SHA256 secret.
pub struct CredentialSigner {
    secret: Vec<u8>,
}

impl CredentialSigner {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Random per-process secret. A restart invalidates every outstanding
    /// credential.
    pub fn generate() -> Self {
        use rand::{distributions::Alphanumeric, Rng};

        let secret: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(48)
            .map(char::from)
            .collect();
        Self::new(secret.into_bytes())
    }

    /// Issues a fresh credential for the user. Returns the token and its
    /// expiry timestamp (Unix seconds).
    pub fn issue(&self, user_id: i64, username: &str) -> (String, u64) {
        self.issue_at(user_id, username, now())
    }

    fn issue_at(&self, user_id: i64, username: &str, issued_at: u64) -> (String, u64) {
        let claims = Claims {
            user_id,
            username: username.to_string(),
            issued_at,
            expires_at: issued_at + CREDENTIAL_TTL_SECS,
        };
        let segment =
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims).expect("claims serialize to JSON"));
        let signature = compute_hmac_sha256(&self.secret, segment.as_bytes());
        (format!("{}.{}", segment, signature), claims.expires_at)
    }

    /// Checks signature and expiry; returns the embedded claims.
    pub fn verify(&self, token: &str) -> Result<Claims, String> {
        let (segment, signature) = token
            .split_once('.')
            .ok_or_else(|| "malformed credential".to_string())?;

        let expected = compute_hmac_sha256(&self.secret, segment.as_bytes());
        // Compare re-digested values so the check cannot short-circuit on a
        // prefix of the real signature.
        let presented = compute_hmac_sha256(&self.secret, signature.as_bytes());
        let recomputed = compute_hmac_sha256(&self.secret, expected.as_bytes());
        if presented != recomputed {
            return Err("credential signature mismatch".to_string());
        }

        let raw = URL_SAFE_NO_PAD
            .decode(segment)
            .map_err(|_| "malformed credential claims".to_string())?;
        let claims: Claims = serde_json::from_slice(&raw)
            .map_err(|_| "malformed credential claims".to_string())?;

        if claims.expires_at <= now() {
            return Err("credential expired".to_string());
        }

        Ok(claims)
    }
}

impl std::fmt::Debug for CredentialSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialSigner").finish_non_exhaustive()
    }
}

// ── HMAC-SHA256 signing ──

fn compute_hmac_sha256(key: &[u8], data: &[u8]) -> String {
    use sha2::{Digest, Sha256};

    let block_size = 64;
    let mut padded_key = vec![0u8; block_size];

    if key.len() > block_size {
        let hash = Sha256::digest(key);
        padded_key[..32].copy_from_slice(&hash);
    } else {
        padded_key[..key.len()].copy_from_slice(key);
    }

    // Inner hash: H((K' ⊕ ipad) || message)
    let mut ipad = vec![0x36u8; block_size];
    for (i, b) in padded_key.iter().enumerate() {
        ipad[i] ^= b;
    }
    let mut inner_hasher = Sha256::new();
    inner_hasher.update(&ipad);
    inner_hasher.update(data);
    let inner_hash = inner_hasher.finalize();

    // Outer hash: H((K' ⊕ opad) || inner_hash)
    let mut opad = vec![0x5cu8; block_size];
    for (i, b) in padded_key.iter().enumerate() {
        opad[i] ^= b;
    }
    let mut outer_hasher = Sha256::new();
    outer_hasher.update(&opad);
    outer_hasher.update(inner_hash);
    let result = outer_hasher.finalize();

    hex::encode(result)
}

fn now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs()
}
