use core::fmt;

use md2::Md2;
use md5::{Digest, Md5};
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use crate::types::AuthType;

/// A minimal secret container that zeroizes its contents on drop.
///
/// This is intentionally small and avoids exposing secrets via `Debug`.
#[derive(Clone, Default)]
pub(crate) struct SecretBytes(Vec<u8>);

impl SecretBytes {
    pub(crate) fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub(crate) fn len(&self) -> usize {
        self.0.len()
    }

    /// The secret right-padded with zeros to the fixed 16-byte key the v1.5
    /// session layer uses. Longer secrets are truncated.
    pub(crate) fn to_key(&self) -> [u8; 16] {
        let mut out = [0u8; 16];
        let n = self.0.len().min(out.len());
        out[..n].copy_from_slice(&self.0[..n]);
        out
    }
}

impl fmt::Debug for SecretBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<secret>")
    }
}

impl Drop for SecretBytes {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

pub(crate) fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

/// Compute the 16-byte auth code for one session packet, or `None` when the
/// session runs without per-message authentication.
///
/// For MD2/MD5 the digest input is
/// `session-id || password || payload || session-seq || password`
/// with both integers little-endian and the password padded to 16 bytes.
pub(crate) fn auth_code(
    auth: AuthType,
    password: &SecretBytes,
    session_id: u32,
    session_seq: u32,
    payload: &[u8],
) -> Option<[u8; 16]> {
    let key = password.to_key();
    let code = match auth {
        AuthType::None => return None,
        AuthType::Password => key,
        AuthType::Md5 => digest_code::<Md5>(&key, session_id, session_seq, payload),
        AuthType::Md2 => digest_code::<Md2>(&key, session_id, session_seq, payload),
    };
    Some(code)
}

/// Verify a received auth code in constant time.
pub(crate) fn verify_auth_code(
    auth: AuthType,
    password: &SecretBytes,
    session_id: u32,
    session_seq: u32,
    payload: &[u8],
    received: &[u8; 16],
) -> bool {
    match auth_code(auth, password, session_id, session_seq, payload) {
        Some(expected) => ct_eq(&expected, received),
        None => true,
    }
}

fn digest_code<D: Digest>(
    key: &[u8; 16],
    session_id: u32,
    session_seq: u32,
    payload: &[u8],
) -> [u8; 16] {
    let mut hasher = D::new();
    hasher.update(session_id.to_le_bytes());
    hasher.update(key);
    hasher.update(payload);
    hasher.update(session_seq.to_le_bytes());
    hasher.update(key);

    let mut out = [0u8; 16];
    out.copy_from_slice(&hasher.finalize()[..16]);
    out
}
