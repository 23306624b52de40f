use std::fmt;

use rand::RngCore;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// The identity that owns a job: either an authenticated user or a guest session.
///
/// Every quota check and job-ownership comparison takes this type instead
/// of a raw string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Principal {
    Authenticated(Uuid),
    Guest(String),
}

impl Principal {
    /// Generates a new guest session id from a 32-byte random token hashed
    /// with a process-wide salt, so the stored id never reveals the token.
    pub fn new_guest(salt: &[u8]) -> Self {
        let mut token = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut token);

        let mut hasher = Sha256::new();
        hasher.update(salt);
        hasher.update(token);
        let digest = hasher.finalize();

        Principal::Guest(encode_hex(&digest))
    }

    /// The storage key used in `quota_counters.principal` and as the
    /// `owner_user_id`/`owner_guest_session_id` discriminant.
    pub fn storage_key(&self) -> String {
        match self {
            Principal::Authenticated(id) => format!("user:{id}"),
            Principal::Guest(session_id) => format!("guest:{session_id}"),
        }
    }

    pub fn is_guest(&self) -> bool {
        matches!(self, Principal::Guest(_))
    }
}

fn encode_hex(bytes: &[u8]) -> String {
    use std::fmt::Write;
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut acc, b| {
        let _ = write!(acc, "{b:02x}");
        acc
    })
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.storage_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guest_ids_are_unique() {
        let a = Principal::new_guest(b"salt");
        let b = Principal::new_guest(b"salt");
        assert_ne!(a, b);
    }

    #[test]
    fn storage_key_distinguishes_kinds() {
        let user = Principal::Authenticated(Uuid::nil());
        let guest = Principal::Guest("abc".into());
        assert_ne!(user.storage_key(), guest.storage_key());
        assert!(user.storage_key().starts_with("user:"));
        assert!(guest.storage_key().starts_with("guest:"));
    }
}
