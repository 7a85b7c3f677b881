use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::Sha256;

use crate::prelude::*;

const DIGEST_LEN: usize = 32;

/// Keyed one-way mapping from human identifiers to opaque ids.
///
/// One PBKDF2 iteration is not a password defense; the point is a keyed,
/// deterministic mapping. The salt is a secret and is immutable for the
/// lifetime of the process.
pub struct Anonymizer {
    salt: String,
}

impl Anonymizer {
    pub fn new(salt: String) -> Result<Self> {
        if salt.is_empty() {
            bail!(IngestError::InvalidConfig("anonymization salt is empty".to_owned()));
        }
        Ok(Anonymizer { salt })
    }

    /// Fallback when no salt is configured and the caller permits it.
    pub fn random() -> Self {
        log::warn!("No anonymization salt is set, ids will not be deterministic across runs");
        let mut bytes = [0u8; DIGEST_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Anonymizer { salt: to_hex_string(&bytes) }
    }

    /// Reads the salt from the `GLOBAL_SALT` environment variable.
    pub fn from_env(salt_not_required: bool) -> Result<Self> {
        match std::env::var("GLOBAL_SALT") {
            Ok(salt) if !salt.is_empty() => Anonymizer::new(salt),
            _ if salt_not_required => Ok(Anonymizer::random()),
            _ => err!(IngestError::InvalidConfig(
                "GLOBAL_SALT is not set (pass --salt-not-required to run with a random salt)".to_owned())),
        }
    }

    /// PBKDF2-HMAC-SHA256(password = s, salt = global salt || salt2, 1 iteration),
    /// as a lowercase hex digest.
    pub fn anonymize(&self, s: &str, salt2: &str) -> String {
        let salt = format!("{}{}", self.salt, salt2);
        let mut digest = [0u8; DIGEST_LEN];
        pbkdf2_hmac::<Sha256>(s.as_bytes(), salt.as_bytes(), 1, &mut digest);
        to_hex_string(&digest)
    }

    /// Conversation titles get no extra salt.
    pub fn anonymize_group(&self, title: &str) -> GroupId {
        GroupId(self.anonymize(title, ""))
    }

    /// Senders are salted per group, so the same phone number maps to distinct
    /// ids across groups.
    pub fn anonymize_sender(&self, sender: &str, group_id: &GroupId) -> SenderId {
        SenderId(self.anonymize(sender, group_id))
    }
}
