//! Caller identity. Every lifecycle operation receives an already-verified
//! user id; this module is the only place tokens are looked at.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use ulid::Ulid;

type HmacSha256 = Hmac<Sha256>;

#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    /// The user a bearer token belongs to, or `None` if it is not valid.
    async fn verify(&self, token: &str) -> Option<Ulid>;
}

/// Tokens of the form `<user-ulid>.<hex hmac-sha256(user-ulid)>`.
#[derive(Clone)]
pub struct HmacTokenVerifier {
    secret: Vec<u8>,
}

impl HmacTokenVerifier {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    fn mac(&self, user: &str) -> HmacSha256 {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .unwrap_or_else(|_| unreachable!("HMAC accepts keys of any length"));
        mac.update(user.as_bytes());
        mac
    }

    pub fn issue(&self, user: Ulid) -> String {
        let user = user.to_string();
        let sig = hex::encode(self.mac(&user).finalize().into_bytes());
        format!("{user}.{sig}")
    }
}

#[async_trait]
impl IdentityVerifier for HmacTokenVerifier {
    async fn verify(&self, token: &str) -> Option<Ulid> {
        let (user, sig) = token.split_once('.')?;
        let sig = hex::decode(sig).ok()?;
        self.mac(user).verify_slice(&sig).ok()?;
        Ulid::from_string(user).ok()
    }
}
