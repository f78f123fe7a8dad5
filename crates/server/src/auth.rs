//! Authentication: user store and bearer tokens.
//!
//! Credentials live in an in-memory store seeded with an admin user at
//! startup. A successful login issues an HS256 JWT whose subject is the
//! username; the WebSocket handshake and the HTTP endpoints verify that
//! token once per request or connection.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

/// Authentication failures. Messages are user-visible.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum AuthError {
    #[error("User already exists")]
    UserExists,

    #[error("User not found")]
    UserNotFound,

    #[error("Invalid password")]
    InvalidPassword,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Token could not be issued")]
    TokenIssue,
}

/// JWT claims carried by a session token.
#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    /// Username.
    sub: String,
    /// Issued-at, epoch seconds.
    iat: u64,
    /// Expiry, epoch seconds.
    exp: u64,
}

struct UserRecord {
    salt: [u8; 16],
    digest: [u8; 32],
}

/// The authentication collaborator: resolves credentials to a user identity.
pub struct AuthService {
    users: DashMap<String, UserRecord>,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    token_ttl: Duration,
}

impl AuthService {
    /// Creates a service with the given signing secret and token lifetime.
    pub fn new(secret: &str, token_ttl: Duration) -> Self {
        Self {
            users: DashMap::new(),
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            token_ttl,
        }
    }

    /// Inserts or replaces a user without issuing a token. Used for the
    /// seeded admin account.
    pub fn seed_user(&self, username: &str, password: &str) {
        self.users
            .insert(username.to_string(), new_record(password));
        debug!(user = %username, "Seeded user");
    }

    /// Registers a new user and returns a token for it.
    pub fn register(&self, username: &str, password: &str) -> Result<String, AuthError> {
        match self.users.entry(username.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(AuthError::UserExists),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(new_record(password));
                self.issue_token(username)
            }
        }
    }

    /// Verifies a username/password pair and returns a token.
    pub fn login(&self, username: &str, password: &str) -> Result<String, AuthError> {
        let record = self.users.get(username).ok_or(AuthError::UserNotFound)?;
        if hash_password(&record.salt, password) != record.digest {
            return Err(AuthError::InvalidPassword);
        }
        drop(record);
        self.issue_token(username)
    }

    /// Verifies a token and returns the username it was issued for.
    pub fn verify(&self, token: &str) -> Result<String, AuthError> {
        let data = decode::<Claims>(token, &self.decoding_key, &Validation::default())
            .map_err(|_| AuthError::InvalidToken)?;
        Ok(data.claims.sub)
    }

    fn issue_token(&self, username: &str) -> Result<String, AuthError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let claims = Claims {
            sub: username.to_string(),
            iat: now,
            exp: now + self.token_ttl.as_secs(),
        };
        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|_| AuthError::TokenIssue)
    }
}

fn new_record(password: &str) -> UserRecord {
    let mut salt = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut salt);
    UserRecord {
        digest: hash_password(&salt, password),
        salt,
    }
}

fn hash_password(salt: &[u8; 16], password: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(password.as_bytes());
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> AuthService {
        AuthService::new("test-secret", Duration::from_secs(3600))
    }

    #[test]
    fn test_login_roundtrip() {
        let auth = service();
        auth.seed_user("admin", "admin123");

        let token = auth.login("admin", "admin123").expect("login failed");
        assert_eq!(auth.verify(&token).unwrap(), "admin");
    }

    #[test]
    fn test_wrong_password_rejected() {
        let auth = service();
        auth.seed_user("admin", "admin123");

        assert_eq!(
            auth.login("admin", "letmein"),
            Err(AuthError::InvalidPassword)
        );
    }

    #[test]
    fn test_unknown_user_rejected() {
        let auth = service();
        assert_eq!(auth.login("ghost", "pw"), Err(AuthError::UserNotFound));
    }

    #[test]
    fn test_register_then_login() {
        let auth = service();
        let token = auth.register("carol", "hunter2").expect("register failed");
        assert_eq!(auth.verify(&token).unwrap(), "carol");

        assert_eq!(
            auth.register("carol", "again"),
            Err(AuthError::UserExists)
        );
        assert!(auth.login("carol", "hunter2").is_ok());
    }

    #[test]
    fn test_garbage_token_rejected() {
        let auth = service();
        assert_eq!(
            auth.verify("not-a-token"),
            Err(AuthError::InvalidToken)
        );
    }

    #[test]
    fn test_token_from_other_secret_rejected() {
        let auth = service();
        auth.seed_user("admin", "admin123");
        let token = auth.login("admin", "admin123").unwrap();

        let other = AuthService::new("different-secret", Duration::from_secs(3600));
        assert_eq!(other.verify(&token), Err(AuthError::InvalidToken));
    }

    #[test]
    fn test_same_password_hashes_differently_per_user() {
        let auth = service();
        auth.seed_user("a", "shared");
        auth.seed_user("b", "shared");

        let digest_a = auth.users.get("a").unwrap().digest;
        let digest_b = auth.users.get("b").unwrap().digest;
        assert_ne!(digest_a, digest_b);
    }
}
