use std::fmt;
use std::str::FromStr;

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Role claim carried by accounts and tokens.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Full access, including catalog writes and asset uploads.
    Admin,
    /// Regular caller, may rate entities.
    User,
}

impl Role {
    /// Returns the wire name of the role.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::User => "user",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "admin" => Ok(Role::Admin),
            "user" => Ok(Role::User),
            other => Err(Error::InvalidArgument(format!("unknown role '{other}'"))),
        }
    }
}

/// A stored account.
///
/// The password is kept only as an Argon2 PHC string.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Account {
    /// Unique login name.
    pub username: String,
    /// Argon2 hash of the password in PHC format.
    pub password_hash: String,
    /// Role granted to tokens issued for this account.
    pub role: Role,
}

impl Account {
    /// Creates an account, hashing `password` with a fresh random salt.
    pub fn new(username: impl Into<String>, password: &str, role: Role) -> Result<Self> {
        Ok(Self {
            username: username.into(),
            password_hash: hash_password(password)?,
            role,
        })
    }

    /// Checks `password` against the stored hash.
    pub fn is_correct_password(&self, password: &str) -> bool {
        verify_password(&self.password_hash, password)
    }
}

/// Hashes a password into an Argon2id PHC string.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| Error::PasswordHash(e.to_string()))
}

/// Verifies a password against a PHC string. Malformed hashes never match.
pub fn verify_password(password_hash: &str, password: &str) -> bool {
    match PasswordHash::new(password_hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}
