use tracing::{info, warn};

use super::account::{hash_password, verify_password};
use super::store::AccountStore;
use super::token::TokenManager;
use crate::{Error, Result};

/// Exchanges a username/password pair for an access token.
#[derive(Clone)]
pub struct LoginService {
    accounts: AccountStore,
    tokens: TokenManager,
    // Verified against when the username is unknown, so both failure paths
    // pay for one Argon2 verification.
    decoy_hash: String,
}

impl LoginService {
    /// Creates a login service over `accounts`, issuing tokens with `tokens`.
    pub fn new(accounts: AccountStore, tokens: TokenManager) -> Result<Self> {
        Ok(Self {
            accounts,
            tokens,
            decoy_hash: hash_password("decoy-password")?,
        })
    }

    /// Returns the token manager used to sign issued tokens.
    pub fn token_manager(&self) -> &TokenManager {
        &self.tokens
    }

    /// Verifies the credentials and issues a token for the account's role.
    ///
    /// Unknown usernames and wrong passwords fail identically with
    /// [`Error::Unauthenticated`].
    pub async fn login(&self, username: &str, password: &str) -> Result<String> {
        let account = self.accounts.find(username).await;

        let (hash, role) = match &account {
            Some(account) => (account.password_hash.clone(), Some(account.role)),
            None => (self.decoy_hash.clone(), None),
        };

        let password = password.to_string();
        let matches = tokio::task::spawn_blocking(move || verify_password(&hash, &password))
            .await
            .map_err(|e| Error::Internal(format!("password check aborted: {e}")))?;

        match role {
            Some(role) if matches => {
                info!(username, %role, "login succeeded");
                self.tokens.issue(username, role)
            }
            _ => {
                warn!(username, "login rejected");
                Err(Error::Unauthenticated(
                    "incorrect username or password".to_string(),
                ))
            }
        }
    }
}
