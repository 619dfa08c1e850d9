use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::account::Account;
use crate::{Error, Result};

/// In-memory account registry keyed by username.
///
/// Records go in and come out as clones, so callers never hold a reference
/// into the map.
#[derive(Clone, Default)]
pub struct AccountStore {
    accounts: Arc<RwLock<HashMap<String, Account>>>,
}

impl AccountStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a copy of `account`, rejecting duplicate usernames.
    pub async fn save(&self, account: &Account) -> Result<()> {
        let mut accounts = self.accounts.write().await;

        if accounts.contains_key(&account.username) {
            return Err(Error::AlreadyExists(format!(
                "Account '{}'",
                account.username
            )));
        }

        accounts.insert(account.username.clone(), account.clone());
        Ok(())
    }

    /// Returns a copy of the account, or `None` when the username is unknown.
    pub async fn find(&self, username: &str) -> Option<Account> {
        let accounts = self.accounts.read().await;
        accounts.get(username).cloned()
    }

    /// Returns the number of stored accounts.
    pub async fn len(&self) -> usize {
        self.accounts.read().await.len()
    }

    /// Returns `true` if no account is stored.
    pub async fn is_empty(&self) -> bool {
        self.accounts.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;

    fn account(username: &str, role: Role) -> Account {
        Account {
            username: username.to_string(),
            password_hash: "$argon2id$placeholder".to_string(),
            role,
        }
    }

    #[tokio::test]
    async fn save_then_find() {
        let store = AccountStore::new();
        store.save(&account("alice", Role::Admin)).await.unwrap();

        let found = store.find("alice").await.unwrap();
        assert_eq!(found.role, Role::Admin);
        assert!(store.find("bob").await.is_none());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn duplicate_username_rejected() {
        let store = AccountStore::new();
        store.save(&account("alice", Role::Admin)).await.unwrap();

        let err = store.save(&account("alice", Role::User)).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)));
        assert_eq!(store.find("alice").await.unwrap().role, Role::Admin);
    }

    #[tokio::test]
    async fn returned_copy_is_detached() {
        let store = AccountStore::new();
        store.save(&account("alice", Role::User)).await.unwrap();

        let mut copy = store.find("alice").await.unwrap();
        copy.role = Role::Admin;
        copy.password_hash.clear();

        let stored = store.find("alice").await.unwrap();
        assert_eq!(stored.role, Role::User);
        assert!(!stored.password_hash.is_empty());
    }
}
