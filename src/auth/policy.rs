use std::collections::{BTreeMap, HashMap, HashSet};

use super::account::Role;
use crate::Result;

/// Fully-qualified gRPC method paths served by this crate.
pub mod methods {
    /// `AuthService.Login`.
    pub const LOGIN: &str = "/catalog.AuthService/Login";
    /// `CatalogService.CreateEntity`.
    pub const CREATE_ENTITY: &str = "/catalog.CatalogService/CreateEntity";
    /// `CatalogService.SearchEntities`.
    pub const SEARCH_ENTITIES: &str = "/catalog.CatalogService/SearchEntities";
    /// `CatalogService.UploadAsset`.
    pub const UPLOAD_ASSET: &str = "/catalog.CatalogService/UploadAsset";
    /// `CatalogService.RateEntity`.
    pub const RATE_ENTITY: &str = "/catalog.CatalogService/RateEntity";

    /// Methods that require a token under the default policy.
    pub const PROTECTED: [&str; 3] = [CREATE_ENTITY, UPLOAD_ASSET, RATE_ENTITY];
}

/// Static table mapping a method path to the roles allowed to call it.
///
/// Methods absent from the table are open. Built once at startup and shared
/// read-only afterwards.
#[derive(Clone, Debug, Default)]
pub struct AccessPolicy {
    rules: HashMap<String, HashSet<Role>>,
}

impl AccessPolicy {
    /// Creates an empty policy, leaving every method open.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) the allow-list for `method`.
    pub fn allow(mut self, method: impl Into<String>, roles: impl IntoIterator<Item = Role>) -> Self {
        self.rules.insert(method.into(), roles.into_iter().collect());
        self
    }

    /// Builds a policy from a `method -> role names` table, as found in config.
    pub fn from_table(table: &BTreeMap<String, Vec<String>>) -> Result<Self> {
        let mut policy = Self::new();
        for (method, names) in table {
            let roles = names
                .iter()
                .map(|name| name.parse::<Role>())
                .collect::<Result<HashSet<_>>>()?;
            policy.rules.insert(method.clone(), roles);
        }
        Ok(policy)
    }

    /// Returns the allowed roles for `method`, or `None` if the method is open.
    pub fn allowed_roles(&self, method: &str) -> Option<&HashSet<Role>> {
        self.rules.get(method)
    }

    /// Returns `true` if `method` requires a token.
    pub fn is_protected(&self, method: &str) -> bool {
        self.rules.contains_key(method)
    }
}

/// Default table: catalog writes and uploads for admins, ratings for everyone
/// signed in.
pub fn default_policy_table() -> BTreeMap<String, Vec<String>> {
    BTreeMap::from([
        (methods::CREATE_ENTITY.to_string(), vec!["admin".to_string()]),
        (methods::UPLOAD_ASSET.to_string(), vec!["admin".to_string()]),
        (
            methods::RATE_ENTITY.to_string(),
            vec!["admin".to_string(), "user".to_string()],
        ),
    ])
}
