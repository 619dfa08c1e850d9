//! Accounts, tokens and access policy.
//!
//! Passwords are stored as Argon2 hashes; successful logins are exchanged for
//! HS256-signed tokens carrying the account's role, which the server-side
//! guard checks against the [`AccessPolicy`] on every protected call.

/// Account records, roles and password hashing.
pub mod account;

/// Username/password login.
pub mod login;

/// Method-to-role access table.
pub mod policy;

/// In-memory account registry.
pub mod store;

/// Token issuance and verification.
pub mod token;

pub use account::{Account, Role};
pub use login::LoginService;
pub use policy::{methods, AccessPolicy};
pub use store::AccountStore;
pub use token::{Claims, TokenManager};
