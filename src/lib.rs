//! Authenticated catalog service over gRPC.
//!
//! Clients log in with a username and password and receive a signed,
//! time-bounded access token. The server checks that token against a static
//! method-to-role table before any handler runs. The catalog itself offers
//! unary entity creation, a server-streamed search, a client-streamed asset
//! upload and a bidirectional rating stream.
//!
//! - [`auth`]: accounts, password hashing, tokens and the access policy.
//! - [`server`]: stores, handlers, the authorization guard and configuration.
//! - [`client`]: login, token attachment with background refresh, and call
//!   helpers.

#![deny(unsafe_code)]

pub mod auth;
pub mod client;
pub mod error;
pub mod server;

/// Generated protobuf messages and gRPC stubs.
#[allow(missing_docs, clippy::all)]
pub mod proto {
    tonic::include_proto!("catalog");

    /// Encoded descriptors of every catalog service, served by reflection.
    pub const FILE_DESCRIPTOR_SET: &[u8] = tonic::include_file_descriptor_set!("catalog_descriptor");
}

pub use error::Error;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;
