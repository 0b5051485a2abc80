//! # switchboard-auth
//!
//! Credential verification consumed by the connection lifecycle gate.
//!
//! - [`TokenVerifier`]: `verify(token) -> identity | failure`
//! - [`StaticTokenVerifier`]: fixed token table from settings
//! - [`HttpTokenVerifier`]: remote verification endpoint with a timeout

#![deny(unsafe_code)]

pub mod errors;
pub mod http;
pub mod static_tokens;
pub mod verifier;

pub use errors::AuthError;
pub use http::HttpTokenVerifier;
pub use static_tokens::StaticTokenVerifier;
pub use verifier::{TokenVerifier, VerifiedIdentity};
