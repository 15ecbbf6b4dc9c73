//! Credential mode, defaults and validation.

pub mod resolver;

pub use resolver::{ConfigureRequest, CredentialResolver, ResolvedCredential, StoredCredentials};
