//! Authentication suppliers and their registry.
//!
//! - [`StaticSupplier`] - fixed credentials
//! - [`RefreshingSupplier`] - cached bearer token, rotated on expiry
//! - [`OidcExchange`] - password and refresh-token grants over HTTP
//! - [`AuthenticationSupplierRegistry`] - factories looked up by name

pub mod oidc;
pub mod registry;
pub mod supplier;

pub use oidc::{jwt_expiry, OidcConfig, OidcExchange};
pub use registry::{
    scoped_properties, AuthenticationSupplierFactory, AuthenticationSupplierRegistry, KeycloakSupplierFactory,
};
pub use supplier::{
    Authentication, AuthenticationSupplier, RefreshingSupplier, StaticSupplier, TokenExchange, TokenGrant,
};
