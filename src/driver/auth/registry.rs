//! Named factories for authentication suppliers.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use super::oidc::{OidcConfig, OidcExchange};
use super::supplier::{AuthenticationSupplier, RefreshingSupplier};
use crate::driver::error::{DriverError, DriverResult};

/// Builds suppliers from connection credentials and properties.
pub trait AuthenticationSupplierFactory: Send + Sync {
    /// Unique name, also the property prefix `authn.<name>.`
    fn name(&self) -> &str;

    /// `properties` only holds the entries that carried this factory's
    /// prefix, with the prefix removed.
    fn create(
        &self,
        user: Option<&str>,
        password: Option<&str>,
        properties: &HashMap<String, String>,
    ) -> DriverResult<Arc<dyn AuthenticationSupplier>>;
}

/// Registry of factories keyed by name
#[derive(Default)]
pub struct AuthenticationSupplierRegistry {
    factories: HashMap<String, Arc<dyn AuthenticationSupplierFactory>>,
}

impl AuthenticationSupplierRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in factories.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.factories.insert(
            KeycloakSupplierFactory::NAME.to_string(),
            Arc::new(KeycloakSupplierFactory),
        );
        registry
    }

    pub fn register(&mut self, factory: Arc<dyn AuthenticationSupplierFactory>) -> DriverResult<()> {
        let name = factory.name().to_ascii_lowercase();
        if self.factories.contains_key(&name) {
            return Err(DriverError::configuration(format!(
                "An authentication supplier factory named '{}' is already registered",
                name
            )));
        }
        debug!(factory = %name, "Registered authentication supplier factory");
        self.factories.insert(name, factory);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(&name.to_ascii_lowercase())
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Create a supplier with the factory `name`.
    pub fn create(
        &self,
        name: &str,
        user: Option<&str>,
        password: Option<&str>,
        properties: &HashMap<String, String>,
    ) -> DriverResult<Arc<dyn AuthenticationSupplier>> {
        let factory = self.factories.get(&name.to_ascii_lowercase()).ok_or_else(|| {
            DriverError::configuration(format!(
                "No authentication supplier factory named '{}', available: [{}]",
                name,
                self.names().join(", ")
            ))
        })?;
        factory.create(user, password, &scoped_properties(name, properties))
    }
}

impl fmt::Debug for AuthenticationSupplierRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthenticationSupplierRegistry")
            .field("factories", &self.names())
            .finish()
    }
}

/// Entries of `properties` starting with `authn.<name>.`, ignoring case,
/// with that prefix stripped.
pub fn scoped_properties(name: &str, properties: &HashMap<String, String>) -> HashMap<String, String> {
    let prefix = format!("authn.{}.", name);
    properties
        .iter()
        .filter_map(|(key, value)| {
            let head = key.get(..prefix.len())?;
            if head.eq_ignore_ascii_case(&prefix) && key.len() > prefix.len() {
                Some((key[prefix.len()..].to_string(), value.clone()))
            } else {
                None
            }
        })
        .collect()
}

// ============================================================================
// Keycloak
// ============================================================================

/// Password grant against a Keycloak realm, with refresh-token rotation.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeycloakSupplierFactory;

impl KeycloakSupplierFactory {
    pub const NAME: &'static str = "kc";
}

impl AuthenticationSupplierFactory for KeycloakSupplierFactory {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn create(
        &self,
        user: Option<&str>,
        password: Option<&str>,
        properties: &HashMap<String, String>,
    ) -> DriverResult<Arc<dyn AuthenticationSupplier>> {
        let required = |key: &str| {
            properties.get(key).cloned().ok_or_else(|| {
                DriverError::configuration(format!("Property authn.{}.{} is required", Self::NAME, key))
            })
        };
        let config = OidcConfig {
            auth_server_url: required("authServerUrl")?,
            realm: required("realm")?,
            client_id: required("clientId")?,
            client_secret: required("clientSecret")?,
        };
        let user = match user {
            Some(user) => user.to_string(),
            None => required("user")?,
        };
        let password = match password {
            Some(password) => password.to_string(),
            None => required("password")?,
        };

        let exchange = OidcExchange::new(config, user, password)?;
        Ok(Arc::new(RefreshingSupplier::new(exchange)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::auth::StaticSupplier;
    use crate::bolt::message::AuthToken;

    struct Fixed;

    impl AuthenticationSupplierFactory for Fixed {
        fn name(&self) -> &str {
            "Fixed"
        }

        fn create(
            &self,
            user: Option<&str>,
            _password: Option<&str>,
            properties: &HashMap<String, String>,
        ) -> DriverResult<Arc<dyn AuthenticationSupplier>> {
            let realm = properties.get("realm").cloned().unwrap_or_default();
            let token = AuthToken::basic(user.unwrap_or("anonymous"), "pw").with_realm(&realm);
            Ok(Arc::new(StaticSupplier::new(token)))
        }
    }

    fn props(entries: &[(&str, &str)]) -> HashMap<String, String> {
        entries.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_scoped_properties() {
        let scoped = scoped_properties(
            "kc",
            &props(&[
                ("authn.kc.realm", "graphs"),
                ("AUTHN.KC.clientId", "bolt"),
                ("authn.other.realm", "nope"),
                ("authn.kc.", "empty"),
                ("user", "neo4j"),
            ]),
        );
        assert_eq!(scoped, props(&[("realm", "graphs"), ("clientId", "bolt")]));
    }

    #[tokio::test]
    async fn test_register_and_create() {
        let mut registry = AuthenticationSupplierRegistry::with_defaults();
        registry.register(Arc::new(Fixed)).unwrap();
        assert!(matches!(
            registry.register(Arc::new(Fixed)),
            Err(DriverError::Configuration(_))
        ));
        assert_eq!(registry.names(), vec!["fixed", "kc"]);

        let supplier = registry
            .create("FIXED", Some("neo4j"), None, &props(&[("authn.fixed.realm", "native")]))
            .unwrap();
        let auth = supplier.get().await.unwrap();
        assert_eq!(auth.token().principal.as_deref(), Some("neo4j"));
        assert_eq!(auth.token().realm.as_deref(), Some("native"));

        assert!(registry.create("missing", None, None, &HashMap::new()).is_err());
    }

    #[test]
    fn test_keycloak_requires_settings() {
        let registry = AuthenticationSupplierRegistry::with_defaults();
        let mut properties = props(&[
            ("authn.kc.authServerUrl", "https://sso.example.com"),
            ("authn.kc.realm", "graphs"),
            ("authn.kc.clientId", "bolt"),
        ]);
        let err = registry.create("kc", Some("neo4j"), Some("pw"), &properties).err().unwrap();
        assert!(err.to_string().contains("clientSecret"));

        properties.insert("authn.kc.clientSecret".into(), "s3cr3t".into());
        assert!(registry.create("kc", None, Some("pw"), &properties).is_err());

        properties.insert("authn.kc.user".into(), "neo4j".into());
        assert!(registry.create("kc", None, Some("pw"), &properties).is_ok());
    }
}
