//! Credential lookup.
//!
//! Provider adapters ask for secrets by name at run time instead of holding
//! literal keys, so credentials can rotate between runs and tests can inject
//! their own.

use secrecy::Secret;
use std::collections::HashMap;

pub const STRIPE_SECRET_KEY: &str = "STRIPE_SECRET_KEY";
pub const PAYPAL_CLIENT_ID: &str = "PAYPAL_CLIENT_ID";
pub const PAYPAL_CLIENT_SECRET: &str = "PAYPAL_CLIENT_SECRET";

pub trait SecretProvider: Send + Sync {
    fn secret(&self, name: &str) -> Option<Secret<String>>;
}

/// Reads secrets from process environment variables.
#[derive(Debug, Clone, Default)]
pub struct EnvSecrets;

impl SecretProvider for EnvSecrets {
    fn secret(&self, name: &str) -> Option<Secret<String>> {
        std::env::var(name)
            .ok()
            .filter(|v| !v.is_empty())
            .map(Secret::new)
    }
}

/// Fixed in-memory secrets.
#[derive(Clone, Default)]
pub struct StaticSecrets {
    values: HashMap<String, String>,
}

impl StaticSecrets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: &str) -> Self {
        self.values.insert(name.to_string(), value.to_string());
        self
    }
}

impl SecretProvider for StaticSecrets {
    fn secret(&self, name: &str) -> Option<Secret<String>> {
        self.values.get(name).cloned().map(Secret::new)
    }
}
