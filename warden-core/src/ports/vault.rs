// warden-core/src/ports/vault.rs

use miette::Diagnostic;
use serde_json::Value;
use std::fmt;
use thiserror::Error;

use crate::domain::query::EncryptedConfig;

#[derive(Error, Debug, Diagnostic)]
pub enum VaultError {
    #[error("Credential reference could not be resolved: {0}")]
    #[diagnostic(code(warden::vault::unresolvable))]
    Unresolvable(String),

    #[error("Decrypted connection config is not a JSON object: {0}")]
    #[diagnostic(code(warden::vault::malformed))]
    Malformed(String),
}

/// Decrypted connection config. Deliberately not `Clone`: it lives for one
/// execution call and is dropped with it.
pub struct SecretConfig(Value);

impl SecretConfig {
    pub fn new(value: Value) -> Result<Self, VaultError> {
        if !value.is_object() {
            return Err(VaultError::Malformed("expected an object".to_string()));
        }
        Ok(Self(value))
    }

    pub fn value(&self) -> &Value {
        &self.0
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.0.get(key).and_then(Value::as_bool)
    }
}

impl fmt::Debug for SecretConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretConfig(<redacted>)")
    }
}

/// Turns a stored, sealed connection config into a usable one.
pub trait CredentialVault: Send + Sync {
    fn decrypt(&self, sealed: &EncryptedConfig) -> Result<SecretConfig, VaultError>;
}
