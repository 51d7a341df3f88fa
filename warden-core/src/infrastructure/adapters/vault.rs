// warden-core/src/infrastructure/adapters/vault.rs

use serde_json::Value;

use crate::domain::query::EncryptedConfig;
use crate::ports::vault::{CredentialVault, SecretConfig, VaultError};

const PLAIN: &str = "plain:";
const ENV: &str = "env:";

/// Resolves connection configs stored in the project catalog:
/// `plain:<json>` carries the config inline, `env:<VAR>` reads the JSON from
/// an environment variable so the secret stays out of the catalog files.
pub struct LocalVault {
    lookup: Box<dyn Fn(&str) -> Option<String> + Send + Sync>,
}

impl LocalVault {
    pub fn new() -> Self {
        Self::with_lookup(|key| std::env::var(key).ok())
    }

    pub fn with_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        Self {
            lookup: Box::new(lookup),
        }
    }

    fn parse(json: &str) -> Result<SecretConfig, VaultError> {
        // serde_json errors quote the offending input; keep only the position.
        let value: Value = serde_json::from_str(json).map_err(|e| {
            VaultError::Malformed(format!("invalid JSON at line {} column {}", e.line(), e.column()))
        })?;
        SecretConfig::new(value)
    }
}

impl Default for LocalVault {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialVault for LocalVault {
    fn decrypt(&self, sealed: &EncryptedConfig) -> Result<SecretConfig, VaultError> {
        let sealed = sealed.sealed();
        if let Some(json) = sealed.strip_prefix(PLAIN) {
            return Self::parse(json);
        }
        if let Some(var) = sealed.strip_prefix(ENV) {
            let json = (self.lookup)(var)
                .ok_or_else(|| VaultError::Unresolvable(format!("environment variable {} is not set", var)))?;
            return Self::parse(&json);
        }
        Err(VaultError::Unresolvable(
            "unknown reference scheme (expected plain: or env:)".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    #[test]
    fn test_plain_and_env_references() -> Result<()> {
        let vault = LocalVault::with_lookup(|key| {
            (key == "CRM_DB").then(|| r#"{"path": "/data/crm.duckdb"}"#.to_string())
        });

        let plain = vault.decrypt(&EncryptedConfig::new(r#"plain:{"path": ":memory:"}"#))?;
        assert_eq!(plain.get_str("path"), Some(":memory:"));

        let env = vault.decrypt(&EncryptedConfig::new("env:CRM_DB"))?;
        assert_eq!(env.get_str("path"), Some("/data/crm.duckdb"));
        Ok(())
    }

    #[test]
    fn test_failures_never_echo_the_secret() {
        let vault = LocalVault::with_lookup(|_| None);

        let missing = vault.decrypt(&EncryptedConfig::new("env:NOPE"));
        assert!(matches!(missing, Err(VaultError::Unresolvable(_))));

        let broken = vault.decrypt(&EncryptedConfig::new("plain:{\"password\": hunter2}"));
        match broken {
            Err(e) => assert!(!e.to_string().contains("hunter2")),
            Ok(_) => panic!("malformed JSON must not decrypt"),
        }

        let scalar = vault.decrypt(&EncryptedConfig::new("plain:42"));
        assert!(matches!(scalar, Err(VaultError::Malformed(_))));

        let unknown = vault.decrypt(&EncryptedConfig::new("aes:deadbeef"));
        assert!(matches!(unknown, Err(VaultError::Unresolvable(_))));
    }
}
