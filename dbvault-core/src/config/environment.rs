//! Process environment inputs.
//!
//! Read once at startup. They feed the key derivation and the bootstrap
//! connection descriptor; changing them requires a restart.

use crate::security::ConnectionDescriptor;
use std::collections::BTreeMap;
use zeroize::Zeroizing;

/// Backend family of the bootstrap connection
pub const ENV_DB_TYPE: &str = "DBVAULT_DB_TYPE";
/// Bootstrap database host
pub const ENV_DB_HOST: &str = "DBVAULT_DB_HOST";
/// Bootstrap database port
pub const ENV_DB_PORT: &str = "DBVAULT_DB_PORT";
/// Bootstrap database name
pub const ENV_DB_NAME: &str = "DBVAULT_DB_NAME";
/// Bootstrap database user
pub const ENV_DB_USER: &str = "DBVAULT_DB_USER";
/// Bootstrap database password
pub const ENV_DB_PASSWORD: &str = "DBVAULT_DB_PASSWORD";
/// Optional operator secret mixed into the vault key
pub const ENV_SECRET_KEY: &str = "DBVAULT_SECRET_KEY";

const DEFAULT_DB_TYPE: &str = "postgresql";

/// Environment-derived passphrase components and bootstrap connection.
#[derive(Clone, Default)]
pub struct EnvironmentInputs {
    /// Value of [`ENV_DB_TYPE`]
    pub db_type: Option<String>,
    /// Value of [`ENV_DB_HOST`]
    pub host: Option<String>,
    /// Value of [`ENV_DB_PORT`]
    pub port: Option<String>,
    /// Value of [`ENV_DB_NAME`]
    pub database: Option<String>,
    /// Value of [`ENV_DB_USER`]
    pub username: Option<String>,
    /// Value of [`ENV_DB_PASSWORD`]
    pub password: Option<Zeroizing<String>>,
    /// Value of [`ENV_SECRET_KEY`]
    pub secret_key: Option<Zeroizing<String>>,
}

impl std::fmt::Debug for EnvironmentInputs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvironmentInputs")
            .field("db_type", &self.db_type)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "****"))
            .field("secret_key", &self.secret_key.as_ref().map(|_| "****"))
            .finish()
    }
}

impl EnvironmentInputs {
    /// Reads the `DBVAULT_*` variables from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds inputs from an arbitrary lookup; blank values count as absent.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            db_type: read(ENV_DB_TYPE),
            host: read(ENV_DB_HOST),
            port: read(ENV_DB_PORT),
            database: read(ENV_DB_NAME),
            username: read(ENV_DB_USER),
            password: read(ENV_DB_PASSWORD).map(Zeroizing::new),
            secret_key: read(ENV_SECRET_KEY).map(Zeroizing::new),
        }
    }

    /// Passphrase components for the key deriver, in a fixed order.
    ///
    /// Missing components are empty strings so that the position of each part
    /// stays stable.
    pub fn key_parts(&self) -> Vec<&str> {
        vec![
            self.host.as_deref().unwrap_or_default(),
            self.database.as_deref().unwrap_or_default(),
            self.username.as_deref().unwrap_or_default(),
            self.secret_key
                .as_ref()
                .map(|s| s.as_str())
                .unwrap_or_default(),
        ]
    }

    /// True when enough is set to describe a bootstrap connection.
    pub fn has_bootstrap_connection(&self) -> bool {
        self.host.is_some() && self.database.is_some()
    }

    /// Non-secret record fields of the bootstrap connection.
    pub fn bootstrap_fields(&self) -> Option<BTreeMap<String, String>> {
        if !self.has_bootstrap_connection() {
            return None;
        }

        let mut fields = BTreeMap::new();
        fields.insert(
            "db_type".to_string(),
            self.db_type.clone().unwrap_or_else(|| DEFAULT_DB_TYPE.to_string()),
        );
        let optional = [
            ("host", &self.host),
            ("port", &self.port),
            ("database", &self.database),
            ("username", &self.username),
        ];
        for (key, value) in optional {
            if let Some(value) = value {
                fields.insert(key.to_string(), value.clone());
            }
        }
        Some(fields)
    }

    /// Builds the bootstrap descriptor, if the environment describes one.
    pub fn bootstrap_descriptor(&self) -> crate::Result<Option<ConnectionDescriptor>> {
        self.bootstrap_fields()
            .map(|fields| {
                ConnectionDescriptor::from_fields(&fields, self.password.as_deref().map(String::as_str))
            })
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> EnvironmentInputs {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        EnvironmentInputs::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_key_parts_keep_positions() {
        let inputs = lookup(&[(ENV_DB_HOST, "db1"), (ENV_DB_USER, "odoo")]);
        assert_eq!(inputs.key_parts(), vec!["db1", "", "odoo", ""]);
    }

    #[test]
    fn test_blank_values_are_absent() {
        let inputs = lookup(&[(ENV_DB_HOST, "   "), (ENV_DB_NAME, "erp")]);
        assert!(inputs.host.is_none());
        assert!(!inputs.has_bootstrap_connection());
        assert!(inputs.bootstrap_descriptor().unwrap().is_none());
    }

    #[test]
    fn test_bootstrap_descriptor() {
        let inputs = lookup(&[
            (ENV_DB_HOST, "db1.internal"),
            (ENV_DB_PORT, "6432"),
            (ENV_DB_NAME, "erp"),
            (ENV_DB_USER, "odoo"),
            (ENV_DB_PASSWORD, "p@ss"),
        ]);

        let descriptor = inputs.bootstrap_descriptor().unwrap().unwrap();
        assert_eq!(descriptor.host, "db1.internal");
        assert_eq!(descriptor.port, Some(6432));
        assert_eq!(descriptor.database, "erp");
        assert_eq!(descriptor.credentials.password(), Some("p@ss"));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let inputs = lookup(&[(ENV_DB_PASSWORD, "hunter2"), (ENV_SECRET_KEY, "pepper")]);
        let debug = format!("{:?}", inputs);
        assert!(!debug.contains("hunter2"));
        assert!(!debug.contains("pepper"));
    }

    #[test]
    fn test_from_env_reads_process_environment() {
        temp_env::with_vars(
            [
                (ENV_DB_HOST, Some("env-host")),
                (ENV_DB_NAME, Some("env-db")),
                (ENV_DB_USER, None::<&str>),
            ],
            || {
                let inputs = EnvironmentInputs::from_env();
                assert_eq!(inputs.host.as_deref(), Some("env-host"));
                assert_eq!(inputs.database.as_deref(), Some("env-db"));
                assert!(inputs.username.is_none());
            },
        );
    }
}
