//! Process settings read from the environment.

use crate::error::ConfigError;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_SCHEMA: &str = "resources";
pub const DEFAULT_DATABASE_URL: &str = "postgres://localhost/resource_store";
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";
pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

#[derive(Clone, Debug, PartialEq)]
pub struct Settings {
    pub database_url: String,
    /// PostgreSQL schema every table lives in.
    pub schema: String,
    pub catalog_path: PathBuf,
    pub hooks_path: Option<PathBuf>,
    pub hook_timeout: Duration,
    pub request_timeout: Duration,
    pub max_connections: u32,
    pub bind_addr: SocketAddr,
    pub max_body_bytes: usize,
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| ConfigError::Validation(format!("{}={:?}: {}", key, raw, e))),
    }
}

fn positive_secs(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: u64) -> Result<Duration, ConfigError> {
    let secs: u64 = parsed(lookup, key, default)?;
    if secs == 0 {
        return Err(ConfigError::Validation(format!("{} must be positive", key)));
    }
    Ok(Duration::from_secs(secs))
}

impl Settings {
    /// Read settings from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Read settings through `lookup`. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let lookup = move |k: &str| lookup(k).filter(|v| !v.trim().is_empty());
        let max_connections: u32 = parsed(&lookup, "DB_MAX_CONNECTIONS", 5)?;
        if max_connections == 0 {
            return Err(ConfigError::Validation("DB_MAX_CONNECTIONS must be positive".into()));
        }
        let schema = lookup("RESOURCE_STORE_SCHEMA").unwrap_or_else(|| DEFAULT_SCHEMA.into());
        crate::config::validate_identifier("schema", &schema)?;

        Ok(Settings {
            database_url: lookup("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.into()),
            schema,
            catalog_path: lookup("CATALOG_PATH").unwrap_or_else(|| "catalog".into()).into(),
            hooks_path: lookup("HOOKS_PATH").map(PathBuf::from),
            hook_timeout: positive_secs(&lookup, "HOOK_TIMEOUT_SECS", 30)?,
            request_timeout: positive_secs(&lookup, "REQUEST_TIMEOUT_SECS", 60)?,
            max_connections,
            bind_addr: parsed(&lookup, "BIND_ADDR", SocketAddr::from(([0, 0, 0, 0], 3000)))?,
            max_body_bytes: parsed(&lookup, "MAX_BODY_BYTES", DEFAULT_MAX_BODY_BYTES)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(vars: &[(&str, &str)]) -> Result<Settings, ConfigError> {
        let env: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Settings::from_lookup(|k| env.get(k).cloned())
    }

    #[test]
    fn defaults() {
        let s = settings(&[]).unwrap();
        assert_eq!(s.schema, "resources");
        assert_eq!(s.catalog_path, PathBuf::from("catalog"));
        assert_eq!(s.hooks_path, None);
        assert_eq!(s.hook_timeout, Duration::from_secs(30));
        assert_eq!(s.request_timeout, Duration::from_secs(60));
        assert_eq!(s.max_connections, 5);
        assert_eq!(s.bind_addr.to_string(), DEFAULT_BIND_ADDR);
        assert_eq!(s.max_body_bytes, 1 << 20);
    }

    #[test]
    fn overrides() {
        let s = settings(&[
            ("DATABASE_URL", "postgres://db/x"),
            ("RESOURCE_STORE_SCHEMA", "tenant_store"),
            ("HOOKS_PATH", "/etc/hooks.json"),
            ("HOOK_TIMEOUT_SECS", " 5 "),
            ("BIND_ADDR", "127.0.0.1:8080"),
            ("DB_MAX_CONNECTIONS", ""),
        ])
        .unwrap();
        assert_eq!(s.database_url, "postgres://db/x");
        assert_eq!(s.schema, "tenant_store");
        assert_eq!(s.hooks_path, Some(PathBuf::from("/etc/hooks.json")));
        assert_eq!(s.hook_timeout, Duration::from_secs(5));
        assert_eq!(s.bind_addr.port(), 8080);
        assert_eq!(s.max_connections, 5);
    }

    #[test]
    fn invalid_values_are_errors() {
        assert!(matches!(settings(&[("REQUEST_TIMEOUT_SECS", "soon")]), Err(ConfigError::Validation(_))));
        assert!(matches!(settings(&[("HOOK_TIMEOUT_SECS", "0")]), Err(ConfigError::Validation(_))));
        assert!(matches!(settings(&[("BIND_ADDR", "nowhere")]), Err(ConfigError::Validation(_))));
        assert!(matches!(
            settings(&[("RESOURCE_STORE_SCHEMA", "Bad-Name")]),
            Err(ConfigError::InvalidIdentifier(_))
        ));
    }
}
