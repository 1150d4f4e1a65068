use std::path::PathBuf;

use pulse_core::AppError;

const DEFAULT_PATH: &str = "data/pulse.db";

/// Configuration for the SQLite connection pool.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Database file, or `:memory:` for a private in-memory database.
    pub path: PathBuf,
    pub max_connections: u32,
}

impl DatabaseConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_connections: 5,
        }
    }

    /// A throwaway in-memory database (single connection).
    pub fn in_memory() -> Self {
        Self {
            path: PathBuf::from(":memory:"),
            max_connections: 1,
        }
    }

    pub fn is_in_memory(&self) -> bool {
        self.path.as_os_str() == ":memory:"
    }

    /// Read configuration from environment variables.
    ///
    /// - `PULSE_DATABASE_PATH` (optional, defaults to `data/pulse.db`)
    /// - `PULSE_DATABASE_MAX_CONNECTIONS` (optional, defaults to 5)
    pub fn from_env() -> Result<Self, AppError> {
        let path = std::env::var("PULSE_DATABASE_PATH")
            .ok()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_PATH.to_string());

        let max_connections = match std::env::var("PULSE_DATABASE_MAX_CONNECTIONS") {
            Err(_) => 5,
            Ok(raw) => parse_max_connections(&raw)?,
        };

        Ok(Self {
            path: PathBuf::from(path),
            max_connections,
        })
    }
}

fn parse_max_connections(raw: &str) -> Result<u32, AppError> {
    let parsed: u32 = raw.trim().parse().map_err(|_| {
        AppError::ConfigError(format!(
            "Invalid PULSE_DATABASE_MAX_CONNECTIONS '{raw}': must be a positive integer"
        ))
    })?;
    if parsed == 0 {
        return Err(AppError::ConfigError(
            "PULSE_DATABASE_MAX_CONNECTIONS must be at least 1".into(),
        ));
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_max_connections() {
        assert_eq!(parse_max_connections("8").unwrap(), 8);
        assert!(parse_max_connections("0").is_err());
        assert!(parse_max_connections("many").is_err());
    }

    #[test]
    fn test_in_memory() {
        let config = DatabaseConfig::in_memory();
        assert!(config.is_in_memory());
        assert_eq!(config.max_connections, 1);
        assert!(!DatabaseConfig::new("data/pulse.db").is_in_memory());
    }
}
