use crate::{discovery::DEFAULT_HOP_LIMIT, grid::GridBounds};

pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} has an invalid value `{value}`")]
    InvalidValue { name: &'static str, value: String },
    #[error("grid bounding box is empty or outside the globe: {0:?}")]
    InvalidBounds(GridBounds),
    #[error("DATABASE_URL must be set")]
    MissingDatabaseUrl,
}

/// Runtime settings read from the environment.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    /// PostgreSQL connection string (`DATABASE_URL`). Only commands that talk
    /// to the database require it.
    pub database_url: Option<String>,
    pub max_connections: u32,
    /// Largest `max_hops` a discovery request may ask for.
    pub max_hops: u32,
    pub bounds: GridBounds,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            max_hops: DEFAULT_HOP_LIMIT,
            bounds: GridBounds::default(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let bounds = GridBounds {
            min_lat: parse_or(&lookup, "RIDERSBUDDY_GRID_MIN_LAT", defaults.bounds.min_lat)?,
            max_lat: parse_or(&lookup, "RIDERSBUDDY_GRID_MAX_LAT", defaults.bounds.max_lat)?,
            min_lng: parse_or(&lookup, "RIDERSBUDDY_GRID_MIN_LNG", defaults.bounds.min_lng)?,
            max_lng: parse_or(&lookup, "RIDERSBUDDY_GRID_MAX_LNG", defaults.bounds.max_lng)?,
        };
        if !bounds.is_valid() {
            return Err(ConfigError::InvalidBounds(bounds));
        }

        let max_connections = parse_or(
            &lookup,
            "RIDERSBUDDY_MAX_CONNECTIONS",
            defaults.max_connections,
        )?;
        if max_connections == 0 {
            return Err(ConfigError::InvalidValue {
                name: "RIDERSBUDDY_MAX_CONNECTIONS",
                value: "0".to_string(),
            });
        }

        Ok(Self {
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            max_connections,
            max_hops: parse_or(&lookup, "RIDERSBUDDY_MAX_HOPS", defaults.max_hops)?,
            bounds,
        })
    }

    pub fn require_database_url(&self) -> Result<&str, ConfigError> {
        self.database_url
            .as_deref()
            .ok_or(ConfigError::MissingDatabaseUrl)
    }
}

fn parse_or<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(name) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { name, value: raw }),
    }
}
