//! API configuration.

use std::path::PathBuf;
use std::str::FromStr;

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// CORS origins
    pub cors_origins: Vec<String>,
    /// Rate limit requests per second, per client IP
    pub rate_limit_rps: u32,
    /// Max request body size
    pub max_body_size: usize,
    /// Environment (development/production)
    pub environment: String,
    /// Root every submitted source path is resolved against
    pub media_root: PathBuf,
    /// Largest accepted source file
    pub max_source_bytes: u64,
    /// Run ffprobe on submitted sources
    pub validate_source_probe: bool,
    /// HS256 secret for bearer tokens
    pub jwt_secret: Option<String>,
    /// Required `iss` claim, if any
    pub jwt_issuer: Option<String>,
    /// Default and maximum page size of `GET /api/jobs`
    pub list_default_limit: usize,
    pub list_max_limit: usize,
    /// Serve `/metrics`
    pub metrics_enabled: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cors_origins: vec!["*".to_string()],
            rate_limit_rps: 10,
            max_body_size: 1024 * 1024, // 1MB
            environment: "development".to_string(),
            media_root: PathBuf::from("/srv/media"),
            max_source_bytes: 10 * 1024 * 1024 * 1024, // 10GB
            validate_source_probe: false,
            jwt_secret: None,
            jwt_issuer: None,
            list_default_limit: 20,
            list_max_limit: 100,
            metrics_enabled: true,
        }
    }
}

impl ApiConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("API_HOST").unwrap_or(defaults.host),
            port: env_or("API_PORT", defaults.port),
            cors_origins: std::env::var("CORS_ORIGINS")
                .map(|s| s.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or(defaults.cors_origins),
            rate_limit_rps: env_or("RATE_LIMIT_RPS", defaults.rate_limit_rps),
            max_body_size: env_or("MAX_BODY_SIZE", defaults.max_body_size),
            environment: std::env::var("ENVIRONMENT").unwrap_or(defaults.environment),
            media_root: std::env::var("MEDIA_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.media_root),
            max_source_bytes: env_or("MAX_SOURCE_BYTES", defaults.max_source_bytes),
            validate_source_probe: env_or("VALIDATE_SOURCE_PROBE", false),
            jwt_secret: std::env::var("AUTH_JWT_SECRET")
                .ok()
                .filter(|s| !s.is_empty()),
            jwt_issuer: std::env::var("AUTH_JWT_ISSUER")
                .ok()
                .filter(|s| !s.is_empty()),
            list_default_limit: env_or("JOB_LIST_DEFAULT_LIMIT", defaults.list_default_limit),
            list_max_limit: env_or("JOB_LIST_MAX_LIMIT", defaults.list_max_limit),
            metrics_enabled: std::env::var("METRICS_ENABLED")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(true),
        }
    }

    /// Check if running in production mode.
    pub fn is_production(&self) -> bool {
        self.environment.to_lowercase() == "production"
    }

    /// Clamp a requested page size.
    pub fn list_limit(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.list_default_limit)
            .clamp(1, self.list_max_limit.max(1))
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_limit_clamped() {
        let config = ApiConfig::default();
        assert_eq!(config.list_limit(None), 20);
        assert_eq!(config.list_limit(Some(0)), 1);
        assert_eq!(config.list_limit(Some(5000)), 100);
    }

    #[test]
    fn test_production_flag() {
        let config = ApiConfig {
            environment: "Production".into(),
            ..Default::default()
        };
        assert!(config.is_production());
        assert!(!ApiConfig::default().is_production());
    }
}
