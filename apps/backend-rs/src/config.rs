use std::env;

use chrono_tz::Tz;

const DEV_JWT_SECRET: &str = "villanueva-dev-secret-change-me";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub app_name: String,
    pub environment: String,
    pub api_prefix: String,
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
    pub database_url: Option<String>,
    pub db_pool_max_connections: u32,
    pub db_pool_min_connections: u32,
    pub db_pool_acquire_timeout_seconds: u64,
    pub db_pool_idle_timeout_seconds: u64,
    pub run_migrations: bool,
    pub jwt_secret: Option<String>,
    pub access_token_ttl_minutes: i64,
    pub refresh_token_ttl_days: i64,
    pub rate_limit_enabled: bool,
    pub rate_limit_per_second: u64,
    pub rate_limit_burst_size: u32,
    pub request_timeout_seconds: u64,
    pub business_timezone: Tz,
    pub dashboard_cache_ttl_seconds: u64,
    pub overdue_sweep_interval_seconds: u64,
    pub media_root: String,
    pub max_receipt_bytes: usize,
    pub default_payment_day: u32,
    /// Seeds an admin account on startup when no admin exists yet.
    pub bootstrap_admin_email: Option<String>,
    pub bootstrap_admin_password: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            app_name: env_or("APP_NAME", "Villanueva API"),
            environment: env_or("ENVIRONMENT", "development"),
            api_prefix: normalize_prefix(&env_or("API_PREFIX", "/api/v1")),
            host: env_or("HOST", "0.0.0.0"),
            port: env_parse_or("PORT", 8000),
            cors_origins: parse_csv(&env_or("CORS_ORIGINS", "http://localhost:5173")),
            database_url: env_opt("DATABASE_URL"),
            db_pool_max_connections: env_parse_or("DB_POOL_MAX_CONNECTIONS", 5),
            db_pool_min_connections: env_parse_or("DB_POOL_MIN_CONNECTIONS", 1),
            db_pool_acquire_timeout_seconds: env_parse_or("DB_POOL_ACQUIRE_TIMEOUT_SECONDS", 5),
            db_pool_idle_timeout_seconds: env_parse_or("DB_POOL_IDLE_TIMEOUT_SECONDS", 600),
            run_migrations: env_parse_bool_or("RUN_MIGRATIONS", true),
            jwt_secret: env_opt("JWT_SECRET"),
            access_token_ttl_minutes: env_parse_or("ACCESS_TOKEN_TTL_MINUTES", 60),
            refresh_token_ttl_days: env_parse_or("REFRESH_TOKEN_TTL_DAYS", 7),
            rate_limit_enabled: env_parse_bool_or("RATE_LIMIT_ENABLED", true),
            rate_limit_per_second: env_parse_or("RATE_LIMIT_PER_SECOND", 10),
            rate_limit_burst_size: env_parse_or("RATE_LIMIT_BURST_SIZE", 100),
            request_timeout_seconds: env_parse_or("REQUEST_TIMEOUT_SECONDS", 30),
            business_timezone: parse_timezone(&env_or("BUSINESS_TIMEZONE", "America/Lima")),
            dashboard_cache_ttl_seconds: env_parse_or("DASHBOARD_CACHE_TTL_SECONDS", 120),
            overdue_sweep_interval_seconds: env_parse_or("OVERDUE_SWEEP_INTERVAL_SECONDS", 3600),
            media_root: env_or("MEDIA_ROOT", "media"),
            max_receipt_bytes: env_parse_or("MAX_RECEIPT_BYTES", 5 * 1024 * 1024),
            default_payment_day: env_parse_or("DEFAULT_PAYMENT_DAY", 15),
            bootstrap_admin_email: env_opt("BOOTSTRAP_ADMIN_EMAIL"),
            bootstrap_admin_password: env_opt("BOOTSTRAP_ADMIN_PASSWORD"),
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment.trim().eq_ignore_ascii_case("production")
    }

    /// Signing secret for access and refresh tokens. Outside production a
    /// fixed development secret is used when `JWT_SECRET` is unset.
    pub fn jwt_signing_secret(&self) -> Option<&str> {
        match self.jwt_secret.as_deref() {
            Some(secret) => Some(secret),
            None if self.is_production() => None,
            None => Some(DEV_JWT_SECRET),
        }
    }

    /// Today's calendar date in the business timezone.
    pub fn today(&self) -> chrono::NaiveDate {
        chrono::Utc::now()
            .with_timezone(&self.business_timezone)
            .date_naive()
    }
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_or(key: &str, default: &str) -> String {
    env_opt(key).unwrap_or_else(|| default.to_string())
}

fn env_parse_or<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    env_opt(key)
        .and_then(|raw| raw.parse::<T>().ok())
        .unwrap_or(default)
}

fn env_parse_bool_or(key: &str, default: bool) -> bool {
    match env_opt(key).as_deref().map(str::to_ascii_lowercase) {
        Some(value) if value == "1" || value == "true" || value == "yes" || value == "on" => true,
        Some(value) if value == "0" || value == "false" || value == "no" || value == "off" => false,
        Some(_) => default,
        None => default,
    }
}

fn parse_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}

fn parse_timezone(raw: &str) -> Tz {
    raw.trim().parse::<Tz>().unwrap_or_else(|_| {
        tracing::warn!(timezone = %raw, "Unknown BUSINESS_TIMEZONE, falling back to America/Lima");
        chrono_tz::America::Lima
    })
}

fn normalize_prefix(raw: &str) -> String {
    let mut prefix = raw.trim().to_string();
    if prefix.is_empty() {
        return "/api/v1".to_string();
    }
    if !prefix.starts_with('/') {
        prefix.insert(0, '/');
    }
    while prefix.ends_with('/') && prefix.len() > 1 {
        prefix.pop();
    }
    prefix
}

#[cfg(test)]
mod tests {
    use super::{normalize_prefix, parse_csv, parse_timezone};

    #[test]
    fn normalizes_prefix() {
        assert_eq!(normalize_prefix("api/v1"), "/api/v1");
        assert_eq!(normalize_prefix("/api/v1/"), "/api/v1");
        assert_eq!(normalize_prefix(""), "/api/v1");
    }

    #[test]
    fn parses_csv_lists() {
        assert_eq!(
            parse_csv(" http://a.test , ,http://b.test"),
            vec!["http://a.test".to_string(), "http://b.test".to_string()]
        );
    }

    #[test]
    fn unknown_timezone_falls_back_to_lima() {
        assert_eq!(parse_timezone("Mars/Olympus"), chrono_tz::America::Lima);
        assert_eq!(
            parse_timezone("America/Asuncion"),
            chrono_tz::America::Asuncion
        );
    }
}
