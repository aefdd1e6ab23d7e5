use rust_decimal::Decimal;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
    pub idle_timeout_secs: u64,
    pub max_lifetime_secs: u64,
    pub test_before_acquire: bool,
}

/// Which storage backend the service runs against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

/// Penalty applied to incomplete bonus grants when the player withdraws
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PenaltyRule {
    /// The full granted amount is removed from the bonus balance
    Forfeit,
    /// Only the not-yet-wagered share of the grant is removed
    Unwagered,
    /// Grant is cancelled without touching the bonus balance
    None,
}

impl PenaltyRule {
    pub fn from_str(s: &str) -> Result<Self, String> {
        match s.to_lowercase().as_str() {
            "forfeit" => Ok(PenaltyRule::Forfeit),
            "unwagered" => Ok(PenaltyRule::Unwagered),
            "none" => Ok(PenaltyRule::None),
            _ => Err(format!("Invalid penalty rule: {}", s)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PenaltyRule::Forfeit => "forfeit",
            PenaltyRule::Unwagered => "unwagered",
            PenaltyRule::None => "none",
        }
    }
}

/// Bonus grant policy
#[derive(Debug, Clone)]
pub struct BonusPolicy {
    pub expiry_days: i64,
    pub wagering_multiplier: Decimal,
    /// Percent of the deposit granted as first-deposit bonus (0 disables)
    pub first_deposit_percent: Decimal,
    /// Percent of the deposit granted as reload bonus (0 disables)
    pub reload_percent: Decimal,
    pub withdrawal_penalty: PenaltyRule,
}

/// Settlement pipeline configuration
#[derive(Debug, Clone)]
pub struct SettlementConfig {
    pub cas_max_attempts: u32,
    pub username_suffix_len: usize,
    pub game_catalog_url: Option<String>,
    pub game_lookup_timeout_ms: u64,
    pub crash_game_patterns: Vec<String>,
    pub bonus: BonusPolicy,
    pub sweep_interval_secs: u64,
    pub audit_log_dir: String,
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub settlement: SettlementConfig,
    pub store: StoreBackend,
    pub log_level: String,
    pub http_port: u16,
    pub environment: String,
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.trim().parse::<T>().ok())
        .unwrap_or(default)
}

impl DatabaseConfig {
    /// Create database config from environment variables
    pub fn from_env() -> Result<Self, String> {
        let url = env::var("DATABASE_URL")
            .map_err(|_| "DATABASE_URL environment variable is required")?;

        let max_connections = env_parse("DATABASE_MAX_CONNECTIONS", 10u32);
        let acquire_timeout_secs = env_parse("DATABASE_ACQUIRE_TIMEOUT_SECS", 30u64);
        let idle_timeout_secs = env_parse("DATABASE_IDLE_TIMEOUT_SECS", 600u64); // 10 minutes
        let max_lifetime_secs = env_parse("DATABASE_MAX_LIFETIME_SECS", 1800u64); // 30 minutes
        let test_before_acquire = env_parse("DATABASE_TEST_BEFORE_ACQUIRE", true);

        // Validate configuration
        if max_connections == 0 {
            return Err("DATABASE_MAX_CONNECTIONS must be greater than 0".to_string());
        }

        if acquire_timeout_secs == 0 {
            return Err("DATABASE_ACQUIRE_TIMEOUT_SECS must be greater than 0".to_string());
        }

        Ok(Self {
            url,
            max_connections,
            acquire_timeout_secs,
            idle_timeout_secs,
            max_lifetime_secs,
            test_before_acquire,
        })
    }

    /// Get acquire timeout as Duration
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }

    /// Get idle timeout as Duration
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    /// Get max lifetime as Duration
    pub fn max_lifetime(&self) -> Duration {
        Duration::from_secs(self.max_lifetime_secs)
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgresql://localhost/casino".to_string(),
            max_connections: 10,
            acquire_timeout_secs: 30,
            idle_timeout_secs: 600,
            max_lifetime_secs: 1800,
            test_before_acquire: true,
        }
    }
}

impl Default for BonusPolicy {
    fn default() -> Self {
        Self {
            expiry_days: 30,
            wagering_multiplier: Decimal::new(10, 0),
            first_deposit_percent: Decimal::new(100, 0),
            reload_percent: Decimal::ZERO,
            withdrawal_penalty: PenaltyRule::Forfeit,
        }
    }
}

impl BonusPolicy {
    pub fn from_env() -> Result<Self, String> {
        let defaults = Self::default();

        let expiry_days = env_parse("BONUS_EXPIRY_DAYS", defaults.expiry_days);
        if expiry_days <= 0 {
            return Err("BONUS_EXPIRY_DAYS must be greater than 0".to_string());
        }

        let wagering_multiplier =
            env_parse("BONUS_WAGERING_MULTIPLIER", defaults.wagering_multiplier);
        let first_deposit_percent =
            env_parse("FIRST_DEPOSIT_BONUS_PERCENT", defaults.first_deposit_percent);
        let reload_percent = env_parse("RELOAD_BONUS_PERCENT", defaults.reload_percent);

        for (key, value) in [
            ("BONUS_WAGERING_MULTIPLIER", wagering_multiplier),
            ("FIRST_DEPOSIT_BONUS_PERCENT", first_deposit_percent),
            ("RELOAD_BONUS_PERCENT", reload_percent),
        ] {
            if value.is_sign_negative() {
                return Err(format!("{} must not be negative", key));
            }
        }

        let withdrawal_penalty = match env::var("WITHDRAWAL_BONUS_PENALTY") {
            Ok(v) => PenaltyRule::from_str(&v)?,
            Err(_) => defaults.withdrawal_penalty,
        };

        Ok(Self {
            expiry_days,
            wagering_multiplier,
            first_deposit_percent,
            reload_percent,
            withdrawal_penalty,
        })
    }
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            cas_max_attempts: 5,
            username_suffix_len: 3,
            game_catalog_url: None,
            game_lookup_timeout_ms: 1500,
            crash_game_patterns: default_crash_patterns(),
            bonus: BonusPolicy::default(),
            sweep_interval_secs: 300,
            audit_log_dir: "./logs".to_string(),
        }
    }
}

fn default_crash_patterns() -> Vec<String> {
    ["aviator", "crash", "jetx", "spaceman", "aviatrix"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl SettlementConfig {
    pub fn from_env() -> Result<Self, String> {
        let defaults = Self::default();

        let cas_max_attempts = env_parse("SETTLEMENT_CAS_MAX_ATTEMPTS", defaults.cas_max_attempts);
        if cas_max_attempts == 0 {
            return Err("SETTLEMENT_CAS_MAX_ATTEMPTS must be greater than 0".to_string());
        }

        let crash_game_patterns = match env::var("CRASH_GAME_PATTERNS") {
            Ok(raw) => raw
                .split(',')
                .map(|p| p.trim().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
            Err(_) => defaults.crash_game_patterns,
        };

        Ok(Self {
            cas_max_attempts,
            username_suffix_len: env_parse("USERNAME_SUFFIX_LEN", defaults.username_suffix_len),
            game_catalog_url: env::var("GAME_CATALOG_URL").ok().filter(|u| !u.is_empty()),
            game_lookup_timeout_ms: env_parse(
                "GAME_LOOKUP_TIMEOUT_MS",
                defaults.game_lookup_timeout_ms,
            ),
            crash_game_patterns,
            bonus: BonusPolicy::from_env()?,
            sweep_interval_secs: env_parse("BONUS_SWEEP_INTERVAL_SECS", defaults.sweep_interval_secs),
            audit_log_dir: env::var("AUDIT_LOG_DIR").unwrap_or(defaults.audit_log_dir),
        })
    }

    pub fn game_lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.game_lookup_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl AppConfig {
    /// Create application config from environment variables
    pub fn from_env() -> Result<Self, String> {
        let store = match env::var("STORE").unwrap_or_else(|_| "postgres".to_string()).to_lowercase().as_str() {
            "postgres" => StoreBackend::Postgres,
            "memory" => StoreBackend::Memory,
            other => return Err(format!("Invalid STORE: {}. Must be postgres or memory", other)),
        };

        let database = match store {
            StoreBackend::Postgres => DatabaseConfig::from_env()?,
            StoreBackend::Memory => DatabaseConfig::default(),
        };

        let settlement = SettlementConfig::from_env()?;

        let log_level = env::var("LOG_LEVEL")
            .unwrap_or_else(|_| "info".to_string());

        let http_port = env_parse("HTTP_PORT", 8080u16);

        let environment = env::var("ENVIRONMENT")
            .unwrap_or_else(|_| "development".to_string());

        // Validate log level
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&log_level.to_lowercase().as_str()) {
            return Err(format!(
                "Invalid LOG_LEVEL: {}. Must be one of: {:?}",
                log_level, valid_log_levels
            ));
        }

        // Validate environment
        let valid_environments = ["development", "staging", "production"];
        if !valid_environments.contains(&environment.to_lowercase().as_str()) {
            return Err(format!(
                "Invalid ENVIRONMENT: {}. Must be one of: {:?}",
                environment, valid_environments
            ));
        }

        if store == StoreBackend::Memory && environment.eq_ignore_ascii_case("production") {
            return Err("STORE=memory is not allowed in production".to_string());
        }

        Ok(Self {
            database,
            settlement,
            store,
            log_level: log_level.to_lowercase(),
            http_port,
            environment: environment.to_lowercase(),
        })
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    /// Check if running in development
    pub fn is_development(&self) -> bool {
        self.environment == "development"
    }

    /// Get database URL (convenience method)
    pub fn database_url(&self) -> &str {
        &self.database.url
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            settlement: SettlementConfig::default(),
            store: StoreBackend::Postgres,
            log_level: "info".to_string(),
            http_port: 8080,
            environment: "development".to_string(),
        }
    }
}
