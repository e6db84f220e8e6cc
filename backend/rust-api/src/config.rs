use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub mongo_uri: String,
    pub redis_uri: String,
    pub mongo_database: String,
    /// Maximum graded attempts per user and exam before new starts are
    /// rejected.
    pub max_attempts: u64,
    /// Pause enforced between attempt starts for the same user and exam;
    /// zero disables the cooldown.
    pub attempt_cooldown_seconds: i64,
    /// Countdown granularity of the per-attempt timer task.
    pub tick_interval_ms: u64,
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        dotenvy::dotenv().ok();

        // Determine environment (defaults to dev)
        let env = env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string());

        // Build configuration from config/*.toml + ENV overrides
        let config_builder = config::Config::builder()
            .add_source(
                config::File::with_name(&format!("config/{}", env)).required(false), // Allow missing config file, fallback to ENV
            )
            // Override with environment variables (prefix: APP_)
            .add_source(config::Environment::with_prefix("APP").separator("__"));

        let settings = config_builder.build()?;

        let mongo_uri = settings
            .get_string("database.mongo_uri")
            .or_else(|_| env::var("MONGO_URI"))
            .unwrap_or_else(|_| {
                eprintln!("WARNING: MONGO_URI not set, using local default");
                "mongodb://localhost:27017".to_string()
            });

        let redis_uri = settings
            .get_string("redis.uri")
            .or_else(|_| env::var("REDIS_URI"))
            .unwrap_or_else(|_| {
                eprintln!("WARNING: REDIS_URI not set, using local default");
                "redis://127.0.0.1:6379/0".to_string()
            });

        let mongo_database = settings
            .get_string("database.mongo_database")
            .or_else(|_| env::var("MONGO_DATABASE"))
            .unwrap_or_else(|_| "examroom".to_string());

        let max_attempts = settings
            .get_int("exam.max_attempts")
            .ok()
            .or_else(|| {
                env::var("EXAM_MAX_ATTEMPTS")
                    .ok()
                    .and_then(|v| v.parse().ok())
            })
            .filter(|v| *v > 0)
            .unwrap_or(3) as u64;

        let attempt_cooldown_seconds = settings
            .get_int("exam.attempt_cooldown_seconds")
            .ok()
            .or_else(|| {
                env::var("EXAM_ATTEMPT_COOLDOWN_SECONDS")
                    .ok()
                    .and_then(|v| v.parse().ok())
            })
            .filter(|v| *v >= 0)
            .unwrap_or(300);

        let tick_interval_ms = settings
            .get_int("exam.tick_interval_ms")
            .ok()
            .or_else(|| {
                env::var("EXAM_TICK_INTERVAL_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
            })
            .filter(|v| *v > 0)
            .unwrap_or(1000) as u64;

        Ok(Config {
            mongo_uri,
            redis_uri,
            mongo_database,
            max_attempts,
            attempt_cooldown_seconds,
            tick_interval_ms,
        })
    }
}
