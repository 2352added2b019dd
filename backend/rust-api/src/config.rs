use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub auth: AuthConfig,
    pub practice: PracticeConfig,
    pub questions: QuestionsConfig,
    pub sse: SseConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub bind_addr: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Rest,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub url: String,
    pub api_key: String,
    pub page_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub token_ttl_seconds: i64,
    pub teacher_code: Option<String>,
    pub bcrypt_cost: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PracticeConfig {
    pub mock_question_count: usize,
    pub mock_time_limit_minutes: u32,
    pub smart_session_size: usize,
    pub session_ttl_seconds: i64,
    pub history_limit: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuestionsConfig {
    pub cache_ttl_seconds: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SseConfig {
    pub tick_interval_ms: u64,
}

const DEV_JWT_SECRET: &str = "dev-secret-only-for-local-testing";

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                bind_addr: "0.0.0.0:8081".to_string(),
            },
            store: StoreConfig {
                backend: StoreBackend::Memory,
                url: "http://localhost:54321".to_string(),
                api_key: String::new(),
                page_size: 1000,
            },
            auth: AuthConfig {
                jwt_secret: DEV_JWT_SECRET.to_string(),
                token_ttl_seconds: 43200,
                teacher_code: None,
                bcrypt_cost: bcrypt::DEFAULT_COST,
            },
            practice: PracticeConfig {
                mock_question_count: 40,
                mock_time_limit_minutes: 60,
                smart_session_size: 20,
                session_ttl_seconds: 21600,
                history_limit: 100,
            },
            questions: QuestionsConfig {
                cache_ttl_seconds: 300,
            },
            sse: SseConfig {
                tick_interval_ms: 1000,
            },
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        dotenvy::dotenv().ok();

        // Determine environment (defaults to dev)
        let env = env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string());
        let defaults = Config::default();

        let settings = config::Config::builder()
            .set_default("server.bind_addr", defaults.server.bind_addr)?
            .set_default("store.backend", "memory")?
            .set_default("store.url", defaults.store.url.clone())?
            .set_default("store.api_key", defaults.store.api_key)?
            .set_default("store.page_size", defaults.store.page_size as i64)?
            .set_default("auth.jwt_secret", "")?
            .set_default("auth.token_ttl_seconds", defaults.auth.token_ttl_seconds)?
            .set_default("auth.bcrypt_cost", i64::from(defaults.auth.bcrypt_cost))?
            .set_default(
                "practice.mock_question_count",
                defaults.practice.mock_question_count as i64,
            )?
            .set_default(
                "practice.mock_time_limit_minutes",
                i64::from(defaults.practice.mock_time_limit_minutes),
            )?
            .set_default(
                "practice.smart_session_size",
                defaults.practice.smart_session_size as i64,
            )?
            .set_default(
                "practice.session_ttl_seconds",
                defaults.practice.session_ttl_seconds,
            )?
            .set_default("practice.history_limit", defaults.practice.history_limit as i64)?
            .set_default(
                "questions.cache_ttl_seconds",
                defaults.questions.cache_ttl_seconds,
            )?
            .set_default("sse.tick_interval_ms", defaults.sse.tick_interval_ms as i64)?
            .add_source(config::File::with_name(&format!("config/{}", env)).required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        let mut config: Config = settings.try_deserialize()?;

        // Legacy plain variables only fill settings left at their defaults.
        if config.auth.jwt_secret.is_empty() {
            config.auth.jwt_secret = env::var("JWT_SECRET").unwrap_or_default();
        }
        if config.auth.jwt_secret.is_empty() {
            if env == "prod" {
                return Err(config::ConfigError::Message(
                    "JWT_SECRET must be set in production".to_string(),
                ));
            }
            tracing::warn!("Using default JWT secret (dev mode only)");
            config.auth.jwt_secret = DEV_JWT_SECRET.to_string();
        }
        if config.store.url == defaults.store.url {
            if let Ok(url) = env::var("STORE_URL") {
                config.store.url = url;
            }
        }
        if config.store.api_key.is_empty() {
            config.store.api_key = env::var("STORE_API_KEY").unwrap_or_default();
        }
        if config.auth.teacher_code.is_none() {
            config.auth.teacher_code = env::var("TEACHER_CODE").ok().filter(|c| !c.is_empty());
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn load_applies_defaults_and_env_overrides() {
        env::set_var("APP__PRACTICE__MOCK_QUESTION_COUNT", "25");
        env::set_var("APP__STORE__BACKEND", "rest");
        env::remove_var("APP_ENV");

        let config = Config::load().unwrap();

        assert_eq!(config.practice.mock_question_count, 25);
        assert_eq!(config.practice.mock_time_limit_minutes, 60);
        assert_eq!(config.store.backend, StoreBackend::Rest);
        assert!(!config.auth.jwt_secret.is_empty());

        env::remove_var("APP__PRACTICE__MOCK_QUESTION_COUNT");
        env::remove_var("APP__STORE__BACKEND");
    }

    #[test]
    #[serial]
    fn prod_requires_jwt_secret() {
        env::set_var("APP_ENV", "prod");
        env::remove_var("JWT_SECRET");
        env::remove_var("APP__AUTH__JWT_SECRET");

        assert!(Config::load().is_err());

        env::remove_var("APP_ENV");
    }

    #[test]
    #[serial]
    fn legacy_store_variables_only_fill_defaults() {
        env::remove_var("APP_ENV");
        env::set_var("STORE_URL", "http://legacy:3000");
        env::set_var("STORE_API_KEY", "legacy-key");

        let config = Config::load().unwrap();
        assert_eq!(config.store.url, "http://legacy:3000");
        assert_eq!(config.store.api_key, "legacy-key");

        env::set_var("APP__STORE__URL", "http://layered:3000");
        env::set_var("APP__STORE__API_KEY", "layered-key");

        let config = Config::load().unwrap();
        assert_eq!(config.store.url, "http://layered:3000");
        assert_eq!(config.store.api_key, "layered-key");

        env::remove_var("STORE_URL");
        env::remove_var("STORE_API_KEY");
        env::remove_var("APP__STORE__URL");
        env::remove_var("APP__STORE__API_KEY");
    }
}
