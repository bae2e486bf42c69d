use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_API_ENDPOINT: &str = "https://api.openai.com/v1";
const DEFAULT_TIMEOUT_MS: u64 = 60_000;
const DEFAULT_MAX_RETRIES: usize = 2;
/// Upper bound on per-model retries; the backoff doubles on each one.
pub const MAX_RETRIES_CAP: usize = 8;
const DEFAULT_ORAL_WEIGHT: f64 = 0.4;
const DEFAULT_STUDY_FOCUS_LIMIT: usize = 3;
const DEFAULT_SIMULATION_TOPIC_LIMIT: usize = 12;

#[derive(Debug, Clone)]
pub struct OracleConfig {
    pub api_key: Option<String>,
    pub api_endpoint: String,
    /// Ordered fallback list; the first model is tried first.
    pub models: Vec<String>,
    pub timeout: Duration,
    pub max_retries: usize,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_endpoint: DEFAULT_API_ENDPOINT.to_string(),
            models: vec![DEFAULT_MODEL.to_string()],
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// Oral share of the final grade.
    pub oral_weight: f64,
    pub study_focus_limit: usize,
    pub simulation_topic_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            oral_weight: DEFAULT_ORAL_WEIGHT,
            study_focus_limit: DEFAULT_STUDY_FOCUS_LIMIT,
            simulation_topic_limit: DEFAULT_SIMULATION_TOPIC_LIMIT,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: IpAddr,
    pub port: u16,
    pub log_level: String,
    pub database_path: PathBuf,
    pub oracle: OracleConfig,
    pub engine: EngineConfig,
}

impl Config {
    pub fn from_env() -> Self {
        let port = env_string("PORT")
            .and_then(|value| value.parse::<u16>().ok())
            .unwrap_or(3000);

        let host = env_string("HOST")
            .and_then(|value| value.parse::<IpAddr>().ok())
            .unwrap_or(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)));

        let log_level = env_string("RUST_LOG").unwrap_or_else(|| "info".to_string());

        let database_path = env_string("DATABASE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(crate::db::default_db_path);

        Self {
            host,
            port,
            log_level,
            database_path,
            oracle: OracleConfig::from_env(),
            engine: EngineConfig::from_env(),
        }
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

impl OracleConfig {
    pub fn from_env() -> Self {
        let models = env_string("ORACLE_MODELS")
            .map(|raw| parse_model_list(&raw))
            .filter(|list| !list.is_empty())
            .unwrap_or_else(|| vec![DEFAULT_MODEL.to_string()]);

        Self {
            api_key: env_string("ORACLE_API_KEY"),
            api_endpoint: normalize_endpoint(
                env_string("ORACLE_API_ENDPOINT").unwrap_or_else(|| DEFAULT_API_ENDPOINT.to_string()),
            ),
            models,
            timeout: Duration::from_millis(env_parse("ORACLE_TIMEOUT").unwrap_or(DEFAULT_TIMEOUT_MS)),
            max_retries: env_parse::<usize>("ORACLE_MAX_RETRIES")
                .unwrap_or(DEFAULT_MAX_RETRIES)
                .min(MAX_RETRIES_CAP),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let oral_weight = env_parse::<f64>("ORAL_WEIGHT")
            .filter(|w| w.is_finite())
            .map(|w| w.clamp(0.0, 1.0))
            .unwrap_or(DEFAULT_ORAL_WEIGHT);

        Self {
            oral_weight,
            study_focus_limit: env_parse("STUDY_FOCUS_LIMIT").unwrap_or(DEFAULT_STUDY_FOCUS_LIMIT),
            simulation_topic_limit: env_parse("SIMULATION_TOPIC_LIMIT")
                .filter(|n: &usize| *n > 0)
                .unwrap_or(DEFAULT_SIMULATION_TOPIC_LIMIT),
        }
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_string(key)?.trim().parse().ok()
}

fn parse_model_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(str::to_string)
        .collect()
}

fn normalize_endpoint(endpoint: String) -> String {
    let trimmed = endpoint.trim().trim_end_matches('/');
    if trimmed.ends_with("/v1") || trimmed.contains("/v1/") {
        trimmed.to_string()
    } else {
        format!("{trimmed}/v1")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_list_keeps_order_and_drops_blanks() {
        assert_eq!(
            parse_model_list(" gpt-4o , ,gpt-4o-mini,"),
            vec!["gpt-4o".to_string(), "gpt-4o-mini".to_string()]
        );
    }

    #[test]
    fn test_normalize_endpoint() {
        assert_eq!(normalize_endpoint("http://localhost:8080/".into()), "http://localhost:8080/v1");
        assert_eq!(normalize_endpoint("https://x.ai/v1".into()), "https://x.ai/v1");
    }
}
