//! Service configuration.
//!
//! Every value has a default and an environment override; the binary layers
//! CLI flags on top via clap. The config is read once at startup and shared
//! immutably through `AppState`.

use std::path::PathBuf;
use std::time::Duration;

use crate::utils::constants::CRUNCH_T_MINUS_DAYS;

/// Top-level service configuration
#[derive(Debug, Clone)]
pub struct ReaderConfig {
    /// Address the HTTP server binds to
    pub bind_addr: std::net::SocketAddr,
    /// Root directory for object storage and the record store
    pub data_dir: PathBuf,
    /// Run the browser headless (disable for local debugging)
    pub headless: bool,
    /// Override the computed pool size (0 = derive from free memory)
    pub pool_size: usize,
    /// Chat-completions endpoint base URL
    pub llm_base_url: String,
    /// API key forwarded to the LLM provider
    pub llm_api_key: String,
    /// Crunch settings
    pub crunch: CrunchConfig,
}

/// Nightly cruncher configuration
#[derive(Debug, Clone)]
pub struct CrunchConfig {
    /// Object-name prefix for archive files
    pub prefix: String,
    /// Schema revision embedded in archive paths (`r<rev>`)
    pub rev: u32,
    /// How many days back the job reaches
    pub t_minus_days: i64,
    /// Wall-clock budget for one scheduled invocation
    pub scheduled_timeout: Duration,
    /// Wall-clock budget when invoked over HTTP
    pub http_timeout: Duration,
}

impl Default for CrunchConfig {
    fn default() -> Self {
        Self {
            prefix: "crunched".into(),
            rev: 2,
            t_minus_days: CRUNCH_T_MINUS_DAYS,
            scheduled_timeout: Duration::from_secs(30 * 60),
            http_timeout: Duration::from_secs(60 * 60),
        }
    }
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            bind_addr: ([0, 0, 0, 0], 3000).into(),
            data_dir: PathBuf::from("./data"),
            headless: true,
            pool_size: 0,
            llm_base_url: "https://api.openai.com/v1".into(),
            llm_api_key: String::new(),
            crunch: CrunchConfig::default(),
        }
    }
}

impl ReaderConfig {
    /// Apply environment overrides on top of the defaults
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(addr) = std::env::var("READER_BIND_ADDR") {
            if let Ok(parsed) = addr.parse() {
                cfg.bind_addr = parsed;
            }
        }
        if let Ok(dir) = std::env::var("READER_DATA_DIR") {
            cfg.data_dir = PathBuf::from(dir);
        }
        if let Ok(v) = std::env::var("READER_POOL_SIZE") {
            cfg.pool_size = v.parse().unwrap_or(0);
        }
        if let Ok(v) = std::env::var("READER_HEADLESS") {
            cfg.headless = v != "0" && v != "false";
        }
        if let Ok(v) = std::env::var("LLM_BASE_URL") {
            cfg.llm_base_url = v;
        }
        if let Ok(v) = std::env::var("LLM_API_KEY") {
            cfg.llm_api_key = v;
        }
        if let Ok(v) = std::env::var("CRUNCH_PREFIX") {
            cfg.crunch.prefix = v;
        }
        if let Ok(v) = std::env::var("CRUNCH_REV") {
            cfg.crunch.rev = v.parse().unwrap_or(cfg.crunch.rev);
        }
        if let Ok(v) = std::env::var("CRUNCH_T_MINUS_DAYS") {
            cfg.crunch.t_minus_days = v.parse().unwrap_or(cfg.crunch.t_minus_days);
        }
        cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = ReaderConfig::default();
        assert_eq!(cfg.crunch.rev, 2);
        assert_eq!(cfg.crunch.t_minus_days, 31);
        assert!(cfg.headless);
        assert_eq!(cfg.pool_size, 0);
    }
}
