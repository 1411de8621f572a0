use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Where catalog and attempt snapshots are written; `None` keeps everything in memory.
    pub local_state_path: Option<String>,
    pub rust_log: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            local_state_path: None,
            rust_log: "info".to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let host = env::var("BACKEND_HOST").unwrap_or(defaults.host);
        let port = env::var("BACKEND_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.port);
        let local_state_path = env::var("LOCAL_STATE_PATH")
            .ok()
            .filter(|v| !v.trim().is_empty());
        let rust_log = env::var("RUST_LOG").unwrap_or(defaults.rust_log);
        Self {
            host,
            port,
            local_state_path,
            rust_log,
        }
    }
}
