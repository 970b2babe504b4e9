use std::time::Duration;

use atelier_comfyui::client::EngineConfig;
use atelier_comfyui::reconnect::ReconnectConfig;

/// Server configuration loaded from environment variables.
///
/// All fields have defaults suitable for a ComfyUI instance running on the
/// same host. In production, override via environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `330`).
    ///
    /// Kept above `engine_timeout_secs` so engine timeouts surface as 504
    /// with an error body rather than a bare 408.
    pub request_timeout_secs: u64,
    /// Largest accepted multipart body in bytes (default: 20 MiB).
    pub max_upload_bytes: usize,
    /// ComfyUI HTTP base URL (default: `http://127.0.0.1:8188`).
    pub comfyui_api_url: String,
    /// ComfyUI WebSocket base URL (default: `ws://127.0.0.1:8188`).
    pub comfyui_ws_url: String,
    /// Seconds to wait for a submitted job to complete (default: `300`).
    pub engine_timeout_secs: u64,
    /// Jobs allowed in flight on the engine at once (default: `4`).
    pub max_concurrent_jobs: usize,
    /// WebSocket connect attempts per job (default: `3`).
    pub engine_connect_attempts: u32,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                   | Default                  |
    /// |---------------------------|--------------------------|
    /// | `HOST`                    | `0.0.0.0`                |
    /// | `PORT`                    | `3000`                   |
    /// | `CORS_ORIGINS`            | `http://localhost:5173`  |
    /// | `REQUEST_TIMEOUT_SECS`    | `330`                    |
    /// | `MAX_UPLOAD_BYTES`        | `20971520`               |
    /// | `COMFYUI_API_URL`         | `http://127.0.0.1:8188`  |
    /// | `COMFYUI_WS_URL`          | `ws://127.0.0.1:8188`    |
    /// | `ENGINE_TIMEOUT_SECS`     | `300`                    |
    /// | `MAX_CONCURRENT_JOBS`     | `4`                      |
    /// | `ENGINE_CONNECT_ATTEMPTS` | `3`                      |
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let port: u16 = std::env::var("PORT")
            .unwrap_or_else(|_| "3000".into())
            .parse()
            .expect("PORT must be a valid u16");

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let request_timeout_secs: u64 = std::env::var("REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|_| "330".into())
            .parse()
            .expect("REQUEST_TIMEOUT_SECS must be a valid u64");

        let max_upload_bytes: usize = std::env::var("MAX_UPLOAD_BYTES")
            .unwrap_or_else(|_| (20 * 1024 * 1024).to_string())
            .parse()
            .expect("MAX_UPLOAD_BYTES must be a valid usize");

        let comfyui_api_url = std::env::var("COMFYUI_API_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:8188".into())
            .trim_end_matches('/')
            .to_string();

        let comfyui_ws_url = std::env::var("COMFYUI_WS_URL")
            .unwrap_or_else(|_| "ws://127.0.0.1:8188".into())
            .trim_end_matches('/')
            .to_string();

        let engine_timeout_secs: u64 = std::env::var("ENGINE_TIMEOUT_SECS")
            .unwrap_or_else(|_| "300".into())
            .parse()
            .expect("ENGINE_TIMEOUT_SECS must be a valid u64");

        let max_concurrent_jobs: usize = std::env::var("MAX_CONCURRENT_JOBS")
            .unwrap_or_else(|_| "4".into())
            .parse()
            .expect("MAX_CONCURRENT_JOBS must be a valid usize");

        let engine_connect_attempts: u32 = std::env::var("ENGINE_CONNECT_ATTEMPTS")
            .unwrap_or_else(|_| "3".into())
            .parse()
            .expect("ENGINE_CONNECT_ATTEMPTS must be a valid u32");

        Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            max_upload_bytes,
            comfyui_api_url,
            comfyui_ws_url,
            engine_timeout_secs,
            max_concurrent_jobs,
            engine_connect_attempts,
        }
    }

    /// Engine client settings derived from this configuration.
    pub fn engine_config(&self) -> EngineConfig {
        let mut engine = EngineConfig::new(self.comfyui_api_url.clone(), self.comfyui_ws_url.clone());
        engine.job_timeout = Duration::from_secs(self.engine_timeout_secs);
        engine.max_concurrent_jobs = self.max_concurrent_jobs;
        engine.reconnect = ReconnectConfig {
            max_attempts: self.engine_connect_attempts,
            ..Default::default()
        };
        engine
    }
}
