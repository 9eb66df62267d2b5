//! Desktop client configuration loaded from environment variables.

use std::time::Duration;

use jobswipe_core::engine::EngineConfig;

use crate::coordinator::CoordinatorConfig;
use crate::listener::ListenerConfig;

/// Desktop coordinator configuration.
#[derive(Debug, Clone)]
pub struct DesktopConfig {
    /// Server HTTP base URL (default: `http://127.0.0.1:3000`).
    pub server_url: String,
    /// Server WebSocket URL (default: `ws://127.0.0.1:3000/api/v1/ws`).
    pub ws_url: String,
    /// Bearer token issued by the account collaborator.
    pub token: String,
    /// Stable identifier for this device.
    pub device_id: String,
    /// Parallel local executions (default: `1`).
    pub max_concurrent_executions: usize,
    /// Fixed delay between local retries (default: `30`).
    pub retry_delay_secs: u64,
    /// Local attempts per claim before reporting failure (default: `2`).
    pub max_local_retries: u32,
    /// Grace window before a cancelled execution is force-killed
    /// (default: `5`).
    pub cancel_grace_secs: u64,
    /// Claimed-not-started buffer size (default: `8`).
    pub claim_buffer_size: usize,
    /// How to launch the local automation engine.
    pub engine: EngineConfig,
}

impl DesktopConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                      | Required | Default                          |
    /// |------------------------------|----------|----------------------------------|
    /// | `SERVER_URL`                 | no       | `http://127.0.0.1:3000`          |
    /// | `WS_URL`                     | no       | `ws://127.0.0.1:3000/api/v1/ws`  |
    /// | `DESKTOP_TOKEN`              | **yes**  | --                               |
    /// | `DEVICE_ID`                  | no       | random UUID                      |
    /// | `MAX_CONCURRENT_EXECUTIONS`  | no       | `1`                              |
    /// | `RETRY_DELAY_SECS`           | no       | `30`                             |
    /// | `MAX_LOCAL_RETRIES`          | no       | `2`                              |
    /// | `CANCEL_GRACE_SECS`          | no       | `5`                              |
    /// | `CLAIM_BUFFER_SIZE`          | no       | `8`                              |
    ///
    /// # Panics
    ///
    /// Panics if `DESKTOP_TOKEN` is missing — the client cannot operate
    /// unauthenticated.
    pub fn from_env() -> Self {
        let server_url =
            std::env::var("SERVER_URL").unwrap_or_else(|_| "http://127.0.0.1:3000".into());
        let ws_url =
            std::env::var("WS_URL").unwrap_or_else(|_| "ws://127.0.0.1:3000/api/v1/ws".into());

        let token =
            std::env::var("DESKTOP_TOKEN").expect("DESKTOP_TOKEN must be set in the environment");

        let device_id =
            std::env::var("DEVICE_ID").unwrap_or_else(|_| uuid::Uuid::new_v4().to_string());

        Self {
            server_url,
            ws_url,
            token,
            device_id,
            max_concurrent_executions: env_u64("MAX_CONCURRENT_EXECUTIONS", 1) as usize,
            retry_delay_secs: env_u64("RETRY_DELAY_SECS", 30),
            max_local_retries: env_u64("MAX_LOCAL_RETRIES", 2) as u32,
            cancel_grace_secs: env_u64("CANCEL_GRACE_SECS", 5),
            claim_buffer_size: env_u64("CLAIM_BUFFER_SIZE", 8) as usize,
            engine: EngineConfig::from_env(),
        }
    }

    pub fn coordinator(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            max_concurrent_executions: self.max_concurrent_executions,
            retry_delay: Duration::from_secs(self.retry_delay_secs),
            max_local_retries: self.max_local_retries,
            cancel_grace: Duration::from_secs(self.cancel_grace_secs),
            buffer_size: self.claim_buffer_size,
        }
    }

    pub fn listener(&self) -> ListenerConfig {
        ListenerConfig {
            ws_url: self.ws_url.clone(),
            token: self.token.clone(),
            device_id: self.device_id.clone(),
        }
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
