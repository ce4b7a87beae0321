use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct SiteConfig {
    /// Title written to `index.json`.
    pub title: String,
    /// Directory whose `page.md` replaces the built-in page template.
    pub theme_dir: Option<PathBuf>,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            title: "Specifications".into(),
            theme_dir: None,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ServerMode {
    /// Built-in preview server with live reload.
    #[default]
    Builtin,
    /// A supervised external command, e.g. a documentation platform's dev server.
    External,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
    pub mode: ServerMode,
    pub host: String,
    pub port: u16,
    /// External server command; `{port}` is replaced with the port.
    pub command: Option<String>,
    /// Command run to refresh the external server's search index.
    pub rebuild_command: Option<String>,
    /// Whether the external server picks up changed pages on its own.
    pub hot_reload: bool,
    pub restart_on_crash: bool,
    pub max_restarts: u32,
    pub open: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            mode: ServerMode::Builtin,
            host: "127.0.0.1".into(),
            port: 3000,
            command: None,
            rebuild_command: None,
            hot_reload: true,
            restart_on_crash: true,
            max_restarts: 3,
            open: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_mode_names() {
        let mode: ServerMode = serde_json::from_str("\"external\"").unwrap();
        assert_eq!(mode, ServerMode::External);
    }

    #[test]
    fn test_partial_server_config_keeps_defaults() {
        let config: ServerConfig = serde_json::from_str(r#"{"port": 8080}"#).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.max_restarts, 3);
        assert_eq!(config.mode, ServerMode::Builtin);
    }
}
