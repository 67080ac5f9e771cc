use crate::controller::ControllerSettings;
use crate::realtime::{ConnectionOptions, Transport};
use clap::Parser;
use std::env;
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:5000";
pub const DEFAULT_TRANSPORTS: &str = "websocket,polling";
pub const DEFAULT_LOG_DIR: &str = ".tarang/logs";

#[derive(Parser, Debug, Clone)]
#[command(name = "tarang-console", about = "Terminal console for the Tarang simulation service")]
pub struct Args {
    #[arg(long, default_value = "")]
    pub server_url: String,
    #[arg(long, default_value = "")]
    pub transports: String,
    #[arg(long)]
    pub no_upgrade: bool,
    #[arg(long)]
    pub no_remember_upgrade: bool,
    #[arg(long, default_value_t = 16)]
    pub flush_interval_ms: u64,
    #[arg(long, default_value_t = 5)]
    pub notification_ttl_secs: u64,
    #[arg(long, default_value_t = 30)]
    pub request_timeout_secs: u64,
    #[arg(long, default_value = "")]
    pub log_dir: String,
    #[arg(long)]
    pub headless: bool,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid server url {url}: {reason}")]
    ServerUrl { url: String, reason: String },
    #[error("no usable transport in {0:?}")]
    Transports(String),
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub server_url: Url,
    pub connection: ConnectionOptions,
    pub controller: ControllerSettings,
    pub request_timeout: Duration,
    pub log_dir: String,
    pub log_stdout: bool,
    pub headless: bool,
}

impl RuntimeConfig {
    pub fn from_args(args: Args) -> Result<Self, ConfigError> {
        let server_url = resolve_server_url(&args.server_url, env::var("TARANG_SERVER_URL").ok())?;
        let transports = resolve_transports(&args.transports, env::var("TARANG_TRANSPORTS").ok())?;
        let log_dir = resolve_log_dir(&args.log_dir, env::var("TARANG_LOG_DIR").ok());
        let log_stdout = resolve_log_stdout(env::var("TARANG_LOG_STDOUT").ok(), args.headless);
        Ok(Self {
            server_url,
            connection: ConnectionOptions {
                transports,
                upgrade: !args.no_upgrade,
                remember_upgrade: !args.no_remember_upgrade,
            },
            controller: ControllerSettings {
                flush_interval: Duration::from_millis(args.flush_interval_ms.max(1)),
                notification_ttl: Duration::from_secs(args.notification_ttl_secs),
            },
            request_timeout: Duration::from_secs(args.request_timeout_secs.max(1)),
            log_dir,
            log_stdout,
            headless: args.headless,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

pub fn resolve_server_url(flag: &str, env_value: Option<String>) -> Result<Url, ConfigError> {
    let raw = if !flag.trim().is_empty() {
        flag.trim().to_string()
    } else {
        non_empty(env_value).unwrap_or_else(|| DEFAULT_SERVER_URL.to_string())
    };
    let url = Url::parse(&raw).map_err(|err| ConfigError::ServerUrl {
        url: raw.clone(),
        reason: err.to_string(),
    })?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ConfigError::ServerUrl {
            url: raw,
            reason: format!("unsupported scheme {other}"),
        }),
    }
}

pub fn resolve_transports(
    flag: &str,
    env_value: Option<String>,
) -> Result<Vec<Transport>, ConfigError> {
    let raw = if !flag.trim().is_empty() {
        flag.to_string()
    } else {
        non_empty(env_value).unwrap_or_else(|| DEFAULT_TRANSPORTS.to_string())
    };
    let transports = Transport::parse_list(&raw);
    if transports.is_empty() {
        return Err(ConfigError::Transports(raw));
    }
    Ok(transports)
}

pub fn resolve_log_dir(flag: &str, env_value: Option<String>) -> String {
    if !flag.trim().is_empty() {
        return flag.to_string();
    }
    non_empty(env_value).unwrap_or_else(|| DEFAULT_LOG_DIR.to_string())
}

/// Headless runs mirror logs to stdout unless the environment says no.
pub fn resolve_log_stdout(env_value: Option<String>, headless: bool) -> bool {
    env_value
        .as_deref()
        .and_then(parse_bool_env)
        .unwrap_or(headless)
}

pub fn parse_bool_env(value: &str) -> Option<bool> {
    match value.trim() {
        "1" | "true" | "TRUE" | "yes" | "YES" | "on" | "ON" => Some(true),
        "0" | "false" | "FALSE" | "no" | "NO" | "off" | "OFF" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_beats_env_beats_default() {
        let url = resolve_server_url("http://flag:1", Some("http://env:2".to_string()))
            .expect("flag url");
        assert_eq!(url.host_str(), Some("flag"));
        let url = resolve_server_url("", Some("http://env:2".to_string())).expect("env url");
        assert_eq!(url.host_str(), Some("env"));
        let url = resolve_server_url("  ", Some(" ".to_string())).expect("default url");
        assert_eq!(url.as_str(), "http://127.0.0.1:5000/");
    }

    #[test]
    fn websocket_urls_are_rejected_as_server_url() {
        assert!(resolve_server_url("ws://127.0.0.1:5000", None).is_err());
        assert!(resolve_server_url("not a url", None).is_err());
    }

    #[test]
    fn transports_default_and_validate() {
        assert_eq!(
            resolve_transports("", None).expect("default"),
            vec![Transport::WebSocket, Transport::Polling]
        );
        assert_eq!(
            resolve_transports("polling", None).expect("flag"),
            vec![Transport::Polling]
        );
        assert!(resolve_transports("", Some("smoke-signal".to_string())).is_err());
    }

    #[test]
    fn bool_env_values() {
        assert_eq!(parse_bool_env("on"), Some(true));
        assert_eq!(parse_bool_env(" NO "), Some(false));
        assert_eq!(parse_bool_env("maybe"), None);
        assert!(resolve_log_stdout(None, true));
        assert!(!resolve_log_stdout(Some("0".to_string()), true));
        assert!(resolve_log_stdout(Some("yes".to_string()), false));
    }

    #[test]
    fn args_parse_into_runtime_config() {
        let args = Args::parse_from([
            "tarang-console",
            "--server-url",
            "http://sim.local:8080",
            "--transports",
            "polling,websocket",
            "--no-upgrade",
            "--flush-interval-ms",
            "32",
            "--log-dir",
            "/tmp/tarang-logs",
        ]);
        let config = RuntimeConfig::from_args(args).expect("config");
        assert_eq!(config.server_url.port(), Some(8080));
        assert_eq!(
            config.connection.transports,
            vec![Transport::Polling, Transport::WebSocket]
        );
        assert!(!config.connection.upgrade);
        assert!(config.connection.remember_upgrade);
        assert_eq!(config.controller.flush_interval, Duration::from_millis(32));
        assert_eq!(config.controller.notification_ttl, Duration::from_secs(5));
        assert_eq!(config.log_dir, "/tmp/tarang-logs");
        assert!(!config.headless);
    }
}
