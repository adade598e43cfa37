use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use regex::Regex;

use crate::error::RelayError;

const DEFAULT_PROXY_ADDR: &str = "0.0.0.0:3128";
const DEFAULT_ADMIN_ADDR: &str = "0.0.0.0:3129";
const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 30;

/// Process configuration, loaded once at startup from the environment.
/// An invalid value (unparsable address, broken regex) is a startup
/// error, never a runtime one.
pub struct Config {
    /// Address the forward-proxy HTTP surface binds to.
    pub proxy_addr: SocketAddr,
    /// Address the admin HTML surface binds to.
    pub admin_addr: SocketAddr,
    /// A request's `Host` must match one of these patterns to be served
    /// through the connection cache; everything else is declined.
    pub proxied_hosts: Vec<Regex>,
    /// Timeout for the upstream fetch on a cache miss.
    pub upstream_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, RelayError> {
        let proxy_addr = parse_addr_var("RELAYCACHE_PROXY_ADDR", DEFAULT_PROXY_ADDR)?;
        let admin_addr = parse_addr_var("RELAYCACHE_ADMIN_ADDR", DEFAULT_ADMIN_ADDR)?;

        let proxied_hosts = match env::var("RELAYCACHE_PROXIED_HOSTS") {
            Ok(raw) => parse_host_patterns(&raw)?,
            Err(_) => {
                tracing::warn!(
                    "RELAYCACHE_PROXIED_HOSTS not set — no hosts will be proxied through the cache"
                );
                Vec::new()
            }
        };

        let upstream_timeout = env::var("RELAYCACHE_UPSTREAM_TIMEOUT_SECS")
            .ok()
            .map(|raw| {
                raw.parse::<u64>()
                    .map(Duration::from_secs)
                    .map_err(|e| RelayError::Config(format!("invalid upstream timeout: {e}")))
            })
            .transpose()?
            .unwrap_or(Duration::from_secs(DEFAULT_UPSTREAM_TIMEOUT_SECS));

        Ok(Self {
            proxy_addr,
            admin_addr,
            proxied_hosts,
            upstream_timeout,
        })
    }

    /// True if `host` matches any of the configured patterns.
    pub fn matches_host(&self, host: &str) -> bool {
        self.proxied_hosts.iter().any(|re| re.is_match(host))
    }
}

fn parse_addr_var(name: &str, default: &str) -> Result<SocketAddr, RelayError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    raw.parse()
        .map_err(|e| RelayError::Config(format!("invalid {name} {raw:?}: {e}")))
}

/// Comma-separated list of regexes, e.g. `lw\d+\.aach\.tb-group\.fm,relay\d+\.t4e\.dj`.
fn parse_host_patterns(raw: &str) -> Result<Vec<Regex>, RelayError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|pattern| {
            Regex::new(pattern)
                .map_err(|e| RelayError::Config(format!("invalid host pattern {pattern:?}: {e}")))
        })
        .collect()
}
