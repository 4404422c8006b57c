use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;

use tracing::warn;

const AGENT_PORT: &str = "AGENT_PORT";
const AGENT_ADDR: &str = "AGENT_ADDR";
const AGENT_SECRET: &str = "AGENT_SECRET";

const DEFAULT_PORT: u16 = 51243;

const DEFAULT_ADDR: IpAddr = IpAddr::V4(Ipv4Addr::UNSPECIFIED);

pub fn get_default_port() -> u16 {
    DEFAULT_PORT
}

/// Settings of the agent binary, read from the environment
#[derive(Debug, Clone, PartialEq)]
pub struct AgentSettings {
    pub address: IpAddr,
    pub port: u16,

    /// Expected value of the `X-MONITORING-SECRET` header
    pub secret: Option<String>,
}

impl AgentSettings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            address: parse_or(AGENT_ADDR, lookup(AGENT_ADDR), DEFAULT_ADDR),
            port: parse_or(AGENT_PORT, lookup(AGENT_PORT), DEFAULT_PORT),
            secret: lookup(AGENT_SECRET).filter(|secret| !secret.is_empty()),
        }
    }
}

fn parse_or<T: FromStr>(key: &str, raw: Option<String>, default: T) -> T {
    let Some(raw) = raw else {
        return default;
    };

    raw.trim().parse().unwrap_or_else(|_| {
        warn!("ignoring invalid {key}={raw:?}");
        default
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(vars: &[(&str, &str)]) -> AgentSettings {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AgentSettings::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let settings = settings(&[]);
        assert_eq!(settings.port, 51243);
        assert_eq!(settings.address, DEFAULT_ADDR);
        assert_eq!(settings.secret, None);
    }

    #[test]
    fn test_overrides_and_invalid_values() {
        let settings = settings(&[
            ("AGENT_PORT", "9100"),
            ("AGENT_ADDR", "not-an-ip"),
            ("AGENT_SECRET", "s3cret"),
        ]);
        assert_eq!(settings.port, 9100);
        assert_eq!(settings.address, DEFAULT_ADDR);
        assert_eq!(settings.secret.as_deref(), Some("s3cret"));
    }
}
