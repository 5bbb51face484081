use std::net::Ipv4Addr;
use std::str::FromStr;

const COLLECTOR_PORT: &str = "COLLECTOR_PORT";

const DEFAULT_PORT: u16 = 8094;

const COLLECTOR_ADDR: &str = "COLLECTOR_ADDR";

const DEFAULT_ADDR: Ipv4Addr = Ipv4Addr::new(0, 0, 0, 0);

const COLLECTOR_API_SECRET: &str = "COLLECTOR_API_SECRET";

/// Value of `key` parsed as `T`, or `default` when unset or unparsable
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|raw| raw.trim().parse().ok())
        .unwrap_or(default)
}

/// UDP port for the ingress socket when the config file names none
pub fn get_port() -> u16 {
    env_or(COLLECTOR_PORT, DEFAULT_PORT)
}

pub fn get_addr() -> Ipv4Addr {
    env_or(COLLECTOR_ADDR, DEFAULT_ADDR)
}

pub fn get_api_secret() -> Option<String> {
    std::env::var(COLLECTOR_API_SECRET)
        .ok()
        .filter(|secret| !secret.is_empty())
}
