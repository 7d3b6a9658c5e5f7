//! Server configuration loaded from environment variables.
//!
//! Every setting has a `PXE_` prefixed variable. Lookups go through a
//! caller-supplied function so the process environment is only read by
//! [`ServerConfig::from_env`].

use crate::error::PxeError;
use dhcp6::options::MAX_DNS_SERVERS;
use std::net::Ipv6Addr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Addresses in the pool when `PXE_POOL_SIZE` is unset
pub const DEFAULT_POOL_SIZE: u64 = 50;
/// Seconds, when `PXE_PREFERRED_LIFETIME` is unset
pub const DEFAULT_PREFERRED_LIFETIME: u32 = 550;
/// Seconds, when `PXE_VALID_LIFETIME` is unset
pub const DEFAULT_VALID_LIFETIME: u32 = 600;
/// Boot API request timeout when `PXE_BOOT_API_TIMEOUT_SECS` is unset
pub const DEFAULT_API_TIMEOUT_SECS: u64 = 5;

/// Where boot URLs come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootSource {
    /// Per-machine lookups against a boot API
    Api { url: String, timeout: Duration },
    /// Per-machine table file
    File { path: PathBuf },
    /// One URL for UEFI HTTP boot clients, one for everyone else
    Static {
        http_boot_url: String,
        ipxe_boot_url: String,
    },
}

/// Settings for one DHCPv6 boot server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address the DHCPv6 socket binds to
    pub listen_addr: Ipv6Addr,
    /// Interface on which the DHCPv6 server multicast group is joined
    pub interface_index: u32,
    /// Link-layer address the server DUID is derived from
    pub server_mac: Vec<u8>,
    /// Where boot URLs come from
    pub boot: BootSource,
    /// Preference option value; omitted from replies when unset
    pub preference: Option<u8>,
    /// Recursive DNS servers handed to clients that ask for them
    pub dns_servers: Vec<Ipv6Addr>,
    /// First address of the pool
    pub pool_start: Ipv6Addr,
    /// Number of addresses in the pool
    pub pool_size: u64,
    /// Preferred lifetime of granted addresses, in seconds
    pub preferred_lifetime: u32,
    /// Valid lifetime of granted addresses, in seconds
    pub valid_lifetime: u32,
}

impl ServerConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self, PxeError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from `lookup`, which maps a variable name to its value
    pub fn from_lookup<F>(lookup: F) -> Result<Self, PxeError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let server_mac = parse_mac(&required(&get, "PXE_SERVER_MAC")?)?;

        let boot = match get("PXE_BOOT_API_URL") {
            Some(url) => BootSource::Api {
                url,
                timeout: Duration::from_secs(parse_or(
                    &get,
                    "PXE_BOOT_API_TIMEOUT_SECS",
                    DEFAULT_API_TIMEOUT_SECS,
                )?),
            },
            None => match get("PXE_BOOT_TABLE") {
                Some(path) => BootSource::File {
                    path: PathBuf::from(path),
                },
                None => BootSource::Static {
                    http_boot_url: required(&get, "PXE_HTTP_BOOT_URL")?,
                    ipxe_boot_url: required(&get, "PXE_IPXE_BOOT_URL")?,
                },
            },
        };

        let dns_servers = match get("PXE_DNS_SERVERS") {
            Some(list) => list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| parse_value("PXE_DNS_SERVERS", s))
                .collect::<Result<Vec<Ipv6Addr>, _>>()?,
            None => Vec::new(),
        };

        let config = Self {
            listen_addr: parse_or(&get, "PXE_LISTEN_ADDR", Ipv6Addr::UNSPECIFIED)?,
            interface_index: parse_or(&get, "PXE_INTERFACE_INDEX", 0)?,
            server_mac,
            boot,
            preference: get("PXE_PREFERENCE")
                .map(|value| parse_value("PXE_PREFERENCE", &value))
                .transpose()?,
            dns_servers,
            pool_start: parse_value("PXE_POOL_START", &required(&get, "PXE_POOL_START")?)?,
            pool_size: parse_or(&get, "PXE_POOL_SIZE", DEFAULT_POOL_SIZE)?,
            preferred_lifetime: parse_or(
                &get,
                "PXE_PREFERRED_LIFETIME",
                DEFAULT_PREFERRED_LIFETIME,
            )?,
            valid_lifetime: parse_or(&get, "PXE_VALID_LIFETIME", DEFAULT_VALID_LIFETIME)?,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), PxeError> {
        if self.preferred_lifetime > self.valid_lifetime {
            return Err(PxeError::Configuration(format!(
                "PXE_PREFERRED_LIFETIME ({}) must not exceed PXE_VALID_LIFETIME ({})",
                self.preferred_lifetime, self.valid_lifetime
            )));
        }
        if self.dns_servers.len() > MAX_DNS_SERVERS {
            return Err(PxeError::Configuration(format!(
                "PXE_DNS_SERVERS lists {} servers, at most {} fit in a reply",
                self.dns_servers.len(),
                MAX_DNS_SERVERS
            )));
        }
        if self.pool_size == 0 {
            return Err(PxeError::Configuration(
                "PXE_POOL_SIZE must be greater than zero".to_string(),
            ));
        }
        if u128::from(self.pool_start)
            .checked_add(u128::from(self.pool_size - 1))
            .is_none()
        {
            return Err(PxeError::Configuration(format!(
                "pool of {} addresses starting at {} overflows the IPv6 address space",
                self.pool_size, self.pool_start
            )));
        }
        Ok(())
    }
}

fn required<G>(get: &G, key: &str) -> Result<String, PxeError>
where
    G: Fn(&str) -> Option<String>,
{
    get(key).ok_or_else(|| {
        PxeError::Configuration(format!("{} environment variable is required", key))
    })
}

fn parse_value<T>(key: &str, value: &str) -> Result<T, PxeError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| PxeError::Configuration(format!("invalid {} {:?}: {}", key, value, e)))
}

fn parse_or<G, T>(get: &G, key: &str, default: T) -> Result<T, PxeError>
where
    G: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get(key) {
        Some(value) => parse_value(key, &value),
        None => Ok(default),
    }
}

/// Parse a colon-separated hex link-layer address such as `52:54:00:ab:cd:ef`
pub fn parse_mac(value: &str) -> Result<Vec<u8>, PxeError> {
    let invalid = || PxeError::Configuration(format!("invalid PXE_SERVER_MAC {:?}", value));
    let bytes = value
        .split(':')
        .map(|part| {
            if part.len() != 2 {
                return Err(invalid());
            }
            u8::from_str_radix(part, 16).map_err(|e| {
                PxeError::Configuration(format!("invalid PXE_SERVER_MAC {:?}: {}", value, e))
            })
        })
        .collect::<Result<Vec<u8>, _>>()?;
    if bytes.len() < 6 {
        return Err(invalid());
    }
    Ok(bytes)
}
