//! Boot configuration capability.
//!
//! Resolves the boot file URL handed to a client, plus the preference and
//! recursive DNS servers advertised alongside it. Three variants are
//! provided: a static pair of URLs, a per-machine table file and a lookup
//! against a boot API.

use crate::error::Dhcp6Error;
use crate::options::ARCH_HTTP_CLIENT;
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use std::collections::HashMap;
use std::net::Ipv6Addr;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Trait for boot URL lookups
///
/// Implementations are shared across concurrently handled requests.
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait]
pub trait BootConfiguration: Send + Sync {
    /// Boot file URL for the client `id` (link-layer address or opaque DUID
    /// body) booting with architecture `client_arch_type`
    async fn boot_url(&self, id: &[u8], client_arch_type: u16) -> Result<Vec<u8>, Dhcp6Error>;

    /// DHCPv6 preference value to advertise, if any
    fn preference(&self) -> Option<u8>;

    /// Recursive DNS servers handed to every client
    fn recursive_dns(&self) -> &[Ipv6Addr];
}

/// Fixed boot URLs: one for UEFI HTTP clients, one for everyone else (iPXE)
#[derive(Debug, Clone)]
pub struct StaticBootConfiguration {
    http_boot_url: Vec<u8>,
    ipxe_boot_url: Vec<u8>,
    preference: Option<u8>,
    recursive_dns: Vec<Ipv6Addr>,
}

impl StaticBootConfiguration {
    /// Serve `http_boot_url` to UEFI HTTP boot clients and `ipxe_boot_url` to everyone else
    pub fn new(
        http_boot_url: impl Into<String>,
        ipxe_boot_url: impl Into<String>,
        preference: Option<u8>,
        recursive_dns: Vec<Ipv6Addr>,
    ) -> Self {
        Self {
            http_boot_url: http_boot_url.into().into_bytes(),
            ipxe_boot_url: ipxe_boot_url.into().into_bytes(),
            preference,
            recursive_dns,
        }
    }
}

#[async_trait]
impl BootConfiguration for StaticBootConfiguration {
    async fn boot_url(&self, _id: &[u8], client_arch_type: u16) -> Result<Vec<u8>, Dhcp6Error> {
        if client_arch_type == ARCH_HTTP_CLIENT {
            Ok(self.http_boot_url.clone())
        } else {
            Ok(self.ipxe_boot_url.clone())
        }
    }

    fn preference(&self) -> Option<u8> {
        self.preference
    }

    fn recursive_dns(&self) -> &[Ipv6Addr] {
        &self.recursive_dns
    }
}

/// Boot URLs from a per-machine table file
///
/// One entry per line: `<identity> <arch|*> <url>`, where the identity is
/// hex with optional `:` or `-` separators (a MAC address for link-layer
/// DUIDs). Blank lines and `#` comments are skipped. An entry for the exact
/// architecture wins over a `*` entry.
#[derive(Debug, Clone)]
pub struct FileBootConfiguration {
    entries: HashMap<(Vec<u8>, Option<u16>), Vec<u8>>,
    preference: Option<u8>,
    recursive_dns: Vec<Ipv6Addr>,
}

impl FileBootConfiguration {
    /// Read and parse the table at `path`
    pub async fn load(
        path: impl AsRef<Path>,
        preference: Option<u8>,
        recursive_dns: Vec<Ipv6Addr>,
    ) -> Result<Self, Dhcp6Error> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            Dhcp6Error::InvalidConfig(format!("reading boot table {}: {}", path.display(), e))
        })?;
        let config = Self::parse(&content, preference, recursive_dns)?;
        debug!(path = %path.display(), entries = config.len(), "Loaded boot table");
        Ok(config)
    }

    /// Parse table `content`
    pub fn parse(
        content: &str,
        preference: Option<u8>,
        recursive_dns: Vec<Ipv6Addr>,
    ) -> Result<Self, Dhcp6Error> {
        let mut entries = HashMap::new();
        for (number, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let invalid = |what: &str| {
                Dhcp6Error::InvalidConfig(format!("boot table line {}: {}", number + 1, what))
            };
            let mut fields = line.split_whitespace();
            let (Some(id), Some(arch), Some(url), None) =
                (fields.next(), fields.next(), fields.next(), fields.next())
            else {
                return Err(invalid("expected <identity> <arch|*> <url>"));
            };

            let id = parse_hex_id(id).ok_or_else(|| invalid("identity is not hex"))?;
            let arch = match arch {
                "*" => None,
                arch => Some(
                    parse_arch(arch).ok_or_else(|| invalid("architecture is not a number"))?,
                ),
            };
            entries.insert((id, arch), url.as_bytes().to_vec());
        }

        Ok(Self {
            entries,
            preference,
            recursive_dns,
        })
    }

    /// Number of table entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn parse_hex_id(value: &str) -> Option<Vec<u8>> {
    let digits: Vec<u8> = value
        .bytes()
        .filter(|b| *b != b':' && *b != b'-')
        .collect();
    if digits.is_empty() || digits.len() % 2 != 0 || !digits.iter().all(u8::is_ascii_hexdigit) {
        return None;
    }
    digits
        .chunks(2)
        .map(|pair| {
            let pair = std::str::from_utf8(pair).ok()?;
            u8::from_str_radix(pair, 16).ok()
        })
        .collect()
}

fn parse_arch(value: &str) -> Option<u16> {
    match value.strip_prefix("0x") {
        Some(hex) => u16::from_str_radix(hex, 16).ok(),
        None => value.parse().ok(),
    }
}

#[async_trait]
impl BootConfiguration for FileBootConfiguration {
    async fn boot_url(&self, id: &[u8], client_arch_type: u16) -> Result<Vec<u8>, Dhcp6Error> {
        let key = id.to_vec();
        self.entries
            .get(&(key.clone(), Some(client_arch_type)))
            .or_else(|| self.entries.get(&(key, None)))
            .cloned()
            .ok_or_else(|| {
                Dhcp6Error::BootConfiguration(format!(
                    "no boot table entry for {:02x?} (arch {})",
                    id, client_arch_type
                ))
            })
    }

    fn preference(&self) -> Option<u8> {
        self.preference
    }

    fn recursive_dns(&self) -> &[Ipv6Addr] {
        &self.recursive_dns
    }
}

/// Boot URL lookups against a boot API
///
/// Issues `GET {base}/v1/boot/{hex id}/{arch}`; a 200 response body is the
/// boot URL, resolved against the base URL when relative.
#[derive(Debug, Clone)]
pub struct ApiBootConfiguration {
    client: Client,
    base_url: Url,
    preference: Option<u8>,
    recursive_dns: Vec<Ipv6Addr>,
}

impl ApiBootConfiguration {
    /// Create a new API-backed boot configuration
    ///
    /// # Arguments
    /// * `base_url` - Boot API base URL (e.g., "http://boot-api:8080")
    /// * `timeout` - Per-request timeout; a slow API fails the lookup
    pub fn new(
        base_url: &str,
        timeout: Duration,
        preference: Option<u8>,
        recursive_dns: Vec<Ipv6Addr>,
    ) -> Result<Self, Dhcp6Error> {
        let client = Client::builder().timeout(timeout).build()?;

        let mut base = base_url.to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base).map_err(|e| {
            Dhcp6Error::InvalidConfig(format!("invalid boot API url {:?}: {}", base_url, e))
        })?;

        Ok(Self {
            client,
            base_url,
            preference,
            recursive_dns,
        })
    }

    /// Get the base URL
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn lookup_url(&self, id: &[u8], client_arch_type: u16) -> Result<Url, Dhcp6Error> {
        let hex_id: String = id.iter().map(|b| format!("{:02x}", b)).collect();
        self.base_url
            .join(&format!("v1/boot/{}/{}", hex_id, client_arch_type))
            .map_err(|e| Dhcp6Error::BootConfiguration(format!("building lookup url: {}", e)))
    }
}

#[async_trait]
impl BootConfiguration for ApiBootConfiguration {
    async fn boot_url(&self, id: &[u8], client_arch_type: u16) -> Result<Vec<u8>, Dhcp6Error> {
        let url = self.lookup_url(id, client_arch_type)?;
        debug!("GET {}", url);

        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(Dhcp6Error::BootConfiguration(format!("{}: {}", url, status)));
        }

        let body = response.text().await?;
        let body = body.trim();
        if body.is_empty() {
            return Err(Dhcp6Error::BootConfiguration(format!(
                "{}: empty boot URL",
                url
            )));
        }

        let boot_url = self
            .base_url
            .join(body)
            .map_err(|e| {
                Dhcp6Error::BootConfiguration(format!("{:?} is not an URL: {}", body, e))
            })?;
        Ok(boot_url.to_string().into_bytes())
    }

    fn preference(&self) -> Option<u8> {
        self.preference
    }

    fn recursive_dns(&self) -> &[Ipv6Addr] {
        &self.recursive_dns
    }
}
