//! Mock collaborators for unit testing
//!
//! In-memory implementations of [`BootConfiguration`] and [`AddressPool`]
//! that can be configured to return specific responses for testing
//! different scenarios, and that record the calls they receive.

use crate::address_pool::{AddressPool, IdentityAssociation, Reservation};
use crate::boot_config::BootConfiguration;
use crate::error::Dhcp6Error;
use async_trait::async_trait;
use std::collections::HashMap;
use std::net::Ipv6Addr;
use std::sync::{Arc, Mutex};

/// Mock BootConfiguration for testing
///
/// Resolves URLs from a table keyed by (identity, architecture); lookups
/// that miss the table fail like an unknown machine would.
#[derive(Debug, Clone, Default)]
pub struct MockBootConfiguration {
    urls: Arc<Mutex<HashMap<(Vec<u8>, u16), Vec<u8>>>>,
    lookups: Arc<Mutex<Vec<(Vec<u8>, u16)>>>,
    preference: Option<u8>,
    recursive_dns: Vec<Ipv6Addr>,
}

impl MockBootConfiguration {
    /// Create a new mock with no known machines
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the advertised preference
    #[must_use]
    pub fn with_preference(mut self, preference: u8) -> Self {
        self.preference = Some(preference);
        self
    }

    /// Set the recursive DNS servers
    #[must_use]
    pub fn with_recursive_dns(mut self, servers: Vec<Ipv6Addr>) -> Self {
        self.recursive_dns = servers;
        self
    }

    /// Add a boot URL for an identity/architecture pair (for test setup)
    pub fn add_boot_url(&self, id: &[u8], client_arch_type: u16, url: &str) {
        self.urls
            .lock()
            .unwrap()
            .insert((id.to_vec(), client_arch_type), url.as_bytes().to_vec());
    }

    /// Every (identity, architecture) pair looked up so far
    pub fn lookups(&self) -> Vec<(Vec<u8>, u16)> {
        self.lookups.lock().unwrap().clone()
    }
}

#[async_trait]
impl BootConfiguration for MockBootConfiguration {
    async fn boot_url(&self, id: &[u8], client_arch_type: u16) -> Result<Vec<u8>, Dhcp6Error> {
        self.lookups
            .lock()
            .unwrap()
            .push((id.to_vec(), client_arch_type));
        self.urls
            .lock()
            .unwrap()
            .get(&(id.to_vec(), client_arch_type))
            .cloned()
            .ok_or_else(|| {
                Dhcp6Error::BootConfiguration(format!(
                    "no boot configuration for {:02x?} (arch {})",
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

/// Mock AddressPool for testing
///
/// Grants the addresses registered with [`MockAddressPool::grant`]. Other
/// IAIDs are denied with the reason given to
/// [`MockAddressPool::deny_with`], or left out of the result entirely when
/// no reason was set.
#[derive(Debug, Clone, Default)]
pub struct MockAddressPool {
    grants: Arc<Mutex<HashMap<Vec<u8>, Ipv6Addr>>>,
    denial_reason: Arc<Mutex<Option<String>>>,
    reserve_error: Arc<Mutex<Option<String>>>,
    release_error: Arc<Mutex<Option<String>>>,
    released: Arc<Mutex<Vec<(Vec<u8>, Vec<Vec<u8>>)>>>,
}

impl MockAddressPool {
    /// Create a new mock that grants nothing
    pub fn new() -> Self {
        Self::default()
    }

    /// Grant `address` to `interface_id` (for test setup)
    pub fn grant(&self, interface_id: &[u8], address: Ipv6Addr) {
        self.grants
            .lock()
            .unwrap()
            .insert(interface_id.to_vec(), address);
    }

    /// Deny every IAID without a grant, with `reason`
    pub fn deny_with(&self, reason: &str) {
        *self.denial_reason.lock().unwrap() = Some(reason.to_string());
    }

    /// Fail reservations as a whole with `reason`
    pub fn fail_reserve_with(&self, reason: &str) {
        *self.reserve_error.lock().unwrap() = Some(reason.to_string());
    }

    /// Fail releases with `reason`
    pub fn fail_release_with(&self, reason: &str) {
        *self.release_error.lock().unwrap() = Some(reason.to_string());
    }

    /// Every (client id, IAIDs) release received so far
    pub fn released(&self) -> Vec<(Vec<u8>, Vec<Vec<u8>>)> {
        self.released.lock().unwrap().clone()
    }
}

#[async_trait]
impl AddressPool for MockAddressPool {
    async fn reserve_addresses(
        &self,
        _client_id: &[u8],
        interface_ids: &[Vec<u8>],
    ) -> Result<Vec<Reservation>, Dhcp6Error> {
        if let Some(reason) = self.reserve_error.lock().unwrap().clone() {
            return Err(Dhcp6Error::AddressPool(reason));
        }

        let grants = self.grants.lock().unwrap();
        let denial_reason = self.denial_reason.lock().unwrap();
        Ok(interface_ids
            .iter()
            .filter_map(|id| match (grants.get(id), denial_reason.as_ref()) {
                (Some(address), _) => Some(Reservation::Granted(IdentityAssociation {
                    interface_id: id.clone(),
                    ip_address: *address,
                })),
                (None, Some(reason)) => Some(Reservation::Denied {
                    interface_id: id.clone(),
                    reason: reason.clone(),
                }),
                (None, None) => None,
            })
            .collect())
    }

    async fn release_addresses(
        &self,
        client_id: &[u8],
        interface_ids: &[Vec<u8>],
    ) -> Result<(), Dhcp6Error> {
        self.released
            .lock()
            .unwrap()
            .push((client_id.to_vec(), interface_ids.to_vec()));
        match self.release_error.lock().unwrap().clone() {
            Some(reason) => Err(Dhcp6Error::AddressPool(reason)),
            None => Ok(()),
        }
    }
}
