//! Address reservation capability.
//!
//! The pool owns lease state across requests. Reservation reports one
//! outcome per requested interface association, so a partial grant always
//! carries a reason for every association left without an address.

use crate::error::Dhcp6Error;
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use rand::Rng;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::net::Ipv6Addr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Denial reason of an exhausted [`RandomAddressPool`]
pub const NO_FREE_ADDRESSES: &str =
    "No more free ip addresses are currently available in the pool";

/// An address leased to one client-declared interface association
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityAssociation {
    /// IAID echoed from the client's IA-NA
    pub interface_id: Vec<u8>,
    /// Address leased to the association
    pub ip_address: Ipv6Addr,
}

/// Outcome of reserving an address for one requested IAID
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reservation {
    /// An address was leased for the IAID
    Granted(IdentityAssociation),
    /// No address for the IAID, with a human readable reason
    Denied { interface_id: Vec<u8>, reason: String },
}

impl Reservation {
    /// IAID the reservation answers
    pub fn interface_id(&self) -> &[u8] {
        match self {
            Reservation::Granted(association) => &association.interface_id,
            Reservation::Denied { interface_id, .. } => interface_id,
        }
    }
}

/// Trait for address reservation backends
///
/// Implementations must hold at most one active lease per
/// (client id, IAID) pair: reserving the same pair again returns the
/// existing lease. Calls from different clients arrive concurrently.
#[async_trait]
pub trait AddressPool: Send + Sync {
    /// Reserve one address per IAID, reporting an outcome for each.
    ///
    /// `Err` means the pool failed as a whole and nothing was reserved.
    async fn reserve_addresses(
        &self,
        client_id: &[u8],
        interface_ids: &[Vec<u8>],
    ) -> Result<Vec<Reservation>, Dhcp6Error>;

    /// Release the leases held for the given IAIDs
    async fn release_addresses(
        &self,
        client_id: &[u8],
        interface_ids: &[Vec<u8>],
    ) -> Result<(), Dhcp6Error>;
}

type LeaseKey = (Vec<u8>, Vec<u8>);
type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

struct Lease {
    association: IdentityAssociation,
    created_at: DateTime<Utc>,
}

struct Expiration {
    expires_at: DateTime<Utc>,
    key: LeaseKey,
    created_at: DateTime<Utc>,
}

#[derive(Default)]
struct PoolState {
    leases: HashMap<LeaseKey, Lease>,
    used: HashSet<Ipv6Addr>,
    // leases are created with a fixed lifetime, so creation order is expiry order
    expirations: VecDeque<Expiration>,
}

impl PoolState {
    fn expire(&mut self, now: DateTime<Utc>) {
        while self
            .expirations
            .front()
            .is_some_and(|e| e.expires_at <= now)
        {
            let Some(expired) = self.expirations.pop_front() else {
                break;
            };
            // released and re-reserved leases leave stale entries behind
            let current = self.leases.get(&expired.key).map(|l| l.created_at);
            if current == Some(expired.created_at) {
                if let Some(lease) = self.leases.remove(&expired.key) {
                    debug!(address = %lease.association.ip_address, "Lease expired");
                    self.used.remove(&lease.association.ip_address);
                }
            }
        }
    }

    fn release(&mut self, key: &LeaseKey) {
        if let Some(lease) = self.leases.remove(key) {
            debug!(address = %lease.association.ip_address, "Lease released");
            self.used.remove(&lease.association.ip_address);
        }
    }
}

/// In-memory pool handing out random addresses from a contiguous range
///
/// Leases last `valid_lifetime` seconds from creation and are reclaimed
/// lazily on the next reservation.
pub struct RandomAddressPool {
    start: u128,
    size: u64,
    valid_lifetime: u32,
    clock: Clock,
    state: Mutex<PoolState>,
}

impl fmt::Debug for RandomAddressPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RandomAddressPool")
            .field("start", &Ipv6Addr::from(self.start))
            .field("size", &self.size)
            .field("valid_lifetime", &self.valid_lifetime)
            .finish_non_exhaustive()
    }
}

impl RandomAddressPool {
    /// Create a pool of `size` addresses starting at `start`
    pub fn new(start: Ipv6Addr, size: u64, valid_lifetime: u32) -> Result<Self, Dhcp6Error> {
        if size == 0 {
            return Err(Dhcp6Error::InvalidConfig(
                "address pool size must be greater than zero".to_string(),
            ));
        }
        let start = u128::from(start);
        if start.checked_add(u128::from(size - 1)).is_none() {
            return Err(Dhcp6Error::InvalidConfig(format!(
                "address pool of {} addresses starting at {} overflows the IPv6 address space",
                size,
                Ipv6Addr::from(start)
            )));
        }

        Ok(Self {
            start,
            size,
            valid_lifetime,
            clock: Arc::new(Utc::now),
            state: Mutex::new(PoolState::default()),
        })
    }

    /// Replace the wall clock used for lease creation and expiry
    #[must_use]
    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Number of leases currently held, expired ones included until reclaimed
    pub async fn active_leases(&self) -> usize {
        self.state.lock().await.leases.len()
    }

    /// Whether `address` falls inside the pool range
    pub fn contains(&self, address: Ipv6Addr) -> bool {
        let address = u128::from(address);
        address >= self.start && address - self.start < u128::from(self.size)
    }

    /// Random free address, probing linearly from a random offset
    fn pick_free_address(&self, used: &HashSet<Ipv6Addr>) -> Option<Ipv6Addr> {
        let size = u128::from(self.size);
        let first = u128::from(rand::thread_rng().gen_range(0..self.size));
        (0..size)
            .map(|i| Ipv6Addr::from(self.start + (first + i) % size))
            .find(|address| !used.contains(address))
    }
}

#[async_trait]
impl AddressPool for RandomAddressPool {
    async fn reserve_addresses(
        &self,
        client_id: &[u8],
        interface_ids: &[Vec<u8>],
    ) -> Result<Vec<Reservation>, Dhcp6Error> {
        let now = (self.clock)();
        let mut state = self.state.lock().await;
        state.expire(now);

        let mut reservations = Vec::with_capacity(interface_ids.len());
        for interface_id in interface_ids {
            let key = (client_id.to_vec(), interface_id.clone());
            if let Some(lease) = state.leases.get(&key) {
                reservations.push(Reservation::Granted(lease.association.clone()));
                continue;
            }

            let address = if (state.used.len() as u64) < self.size {
                self.pick_free_address(&state.used)
            } else {
                None
            };
            let Some(address) = address else {
                reservations.push(Reservation::Denied {
                    interface_id: interface_id.clone(),
                    reason: NO_FREE_ADDRESSES.to_string(),
                });
                continue;
            };

            let association = IdentityAssociation {
                interface_id: interface_id.clone(),
                ip_address: address,
            };
            debug!(address = %address, "Lease created");
            state.used.insert(address);
            state.expirations.push_back(Expiration {
                expires_at: now + TimeDelta::seconds(i64::from(self.valid_lifetime)),
                key: key.clone(),
                created_at: now,
            });
            state.leases.insert(
                key,
                Lease {
                    association: association.clone(),
                    created_at: now,
                },
            );
            reservations.push(Reservation::Granted(association));
        }

        Ok(reservations)
    }

    async fn release_addresses(
        &self,
        client_id: &[u8],
        interface_ids: &[Vec<u8>],
    ) -> Result<(), Dhcp6Error> {
        let mut state = self.state.lock().await;
        for interface_id in interface_ids {
            state.release(&(client_id.to_vec(), interface_id.clone()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const CLIENT_A: &[u8] = &[0, 3, 0, 1, 1, 1, 1, 1, 1, 1];
    const CLIENT_B: &[u8] = &[0, 3, 0, 1, 2, 2, 2, 2, 2, 2];

    fn iaid(n: u8) -> Vec<u8> {
        vec![0, 0, 0, n]
    }

    fn granted(reservation: &Reservation) -> Ipv6Addr {
        match reservation {
            Reservation::Granted(association) => association.ip_address,
            Reservation::Denied { reason, .. } => panic!("unexpected denial: {}", reason),
        }
    }

    fn pool(size: u64) -> RandomAddressPool {
        RandomAddressPool::new("2001:db8::10".parse().unwrap(), size, 600).unwrap()
    }

    /// Pool whose clock is advanced by hand
    fn pool_with_clock(size: u64) -> (RandomAddressPool, Arc<std::sync::Mutex<DateTime<Utc>>>) {
        let now = Arc::new(std::sync::Mutex::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        ));
        let clock = now.clone();
        let pool = pool(size).with_clock(move || *clock.lock().unwrap());
        (pool, now)
    }

    #[tokio::test]
    async fn test_reserve_within_range() {
        let pool = pool(50);
        let reservations = pool
            .reserve_addresses(CLIENT_A, &[iaid(1), iaid(2)])
            .await
            .unwrap();
        assert_eq!(reservations.len(), 2);
        let first = granted(&reservations[0]);
        let second = granted(&reservations[1]);
        assert!(pool.contains(first));
        assert!(pool.contains(second));
        assert_ne!(first, second);
        assert_eq!(reservations[0].interface_id(), iaid(1).as_slice());
    }

    #[tokio::test]
    async fn test_reserve_is_idempotent_per_client_and_iaid() {
        let pool = pool(50);
        let first = pool.reserve_addresses(CLIENT_A, &[iaid(1)]).await.unwrap();
        let again = pool.reserve_addresses(CLIENT_A, &[iaid(1)]).await.unwrap();
        assert_eq!(first, again);
        assert_eq!(pool.active_leases().await, 1);

        // same IAID, different client: a separate lease
        let other = pool.reserve_addresses(CLIENT_B, &[iaid(1)]).await.unwrap();
        assert_ne!(granted(&first[0]), granted(&other[0]));
        assert_eq!(pool.active_leases().await, 2);
    }

    #[tokio::test]
    async fn test_exhausted_pool_denies_remaining_associations() {
        let pool = pool(1);
        let reservations = pool
            .reserve_addresses(CLIENT_A, &[iaid(1), iaid(2)])
            .await
            .unwrap();
        assert_eq!(granted(&reservations[0]), "2001:db8::10".parse::<Ipv6Addr>().unwrap());
        assert_eq!(
            reservations[1],
            Reservation::Denied {
                interface_id: iaid(2),
                reason: NO_FREE_ADDRESSES.to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_release_frees_address() {
        let pool = pool(1);
        pool.reserve_addresses(CLIENT_A, &[iaid(1)]).await.unwrap();
        let denied = pool.reserve_addresses(CLIENT_B, &[iaid(1)]).await.unwrap();
        assert!(matches!(denied[0], Reservation::Denied { .. }));

        pool.release_addresses(CLIENT_A, &[iaid(1)]).await.unwrap();
        assert_eq!(pool.active_leases().await, 0);

        let reservations = pool.reserve_addresses(CLIENT_B, &[iaid(1)]).await.unwrap();
        assert!(matches!(reservations[0], Reservation::Granted(_)));
    }

    #[tokio::test]
    async fn test_release_of_unknown_lease_is_noop() {
        let pool = pool(4);
        pool.reserve_addresses(CLIENT_A, &[iaid(1)]).await.unwrap();
        pool.release_addresses(CLIENT_B, &[iaid(1), iaid(9)]).await.unwrap();
        assert_eq!(pool.active_leases().await, 1);
    }

    #[tokio::test]
    async fn test_leases_expire_after_valid_lifetime() {
        let (pool, now) = pool_with_clock(1);
        pool.reserve_addresses(CLIENT_A, &[iaid(1)]).await.unwrap();

        *now.lock().unwrap() += TimeDelta::seconds(599);
        let denied = pool.reserve_addresses(CLIENT_B, &[iaid(1)]).await.unwrap();
        assert!(matches!(denied[0], Reservation::Denied { .. }));

        *now.lock().unwrap() += TimeDelta::seconds(1);
        let reservations = pool.reserve_addresses(CLIENT_B, &[iaid(1)]).await.unwrap();
        assert!(matches!(reservations[0], Reservation::Granted(_)));
        assert_eq!(pool.active_leases().await, 1);
    }

    #[tokio::test]
    async fn test_stale_expiration_does_not_drop_newer_lease() {
        let (pool, now) = pool_with_clock(4);
        pool.reserve_addresses(CLIENT_A, &[iaid(1)]).await.unwrap();
        pool.release_addresses(CLIENT_A, &[iaid(1)]).await.unwrap();

        *now.lock().unwrap() += TimeDelta::seconds(300);
        let renewed = pool.reserve_addresses(CLIENT_A, &[iaid(1)]).await.unwrap();

        // first lease's expiry passes; the renewed one lives on
        *now.lock().unwrap() += TimeDelta::seconds(400);
        let again = pool.reserve_addresses(CLIENT_A, &[iaid(1)]).await.unwrap();
        assert_eq!(renewed, again);
    }

    #[tokio::test]
    async fn test_fills_whole_pool_without_duplicates() {
        let pool = pool(16);
        let ids: Vec<Vec<u8>> = (0..16).map(iaid).collect();
        let reservations = pool.reserve_addresses(CLIENT_A, &ids).await.unwrap();
        let addresses: HashSet<Ipv6Addr> = reservations.iter().map(granted).collect();
        assert_eq!(addresses.len(), 16);
        assert!(addresses.iter().all(|a| pool.contains(*a)));
    }

    #[test]
    fn test_invalid_pool_configuration() {
        assert!(matches!(
            RandomAddressPool::new("2001:db8::".parse().unwrap(), 0, 600),
            Err(Dhcp6Error::InvalidConfig(_))
        ));
        assert!(matches!(
            RandomAddressPool::new(
                "ffff:ffff:ffff:ffff:ffff:ffff:ffff:fff0".parse().unwrap(),
                32,
                600
            ),
            Err(Dhcp6Error::InvalidConfig(_))
        ));
    }
}
