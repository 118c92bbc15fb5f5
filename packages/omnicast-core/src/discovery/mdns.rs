//! mDNS/Bonjour implementation of [`DiscoveryPlatform`] over `mdns-sd`.
//!
//! # Key Design Points
//!
//! - One shared [`ServiceDaemon`]; one browse task per registered listener
//! - `ServiceResolved` records are cached by full name, so `resolve_service`
//!   is a cache lookup that waits (bounded) for the record if it has not
//!   arrived yet
//! - Concurrent resolves of the same instance fail with
//!   [`ResolveFailure::AlreadyActive`]
//! - Service types are accepted in short (`_airplay._tcp`) or fully-qualified
//!   (`_airplay._tcp.local.`) form; callbacks report the short form

use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use mdns_sd::{ServiceDaemon, ServiceEvent};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use super::platform::{
    DiscoveryListener, DiscoveryPlatform, FoundService, ListenerId, LostService, PlatformError,
    ResolveFailure, ResolvedService,
};
use crate::runtime::{TaskSpawner, TokioSpawner};

const LOCAL_DOMAIN: &str = "local.";

/// Returns the fully-qualified form required by mdns-sd (trailing dot included).
fn fully_qualified(service_type: &str) -> String {
    let trimmed = service_type.trim_end_matches('.');
    if trimmed.ends_with(".local") {
        format!("{trimmed}.")
    } else {
        format!("{trimmed}.{LOCAL_DOMAIN}")
    }
}

/// Strips the `.local.` domain from a service type.
fn short_type(service_type: &str) -> &str {
    let trimmed = service_type.trim_end_matches('.');
    trimmed.strip_suffix(".local").unwrap_or(trimmed)
}

/// Extracts the instance name from `"{instance}.{type}"`.
fn instance_name<'a>(fullname: &'a str, service_type: &str) -> &'a str {
    fullname
        .strip_suffix(service_type)
        .map(|rest| rest.trim_end_matches('.'))
        .filter(|rest| !rest.is_empty())
        .unwrap_or(fullname)
}

fn cache_key(instance: &str, service_type: &str) -> String {
    format!("{}.{}", instance, fully_qualified(service_type))
}

// ─────────────────────────────────────────────────────────────────────────────
// Resolve Cache
// ─────────────────────────────────────────────────────────────────────────────

/// Resolved records keyed by full service name.
#[derive(Default)]
struct ResolveCache {
    records: DashMap<String, ResolvedService>,
    arrived: Notify,
    in_flight: DashSet<String>,
}

/// Removes a key from the in-flight set when dropped.
struct InFlight<'a> {
    set: &'a DashSet<String>,
    key: String,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.set.remove(&self.key);
    }
}

impl ResolveCache {
    /// Stores a record. Returns true if it differs from the cached one.
    fn store(&self, key: String, record: ResolvedService) -> bool {
        let changed = self.records.get(&key).map_or(true, |old| *old != record);
        self.records.insert(key, record);
        self.arrived.notify_waiters();
        changed
    }

    fn forget(&self, key: &str) {
        self.records.remove(key);
    }

    async fn wait_for(&self, key: &str, limit: Duration) -> Result<ResolvedService, ResolveFailure> {
        if !self.in_flight.insert(key.to_string()) {
            return Err(ResolveFailure::AlreadyActive);
        }
        let _guard = InFlight {
            set: &self.in_flight,
            key: key.to_string(),
        };

        let lookup = async {
            loop {
                let notified = self.arrived.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                if let Some(record) = self.records.get(key) {
                    return record.clone();
                }
                notified.await;
            }
        };

        let record = tokio::time::timeout(limit, lookup)
            .await
            .map_err(|_| ResolveFailure::Timeout)?;

        if record.addresses.is_empty() {
            return Err(ResolveFailure::NoAddress);
        }
        Ok(record)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Platform
// ─────────────────────────────────────────────────────────────────────────────

struct Browse {
    service_type: String,
    cancel: CancellationToken,
}

/// [`DiscoveryPlatform`] backed by an `mdns-sd` daemon.
pub struct MdnsPlatform {
    daemon: ServiceDaemon,
    spawner: TokioSpawner,
    next_id: AtomicU64,
    browses: DashMap<ListenerId, Browse>,
    cache: Arc<ResolveCache>,
    resolve_timeout: Duration,
}

impl MdnsPlatform {
    /// Creates the daemon. This should happen once per process.
    ///
    /// # Errors
    /// Returns `PlatformError::Daemon` if the daemon cannot bind its sockets.
    pub fn new(spawner: TokioSpawner, resolve_timeout: Duration) -> Result<Self, PlatformError> {
        let daemon = ServiceDaemon::new().map_err(|e| PlatformError::Daemon(e.to_string()))?;
        Ok(Self {
            daemon,
            spawner,
            next_id: AtomicU64::new(1),
            browses: DashMap::new(),
            cache: Arc::new(ResolveCache::default()),
            resolve_timeout,
        })
    }

    /// Stops every browse and shuts the daemon down.
    pub fn shutdown(&self) {
        let ids: Vec<ListenerId> = self.browses.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            let _ = self.stop_service_discovery(id);
        }
        if let Err(e) = self.daemon.shutdown() {
            log::warn!("[mDNS] Failed to shut down daemon: {:?}", e);
        }
    }
}

#[async_trait]
impl DiscoveryPlatform for MdnsPlatform {
    fn discover_services(
        &self,
        service_type: &str,
        listener: Arc<dyn DiscoveryListener>,
    ) -> Result<ListenerId, PlatformError> {
        let fq_type = fully_qualified(service_type);
        let receiver = self.daemon.browse(&fq_type).map_err(|e| {
            listener.on_start_discovery_failed(service_type, -1);
            PlatformError::Daemon(format!("browse {fq_type}: {e}"))
        })?;

        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let cancel = CancellationToken::new();
        self.browses.insert(
            id,
            Browse {
                service_type: fq_type.clone(),
                cancel: cancel.clone(),
            },
        );

        log::debug!("[mDNS] Browsing {} as {}", fq_type, id);
        listener.on_discovery_started(short_type(&fq_type));

        let cache = Arc::clone(&self.cache);
        self.spawner.spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = receiver.recv_async() => match event {
                        Ok(event) => event,
                        Err(e) => {
                            log::debug!("[mDNS] Receiver channel closed: {:?}", e);
                            break;
                        }
                    },
                };
                if !dispatch(event, listener.as_ref(), &cache) {
                    break;
                }
            }
            log::trace!("[mDNS] Browse task for {} exited", id);
        });

        Ok(id)
    }

    fn stop_service_discovery(&self, id: ListenerId) -> Result<(), PlatformError> {
        let (_, browse) = self.browses.remove(&id).ok_or(PlatformError::NotRegistered)?;
        browse.cancel.cancel();

        // Another listener may still browse the same type.
        let still_browsed = self
            .browses
            .iter()
            .any(|entry| entry.service_type == browse.service_type);
        if !still_browsed {
            self.daemon
                .stop_browse(&browse.service_type)
                .map_err(|e| PlatformError::Daemon(format!("stop {}: {e}", browse.service_type)))?;
        }
        Ok(())
    }

    async fn resolve_service(
        &self,
        service: &FoundService,
    ) -> Result<ResolvedService, ResolveFailure> {
        let key = cache_key(&service.name, &service.service_type);
        self.cache.wait_for(&key, self.resolve_timeout).await
    }
}

/// Converts one daemon event into listener callbacks. Returns false when the
/// browse has ended.
fn dispatch(event: ServiceEvent, listener: &dyn DiscoveryListener, cache: &ResolveCache) -> bool {
    match event {
        ServiceEvent::ServiceFound(ty, fullname) => {
            listener.on_service_found(FoundService {
                name: instance_name(&fullname, &ty).to_string(),
                service_type: short_type(&ty).to_string(),
                port: None,
            });
        }
        ServiceEvent::ServiceResolved(info) => {
            log::trace!("[mDNS] Service resolved: {:?}", info.fullname);

            let ty = info
                .fullname
                .find("._")
                .map(|idx| &info.fullname[idx + 1..])
                .unwrap_or(info.fullname.as_str());
            let name = instance_name(&info.fullname, ty).to_string();

            let mut addresses: Vec<IpAddr> = info
                .addresses
                .iter()
                .map(|addr| addr.to_ip_addr())
                .collect();
            addresses.sort();
            addresses.dedup();

            let record = ResolvedService {
                name: name.clone(),
                service_type: short_type(ty).to_string(),
                addresses,
                port: info.port,
            };

            // Re-announce changed records so address or port changes reach the
            // engine without waiting for a new ServiceFound.
            if cache.store(info.fullname.clone(), record) {
                listener.on_service_found(FoundService {
                    name,
                    service_type: short_type(ty).to_string(),
                    port: Some(info.port),
                });
            }
        }
        ServiceEvent::ServiceRemoved(ty, fullname) => {
            cache.forget(&fullname);
            listener.on_service_lost(LostService {
                name: instance_name(&fullname, &ty).to_string(),
                service_type: short_type(&ty).to_string(),
            });
        }
        ServiceEvent::SearchStopped(ty) => {
            listener.on_discovery_stopped(short_type(&ty));
            return false;
        }
        _ => {}
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, addresses: &[&str]) -> ResolvedService {
        ResolvedService {
            name: name.to_string(),
            service_type: "_airplay._tcp".to_string(),
            addresses: addresses.iter().map(|a| a.parse().unwrap()).collect(),
            port: 7000,
        }
    }

    #[test]
    fn service_types_are_normalized() {
        assert_eq!(fully_qualified("_airplay._tcp"), "_airplay._tcp.local.");
        assert_eq!(fully_qualified("_airplay._tcp.local"), "_airplay._tcp.local.");
        assert_eq!(fully_qualified("_airplay._tcp.local."), "_airplay._tcp.local.");
        assert_eq!(short_type("_raop._tcp.local."), "_raop._tcp");
        assert_eq!(short_type("_raop._tcp"), "_raop._tcp");
    }

    #[test]
    fn instance_name_is_extracted() {
        assert_eq!(
            instance_name("Living Room._airplay._tcp.local.", "_airplay._tcp.local."),
            "Living Room"
        );
        assert_eq!(instance_name("odd-name", "_airplay._tcp.local."), "odd-name");
    }

    #[tokio::test]
    async fn cached_record_resolves_immediately() {
        let cache = ResolveCache::default();
        let key = cache_key("Kitchen", "_airplay._tcp");
        cache.store(key.clone(), record("Kitchen", &["192.168.1.60"]));

        let resolved = cache.wait_for(&key, Duration::from_millis(50)).await.unwrap();
        assert_eq!(resolved.port, 7000);
    }

    #[tokio::test]
    async fn waiter_wakes_when_record_arrives() {
        let cache = Arc::new(ResolveCache::default());
        let key = cache_key("Kitchen", "_airplay._tcp");

        let waiter = {
            let cache = cache.clone();
            let key = key.clone();
            tokio::spawn(async move { cache.wait_for(&key, Duration::from_secs(1)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        cache.store(key, record("Kitchen", &["192.168.1.60"]));

        assert!(waiter.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn concurrent_resolve_is_already_active() {
        let cache = Arc::new(ResolveCache::default());
        let key = cache_key("Kitchen", "_airplay._tcp");

        let first = {
            let cache = cache.clone();
            let key = key.clone();
            tokio::spawn(async move { cache.wait_for(&key, Duration::from_millis(100)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let second = cache.wait_for(&key, Duration::from_millis(100)).await;
        assert_eq!(second, Err(ResolveFailure::AlreadyActive));
        assert_eq!(first.await.unwrap(), Err(ResolveFailure::Timeout));

        // Guard released: a new resolve may start again.
        assert_eq!(
            cache.wait_for(&key, Duration::from_millis(10)).await,
            Err(ResolveFailure::Timeout)
        );
    }

    #[tokio::test]
    async fn record_without_addresses_is_no_address() {
        let cache = ResolveCache::default();
        let key = cache_key("Ghost", "_airplay._tcp");
        cache.store(key.clone(), record("Ghost", &[]));

        assert_eq!(
            cache.wait_for(&key, Duration::from_millis(10)).await,
            Err(ResolveFailure::NoAddress)
        );
    }

    #[test]
    fn store_reports_changes_only() {
        let cache = ResolveCache::default();
        let key = cache_key("Kitchen", "_airplay._tcp");

        assert!(cache.store(key.clone(), record("Kitchen", &["192.168.1.60"])));
        assert!(!cache.store(key.clone(), record("Kitchen", &["192.168.1.60"])));
        assert!(cache.store(key, record("Kitchen", &["192.168.1.61"])));
    }
}
