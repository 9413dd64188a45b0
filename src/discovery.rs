//! DNS-SD provider abstraction and the mDNS implementation.
//!
//! A provider connection reports state changes as [`ProviderEvent`]s over an
//! unbounded channel handed to [`DiscoveryProvider::connect`]. The
//! advertisement state machine reacts to those events and drives the
//! provider's record group through the remaining trait methods.

use std::collections::HashSet;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use mdns_sd::{DaemonEvent, DnsNameChange, RRType, ServiceDaemon, ServiceInfo};

use crate::error::{Error, Result};

/// DNS-SD service type for HKP keyservers.
pub const SERVICE_TYPE: &str = "_pgpkey-hkp._tcp.";

/// A service record to publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRecord {
    /// Instance name.
    pub name: String,
    /// Service type, e.g. [`SERVICE_TYPE`].
    pub service_type: String,
    /// Port the service listens on.
    pub port: u16,
}

/// State changes reported by a provider connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderEvent {
    /// The provider is up and accepts registrations.
    Running,
    /// The provider's own host name collided. Registrations are void until
    /// the next [`ProviderEvent::Running`].
    ClientCollision,
    /// Another host holds our service instance name.
    GroupCollision,
    /// The committed record group is published.
    GroupEstablished,
    /// The connection or the record group failed.
    Failure {
        /// Human readable cause.
        reason: String,
        /// The provider went away. Such failures are transient.
        disconnected: bool,
    },
}

/// Sending half of a provider event channel.
pub type EventSender = mpsc::UnboundedSender<ProviderEvent>;

/// A DNS-SD provider connection with a single record group.
pub trait DiscoveryProvider {
    /// Open a connection. Events for it are sent on `events` until
    /// [`disconnect`](DiscoveryProvider::disconnect).
    fn connect(&mut self, events: EventSender) -> Result<()>;

    /// Create the record group.
    fn create_group(&mut self) -> Result<()>;

    /// Add `record` to the group and commit it.
    fn commit(&mut self, record: &ServiceRecord) -> Result<()>;

    /// Withdraw everything committed to the group, keeping the group.
    fn reset_group(&mut self);

    /// Withdraw and free the group.
    fn release_group(&mut self);

    /// Close the connection.
    fn disconnect(&mut self);
}

/// Multicast DNS provider built on `mdns-sd`.
///
/// Records are published in the `local.` domain. The daemon runs on its own
/// thread; its monitor events are forwarded to the event channel.
pub struct MdnsProvider {
    host_name: String,
    daemon: Option<ServiceDaemon>,
    /// Full names registered through the current group, if one exists.
    group: Option<Vec<String>>,
}

impl MdnsProvider {
    /// Create a provider advertising under this machine's host name.
    pub fn new() -> Self {
        let host = hostname::get()
            .ok()
            .map(|h| h.to_string_lossy().into_owned())
            .and_then(|h| h.split('.').next().map(str::to_string))
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| "localhost".to_string());
        Self::with_host_name(host)
    }

    /// Create a provider advertising under `host` (without domain).
    pub fn with_host_name(host: impl Into<String>) -> Self {
        Self {
            host_name: format!("{}.local.", host.into()),
            daemon: None,
            group: None,
        }
    }
}

impl Default for MdnsProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl DiscoveryProvider for MdnsProvider {
    fn connect(&mut self, events: EventSender) -> Result<()> {
        if self.daemon.is_some() {
            return Err(Error::state("mDNS daemon already connected"));
        }

        let daemon = ServiceDaemon::new()?;
        let monitor = daemon.monitor()?;

        let forward = events.clone();
        std::thread::Builder::new()
            .name("mdns-events".into())
            .spawn(move || {
                let mut conflicts = ConflictFilter::default();
                while let Ok(event) = monitor.recv() {
                    for event in conflicts.map(event) {
                        if forward.send(event).is_err() {
                            return;
                        }
                    }
                }
                let _ = forward.send(ProviderEvent::Failure {
                    reason: "mDNS daemon stopped".into(),
                    disconnected: true,
                });
            })?;

        info!(host = %self.host_name, "mDNS daemon started");
        self.daemon = Some(daemon);

        // The daemon is usable as soon as it exists.
        let _ = events.send(ProviderEvent::Running);
        Ok(())
    }

    fn create_group(&mut self) -> Result<()> {
        if self.daemon.is_none() {
            return Err(Error::discovery("no mDNS daemon to create a group on"));
        }
        self.group.get_or_insert_with(Vec::new);
        Ok(())
    }

    fn commit(&mut self, record: &ServiceRecord) -> Result<()> {
        let daemon = self
            .daemon
            .as_ref()
            .ok_or_else(|| Error::discovery("mDNS daemon not connected"))?;
        let group = self
            .group
            .as_mut()
            .ok_or_else(|| Error::discovery("no record group"))?;

        let ty_domain = format!("{}local.", record.service_type);
        let properties: [(&str, &str); 0] = [];
        let service = ServiceInfo::new(
            &ty_domain,
            &record.name,
            &self.host_name,
            "",
            record.port,
            &properties[..],
        )?
        .enable_addr_auto();

        let fullname = service.get_fullname().to_string();
        daemon.register(service)?;
        debug!(%fullname, port = record.port, "Registered mDNS service");
        group.push(fullname);
        Ok(())
    }

    fn reset_group(&mut self) {
        let (Some(daemon), Some(group)) = (self.daemon.as_ref(), self.group.as_mut()) else {
            return;
        };
        for fullname in group.drain(..) {
            if let Err(e) = daemon.unregister(&fullname) {
                warn!(%fullname, error = %e, "Failed to unregister mDNS service");
            }
        }
    }

    fn release_group(&mut self) {
        self.reset_group();
        self.group = None;
    }

    fn disconnect(&mut self) {
        self.release_group();
        if let Some(daemon) = self.daemon.take() {
            if let Err(e) = daemon.shutdown() {
                warn!(error = %e, "Failed to shut down mDNS daemon");
            }
        }
    }
}

impl Drop for MdnsProvider {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Turns daemon monitor events into provider events.
///
/// The daemon reports a name conflict once per record and interface. Only the
/// first report for each original name gets through: an SRV record for a
/// service instance conflict, an A or AAAA record for a host name conflict.
#[derive(Debug, Default)]
struct ConflictFilter {
    services: HashSet<String>,
    hosts: HashSet<String>,
}

impl ConflictFilter {
    fn map(&mut self, event: DaemonEvent) -> Vec<ProviderEvent> {
        match event {
            DaemonEvent::Announce(..) => vec![ProviderEvent::GroupEstablished],
            DaemonEvent::NameChange(change) => self.name_change(change),
            DaemonEvent::Error(e) => {
                // Per-interface send errors are routine on multi-homed hosts.
                warn!(error = %e, "mDNS daemon error");
                Vec::new()
            }
            _ => Vec::new(),
        }
    }

    fn name_change(&mut self, change: DnsNameChange) -> Vec<ProviderEvent> {
        debug!(?change, "mDNS name conflict");
        match change.rr_type {
            RRType::SRV if self.services.insert(change.original.clone()) => {
                vec![ProviderEvent::GroupCollision]
            }
            // The daemon renamed the host and keeps running under the new name.
            RRType::A | RRType::AAAA if self.hosts.insert(change.original.clone()) => {
                vec![ProviderEvent::ClientCollision, ProviderEvent::Running]
            }
            _ => Vec::new(),
        }
    }
}
