//! Key sharing coordinator.
//!
//! [`Sharing`] owns the HKP dispatcher, the HTTP transport and the
//! advertisement publisher, starts and stops them in order, and runs the
//! event loop that serves requests and drives the publisher.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::rc::Rc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::advertise::{
    operator_display_name, AdvertState, Advertisement, LogNotifier, Notifier, Publisher,
    DEFAULT_RETRY_DELAY, SHARE_ERROR_HEADING,
};
use crate::discovery::{DiscoveryProvider, SERVICE_TYPE};
use crate::error::Result;
use crate::hkp::HkpDispatcher;
use crate::keystore::KeyStore;
use crate::transport::{serve_connection, HttpTransport};

const LISTEN_ERROR_MESSAGE: &str = "Can't start the HKP server.";

/// Configuration for [`Sharing`].
#[derive(Debug, Clone)]
pub struct SharingConfig {
    /// Address to listen on.
    pub listen: IpAddr,
    /// Port to listen on. 0 picks any free port.
    pub port: u16,
    /// Display name used in the advertised name. Looked up from the
    /// account database when unset.
    pub name: Option<String>,
    /// Delay before reconnecting to the discovery provider.
    pub retry_delay: Duration,
    /// Whether to advertise on the network at all.
    pub publish: bool,
    /// DNS-SD service type to advertise.
    pub service_type: String,
}

impl Default for SharingConfig {
    fn default() -> Self {
        Self {
            listen: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 0,
            name: None,
            retry_delay: DEFAULT_RETRY_DELAY,
            publish: true,
            service_type: SERVICE_TYPE.to_string(),
        }
    }
}

struct SharedNotifier(Rc<dyn Notifier>);

impl Notifier for SharedNotifier {
    fn notify(&self, heading: &str, message: &str) {
        self.0.notify(heading, message)
    }
}

/// Serves a key store over HKP and advertises it.
pub struct Sharing<K, P> {
    config: SharingConfig,
    dispatcher: HkpDispatcher<K>,
    transport: HttpTransport,
    publisher: Publisher<P>,
    notifier: Rc<dyn Notifier>,
}

impl<K: KeyStore, P: DiscoveryProvider> Sharing<K, P> {
    /// Create a coordinator serving `keystore` and advertising through
    /// `provider`. Nothing runs until [`start`](Self::start).
    pub fn new(config: SharingConfig, keystore: K, provider: P) -> Self {
        let display_name = config.name.clone().unwrap_or_else(operator_display_name);
        let machine = Advertisement::new(display_name)
            .with_retry_delay(config.retry_delay)
            .with_service_type(config.service_type.clone());

        let notifier: Rc<dyn Notifier> = Rc::new(LogNotifier);
        let publisher = Publisher::new(provider, machine)
            .with_notifier(SharedNotifier(notifier.clone()));

        Self {
            config,
            dispatcher: HkpDispatcher::new(keystore),
            transport: HttpTransport::new(),
            publisher,
            notifier,
        }
    }

    /// Report user-facing errors to `notifier`.
    pub fn with_notifier(mut self, notifier: impl Notifier + 'static) -> Self {
        let notifier: Rc<dyn Notifier> = Rc::new(notifier);
        self.publisher = self
            .publisher
            .with_notifier(SharedNotifier(notifier.clone()));
        self.notifier = notifier;
        self
    }

    /// Bound HTTP port, if listening.
    pub fn port(&self) -> Option<u16> {
        self.transport.port()
    }

    /// Advertisement state.
    pub fn advert_state(&self) -> AdvertState {
        self.publisher.state()
    }

    /// Name currently advertised or being registered.
    pub fn advert_name(&self) -> Option<&str> {
        self.publisher.advertisement().name()
    }

    /// The publisher.
    pub fn publisher(&self) -> &Publisher<P> {
        &self.publisher
    }

    /// Start serving and advertising.
    ///
    /// Failures are reported to the notifier and returned; a failed start
    /// leaves nothing running.
    pub async fn start(&mut self) -> Result<()> {
        if !self.transport.is_listening() {
            let addr = SocketAddr::new(self.config.listen, self.config.port);
            if let Err(e) = self.transport.listen(addr).await {
                self.notifier.notify(SHARE_ERROR_HEADING, LISTEN_ERROR_MESSAGE);
                return Err(e);
            }
        }

        if self.config.publish {
            let port = self.transport.port().unwrap_or(self.config.port);
            if let Err(e) = self.publisher.start(port) {
                self.transport.stop();
                self.notifier
                    .notify(SHARE_ERROR_HEADING, &format!("Can't advertise keys: {e}"));
                return Err(e);
            }
        }

        Ok(())
    }

    /// Stop advertising, then stop serving. Safe to call at any time.
    pub fn stop(&mut self) {
        self.publisher.stop();
        self.transport.stop();
    }

    /// Start, run the event loop until `shutdown` turns true, then stop.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        self.start().await?;

        if *shutdown.borrow() {
            debug!("Shutdown requested before the event loop started");
        } else {
            info!(port = ?self.port(), "Sharing keys");
            self.event_loop(&mut shutdown).await;
        }

        self.stop();
        info!("Stopped sharing keys");
        Ok(())
    }

    async fn event_loop(&mut self, shutdown: &mut watch::Receiver<bool>) {
        loop {
            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }

                accepted = self.transport.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!(%peer, "HKP connection");
                        if let Err(e) = serve_connection(stream, &self.dispatcher).await {
                            warn!(%peer, error = %e, "Error serving HKP connection");
                        }
                    }
                    Err(e) => warn!(error = %e, "Failed to accept HKP connection"),
                },

                wake = self.publisher.next_wake() => self.publisher.handle_wake(wake),
            }
        }
    }
}
