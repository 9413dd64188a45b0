//! Service advertisement: naming, the registration state machine, and the
//! publisher that runs it against a [`DiscoveryProvider`].
//!
//! [`Advertisement`] is a plain state machine. Feeding it an
//! [`AdvertEvent`] updates its state and returns the [`Effect`]s to carry
//! out; it never touches the network. [`Publisher`] executes those effects
//! on a provider and turns provider callbacks and the retry timer back into
//! events.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::discovery::{DiscoveryProvider, ProviderEvent, ServiceRecord, SERVICE_TYPE};
use crate::error::{Error, Result};

/// Delay before reconnecting after the provider went away.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Heading shown when sharing cannot be set up.
pub const SHARE_ERROR_HEADING: &str = "Couldn't share keys";

const PUBLISH_ERROR_MESSAGE: &str = "Can't publish discovery information on the network.";

/// Advertised instance name for `display_name`, with a disambiguation suffix
/// when `alternate` is non-zero.
pub fn share_name(display_name: &str, alternate: u32) -> String {
    let name = format!("{display_name}'s encryption keys");
    if alternate > 0 {
        format!("{name} #{alternate}")
    } else {
        name
    }
}

/// The operator's display name: the real name from the account database, or
/// the capitalized account name when that is unavailable.
pub fn operator_display_name() -> String {
    let (account, gecos) = current_account()
        .or_else(|| {
            std::env::var("USER")
                .or_else(|_| std::env::var("LOGNAME"))
                .ok()
                .map(|user| (user, String::new()))
        })
        .unwrap_or_default();

    display_name(&account, &gecos)
}

/// Account name and GECOS field of the user running the process.
#[cfg(unix)]
fn current_account() -> Option<(String, String)> {
    use nix::unistd::{getuid, User};

    match User::from_uid(getuid()) {
        Ok(Some(user)) => Some((user.name, user.gecos.to_string_lossy().into_owned())),
        Ok(None) => {
            debug!(uid = %getuid(), "No account database entry for uid");
            None
        }
        Err(e) => {
            debug!(error = %e, "Account lookup failed");
            None
        }
    }
}

#[cfg(not(unix))]
fn current_account() -> Option<(String, String)> {
    None
}

fn display_name(account: &str, gecos: &str) -> String {
    match real_name(gecos) {
        Some(name) => name,
        None if account.is_empty() => "Unknown".to_string(),
        None => capitalize_first(account),
    }
}

/// The real name part of a GECOS field.
fn real_name(gecos: &str) -> Option<String> {
    let name = gecos.split(',').next().unwrap_or("").trim();
    (!name.is_empty() && name != "Unknown").then(|| name.to_string())
}

fn capitalize_first(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Receives user-facing error reports.
pub trait Notifier {
    /// Report an error with a short heading and a longer message.
    fn notify(&self, heading: &str, message: &str);
}

/// [`Notifier`] that writes to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, heading: &str, message: &str) {
        error!("{heading}: {message}");
    }
}

/// Advertisement lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvertState {
    /// No provider connection.
    Disconnected,
    /// Connection opened, waiting for the provider to run.
    ClientStarting,
    /// Service record committed, waiting for the provider to confirm.
    GroupRegistering,
    /// Service record published.
    Published,
    /// The provider's host name collided; waiting for it to run again.
    CollisionRetry,
    /// Publishing failed. Only a stop followed by a start leaves this state.
    Failed,
}

impl AdvertState {
    fn is_active(self) -> bool {
        matches!(
            self,
            Self::ClientStarting | Self::GroupRegistering | Self::Published | Self::CollisionRetry
        )
    }
}

/// Inputs to the [`Advertisement`] state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdvertEvent {
    /// Begin advertising `port`.
    Start {
        /// Port of the HKP server.
        port: u16,
    },
    /// Stop advertising and release everything.
    Stop,
    /// The reconnect delay elapsed.
    RetryElapsed,
    /// Opening the provider connection failed.
    ConnectFailed(String),
    /// Creating the record group failed.
    GroupCreateFailed(String),
    /// A provider callback.
    Provider(ProviderEvent),
}

/// Actions requested by the [`Advertisement`] state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Open a provider connection.
    Connect,
    /// Create the record group.
    CreateGroup,
    /// Add the record to the group and commit it.
    Register(ServiceRecord),
    /// Withdraw the group's records.
    ResetGroup,
    /// Free the record group.
    ReleaseGroup,
    /// Close the provider connection.
    ReleaseConnection,
    /// Deliver [`AdvertEvent::RetryElapsed`] after the delay.
    ScheduleRetry(Duration),
    /// Drop a scheduled retry.
    CancelRetry,
    /// Tell the user something went wrong.
    Notify {
        /// Short summary.
        heading: String,
        /// Details.
        message: String,
    },
}

/// The service advertisement state machine.
#[derive(Debug, Clone)]
pub struct Advertisement {
    state: AdvertState,
    display_name: String,
    service_type: String,
    retry_delay: Duration,
    name: Option<String>,
    alternate: u32,
    port: u16,
    connected: bool,
    has_group: bool,
    retry_pending: bool,
}

impl Advertisement {
    /// A disconnected advertisement for `display_name`.
    pub fn new(display_name: impl Into<String>) -> Self {
        Self {
            state: AdvertState::Disconnected,
            display_name: display_name.into(),
            service_type: SERVICE_TYPE.to_string(),
            retry_delay: DEFAULT_RETRY_DELAY,
            name: None,
            alternate: 0,
            port: 0,
            connected: false,
            has_group: false,
            retry_pending: false,
        }
    }

    /// Use a different reconnect delay.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Advertise a different service type.
    pub fn with_service_type(mut self, service_type: impl Into<String>) -> Self {
        self.service_type = service_type.into();
        self
    }

    /// Current state.
    pub fn state(&self) -> AdvertState {
        self.state
    }

    /// Name currently advertised or being registered.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Collision counter.
    pub fn alternate(&self) -> u32 {
        self.alternate
    }

    /// Port being advertised.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Whether a reconnect is scheduled.
    pub fn retry_pending(&self) -> bool {
        self.retry_pending
    }

    /// Apply `event` and return the effects to carry out, in order.
    pub fn handle(&mut self, event: AdvertEvent) -> Vec<Effect> {
        match event {
            AdvertEvent::Start { port } => {
                if self.state != AdvertState::Disconnected {
                    debug!(state = ?self.state, "Advertisement already started");
                    return Vec::new();
                }
                self.port = port;
                self.begin()
            }
            AdvertEvent::RetryElapsed => {
                if !self.retry_pending || self.state != AdvertState::Disconnected {
                    return Vec::new();
                }
                info!("Reconnecting to the discovery provider");
                self.begin()
            }
            AdvertEvent::Stop => self.stop(),
            AdvertEvent::ConnectFailed(reason) => {
                warn!(%reason, "Couldn't connect to the discovery provider");
                self.reset();
                self.state = AdvertState::Disconnected;
                Vec::new()
            }
            AdvertEvent::GroupCreateFailed(reason) => {
                warn!(%reason, "Couldn't create service group");
                self.has_group = false;
                self.fail()
            }
            AdvertEvent::Provider(event) => self.handle_provider(event),
        }
    }

    fn handle_provider(&mut self, event: ProviderEvent) -> Vec<Effect> {
        if !self.state.is_active() {
            debug!(?event, state = ?self.state, "Ignoring provider event");
            return Vec::new();
        }

        match event {
            ProviderEvent::Running => {
                let mut effects = Vec::with_capacity(2);
                if self.has_group {
                    effects.push(Effect::ResetGroup);
                } else {
                    effects.push(Effect::CreateGroup);
                    self.has_group = true;
                }
                effects.push(self.register());
                self.state = AdvertState::GroupRegistering;
                effects
            }
            ProviderEvent::GroupCollision => {
                if !matches!(
                    self.state,
                    AdvertState::GroupRegistering | AdvertState::Published
                ) {
                    return Vec::new();
                }
                self.alternate += 1;
                self.name = Some(share_name(&self.display_name, self.alternate));
                warn!(name = ?self.name, "Naming collision, trying new name");
                self.state = AdvertState::GroupRegistering;
                vec![Effect::ResetGroup, self.register()]
            }
            ProviderEvent::GroupEstablished => {
                if self.state == AdvertState::GroupRegistering {
                    info!(name = ?self.name, port = self.port, "Service published");
                    self.state = AdvertState::Published;
                }
                Vec::new()
            }
            ProviderEvent::ClientCollision => {
                self.state = AdvertState::CollisionRetry;
                if self.has_group {
                    vec![Effect::ResetGroup]
                } else {
                    Vec::new()
                }
            }
            ProviderEvent::Failure {
                reason,
                disconnected: true,
            } => {
                debug!(%reason, "Discovery provider disconnected");
                let mut effects = self.release();
                self.reset();
                self.state = AdvertState::Disconnected;
                self.retry_pending = true;
                effects.push(Effect::ScheduleRetry(self.retry_delay));
                effects
            }
            ProviderEvent::Failure {
                reason,
                disconnected: false,
            } => {
                warn!(%reason, "Failure talking with the discovery provider");
                self.fail()
            }
        }
    }

    fn begin(&mut self) -> Vec<Effect> {
        self.alternate = 0;
        self.retry_pending = false;
        self.name = Some(share_name(&self.display_name, 0));
        self.connected = true;
        self.state = AdvertState::ClientStarting;
        vec![Effect::Connect]
    }

    fn register(&self) -> Effect {
        Effect::Register(ServiceRecord {
            name: self.name.clone().unwrap_or_default(),
            service_type: self.service_type.clone(),
            port: self.port,
        })
    }

    fn stop(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        if self.retry_pending {
            effects.push(Effect::CancelRetry);
        }
        effects.extend(self.release());
        self.reset();
        self.state = AdvertState::Disconnected;
        effects
    }

    fn fail(&mut self) -> Vec<Effect> {
        let mut effects = self.release();
        self.reset();
        self.state = AdvertState::Failed;
        effects.push(Effect::Notify {
            heading: SHARE_ERROR_HEADING.to_string(),
            message: PUBLISH_ERROR_MESSAGE.to_string(),
        });
        effects
    }

    /// Effects releasing whatever is held: group first, then connection.
    fn release(&mut self) -> Vec<Effect> {
        let mut effects = Vec::with_capacity(2);
        if self.has_group {
            effects.push(Effect::ReleaseGroup);
            self.has_group = false;
        }
        if self.connected {
            effects.push(Effect::ReleaseConnection);
            self.connected = false;
        }
        effects
    }

    fn reset(&mut self) {
        self.name = None;
        self.alternate = 0;
        self.connected = false;
        self.has_group = false;
        self.retry_pending = false;
    }
}

/// What woke a waiting [`Publisher`].
#[derive(Debug)]
pub enum Wake {
    /// A provider event, or `None` when the provider dropped its sender.
    Event(Option<ProviderEvent>),
    /// The reconnect timer fired.
    Retry,
}

/// Runs an [`Advertisement`] against a provider.
pub struct Publisher<P> {
    machine: Advertisement,
    provider: P,
    events: Option<mpsc::UnboundedReceiver<ProviderEvent>>,
    retry_at: Option<Instant>,
    notifier: Box<dyn Notifier>,
}

impl<P: DiscoveryProvider> Publisher<P> {
    /// Create a publisher for `machine` over `provider`.
    pub fn new(provider: P, machine: Advertisement) -> Self {
        Self {
            machine,
            provider,
            events: None,
            retry_at: None,
            notifier: Box::new(LogNotifier),
        }
    }

    /// Report user-facing errors to `notifier` instead of the log.
    pub fn with_notifier(mut self, notifier: impl Notifier + 'static) -> Self {
        self.notifier = Box::new(notifier);
        self
    }

    /// The state machine.
    pub fn advertisement(&self) -> &Advertisement {
        &self.machine
    }

    /// Current state.
    pub fn state(&self) -> AdvertState {
        self.machine.state()
    }

    /// Start advertising `port`. A no-op unless disconnected.
    ///
    /// Fails when the provider connection cannot be opened; the
    /// advertisement is then left disconnected.
    pub fn start(&mut self, port: u16) -> Result<()> {
        match self.dispatch(AdvertEvent::Start { port }) {
            Some(reason) => Err(Error::discovery(reason)),
            None => Ok(()),
        }
    }

    /// Stop advertising. Never fails.
    pub fn stop(&mut self) {
        self.dispatch(AdvertEvent::Stop);
    }

    /// Wait for the next provider event or the reconnect timer. Pending
    /// forever when neither can occur.
    pub async fn next_wake(&mut self) -> Wake {
        let retry_at = self.retry_at;
        let events = self.events.as_mut();

        tokio::select! {
            event = recv_or_pending(events) => Wake::Event(event),
            _ = sleep_or_pending(retry_at) => Wake::Retry,
        }
    }

    /// Act on what [`next_wake`](Self::next_wake) returned.
    pub fn handle_wake(&mut self, wake: Wake) {
        match wake {
            Wake::Event(Some(event)) => self.handle_event(event),
            Wake::Event(None) => {
                self.events = None;
                self.handle_event(ProviderEvent::Failure {
                    reason: "provider connection closed".into(),
                    disconnected: true,
                });
            }
            Wake::Retry => {
                self.retry_at = None;
                if let Some(reason) = self.dispatch(AdvertEvent::RetryElapsed) {
                    warn!(%reason, "Reconnect to the discovery provider failed");
                }
            }
        }
    }

    /// Feed a provider event to the state machine.
    pub fn handle_event(&mut self, event: ProviderEvent) {
        self.dispatch(AdvertEvent::Provider(event));
    }

    /// Run `event` and everything it triggers. Returns the connect failure
    /// reason, if the provider could not be reached.
    fn dispatch(&mut self, event: AdvertEvent) -> Option<String> {
        let mut queue = VecDeque::from([event]);
        let mut connect_error = None;

        while let Some(event) = queue.pop_front() {
            for effect in self.machine.handle(event) {
                if let Some(follow_up) = self.execute(effect) {
                    if let AdvertEvent::ConnectFailed(reason) = &follow_up {
                        connect_error = Some(reason.clone());
                    }
                    // Remaining effects assumed the failed one succeeded.
                    queue.push_back(follow_up);
                    break;
                }
            }
        }

        connect_error
    }

    fn execute(&mut self, effect: Effect) -> Option<AdvertEvent> {
        debug!(?effect, "Advertisement effect");
        match effect {
            Effect::Connect => {
                let (tx, rx) = mpsc::unbounded_channel();
                self.events = Some(rx);
                if let Err(e) = self.provider.connect(tx) {
                    self.events = None;
                    return Some(AdvertEvent::ConnectFailed(e.to_string()));
                }
            }
            Effect::CreateGroup => {
                if let Err(e) = self.provider.create_group() {
                    return Some(AdvertEvent::GroupCreateFailed(e.to_string()));
                }
            }
            Effect::Register(record) => {
                if let Err(e) = self.provider.commit(&record) {
                    warn!(name = %record.name, error = %e, "Failed to register service");
                    return Some(AdvertEvent::Provider(ProviderEvent::Failure {
                        reason: e.to_string(),
                        disconnected: false,
                    }));
                }
            }
            Effect::ResetGroup => self.provider.reset_group(),
            Effect::ReleaseGroup => self.provider.release_group(),
            Effect::ReleaseConnection => {
                self.provider.disconnect();
                self.events = None;
            }
            Effect::ScheduleRetry(delay) => self.retry_at = Some(Instant::now() + delay),
            Effect::CancelRetry => self.retry_at = None,
            Effect::Notify { heading, message } => self.notifier.notify(&heading, &message),
        }
        None
    }
}

async fn recv_or_pending(
    events: Option<&mut mpsc::UnboundedReceiver<ProviderEvent>>,
) -> Option<ProviderEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_or_pending(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running(machine: &mut Advertisement) {
        machine.handle(AdvertEvent::Start { port: 11371 });
        machine.handle(AdvertEvent::Provider(ProviderEvent::Running));
    }

    fn disconnect() -> AdvertEvent {
        AdvertEvent::Provider(ProviderEvent::Failure {
            reason: "daemon went away".into(),
            disconnected: true,
        })
    }

    #[test]
    fn test_share_name() {
        assert_eq!(share_name("Alice", 0), "Alice's encryption keys");
        assert_eq!(share_name("Alice", 2), "Alice's encryption keys #2");
    }

    #[test]
    fn test_real_name() {
        assert_eq!(real_name("Alice Liddell,,,").as_deref(), Some("Alice Liddell"));
        assert_eq!(real_name("  Bob  "), Some("Bob".to_string()));
        assert_eq!(real_name(""), None);
        assert_eq!(real_name(",room 12"), None);
        assert_eq!(real_name("Unknown"), None);
    }

    #[test]
    fn test_display_name_fallbacks() {
        assert_eq!(display_name("alice", "Alice Liddell,,,"), "Alice Liddell");
        assert_eq!(display_name("bob", ""), "Bob");
        assert_eq!(display_name("carol", "Unknown"), "Carol");
        assert_eq!(display_name("", ""), "Unknown");
    }

    #[cfg(unix)]
    #[test]
    fn test_account_comes_from_uid() {
        // Resolved through the uid, whatever USER says.
        let (account, _) = current_account().unwrap();
        assert!(!account.is_empty());
        assert_ne!(operator_display_name(), "Unknown");
    }

    #[test]
    fn test_capitalize_first() {
        assert_eq!(capitalize_first("alice"), "Alice");
        assert_eq!(capitalize_first("élodie"), "Élodie");
        assert_eq!(capitalize_first(""), "");
    }

    #[test]
    fn test_start_connects() {
        let mut machine = Advertisement::new("Alice");
        let effects = machine.handle(AdvertEvent::Start { port: 11371 });
        assert_eq!(effects, vec![Effect::Connect]);
        assert_eq!(machine.state(), AdvertState::ClientStarting);
        assert_eq!(machine.name(), Some("Alice's encryption keys"));
        assert_eq!(machine.port(), 11371);
    }

    #[test]
    fn test_second_start_is_noop() {
        let mut machine = Advertisement::new("Alice");
        running(&mut machine);
        assert!(machine.handle(AdvertEvent::Start { port: 1 }).is_empty());
        assert_eq!(machine.state(), AdvertState::GroupRegistering);
        assert_eq!(machine.port(), 11371);
    }

    #[test]
    fn test_stop_before_start_is_noop() {
        let mut machine = Advertisement::new("Alice");
        assert!(machine.handle(AdvertEvent::Stop).is_empty());
        assert_eq!(machine.state(), AdvertState::Disconnected);
    }

    #[test]
    fn test_running_registers_service() {
        let mut machine = Advertisement::new("Alice");
        machine.handle(AdvertEvent::Start { port: 11371 });
        let effects = machine.handle(AdvertEvent::Provider(ProviderEvent::Running));
        assert_eq!(
            effects,
            vec![
                Effect::CreateGroup,
                Effect::Register(ServiceRecord {
                    name: "Alice's encryption keys".into(),
                    service_type: "_pgpkey-hkp._tcp.".into(),
                    port: 11371,
                }),
            ]
        );
        assert_eq!(machine.state(), AdvertState::GroupRegistering);

        machine.handle(AdvertEvent::Provider(ProviderEvent::GroupEstablished));
        assert_eq!(machine.state(), AdvertState::Published);
    }

    #[test]
    fn test_collisions_rename() {
        let mut machine = Advertisement::new("Alice");
        running(&mut machine);

        let effects = machine.handle(AdvertEvent::Provider(ProviderEvent::GroupCollision));
        assert_eq!(machine.name(), Some("Alice's encryption keys #1"));
        assert_eq!(effects[0], Effect::ResetGroup);
        assert!(matches!(&effects[1], Effect::Register(r) if r.name.ends_with(" #1")));

        machine.handle(AdvertEvent::Provider(ProviderEvent::GroupEstablished));
        machine.handle(AdvertEvent::Provider(ProviderEvent::GroupCollision));
        assert_eq!(machine.name(), Some("Alice's encryption keys #2"));
        assert_eq!(machine.state(), AdvertState::GroupRegistering);
        assert_eq!(machine.alternate(), 2);
        assert_eq!(machine.port(), 11371);
    }

    #[test]
    fn test_failure_is_absorbing() {
        let mut machine = Advertisement::new("Alice");
        running(&mut machine);

        let effects = machine.handle(AdvertEvent::Provider(ProviderEvent::Failure {
            reason: "bad state".into(),
            disconnected: false,
        }));
        assert_eq!(effects[0], Effect::ReleaseGroup);
        assert_eq!(effects[1], Effect::ReleaseConnection);
        assert!(matches!(&effects[2], Effect::Notify { heading, .. } if heading == SHARE_ERROR_HEADING));
        assert_eq!(machine.state(), AdvertState::Failed);

        assert!(machine
            .handle(AdvertEvent::Provider(ProviderEvent::Running))
            .is_empty());
        assert!(machine.handle(AdvertEvent::Start { port: 11371 }).is_empty());
        assert!(machine.handle(AdvertEvent::RetryElapsed).is_empty());
        assert_eq!(machine.state(), AdvertState::Failed);

        assert!(machine.handle(AdvertEvent::Stop).is_empty());
        assert_eq!(
            machine.handle(AdvertEvent::Start { port: 11371 }),
            vec![Effect::Connect]
        );
    }

    #[test]
    fn test_group_create_failure() {
        let mut machine = Advertisement::new("Alice");
        running(&mut machine);
        let effects = machine.handle(AdvertEvent::GroupCreateFailed("no memory".into()));
        assert_eq!(effects[0], Effect::ReleaseConnection);
        assert!(matches!(effects[1], Effect::Notify { .. }));
        assert_eq!(machine.state(), AdvertState::Failed);
    }

    #[test]
    fn test_disconnect_retries_silently() {
        let mut machine = Advertisement::new("Alice").with_retry_delay(Duration::from_secs(1));
        running(&mut machine);
        machine.handle(AdvertEvent::Provider(ProviderEvent::GroupCollision));
        assert_eq!(machine.alternate(), 1);

        let effects = machine.handle(disconnect());
        assert_eq!(
            effects,
            vec![
                Effect::ReleaseGroup,
                Effect::ReleaseConnection,
                Effect::ScheduleRetry(Duration::from_secs(1)),
            ]
        );
        assert_eq!(machine.state(), AdvertState::Disconnected);
        assert!(machine.retry_pending());

        assert_eq!(machine.handle(AdvertEvent::RetryElapsed), vec![Effect::Connect]);
        assert_eq!(machine.state(), AdvertState::ClientStarting);
        assert_eq!(machine.alternate(), 0);
        assert_eq!(machine.name(), Some("Alice's encryption keys"));
    }

    #[test]
    fn test_stop_cancels_retry() {
        let mut machine = Advertisement::new("Alice");
        running(&mut machine);
        machine.handle(disconnect());

        assert_eq!(machine.handle(AdvertEvent::Stop), vec![Effect::CancelRetry]);
        assert!(machine.handle(AdvertEvent::RetryElapsed).is_empty());
        assert_eq!(machine.state(), AdvertState::Disconnected);
    }

    #[test]
    fn test_client_collision_resets_group() {
        let mut machine = Advertisement::new("Alice");
        running(&mut machine);

        let effects = machine.handle(AdvertEvent::Provider(ProviderEvent::ClientCollision));
        assert_eq!(effects, vec![Effect::ResetGroup]);
        assert_eq!(machine.state(), AdvertState::CollisionRetry);
        assert_eq!(machine.name(), Some("Alice's encryption keys"));

        let effects = machine.handle(AdvertEvent::Provider(ProviderEvent::Running));
        assert_eq!(effects[0], Effect::ResetGroup);
        assert!(matches!(&effects[1], Effect::Register(r) if r.name == "Alice's encryption keys"));
        assert_eq!(machine.state(), AdvertState::GroupRegistering);
    }

    #[test]
    fn test_stop_releases_group_then_connection() {
        let mut machine = Advertisement::new("Alice");
        running(&mut machine);
        assert_eq!(
            machine.handle(AdvertEvent::Stop),
            vec![Effect::ReleaseGroup, Effect::ReleaseConnection]
        );
        assert_eq!(machine.name(), None);
        assert!(machine.handle(AdvertEvent::Stop).is_empty());
    }

    #[test]
    fn test_connect_failure_leaves_disconnected() {
        let mut machine = Advertisement::new("Alice");
        machine.handle(AdvertEvent::Start { port: 11371 });
        assert!(machine
            .handle(AdvertEvent::ConnectFailed("no daemon".into()))
            .is_empty());
        assert_eq!(machine.state(), AdvertState::Disconnected);
        assert!(machine.handle(AdvertEvent::Stop).is_empty());
    }
}
