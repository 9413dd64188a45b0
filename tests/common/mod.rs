#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use hkp_share::discovery::{DiscoveryProvider, EventSender, ProviderEvent, ServiceRecord};
use hkp_share::keystore::{Algorithm, KeyRecord, MemoryKeyStore, Subkey, UserId};
use hkp_share::{Error, Notifier, Result};

/// Provider double that records calls and lets tests inject events.
#[derive(Clone, Default)]
pub struct FakeProvider {
    inner: Rc<RefCell<FakeState>>,
}

#[derive(Default)]
struct FakeState {
    calls: Vec<String>,
    events: Option<EventSender>,
    fail_at: Option<&'static str>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// A provider whose `call` ("connect", "create_group" or "commit")
    /// always fails.
    pub fn failing_at(call: &'static str) -> Self {
        let provider = Self::default();
        provider.inner.borrow_mut().fail_at = Some(call);
        provider
    }

    pub fn calls(&self) -> Vec<String> {
        self.inner.borrow().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.inner.borrow_mut().calls.clear();
    }

    pub fn send(&self, event: ProviderEvent) {
        if let Some(tx) = &self.inner.borrow().events {
            tx.send(event).unwrap();
        }
    }

    /// Drop the event sender as if the daemon vanished.
    pub fn vanish(&self) {
        self.inner.borrow_mut().events = None;
    }

    fn record(&self, call: impl Into<String>) {
        self.inner.borrow_mut().calls.push(call.into());
    }

    fn check(&self, call: &str) -> Result<()> {
        if self.inner.borrow().fail_at == Some(call) {
            return Err(Error::discovery(format!("{call} refused")));
        }
        Ok(())
    }
}

impl DiscoveryProvider for FakeProvider {
    fn connect(&mut self, events: EventSender) -> Result<()> {
        self.record("connect");
        self.check("connect")?;
        events.send(ProviderEvent::Running).unwrap();
        self.inner.borrow_mut().events = Some(events);
        Ok(())
    }

    fn create_group(&mut self) -> Result<()> {
        self.record("create_group");
        self.check("create_group")
    }

    fn commit(&mut self, record: &ServiceRecord) -> Result<()> {
        self.record(format!("commit {}:{}", record.name, record.port));
        self.check("commit")
    }

    fn reset_group(&mut self) {
        self.record("reset_group");
    }

    fn release_group(&mut self) {
        self.record("release_group");
    }

    fn disconnect(&mut self) {
        self.record("disconnect");
        self.inner.borrow_mut().events = None;
    }
}

/// Notifier double collecting `heading: message` lines.
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    pub messages: Rc<RefCell<Vec<String>>>,
}

impl Notifier for RecordingNotifier {
    fn notify(&self, heading: &str, message: &str) {
        self.messages.borrow_mut().push(format!("{heading}: {message}"));
    }
}

pub fn alice() -> KeyRecord {
    KeyRecord {
        fingerprint: "0123456789ABCDEF0123456789ABCDEF89ABCDEF".into(),
        subkeys: vec![Subkey {
            algorithm: Algorithm::Rsa,
            bits: 2048,
            created: 1_577_923_200,
        }],
        uids: vec![UserId::new("Alice A", "alice@example.com")],
        revoked: false,
    }
}

pub const ALICE_ARMOR: &str = "-----BEGIN PGP PUBLIC KEY BLOCK-----\n\nmQENBF4NVAABCAC\n=abcd\n-----END PGP PUBLIC KEY BLOCK-----\n";

pub fn keystore() -> MemoryKeyStore {
    MemoryKeyStore::new().with_key(alice(), ALICE_ARMOR)
}
