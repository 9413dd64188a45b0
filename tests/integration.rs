mod common;

use std::net::{IpAddr, Ipv4Addr};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_test::{assert_err, assert_ok};

use common::{keystore, FakeProvider, RecordingNotifier, ALICE_ARMOR};
use hkp_share::{AdvertState, Sharing, SharingConfig};

fn config(publish: bool) -> SharingConfig {
    SharingConfig {
        listen: IpAddr::V4(Ipv4Addr::LOCALHOST),
        name: Some("Alice".into()),
        publish,
        ..SharingConfig::default()
    }
}

/// Send a GET request and return the status code and body.
async fn http_get(port: u16, target: &str) -> (u16, String) {
    let mut stream = TcpStream::connect((Ipv4Addr::LOCALHOST, port)).await.unwrap();
    let request = format!("GET {target} HTTP/1.1\r\nHost: localhost\r\n\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await.unwrap();
    let raw = String::from_utf8(raw).unwrap();
    let (head, body) = raw.split_once("\r\n\r\n").unwrap();
    let status = head.split(' ').nth(1).unwrap().parse().unwrap();
    (status, body.to_string())
}

#[test_log::test(tokio::test)]
async fn test_lookup_over_http() {
    let mut sharing = Sharing::new(config(false), keystore(), FakeProvider::new());
    assert_ok!(sharing.start().await);
    let port = sharing.port().unwrap();

    let (quit_tx, quit_rx) = watch::channel(false);
    let client = async move {
        let responses = vec![
            http_get(port, "/pks/lookup?op=index&search=alice").await,
            http_get(port, "/pks/lookup?op=get&search=0x89ABCDEF").await,
            http_get(port, "/pks/add?x=1").await,
            http_get(port, "/nonexistent").await,
            http_get(port, "/pks/lookup?op=index&search=nobody").await,
        ];
        quit_tx.send(true).unwrap();
        responses
    };

    let (result, responses) = tokio::join!(sharing.run(quit_rx), client);
    assert_ok!(result);

    let (status, body) = &responses[0];
    assert_eq!(*status, 200);
    assert_eq!(
        body,
        "<title>Public Key Server -- Verbose Index ``alice''</title><p>\
         <h1>Public Key Server -- Verbose Index ``alice''</h1><p>\
         <pre>Type bits /keyID    Date       User ID\r\n\
         pub  2048R/<a href=\"/pks/lookup?op=get&search=0x89ABCDEF\">89ABCDEF</a> 2020/01/02 \
         Alice A &lt;<a href=\"/pks/lookup?op=get&search=0x89ABCDEF\">alice@example.com</a>&gt;\r\n\
         </pre>"
    );

    let (status, body) = &responses[1];
    assert_eq!(*status, 200);
    assert!(body.contains(ALICE_ARMOR));
    assert!(body.ends_with("\r\n</pre>"));

    let (status, body) = &responses[2];
    assert_eq!(*status, 405);
    assert_eq!(body, hkp_share::hkp::HKP_ADD_RESPONSE);

    let (status, body) = &responses[3];
    assert_eq!(*status, 404);
    assert_eq!(body, hkp_share::hkp::HKP_NOTFOUND_RESPONSE);

    let (status, body) = &responses[4];
    assert_eq!(*status, 200);
    assert!(body.ends_with("No matching keys in database"));

    assert_eq!(sharing.port(), None);
}

#[tokio::test]
async fn test_start_advertises_bound_port() {
    let provider = FakeProvider::new();
    let mut sharing = Sharing::new(config(true), keystore(), provider.clone());
    assert_ok!(sharing.start().await);
    let port = sharing.port().unwrap();

    assert_eq!(provider.calls(), vec!["connect"]);
    assert_eq!(sharing.advert_state(), AdvertState::ClientStarting);
    assert_eq!(sharing.advert_name(), Some("Alice's encryption keys"));
    assert_eq!(sharing.publisher().advertisement().port(), port);

    // A second start changes nothing.
    assert_ok!(sharing.start().await);
    assert_eq!(sharing.port(), Some(port));
    assert_eq!(provider.calls(), vec!["connect"]);

    sharing.stop();
    assert_eq!(provider.calls(), vec!["connect", "disconnect"]);
    assert_eq!(sharing.port(), None);
    assert_eq!(sharing.advert_state(), AdvertState::Disconnected);
}

#[tokio::test]
async fn test_stop_before_start() {
    let provider = FakeProvider::new();
    let mut sharing = Sharing::new(config(true), keystore(), provider.clone());
    sharing.stop();
    sharing.stop();
    assert!(provider.calls().is_empty());
    assert_eq!(sharing.port(), None);
}

#[tokio::test]
async fn test_provider_failure_aborts_start() {
    let provider = FakeProvider::failing_at("connect");
    let notifier = RecordingNotifier::default();
    let mut sharing = Sharing::new(config(true), keystore(), provider.clone())
        .with_notifier(notifier.clone());

    assert_err!(sharing.start().await);
    assert_eq!(sharing.port(), None);
    assert_eq!(sharing.advert_state(), AdvertState::Disconnected);

    let messages = notifier.messages.borrow();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].starts_with("Couldn't share keys: "));
}

#[tokio::test]
async fn test_bind_failure_aborts_start() {
    let taken = std::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    let port = taken.local_addr().unwrap().port();

    let provider = FakeProvider::new();
    let notifier = RecordingNotifier::default();
    let config = SharingConfig {
        port,
        ..config(true)
    };
    let mut sharing =
        Sharing::new(config, keystore(), provider.clone()).with_notifier(notifier.clone());

    assert_err!(sharing.start().await);
    assert!(provider.calls().is_empty());
    assert_eq!(
        *notifier.messages.borrow(),
        vec!["Couldn't share keys: Can't start the HKP server."]
    );
}

#[tokio::test]
async fn test_quit_before_loop() {
    let provider = FakeProvider::new();
    let mut sharing = Sharing::new(config(true), keystore(), provider.clone());

    let (quit_tx, quit_rx) = watch::channel(false);
    quit_tx.send(true).unwrap();
    assert_ok!(sharing.run(quit_rx).await);

    assert_eq!(provider.calls(), vec!["connect", "disconnect"]);
    assert_eq!(sharing.port(), None);
}
