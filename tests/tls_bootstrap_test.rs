//! TLS Bootstrap Tests
//!
//! Covers:
//! - TLS client and server channels with ALPN handler dispatch
//! - Negotiation failure reporting and callback order
//! - Protocols nobody handles

mod common;

use bytes::Bytes;
use channelnet::tls::TlsCallbacks;
use channelnet::{
    Channel, ChannelHandler, ClientBootstrap, EventLoopGroup, NetError, ServerBootstrap, SocketEndpoint,
    SocketListener, SocketOptions, TlsConnectionOptions, TlsContext, TlsContextOptions,
};
use common::{wait_until, MockHostResolver, WAIT};
use std::net::IpAddr;
use std::sync::{mpsc, Arc, Mutex};

/// Application handler installed after ALPN.
struct App(mpsc::Sender<Bytes>);

impl ChannelHandler for App {
    fn name(&self) -> &'static str {
        "app"
    }

    fn on_read(&mut self, _channel: &Channel, data: Bytes) -> Option<Bytes> {
        let _ = self.0.send(data);
        None
    }
}

fn server_ctx() -> TlsContext {
    let identity = common::self_signed_identity();
    TlsContext::new_server(
        TlsContextOptions::builder()
            .certificate_pem(identity.cert_pem)
            .private_key_pem(identity.key_pem)
            .alpn_protocols(&["h2"])
            .build(),
    )
    .unwrap()
}

fn localhost_client(group: &EventLoopGroup) -> ClientBootstrap {
    let localhost: IpAddr = "127.0.0.1".parse().unwrap();
    ClientBootstrap::new(group, MockHostResolver::new(vec![localhost]), None).unwrap()
}

fn start_tls_listener(
    bootstrap: &ServerBootstrap,
    incoming_tx: mpsc::Sender<Result<Vec<&'static str>, NetError>>,
) -> SocketListener {
    bootstrap
        .new_tls_socket_listener(
            &SocketEndpoint::new("127.0.0.1", 0),
            &SocketOptions::default(),
            &TlsConnectionOptions::new(server_ctx()),
            move |_, result: Result<Channel, NetError>| {
                let _ = incoming_tx.send(result.map(|channel| channel.handler_names()));
            },
            |_, _, _| {},
        )
        .unwrap()
}

#[test]
fn test_alpn_pipeline() {
    let group = EventLoopGroup::new(2).unwrap();
    let server = ServerBootstrap::new(&group).unwrap();
    let (data_tx, data_rx) = mpsc::channel();
    server.set_alpn_callback(move |_, protocol| {
        assert_eq!(protocol, "h2");
        Some(Box::new(App(data_tx.clone())) as Box<dyn ChannelHandler>)
    });

    let (incoming_tx, incoming_rx) = mpsc::channel();
    let listener = start_tls_listener(&server, incoming_tx);
    let port = listener.local_endpoint().unwrap().port;

    let client = localhost_client(&group);
    let client_ctx = TlsContext::new_client(
        TlsContextOptions::builder()
            .verify_peer(false)
            .alpn_protocols(&["h2"])
            .build(),
    )
    .unwrap();
    let (setup_tx, setup_rx) = mpsc::channel();
    client
        .new_tls_socket_channel(
            "localhost",
            port,
            &SocketOptions::default(),
            &TlsConnectionOptions::new(client_ctx),
            move |_, result| setup_tx.send(result).unwrap(),
            |_, _, _| {},
        )
        .unwrap();

    let channel = setup_rx.recv_timeout(WAIT).unwrap().unwrap();
    // No ALPN callback on the client: TLS is the last stage.
    assert_eq!(channel.handler_names(), vec!["socket", "tls"]);
    assert_eq!(
        incoming_rx.recv_timeout(WAIT).unwrap().unwrap(),
        vec!["socket", "tls", "app"]
    );

    channel.write(Bytes::from_static(b"ping")).unwrap();
    let mut received = Vec::new();
    while received.len() < 4 {
        received.extend_from_slice(&data_rx.recv_timeout(WAIT).unwrap());
    }
    assert_eq!(received, b"ping");

    channel.shutdown(Ok(()));
    server.destroy_socket_listener(listener);
}

#[test]
fn test_client_alpn_dispatch() {
    let group = EventLoopGroup::new(2).unwrap();
    let server = ServerBootstrap::new(&group).unwrap();
    let (incoming_tx, incoming_rx) = mpsc::channel();
    let listener = start_tls_listener(&server, incoming_tx);
    let port = listener.local_endpoint().unwrap().port;

    let client = localhost_client(&group);
    let (data_tx, _data_rx) = mpsc::channel();
    client.set_alpn_callback(move |_, _| Some(Box::new(App(data_tx.clone())) as Box<dyn ChannelHandler>));
    let client_ctx = TlsContext::new_client(
        TlsContextOptions::builder()
            .verify_peer(false)
            .alpn_protocols(&["h2"])
            .build(),
    )
    .unwrap();

    let (setup_tx, setup_rx) = mpsc::channel();
    client
        .new_tls_socket_channel(
            "localhost",
            port,
            &SocketOptions::default(),
            &TlsConnectionOptions::new(client_ctx),
            move |_, result| setup_tx.send(result.map(|c| c.handler_names())).unwrap(),
            |_, _, _| {},
        )
        .unwrap();

    assert_eq!(setup_rx.recv_timeout(WAIT).unwrap().unwrap(), vec!["socket", "tls", "app"]);
    // The server has no ALPN callback, so its pipeline ends at TLS.
    assert_eq!(incoming_rx.recv_timeout(WAIT).unwrap().unwrap(), vec!["socket", "tls"]);
    server.destroy_socket_listener(listener);
}

/// Records TLS callback order alongside the setup callback.
struct Recorder(Arc<Mutex<Vec<String>>>);

impl TlsCallbacks for Recorder {
    fn on_negotiation_result(&self, _channel: &Channel, result: Result<(), NetError>) {
        self.0.lock().unwrap().push(format!("negotiation {result:?}"));
    }

    fn on_error(&self, _channel: &Channel, error: NetError, _detail: &str) {
        self.0.lock().unwrap().push(format!("error {error:?}"));
    }
}

#[test]
fn test_untrusted_certificate_fails_setup() {
    let group = EventLoopGroup::new(2).unwrap();
    let server = ServerBootstrap::new(&group).unwrap();
    let (incoming_tx, incoming_rx) = mpsc::channel();
    let listener = start_tls_listener(&server, incoming_tx);
    let port = listener.local_endpoint().unwrap().port;

    let client = localhost_client(&group);
    // Verification is on and nothing trusts the self-signed certificate.
    let client_ctx = TlsContext::new_client(TlsContextOptions::default()).unwrap();
    let events = Arc::new(Mutex::new(Vec::new()));
    let tls_options = TlsConnectionOptions::new(client_ctx)
        .with_callbacks(Arc::new(Recorder(Arc::clone(&events))));

    let (setup_tx, setup_rx) = mpsc::channel();
    let setup_events = Arc::clone(&events);
    client
        .new_tls_socket_channel(
            "localhost",
            port,
            &SocketOptions::default(),
            &tls_options,
            move |_, result| {
                setup_events.lock().unwrap().push("setup".to_string());
                setup_tx.send(result.map(|_| ())).unwrap();
            },
            |_, _, _| panic!("no channel was established"),
        )
        .unwrap();

    assert_eq!(setup_rx.recv_timeout(WAIT).unwrap(), Err(NetError::TlsNegotiationFailure));
    assert_eq!(
        *events.lock().unwrap(),
        vec![
            "error TlsNegotiationFailure".to_string(),
            "negotiation Err(TlsNegotiationFailure)".to_string(),
            "setup".to_string(),
        ]
    );
    assert!(incoming_rx.recv_timeout(WAIT).unwrap().is_err());
    assert!(wait_until(|| client.ref_count() == 1 && client.active_connect_jobs() == 0));
    server.destroy_socket_listener(listener);
}

#[test]
fn test_unhandled_protocol_rejected() {
    let group = EventLoopGroup::new(2).unwrap();
    let server = ServerBootstrap::new(&group).unwrap();
    server.set_alpn_callback(|_, _| None);
    let (incoming_tx, incoming_rx) = mpsc::channel();
    let listener = start_tls_listener(&server, incoming_tx);
    let port = listener.local_endpoint().unwrap().port;

    let client = localhost_client(&group);
    let client_ctx = TlsContext::new_client(
        TlsContextOptions::builder()
            .verify_peer(false)
            .alpn_protocols(&["h2"])
            .build(),
    )
    .unwrap();
    client
        .new_tls_socket_channel(
            "localhost",
            port,
            &SocketOptions::default(),
            &TlsConnectionOptions::new(client_ctx),
            |_, _| {},
            |_, _, _| {},
        )
        .unwrap();

    assert_eq!(
        incoming_rx.recv_timeout(WAIT).unwrap(),
        Err(NetError::UnhandledAlpnProtocolMessage)
    );
    server.destroy_socket_listener(listener);
}
