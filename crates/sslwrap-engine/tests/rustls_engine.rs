//! Drives pairs of rustls engines against each other through memory buffers.

use std::path::PathBuf;

use sslwrap_engine::{
    ClientContext, ClientContextOptions, EngineError, EngineStatus, KeyStore, Mode, RustlsEngine,
    ServerContext, ServerContextOptions, SetupError, SslEngine, TrustPolicy,
};
use tempfile::TempDir;

struct Pki {
    _dir: TempDir,
    keystore: KeyStore,
    ca: PathBuf,
}

fn pki() -> Pki {
    let dir = tempfile::tempdir().unwrap();
    let issued = sslwrap_cert::issue(&["localhost".to_string()], &[], 30, true).unwrap();
    let files = issued.write(dir.path(), "cert", "key", "ca").unwrap();
    Pki {
        keystore: KeyStore {
            cert: files.cert,
            key: files.key,
        },
        ca: files.ca.unwrap(),
        _dir: dir,
    }
}

fn server_context(pki: &Pki, ciphers: Option<&str>) -> ServerContext {
    ServerContext::new(&ServerContextOptions {
        keystore: Some(pki.keystore.clone()),
        ciphers: ciphers.map(str::to_string),
        ..Default::default()
    })
    .unwrap()
}

fn client_context(trust: TrustPolicy) -> ClientContext {
    ClientContext::new(&ClientContextOptions {
        trust,
        ..Default::default()
    })
    .unwrap()
}

#[derive(Default)]
struct Side {
    handshakes: usize,
    plaintext: Vec<u8>,
    statuses: Vec<EngineStatus>,
    error: Option<EngineError>,
}

impl Side {
    fn record(&mut self, result: &sslwrap_engine::EngineResult) {
        if result.just_handshaked {
            self.handshakes += 1;
        }
        self.statuses.push(result.status);
        if let Some(error) = &result.error {
            self.error.get_or_insert_with(|| error.clone());
        }
    }

    fn wants_wrap(&self) -> bool {
        self.statuses.last() == Some(&EngineStatus::NeedWrap)
    }
}

struct Pair {
    client: RustlsEngine,
    server: RustlsEngine,
    to_server: Vec<u8>,
    to_client: Vec<u8>,
    client_side: Side,
    server_side: Side,
}

fn flush(engine: &mut RustlsEngine, side: &mut Side, out: &mut Vec<u8>) {
    loop {
        let result = engine.wrap(&[]);
        side.record(&result);
        if let Some(data) = &result.data {
            out.extend_from_slice(data);
        }
        if result.status != EngineStatus::NeedWrap {
            break;
        }
    }
}

fn feed(engine: &mut RustlsEngine, side: &mut Side, input: &mut Vec<u8>) {
    loop {
        let result = engine.unwrap(input);
        input.drain(..result.consumed);
        side.record(&result);
        if let Some(data) = &result.data {
            side.plaintext.extend_from_slice(data);
        }
        match result.status {
            EngineStatus::Ok if result.consumed > 0 && result.remaining > 0 => continue,
            _ => break,
        }
    }
}

impl Pair {
    fn new(client: RustlsEngine, server: RustlsEngine) -> Self {
        Self {
            client,
            server,
            to_server: Vec::new(),
            to_client: Vec::new(),
            client_side: Side::default(),
            server_side: Side::default(),
        }
    }

    fn run(&mut self) {
        for _ in 0..10 {
            flush(&mut self.client, &mut self.client_side, &mut self.to_server);
            feed(&mut self.server, &mut self.server_side, &mut self.to_server);
            flush(&mut self.server, &mut self.server_side, &mut self.to_client);
            feed(&mut self.client, &mut self.client_side, &mut self.to_client);
            if self.to_server.is_empty()
                && self.to_client.is_empty()
                && !self.client_side.wants_wrap()
                && !self.server_side.wants_wrap()
            {
                break;
            }
        }
    }
}

fn connected_pair(pki: &Pki, ciphers: Option<&str>) -> Pair {
    let server = server_context(pki, ciphers).create_engine().unwrap();
    let mut client = client_context(TrustPolicy::TrustStore(pki.ca.clone()))
        .create_engine("localhost")
        .unwrap();
    client.begin_handshake().unwrap();
    let mut pair = Pair::new(client, server);
    pair.run();
    pair
}

#[test]
fn handshake_completes_once_per_side() {
    let pki = pki();
    let mut pair = connected_pair(&pki, None);

    assert_eq!(pair.client_side.handshakes, 1);
    assert_eq!(pair.server_side.handshakes, 1);
    assert!(pair.client.is_handshake_complete());
    assert!(pair.server.is_handshake_complete());
    assert!(pair.client_side.error.is_none());
    assert!(pair.server_side.error.is_none());

    // Further traffic never reports the handshake again.
    pair.run();
    assert_eq!(pair.client_side.handshakes, 1);
    assert_eq!(pair.server_side.handshakes, 1);
}

#[test]
fn run_settles_with_nothing_left_to_wrap() {
    let pki = pki();
    let mut pair = connected_pair(&pki, None);

    assert!(pair.to_server.is_empty());
    assert!(pair.to_client.is_empty());
    assert!(!pair.client_side.wants_wrap());
    assert!(!pair.server_side.wants_wrap());

    // A settled pair has no handshake bytes left in either engine.
    for engine in [&mut pair.client, &mut pair.server] {
        let result = engine.wrap(&[]);
        assert_ne!(result.status, EngineStatus::NeedWrap);
        assert!(result.data.is_none());
    }
}

#[test]
fn application_data_round_trip() {
    let pki = pki();
    let mut pair = connected_pair(&pki, None);

    let result = pair.client.wrap(b"ping");
    assert_eq!(result.consumed, 4);
    assert_eq!(result.status, EngineStatus::Ok);
    pair.to_server.extend_from_slice(&result.data.unwrap());

    let result = pair.server.wrap(b"pong");
    pair.to_client.extend_from_slice(&result.data.unwrap());

    pair.run();
    assert_eq!(pair.server_side.plaintext, b"ping");
    assert_eq!(pair.client_side.plaintext, b"pong");
}

#[test]
fn several_records_in_one_buffer() {
    let pki = pki();
    let mut pair = connected_pair(&pki, None);

    for chunk in [&b"one "[..], b"two ", b"three"] {
        let result = pair.client.wrap(chunk);
        pair.to_server.extend_from_slice(&result.data.unwrap());
    }

    let result = pair.server.unwrap(&pair.to_server);
    assert_eq!(result.status, EngineStatus::Ok);
    assert_eq!(result.consumed, pair.to_server.len());
    assert_eq!(result.remaining, 0);
    assert_eq!(result.data.unwrap().as_ref(), b"one two three");
}

#[test]
fn unwrap_without_input_underflows() {
    let pki = pki();
    let mut pair = connected_pair(&pki, None);

    let result = pair.server.unwrap(&[]);
    assert_eq!(result.status, EngineStatus::Underflow);
    assert_eq!(result.consumed, 0);
    assert!(result.data.is_none());
}

#[test]
fn close_notify_reports_closed() {
    let pki = pki();
    let mut pair = connected_pair(&pki, None);

    pair.client.close_outbound();
    assert!(!pair.client.is_outbound_done());
    let result = pair.client.wrap(&[]);
    assert_eq!(result.status, EngineStatus::Closed);
    assert!(pair.client.is_outbound_done());
    pair.to_server.extend_from_slice(&result.data.unwrap());

    let result = pair.server.unwrap(&pair.to_server);
    assert_eq!(result.status, EngineStatus::Closed);
    assert!(pair.server.is_inbound_done());
    assert!(!pair.server.is_outbound_done());

    // The server side can still send after the peer closed.
    let result = pair.server.wrap(b"late reply");
    assert_eq!(result.status, EngineStatus::Ok);
    assert!(result.data.is_some());
}

#[test]
fn close_inbound_marks_inbound_done() {
    let pki = pki();
    let mut pair = connected_pair(&pki, None);

    pair.server.close_inbound();
    assert!(pair.server.is_inbound_done());
    let result = pair.server.unwrap(&[]);
    assert_eq!(result.status, EngineStatus::Closed);
}

#[test]
fn corrupt_record_queues_alert_then_errors() {
    let pki = pki();
    let mut pair = connected_pair(&pki, None);

    // Application data record with a garbage body.
    let garbage = [0x17, 0x03, 0x03, 0x00, 0x20, 0xAA, 0xBB, 0xCC, 0xDD, 0xEE]
        .iter()
        .copied()
        .chain(std::iter::repeat_n(0x42, 27))
        .collect::<Vec<u8>>();

    let result = pair.server.unwrap(&garbage);
    assert_eq!(result.status, EngineStatus::NeedWrap);
    assert!(result.error.is_none());

    let result = pair.server.wrap(&[]);
    assert_eq!(result.status, EngineStatus::Error);
    assert!(result.data.is_some(), "alert should be flushed");
    assert!(matches!(result.error, Some(EngineError::Tls(_))));

    let result = pair.server.unwrap(&[]);
    assert_eq!(result.status, EngineStatus::Error);
}

#[test]
fn untrusted_certificate_fails_handshake() {
    let pki = pki();
    let server = server_context(&pki, None).create_engine().unwrap();
    let client = client_context(TrustPolicy::Default)
        .create_engine("localhost")
        .unwrap();
    let mut pair = Pair::new(client, server);
    pair.run();

    assert!(matches!(pair.client_side.error, Some(EngineError::Tls(_))));
    assert!(pair.client_side.statuses.contains(&EngineStatus::Error));
    assert_eq!(pair.client_side.handshakes, 0);
}

#[test]
fn trust_everybody_accepts_self_signed() {
    let dir = tempfile::tempdir().unwrap();
    let issued = sslwrap_cert::issue(&["localhost".to_string()], &[], 30, false).unwrap();
    let files = issued.write(dir.path(), "cert", "key", "ca").unwrap();
    let server = ServerContext::new(&ServerContextOptions {
        keystore: Some(KeyStore {
            cert: files.cert,
            key: files.key,
        }),
        ..Default::default()
    })
    .unwrap()
    .create_engine()
    .unwrap();
    let client = client_context(TrustPolicy::TrustEverybody)
        .create_engine("localhost")
        .unwrap();

    let mut pair = Pair::new(client, server);
    pair.run();
    assert_eq!(pair.client_side.handshakes, 1);
    assert_eq!(pair.server_side.handshakes, 1);
}

#[test]
fn negotiated_cipher_follows_restriction() {
    let pki = pki();
    let pair = connected_pair(&pki, Some("TLS13_AES_256_GCM_SHA384"));

    let cipher = pair.client.cipher().unwrap();
    assert_eq!(cipher.name, "TLS13_AES_256_GCM_SHA384");
    assert_eq!(cipher.version, "TLSv1_3");
    assert_eq!(pair.server.cipher(), Some(cipher));
}

#[test]
fn server_engine_rejects_begin_handshake() {
    let pki = pki();
    let mut server = server_context(&pki, None).create_engine().unwrap();
    assert_eq!(server.mode(), Mode::Server);
    assert!(matches!(
        server.begin_handshake(),
        Err(EngineError::NotClientMode)
    ));
    assert!(server.take_task().is_none());
}

#[test]
fn engine_validates_cipher_lists() {
    let pki = pki();
    let server = server_context(&pki, None).create_engine().unwrap();
    assert!(server.validate_ciphers("TLS13_AES_128_GCM_SHA256"));
    assert!(server.validate_ciphers("TLS13_AES_128_GCM_SHA256, TLS13_AES_256_GCM_SHA384"));
    assert!(!server.validate_ciphers("TLS13_AES_128_GCM_SHA256:NOPE"));
    assert!(!server.validate_ciphers(""));
}

#[test]
fn invalid_cipher_list_fails_setup() {
    let pki = pki();
    let err = ServerContext::new(&ServerContextOptions {
        keystore: Some(pki.keystore.clone()),
        ciphers: Some("TLS13_AES_128_GCM_SHA256:DES-CBC3-SHA".into()),
        ..Default::default()
    })
    .err()
    .unwrap();
    match err {
        SetupError::InvalidCiphers(names) => assert_eq!(names, "DES-CBC3-SHA"),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn missing_key_file_fails_setup() {
    let pki = pki();
    let err = ServerContext::new(&ServerContextOptions {
        keystore: Some(KeyStore {
            cert: pki.keystore.cert.clone(),
            key: pki.keystore.cert.with_file_name("missing.pem"),
        }),
        ..Default::default()
    })
    .err()
    .unwrap();
    assert!(matches!(err, SetupError::Io(_)));
}
