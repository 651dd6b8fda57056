//! Shared test helpers: a scripted host resolver, a self-signed TLS
//! identity and a polling wait.

#![allow(dead_code)]

use boring::asn1::Asn1Time;
use boring::bn::BigNum;
use boring::ec::{EcGroup, EcKey};
use boring::hash::MessageDigest;
use boring::nid::Nid;
use boring::pkey::PKey;
use boring::x509::{X509NameBuilder, X509};
use channelnet::dns::{HostAddress, HostResolutionConfig, HostResolver, HostResolving, Name};
use channelnet::NetError;
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub const WAIT: Duration = Duration::from_secs(10);

/// Host resolver answering every name with a fixed address list.
pub struct MockHostResolver {
    addresses: Vec<IpAddr>,
    refuse: bool,
    resolve_calls: AtomicUsize,
    failures: Mutex<Vec<HostAddress>>,
}

impl MockHostResolver {
    pub fn new(addresses: Vec<IpAddr>) -> Arc<Self> {
        Arc::new(Self {
            addresses,
            refuse: false,
            resolve_calls: AtomicUsize::new(0),
            failures: Mutex::new(Vec::new()),
        })
    }

    /// A resolver whose `resolve_host` fails synchronously.
    pub fn refusing() -> Arc<Self> {
        Arc::new(Self {
            addresses: Vec::new(),
            refuse: true,
            resolve_calls: AtomicUsize::new(0),
            failures: Mutex::new(Vec::new()),
        })
    }

    pub fn resolve_calls(&self) -> usize {
        self.resolve_calls.load(Ordering::SeqCst)
    }

    pub fn failures(&self) -> Vec<IpAddr> {
        self.failures.lock().unwrap().iter().map(|a| a.address).collect()
    }
}

impl HostResolver for MockHostResolver {
    fn resolve_host(&self, name: &Name, _config: &HostResolutionConfig) -> Result<HostResolving, NetError> {
        self.resolve_calls.fetch_add(1, Ordering::SeqCst);
        if self.refuse {
            return Err(NetError::DnsInvalidName);
        }
        let addresses: Vec<HostAddress> = self
            .addresses
            .iter()
            .map(|ip| HostAddress::new(name.clone(), *ip))
            .collect();
        Ok(Box::pin(async move { Ok(addresses) }))
    }

    fn record_connection_failure(&self, address: &HostAddress) {
        self.failures.lock().unwrap().push(address.clone());
    }
}

/// PEM certificate and PKCS#8 key for `localhost`.
pub struct TestIdentity {
    pub cert_pem: Vec<u8>,
    pub key_pem: Vec<u8>,
}

pub fn self_signed_identity() -> TestIdentity {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
    let key = PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap();

    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_text("CN", "localhost").unwrap();
    let name = name.build();

    let mut builder = X509::builder().unwrap();
    builder.set_version(2).unwrap();
    let serial = BigNum::from_u32(1).unwrap().to_asn1_integer().unwrap();
    builder.set_serial_number(&serial).unwrap();
    builder.set_subject_name(&name).unwrap();
    builder.set_issuer_name(&name).unwrap();
    builder.set_pubkey(&key).unwrap();
    builder.set_not_before(&Asn1Time::days_from_now(0).unwrap()).unwrap();
    builder.set_not_after(&Asn1Time::days_from_now(1).unwrap()).unwrap();
    builder.sign(&key, MessageDigest::sha256()).unwrap();
    let cert = builder.build();

    TestIdentity {
        cert_pem: cert.to_pem().unwrap(),
        key_pem: key.private_key_to_pem_pkcs8().unwrap(),
    }
}

/// Polls `condition` until it holds or `WAIT` elapses.
pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}

/// A port on 127.0.0.1 with nothing listening.
pub fn closed_port() -> u16 {
    let spare = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    spare.local_addr().unwrap().port()
}
