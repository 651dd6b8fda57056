use crate::base::neterror::{error_str, load_error_strings, NetError, ALL_ERRORS};

#[test]
fn test_net_error_roundtrip() {
    let original = NetError::SocketConnectionRefused;
    let code = original.as_i32();
    assert_eq!(code, 1049);
    assert_eq!(NetError::from(code), NetError::SocketConnectionRefused);

    // Lifecycle range
    let custom = NetError::EventLoopShutdown;
    assert_eq!(custom.as_i32(), 1100);
    assert_eq!(NetError::from(1100), NetError::EventLoopShutdown);
}

#[test]
fn test_unknown_error() {
    let err = NetError::from(-9999);
    assert!(matches!(err, NetError::Unknown(-9999)));
    assert_eq!(err.as_i32(), -9999);
}

#[test]
fn test_codes_are_unique() {
    let mut codes: Vec<i32> = ALL_ERRORS.iter().map(NetError::as_i32).collect();
    codes.sort_unstable();
    codes.dedup();
    assert_eq!(codes.len(), ALL_ERRORS.len());
    assert!(codes.iter().all(|c| *c >= 1024));
}

#[test]
fn test_error_strings_registered_once() {
    load_error_strings();
    load_error_strings();

    assert_eq!(
        error_str(NetError::TlsNegotiationFailure.as_i32()),
        Some("TLS (SSL) negotiation failed")
    );
    assert_eq!(
        error_str(NetError::SocketInvalidOptions.as_i32()),
        Some("Invalid socket options")
    );
    assert_eq!(error_str(0), None);
}

#[test]
fn test_error_families() {
    assert!(NetError::SocketTimeout.is_socket_error());
    assert!(!NetError::SocketTimeout.is_dns_error());
    assert!(NetError::DnsNoAddressForHost.is_dns_error());
    assert!(!NetError::TlsNegotiationFailure.is_socket_error());
}
