use std::collections::HashMap;
use std::sync::OnceLock;
use thiserror::Error;

/// First code of the channelnet error range.
pub const ERROR_CODE_BASE: i32 = 1024;

#[derive(Debug, Error, PartialEq, Eq, Clone, Copy, Hash)]
pub enum NetError {
    // Channel Errors
    #[error("Channel cannot accept input")]
    ChannelCantAcceptInput,
    #[error("Channel unknown message type")]
    ChannelUnknownMessageType,
    #[error("A channel handler attempted to propagate a read larger than the upstream window")]
    ChannelReadWouldExceedWindow,
    #[error("An attempt was made to assign an io handle to an event loop, but the handle was already assigned")]
    EventLoopAlreadyAssigned,
    #[error("System call failure")]
    SysCallFailure,

    // TLS Errors
    #[error("TLS (SSL) negotiation failed")]
    TlsNegotiationFailure,
    #[error("Attempt to read/write, but TLS (SSL) hasn't been negotiated")]
    TlsNotNegotiated,
    #[error("Failed to write to TLS handler")]
    TlsWriteFailure,
    #[error("Fatal TLS Alert was received")]
    TlsAlertReceived,
    #[error("Failed to create tls context")]
    TlsCtxError,
    #[error("A TLS version was specified that is currently not supported")]
    TlsVersionUnsupported,
    #[error("An ALPN message was expected but not received")]
    MissingAlpnMessage,
    #[error("An ALPN message was received but a handler was not created by the user")]
    UnhandledAlpnProtocolMessage,

    // File Errors
    #[error("Invalid file path")]
    FileInvalidPath,
    #[error("A file was read and the input did not match the expected value")]
    FileValidationFailure,

    // Event Loop Errors
    #[error("Attempt to perform operation that must be run inside the event loop thread")]
    EventLoopThreadOnly,
    #[error("Already subscribed to receive events")]
    AlreadySubscribed,
    #[error("Not subscribed to receive events")]
    NotSubscribed,
    #[error("Operation cancelled before it could complete")]
    OperationCancelled,
    #[error("Read operation would block, try again later")]
    ReadWouldBlock,
    #[error("Attempt to read or write to io handle that has already been closed")]
    BrokenPipe,
    #[error("The maximum number of fds has been exceeded")]
    MaxFdsExceeded,

    // Socket Errors
    #[error("Socket, unsupported address family")]
    SocketUnsupportedAddressFamily,
    #[error("User does not have permission to perform the requested action")]
    NoPermission,
    #[error("Invalid socket operation for socket type")]
    SocketInvalidOperationForType,
    #[error("Socket connection refused")]
    SocketConnectionRefused,
    #[error("Socket operation timed out")]
    SocketTimeout,
    #[error("Socket connect failure, no route to host")]
    SocketNoRouteToHost,
    #[error("Network is down")]
    SocketNetworkDown,
    #[error("Socket is closed")]
    SocketClosed,
    #[error("Socket not connected")]
    SocketNotConnected,
    #[error("Invalid socket options")]
    SocketInvalidOptions,
    #[error("Socket address already in use")]
    SocketAddressInUse,
    #[error("Invalid socket address")]
    SocketInvalidAddress,
    #[error("Illegal operation for socket state")]
    SocketIllegalOperationForState,
    #[error("Incoming connection was aborted")]
    SocketConnectAborted,

    // DNS Errors
    #[error("A query to dns failed to resolve")]
    DnsQueryFailed,
    #[error("Host name was invalid for dns resolution")]
    DnsInvalidName,
    #[error("No address was found for the supplied host name")]
    DnsNoAddressForHost,
    #[error("The entries for host name were removed from the local dns cache")]
    DnsHostRemovedFromCache,

    // Stream Errors
    #[error("The seek position was outside of a stream's bounds")]
    StreamInvalidSeekPosition,
    #[error("Stream does not support seek operations")]
    StreamUnseekable,
    #[error("Stream failed to read from the underlying io source")]
    StreamReadFailed,
    #[error("Operation failed because the file handle was invalid")]
    InvalidFileHandle,

    // Lifecycle errors specific to this crate
    #[error("Event loop has been shut down")]
    EventLoopShutdown,
    #[error("Channel slot is not attached to the channel")]
    InvalidChannelSlot,

    #[error("Unknown error ({0})")]
    Unknown(i32),
}

/// Every catalogued error, in code order.
pub const ALL_ERRORS: &[NetError] = &[
    NetError::ChannelCantAcceptInput,
    NetError::ChannelUnknownMessageType,
    NetError::ChannelReadWouldExceedWindow,
    NetError::EventLoopAlreadyAssigned,
    NetError::SysCallFailure,
    NetError::TlsNegotiationFailure,
    NetError::TlsNotNegotiated,
    NetError::TlsWriteFailure,
    NetError::TlsAlertReceived,
    NetError::TlsCtxError,
    NetError::TlsVersionUnsupported,
    NetError::MissingAlpnMessage,
    NetError::UnhandledAlpnProtocolMessage,
    NetError::FileInvalidPath,
    NetError::FileValidationFailure,
    NetError::EventLoopThreadOnly,
    NetError::AlreadySubscribed,
    NetError::NotSubscribed,
    NetError::OperationCancelled,
    NetError::ReadWouldBlock,
    NetError::BrokenPipe,
    NetError::MaxFdsExceeded,
    NetError::SocketUnsupportedAddressFamily,
    NetError::NoPermission,
    NetError::SocketInvalidOperationForType,
    NetError::SocketConnectionRefused,
    NetError::SocketTimeout,
    NetError::SocketNoRouteToHost,
    NetError::SocketNetworkDown,
    NetError::SocketClosed,
    NetError::SocketNotConnected,
    NetError::SocketInvalidOptions,
    NetError::SocketAddressInUse,
    NetError::SocketInvalidAddress,
    NetError::SocketIllegalOperationForState,
    NetError::SocketConnectAborted,
    NetError::DnsQueryFailed,
    NetError::DnsInvalidName,
    NetError::DnsNoAddressForHost,
    NetError::DnsHostRemovedFromCache,
    NetError::StreamInvalidSeekPosition,
    NetError::StreamUnseekable,
    NetError::StreamReadFailed,
    NetError::InvalidFileHandle,
    NetError::EventLoopShutdown,
    NetError::InvalidChannelSlot,
];

impl NetError {
    pub fn as_i32(&self) -> i32 {
        match self {
            NetError::ChannelCantAcceptInput => 1024,
            NetError::ChannelUnknownMessageType => 1025,
            NetError::ChannelReadWouldExceedWindow => 1026,
            NetError::EventLoopAlreadyAssigned => 1027,
            NetError::SysCallFailure => 1028,
            NetError::TlsNegotiationFailure => 1029,
            NetError::TlsNotNegotiated => 1030,
            NetError::TlsWriteFailure => 1031,
            NetError::TlsAlertReceived => 1032,
            NetError::TlsCtxError => 1033,
            NetError::TlsVersionUnsupported => 1034,
            NetError::MissingAlpnMessage => 1035,
            NetError::UnhandledAlpnProtocolMessage => 1036,
            NetError::FileInvalidPath => 1037,
            NetError::FileValidationFailure => 1038,
            NetError::EventLoopThreadOnly => 1039,
            NetError::AlreadySubscribed => 1040,
            NetError::NotSubscribed => 1041,
            NetError::OperationCancelled => 1042,
            NetError::ReadWouldBlock => 1043,
            NetError::BrokenPipe => 1044,
            NetError::MaxFdsExceeded => 1045,
            NetError::SocketUnsupportedAddressFamily => 1046,
            NetError::NoPermission => 1047,
            NetError::SocketInvalidOperationForType => 1048,
            NetError::SocketConnectionRefused => 1049,
            NetError::SocketTimeout => 1050,
            NetError::SocketNoRouteToHost => 1051,
            NetError::SocketNetworkDown => 1052,
            NetError::SocketClosed => 1053,
            NetError::SocketNotConnected => 1054,
            NetError::SocketInvalidOptions => 1055,
            NetError::SocketAddressInUse => 1056,
            NetError::SocketInvalidAddress => 1057,
            NetError::SocketIllegalOperationForState => 1058,
            NetError::SocketConnectAborted => 1059,
            NetError::DnsQueryFailed => 1060,
            NetError::DnsInvalidName => 1061,
            NetError::DnsNoAddressForHost => 1062,
            NetError::DnsHostRemovedFromCache => 1063,
            NetError::StreamInvalidSeekPosition => 1064,
            NetError::StreamUnseekable => 1065,
            NetError::StreamReadFailed => 1066,
            NetError::InvalidFileHandle => 1067,
            // Lifecycle errors (custom codes starting at 1100)
            NetError::EventLoopShutdown => 1100,
            NetError::InvalidChannelSlot => 1101,
            NetError::Unknown(code) => *code,
        }
    }

    /// True for errors raised while establishing a socket connection.
    pub fn is_socket_error(&self) -> bool {
        (1046..=1059).contains(&self.as_i32())
    }

    /// True for errors raised by host resolution.
    pub fn is_dns_error(&self) -> bool {
        (1060..=1063).contains(&self.as_i32())
    }
}

impl From<i32> for NetError {
    fn from(code: i32) -> Self {
        ALL_ERRORS
            .iter()
            .copied()
            .find(|e| e.as_i32() == code)
            .unwrap_or(NetError::Unknown(code))
    }
}

static ERROR_STRINGS: OnceLock<HashMap<i32, String>> = OnceLock::new();

/// Registers the error catalog for this process.
///
/// Safe to call any number of times from any thread; only the first call
/// builds the table. Both bootstrap constructors call this.
pub fn load_error_strings() {
    ERROR_STRINGS.get_or_init(|| {
        let table: HashMap<i32, String> = ALL_ERRORS
            .iter()
            .map(|e| (e.as_i32(), e.to_string()))
            .collect();
        tracing::debug!(count = table.len(), "registered channelnet error strings");
        table
    });
}

/// Whether [`load_error_strings`] has run in this process.
pub fn error_strings_loaded() -> bool {
    ERROR_STRINGS.get().is_some()
}

/// Looks up the registered message for an error code.
///
/// Returns `None` for codes outside the catalog or before registration.
pub fn error_str(code: i32) -> Option<&'static str> {
    ERROR_STRINGS
        .get()
        .and_then(|table| table.get(&code))
        .map(String::as_str)
}
