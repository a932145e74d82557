/// Errors surfaced by the scan-head client runtime.
///
/// Receive-path anomalies (truncated datagrams, wrong magic) are counted on
/// the session and never surfaced through this type; only API-level failures
/// and fatal session conditions appear here.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("malformed packet: {0}")]
    BadPacket(String),

    #[error("firmware version incompatible: {0}")]
    VersionIncompatible(String),

    #[error("not connected")]
    NotConnected,

    #[error("already connected")]
    AlreadyConnected,

    #[error("not scanning")]
    NotScanning,

    #[error("already scanning")]
    AlreadyScanning,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{what} out of range: {value} (allowed {min}..={max})")]
    OutOfRange {
        what: &'static str,
        value: i64,
        min: i64,
        max: i64,
    },

    #[error("profile buffer overflowed")]
    BufferOverflow,

    #[error("device timed out: {0}")]
    DeviceTimeout(String),

    #[error("scan head serial {0} not found on the network")]
    NotFound(u32),

    #[error("operation canceled")]
    Canceled,

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl ScanError {
    pub(crate) fn bad_packet(what: impl Into<String>) -> Self {
        ScanError::BadPacket(what.into())
    }

    pub(crate) fn invalid(what: impl Into<String>) -> Self {
        ScanError::InvalidArgument(what.into())
    }

    /// Range check helper used by configuration and packet setters.
    pub(crate) fn check_range(
        what: &'static str,
        value: i64,
        min: i64,
        max: i64,
    ) -> Result<(), ScanError> {
        if value < min || value > max {
            return Err(ScanError::OutOfRange {
                what,
                value,
                min,
                max,
            });
        }
        Ok(())
    }
}
