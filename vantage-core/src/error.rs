use thiserror::Error;

/// Failures from the packet decoder.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("frame shorter than the 6-byte metadata prefix")]
    InvalidFrame,
    #[error("no IPv4 header found")]
    NotIp,
    #[error("source or destination address is empty")]
    EmptyAddress,
    #[error("unsupported HTTP start line: {0}")]
    UnsupportedHttp(String),
    #[error("payload is not valid UTF-8")]
    InvalidUtf8,
}

/// Failures from the kernel tracer adapter.
#[derive(Error, Debug)]
pub enum TracerError {
    #[error("failed to load kernel program: {0}")]
    LoadFailed(String),
    #[error("failed to attach to any matching interface")]
    NoInterfaceAttached,
    #[error("failed to replace qdisc on {iface}: {source}")]
    QdiscReplace {
        iface: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("kernel ring read failed: {0}")]
    RingRead(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Failures surfaced by the identity cache family.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("no object indexed for ip {0}")]
    NotFound(String),
    #[error("control-plane watch stream ended")]
    WatchClosed,
    #[error("not yet connected to control plane at {0}")]
    NotConnected(String),
}
