use ringdev::DeviceError;

use crate::stream::SocketError;

/// Why the service could not run to a graceful end.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The command line was not usable.
    #[error("invalid configuration: {0}")]
    Configuration(String),
    /// The packet device could not be opened.
    #[error("cannot open packet device: {0}")]
    DeviceOpen(#[from] DeviceError),
    /// The listening socket could not be set up.
    #[error("cannot set up listening socket: {0}")]
    SocketSetup(String),
    /// The connection failed.
    #[error("connection failed: {0}")]
    SocketIo(#[from] SocketError),
}

impl Error {
    /// The process exit status to report this error with.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Configuration(_)
            | Error::DeviceOpen(_)
            | Error::SocketSetup(_)
            | Error::SocketIo(_) => 1,
        }
    }
}
