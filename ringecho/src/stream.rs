//! The byte stream interface the session is written against.
use smoltcp::socket::tcp;
use smoltcp::wire::IpEndpoint;

/// A failed read or write, as opposed to one that would block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SocketError {
    /// Reading from a socket that has no receiving side.
    #[error("socket can not be read from in its current state")]
    Read,
    /// Writing to a socket that has no sending side.
    #[error("socket can not be written to in its current state")]
    Write,
    /// The connection dropped without an orderly shutdown.
    #[error("connection reset")]
    Reset,
}

/// A non-blocking connected byte stream.
///
/// Reads and writes that would block report zero bytes. An error is always fatal for the
/// connection.
pub trait Stream {
    /// Read into `buf`. Zero when nothing is available, including after the peer's FIN.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, SocketError>;

    /// Write from `buf`. Zero when there is no room.
    fn write(&mut self, buf: &[u8]) -> Result<usize, SocketError>;

    /// Close the sending side.
    fn shutdown_write(&mut self);

    /// Send segments without waiting to coalesce small writes.
    fn set_nodelay(&mut self, nodelay: bool);

    /// The address of the peer.
    fn peer(&self) -> Option<IpEndpoint>;

    /// Whether received data is still waiting to be read.
    fn has_unread(&self) -> bool;
}

impl Stream for tcp::Socket<'_> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, SocketError> {
        match self.recv_slice(buf) {
            Ok(read) => Ok(read),
            Err(tcp::RecvError::Finished) => Ok(0),
            Err(_) => Err(SocketError::Read),
        }
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, SocketError> {
        self.send_slice(buf).map_err(|_| SocketError::Write)
    }

    fn shutdown_write(&mut self) {
        self.close()
    }

    fn set_nodelay(&mut self, nodelay: bool) {
        self.set_nagle_enabled(!nodelay)
    }

    fn peer(&self) -> Option<IpEndpoint> {
        self.remote_endpoint()
    }

    fn has_unread(&self) -> bool {
        self.can_recv()
    }
}
