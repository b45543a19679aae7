//! The loop driver.
//!
//! One [`EchoServer`] owns everything: the packet device, the stack's interface and socket set,
//! the session and the shutdown timer. Each [`tick`] moves frames between the rings and the stack,
//! dispatches the resulting readiness events to the session and checks the timer.
//!
//! [`tick`]: EchoServer::tick
use ringdev::{RingDevice, RingPort};
use smoltcp::iface::{Config, Interface, SocketHandle, SocketSet};
use smoltcp::socket::tcp;
use smoltcp::time::{Duration, Instant};
use smoltcp::wire::{HardwareAddress, IpAddress, IpCidr, Ipv4Address};
use tracing::{error, info, trace, warn};

use crate::event::{Observation, Watcher};
use crate::session::{Session, Step};
use crate::timer::{DeferredShutdown, ExitStatus};
use crate::Error;

/// Received frames ingested per tick at most.
pub const POLL_BUDGET: usize = 64;

/// Time between the orderly close of the connection and the exit.
pub const GRACE_PERIOD: Duration = Duration::from_millis(2_000);

/// Size of each of the socket's receive and transmit buffers.
pub const SOCKET_BUFFER: usize = 8192;

/// The service address is on a /24 network.
pub const PREFIX_LEN: u8 = 24;

/// A single-connection echo service on a packet device.
pub struct EchoServer<P: RingPort> {
    device: RingDevice<P>,
    iface: Interface,
    sockets: SocketSet<'static>,
    handle: SocketHandle,
    /// Handed to the shutdown timer once the connection has closed.
    session: Option<Session>,
    watcher: Watcher,
    shutdown: DeferredShutdown<Session>,
}

impl<P: RingPort> EchoServer<P> {
    /// Register the device with a fresh interface and listen on `port`.
    pub fn new(
        mut device: RingDevice<P>,
        address: Ipv4Address,
        port: u16,
        now: Instant,
    ) -> Result<Self, Error> {
        let config = Config::new(HardwareAddress::Ethernet(device.hardware_addr()));
        let mut iface = Interface::new(config, &mut device, now);

        let mut assigned = false;
        iface.update_ip_addrs(|addrs| {
            assigned = addrs.push(IpCidr::new(IpAddress::Ipv4(address), PREFIX_LEN)).is_ok();
        });
        if !assigned {
            return Err(Error::SocketSetup(format!("cannot assign address {}", address)));
        }

        let mut socket = tcp::Socket::new(
            tcp::SocketBuffer::new(vec![0; SOCKET_BUFFER]),
            tcp::SocketBuffer::new(vec![0; SOCKET_BUFFER]),
        );
        socket
            .listen(port)
            .map_err(|err| Error::SocketSetup(format!("cannot listen on port {}: {:?}", port, err)))?;

        let mut sockets = SocketSet::new(vec![]);
        let handle = sockets.add(socket);

        info!(device = device.name(), %address, port, "listening");

        Ok(EchoServer {
            device,
            iface,
            sockets,
            handle,
            session: Some(Session::new()),
            watcher: Watcher::new(),
            shutdown: DeferredShutdown::new(),
        })
    }

    /// The packet device.
    pub fn device(&self) -> &RingDevice<P> {
        &self.device
    }

    /// The session, until the connection has closed.
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// When the service exits, once the connection has closed.
    pub fn shutdown_deadline(&self) -> Option<Instant> {
        self.shutdown.deadline()
    }

    /// The state of the connection socket.
    pub fn socket_state(&self) -> tcp::State {
        self.sockets.get::<tcp::Socket>(self.handle).state()
    }

    /// Run one iteration of the loop.
    ///
    /// Returns the exit status once the service is done.
    pub fn tick(&mut self, now: Instant) -> Result<Option<ExitStatus>, Error> {
        self.device.poll(POLL_BUDGET);
        self.iface.poll(now, &mut self.device, &mut self.sockets);
        if let Err(err) = self.device.flush() {
            warn!(%err, "cannot flush transmit ring");
        }

        let socket = self.sockets.get_mut::<tcp::Socket>(self.handle);
        let ready = self.watcher.observe(Observation::of(socket));

        // Once the connection closed in order the session belongs to the shutdown timer. Nothing
        // the socket reports afterwards can end the service before the grace period.
        for event in ready {
            let step = match self.session.as_mut() {
                Some(session) => session.handle(event, &mut *socket),
                None => {
                    trace!(?event, "connection closed, event ignored");
                    continue;
                },
            };

            match step {
                Step::Continue => (),
                Step::ScheduleExit => {
                    let session = self.session.take();
                    if self.shutdown.schedule(now, GRACE_PERIOD, session) {
                        info!(grace = %GRACE_PERIOD, "connection done, exiting after grace period");
                    }
                },
                Step::Fatal(cause) => {
                    error!(%cause, "connection failed");
                    return Err(Error::SocketIo(cause));
                },
            }
        }

        Ok(self.shutdown.poll(now))
    }

    /// Tick on the wall clock until the service is done.
    pub fn run(&mut self) -> Result<ExitStatus, Error> {
        loop {
            if let Some(status) = self.tick(Instant::now())? {
                return Ok(status);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use ringdev::loopback::MemoryPort;
    use smoltcp::wire::EthernetAddress;

    use super::*;

    fn device() -> RingDevice<MemoryPort> {
        let (ours, _) = MemoryPort::pair(8, 1514);
        RingDevice::with_port(ours, "mem0", "eth_if", EthernetAddress([2, 0, 0, 0, 0, 1]))
    }

    #[test]
    fn port_zero_is_rejected() {
        let result = EchoServer::new(device(), Ipv4Address::new(10, 0, 0, 1), 0, Instant::ZERO);
        assert!(matches!(result, Err(Error::SocketSetup(_))));
    }

    #[test]
    fn idle_ticks_keep_listening() {
        let mut server = EchoServer::new(device(), Ipv4Address::new(10, 0, 0, 1), 7, Instant::ZERO)
            .expect("server");

        for ms in 0..10 {
            assert_eq!(server.tick(Instant::from_millis(ms)).expect("tick"), None);
        }

        assert_eq!(server.socket_state(), tcp::State::Listen);
        assert!(server.session().is_some());
        assert_eq!(server.shutdown_deadline(), None);
    }
}
