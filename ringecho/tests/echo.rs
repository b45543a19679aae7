//! Runs the echo service against a second stack over an in-memory wire.
use ringdev::loopback::MemoryPort;
use ringdev::RingDevice;
use ringecho::server::{EchoServer, GRACE_PERIOD};
use ringecho::stream::SocketError;
use ringecho::timer::ExitStatus;
use ringecho::BSIZE;
use smoltcp::iface::{Config, Interface, SocketHandle, SocketSet};
use smoltcp::socket::tcp;
use smoltcp::time::{Duration, Instant};
use smoltcp::wire::{EthernetAddress, HardwareAddress, IpAddress, IpCidr, Ipv4Address};

const SERVER_MAC: EthernetAddress = EthernetAddress([0x02, 0, 0, 0, 0, 0x01]);
const CLIENT_MAC: EthernetAddress = EthernetAddress([0x02, 0, 0, 0, 0, 0x02]);
const SERVER_IP: Ipv4Address = Ipv4Address::new(10, 0, 0, 1);
const CLIENT_IP: Ipv4Address = Ipv4Address::new(10, 0, 0, 2);
const PORT: u16 = 7;

/// Give up on a test after this much simulated time.
const DEADLINE_MS: i64 = 20_000;

struct Client {
    device: RingDevice<MemoryPort>,
    iface: Interface,
    sockets: SocketSet<'static>,
    handle: SocketHandle,
}

impl Client {
    fn new(port: MemoryPort, now: Instant) -> Self {
        let mut device = RingDevice::with_port(port, "mem1", "eth_if", CLIENT_MAC);
        let config = Config::new(HardwareAddress::Ethernet(CLIENT_MAC));
        let mut iface = Interface::new(config, &mut device, now);
        iface.update_ip_addrs(|addrs| {
            addrs.push(IpCidr::new(IpAddress::Ipv4(CLIENT_IP), 24)).expect("address slot");
        });

        let mut socket = tcp::Socket::new(
            tcp::SocketBuffer::new(vec![0; 8192]),
            tcp::SocketBuffer::new(vec![0; 8192]),
        );
        socket
            .connect(iface.context(), (IpAddress::Ipv4(SERVER_IP), PORT), 49152)
            .expect("connect");

        let mut sockets = SocketSet::new(vec![]);
        let handle = sockets.add(socket);

        Client {
            device,
            iface,
            sockets,
            handle,
        }
    }

    fn tick(&mut self, now: Instant) {
        self.device.poll(64);
        self.iface.poll(now, &mut self.device, &mut self.sockets);
        self.device.flush().expect("flush");
    }

    fn socket(&mut self) -> &mut tcp::Socket<'static> {
        self.sockets.get_mut(self.handle)
    }
}

fn setup() -> (EchoServer<MemoryPort>, Client) {
    let (server_port, client_port) = MemoryPort::pair(64, 1514);
    let device = RingDevice::with_port(server_port, "mem0", "eth_if", SERVER_MAC);
    let server = EchoServer::new(device, SERVER_IP, PORT, Instant::ZERO).expect("server");
    let client = Client::new(client_port, Instant::ZERO);
    (server, client)
}

/// Send `input`, collect the echo and close, then run until the service exits.
///
/// With `reset_late` the client aborts its side once the service has scheduled its exit.
/// Returns the echoed bytes, when the exit was scheduled and when it happened.
fn echo(input: &[u8], reset_late: bool) -> (Vec<u8>, Instant, Instant) {
    let (mut server, mut client) = setup();
    let mut sent = 0;
    let mut echoed = Vec::new();
    let mut closed = false;
    let mut aborted = false;
    let mut scheduled = None;

    for ms in 0..DEADLINE_MS {
        let now = Instant::from_millis(ms);

        let status = server.tick(now).expect("server tick");
        if scheduled.is_none() && server.shutdown_deadline().is_some() {
            scheduled = Some(now);
        }
        if let Some(status) = status {
            assert_eq!(status, ExitStatus::Graceful);
            let scheduled = scheduled.expect("exit without schedule");
            return (echoed, scheduled, now);
        }

        client.tick(now);
        let socket = client.socket();

        if socket.can_send() && sent < input.len() {
            sent += socket.send_slice(&input[sent..]).expect("send");
        }

        if socket.can_recv() {
            let mut chunk = [0; 1024];
            let n = socket.recv_slice(&mut chunk).expect("recv");
            echoed.extend_from_slice(&chunk[..n]);
        }

        if !closed && echoed.len() == input.len() {
            socket.close();
            closed = true;
        }

        if reset_late && !aborted && scheduled.is_some() {
            socket.abort();
            client.tick(now);
            aborted = true;
        }
    }

    panic!("service did not exit, echoed {} of {} bytes", echoed.len(), input.len());
}

#[test]
fn echoes_abc_and_exits_after_grace() {
    let (echoed, scheduled, exited) = echo(b"abc", false);
    assert_eq!(echoed, b"abc");
    assert!(exited >= scheduled + GRACE_PERIOD);
    assert!(exited - scheduled < GRACE_PERIOD + Duration::from_millis(2));
}

#[test]
fn echoes_more_than_the_transfer_buffer() {
    let input: Vec<u8> = (0..BSIZE + 10).map(|i| (i * 7 % 256) as u8).collect();
    let (echoed, scheduled, exited) = echo(&input, false);
    assert_eq!(echoed.len(), BSIZE + 10);
    assert_eq!(echoed, input);
    assert!(exited >= scheduled + GRACE_PERIOD);
}

#[test]
fn reset_after_close_keeps_grace_period() {
    let (echoed, scheduled, exited) = echo(b"late reset", true);
    assert_eq!(echoed, b"late reset");
    assert!(exited >= scheduled + GRACE_PERIOD);
}

#[test]
fn reset_right_after_handshake_fails_the_service() {
    let (mut server, mut client) = setup();
    let mut aborted = false;

    for ms in 0..3_000 {
        let now = Instant::from_millis(ms);

        match server.tick(now) {
            Ok(None) => (),
            Ok(Some(status)) => panic!("exited with {:?} after a reset", status),
            Err(err) => {
                assert!(aborted, "failed before the reset: {}", err);
                assert!(matches!(err, ringecho::Error::SocketIo(SocketError::Reset)), "{}", err);
                assert_eq!(err.exit_code(), 1);
                return;
            },
        }

        client.tick(now);
        if !aborted && client.socket().state() == tcp::State::Established {
            // The reset leaves right behind the final handshake segment.
            client.socket().abort();
            client.tick(now);
            aborted = true;
        }
    }

    panic!("reset connection did not fail the service");
}

#[test]
fn connection_is_established_with_nodelay() {
    let (mut server, mut client) = setup();

    for ms in 0..1_000 {
        let now = Instant::from_millis(ms);
        server.tick(now).expect("server tick");
        client.tick(now);
        if server.socket_state() == tcp::State::Established {
            break;
        }
    }

    assert_eq!(server.socket_state(), tcp::State::Established);
    let session = server.session().expect("session before close");
    assert_eq!(
        session.peer().map(|peer| peer.addr),
        Some(IpAddress::Ipv4(CLIENT_IP))
    );
    assert!(server.device().stats().rx.frames > 0);
}

#[test]
fn port_zero_fails_setup() {
    let (server_port, _) = MemoryPort::pair(8, 1514);
    let device = RingDevice::with_port(server_port, "mem0", "eth_if", SERVER_MAC);
    match EchoServer::new(device, SERVER_IP, 0, Instant::ZERO) {
        Err(ringecho::Error::SocketSetup(_)) => (),
        Err(other) => panic!("unexpected error: {}", other),
        Ok(_) => panic!("listening on port zero"),
    }
}
