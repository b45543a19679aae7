//! Echo the first TCP connection on an interface.
//!
//! Attaches to the receive and transmit rings of the interface and answers as its own host. Call
//! example:
//!
//! * `ringecho eth0 02:00:00:00:00:01 10.0.0.1 7`
//!
//! Logging is configured through `RUST_LOG` and defaults to `info`.
use std::process;

use ringecho::config::{self, Config};
use ringecho::timer::ExitStatus;
use ringecho::Error;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// The name of the device within the stack.
const DEVICE_NAME: &str = "eth_if";

fn main() {
    let config = match Config::from_args() {
        Ok(config) => config,
        Err(err) => {
            println!("{}", err.message);
            process::exit(if config::is_informational(&err) { 0 } else { 1 });
        },
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        interface = %config.interface,
        hwaddr = %config.hwaddr,
        address = %config.address,
        port = config.port,
        "starting echo service"
    );

    match run(&config) {
        Ok(ExitStatus::Graceful) => info!("done"),
        Err(err) => {
            error!(%err, "echo service failed");
            process::exit(err.exit_code());
        },
    }
}

#[cfg(target_os = "linux")]
fn run(config: &Config) -> Result<ExitStatus, Error> {
    use ringecho::server::EchoServer;
    use smoltcp::time::Instant;

    let device = ringdev::RingDevice::create(&config.interface, DEVICE_NAME, config.hwaddr)?;
    let mut server = EchoServer::new(device, config.address, config.port, Instant::now())?;
    server.run()
}

#[cfg(not(target_os = "linux"))]
fn run(_: &Config) -> Result<ExitStatus, Error> {
    Err(Error::Configuration(format!(
        "ring-mapped packet I/O for `{}` is only available on Linux",
        DEVICE_NAME,
    )))
}
