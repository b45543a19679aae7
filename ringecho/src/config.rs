//! Command line configuration.
use std::ffi::OsString;
use std::net;

use smoltcp::wire::{EthernetAddress, Ipv4Address};
use structopt::StructOpt;

/// Command line of the echo service.
#[derive(Clone, Debug, StructOpt)]
#[structopt(name = "ringecho", about = "Echo the first TCP connection on a ring-mapped interface")]
pub struct Config {
    /// Network interface to attach to.
    pub interface: String,

    /// Hardware address of the service, as six colon separated hex octets.
    #[structopt(parse(try_from_str = parse_mac))]
    pub hwaddr: EthernetAddress,

    /// IPv4 address of the service, on a /24 network.
    #[structopt(parse(try_from_str = parse_ipv4))]
    pub address: Ipv4Address,

    /// TCP port to listen on.
    pub port: u16,
}

impl Config {
    /// Parse the process arguments.
    pub fn from_args() -> Result<Self, structopt::clap::Error> {
        Config::parse(std::env::args_os())
    }

    /// Parse an argument list, starting with the program name.
    pub fn parse<I>(args: I) -> Result<Self, structopt::clap::Error>
    where
        I: IntoIterator,
        I::Item: Into<OsString> + Clone,
    {
        Config::from_iter_safe(args)
    }
}

/// Whether the parse failure is a request for help or version rather than an error.
pub fn is_informational(err: &structopt::clap::Error) -> bool {
    use structopt::clap::ErrorKind;
    matches!(err.kind, ErrorKind::HelpDisplayed | ErrorKind::VersionDisplayed)
}

fn parse_mac(text: &str) -> Result<EthernetAddress, String> {
    let mut octets = [0u8; 6];
    let mut parts = text.split(|c| c == ':' || c == '-');

    for octet in octets.iter_mut() {
        let part = parts
            .next()
            .filter(|part| part.len() == 2)
            .ok_or_else(|| format!("invalid hardware address `{}`", text))?;
        *octet = u8::from_str_radix(part, 16)
            .map_err(|_| format!("invalid hardware address `{}`", text))?;
    }

    if parts.next().is_some() {
        return Err(format!("invalid hardware address `{}`", text));
    }

    Ok(EthernetAddress(octets))
}

fn parse_ipv4(text: &str) -> Result<Ipv4Address, String> {
    let addr: net::Ipv4Addr = text
        .parse()
        .map_err(|err| format!("invalid address `{}`: {}", text, err))?;
    Ok(Ipv4Address::from_bytes(&addr.octets()))
}

#[cfg(test)]
mod tests {
    use structopt::clap::ErrorKind;

    use super::*;

    #[test]
    fn positional_arguments() {
        let config = Config::parse(["ringecho", "eth0", "02:00:00:00:00:01", "10.0.0.1", "7"])
            .expect("valid arguments");
        assert_eq!(config.interface, "eth0");
        assert_eq!(config.hwaddr, EthernetAddress([2, 0, 0, 0, 0, 1]));
        assert_eq!(config.address, Ipv4Address::new(10, 0, 0, 1));
        assert_eq!(config.port, 7);
    }

    #[test]
    fn missing_arguments_fail() {
        let err = Config::parse(["ringecho", "eth0", "02:00:00:00:00:01"]).unwrap_err();
        assert!(!is_informational(&err));
    }

    #[test]
    fn malformed_values_fail() {
        for args in [
            ["ringecho", "eth0", "02:00:00:00:00", "10.0.0.1", "7"],
            ["ringecho", "eth0", "02:00:00:00:00:01:03", "10.0.0.1", "7"],
            ["ringecho", "eth0", "zz:00:00:00:00:01", "10.0.0.1", "7"],
            ["ringecho", "eth0", "02:00:00:00:00:01", "10.0.0", "7"],
            ["ringecho", "eth0", "02:00:00:00:00:01", "10.0.0.1", "70000"],
        ] {
            let err = Config::parse(args).unwrap_err();
            assert_eq!(err.kind, ErrorKind::ValueValidation, "{:?}", args);
        }
    }

    #[test]
    fn help_is_informational() {
        let err = Config::parse(["ringecho", "--help"]).unwrap_err();
        assert!(is_informational(&err));
    }

    #[test]
    fn dashes_in_hardware_address() {
        assert_eq!(parse_mac("0a-0b-0c-0d-0e-0f"), Ok(EthernetAddress([10, 11, 12, 13, 14, 15])));
    }
}
