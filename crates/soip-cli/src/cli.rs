//! Flag parsing for the `soip` executable.
//!
//! The grammar is a small set of top-level Acceptor flags followed by zero
//! or more repeatable `-link ... -link ...` groups, each describing one
//! outgoing Dialer connection. Flags are shared between the two scopes
//! (`-addr`/`-port` mean "Acceptor bind address" at the top level and
//! "remote host/port" inside a `-link` group), and a further set of flags
//! take an `l`/`r`/neither prefix selecting which side of the link the
//! value applies to. That shape doesn't map cleanly onto a declarative
//! flag-parsing crate, so this walks `std::env::args()` by hand, in the
//! spirit of `original_source/SerialOverEthernetTCP/.../soecli.cpp`'s own
//! hand-rolled loop.

use soip_link::DialSpec;
use soip_serial::{FlowControl, Parity, SerialConfig, StopBits};
use thiserror::Error;

const DEFAULT_ACCEPTOR_PORT: u16 = 26;
const DEFAULT_LINK_PORT: u16 = 26;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("usage: soip [-addr host] [-port port] [-link <link options>]...")]
    Usage,

    #[error("flag `{0}` requires an argument")]
    MissingArg(String),

    #[error("flag `{flag}` does not accept `{value}`")]
    BadValue { flag: String, value: String },
}

pub type Result<T> = std::result::Result<T, CliError>;

/// Parsed process configuration: the Acceptor's bind address/port (the
/// address is `None` when `-addr` was never given, which disables the
/// Acceptor) and zero or more outgoing link specifications, each ready to
/// hand to [`soip_link::Dialer::dial`].
#[derive(Debug, Default)]
pub struct Config {
    pub acceptor_addr: Option<String>,
    pub acceptor_port: u16,
    pub links: Vec<DialSpec>,
}

/// A `-link` group under construction. Finalized into a [`DialSpec`] once
/// the next `-link` or the end of the argument list is reached.
struct PartialLink {
    host: Option<String>,
    port: Option<u16>,
    remote_serial: Option<String>,
    local_serial: Option<String>,
    remote_config: SerialConfig,
    local_config: SerialConfig,
}

impl PartialLink {
    fn new() -> Self {
        Self {
            host: None,
            port: None,
            remote_serial: None,
            local_serial: None,
            remote_config: SerialConfig::default(),
            local_config: SerialConfig::default(),
        }
    }
}

/// Parses `args` (already stripped of `argv[0]`). An empty slice is a usage
/// error, matching the behavior of printing usage and exiting 1 on a bare
/// invocation.
pub fn parse(args: &[String]) -> Result<Config> {
    if args.is_empty() {
        return Err(CliError::Usage);
    }

    let mut acceptor_addr = None;
    let mut acceptor_port = DEFAULT_ACCEPTOR_PORT;
    let mut links = Vec::new();
    let mut current: Option<PartialLink> = None;

    let mut i = 0;
    while i < args.len() {
        let flag = args[i].as_str();

        if flag == "-link" {
            if let Some(partial) = current.take() {
                finish_link(partial, &mut links);
            }
            current = Some(PartialLink::new());
            i += 1;
            continue;
        }

        match &mut current {
            None => match flag {
                "-addr" => acceptor_addr = Some(take_value(args, &mut i, flag)?),
                "-port" => acceptor_port = parse_u16(&take_value(args, &mut i, flag)?, flag)?,
                other => {
                    tracing::warn!(flag = %other, "ignoring unrecognized top-level flag");
                    i += 1;
                }
            },
            Some(partial) => apply_link_flag(partial, args, &mut i)?,
        }
    }

    if let Some(partial) = current.take() {
        finish_link(partial, &mut links);
    }

    Ok(Config { acceptor_addr, acceptor_port, links })
}

fn finish_link(partial: PartialLink, links: &mut Vec<DialSpec>) {
    let (Some(host), Some(remote_serial), Some(local_serial)) =
        (partial.host, partial.remote_serial, partial.local_serial)
    else {
        tracing::warn!("not enough arguments for -link group, dropping it");
        return;
    };

    links.push(DialSpec {
        host,
        port: partial.port.unwrap_or(DEFAULT_LINK_PORT),
        remote_serial,
        local_serial,
        remote_config: partial.remote_config,
        local_config: partial.local_config,
    });
}

fn apply_link_flag(partial: &mut PartialLink, args: &[String], i: &mut usize) -> Result<()> {
    let flag = args[*i].clone();
    match flag.as_str() {
        "-addr" => partial.host = Some(take_value(args, i, &flag)?),
        "-port" => partial.port = Some(parse_u16(&take_value(args, i, &flag)?, &flag)?),
        "-rser" => partial.remote_serial = Some(take_value(args, i, &flag)?),
        "-lser" => partial.local_serial = Some(take_value(args, i, &flag)?),
        "-baud" | "-lbaud" | "-rbaud" => {
            let v = take_value(args, i, &flag)?;
            let baud: u32 =
                v.parse().map_err(|_| CliError::BadValue { flag: flag.clone(), value: v })?;
            apply_sides(&flag, partial, |cfg| cfg.baud_rate = baud);
        }
        "-bits" | "-lbits" | "-rbits" => {
            let v = take_value(args, i, &flag)?;
            let bits: u8 =
                v.parse().map_err(|_| CliError::BadValue { flag: flag.clone(), value: v })?;
            apply_sides(&flag, partial, |cfg| cfg.data_bits = bits);
        }
        "-stops" | "-lstops" | "-rstops" => {
            let v = take_value(args, i, &flag)?;
            let stops = parse_stop_bits(&v, &flag)?;
            apply_sides(&flag, partial, |cfg| cfg.stop_bits = stops);
        }
        "-parity" | "-lparity" | "-rparity" => {
            let v = take_value(args, i, &flag)?;
            let parity = parse_parity(&v, &flag)?;
            apply_sides(&flag, partial, |cfg| cfg.parity = parity);
        }
        "-flowctrl" | "-lflowctrl" | "-rflowctrl" => {
            let v = take_value(args, i, &flag)?;
            let flow = parse_flow_control(&v, &flag)?;
            apply_sides(&flag, partial, |cfg| cfg.flow_control = flow);
        }
        other => {
            tracing::warn!(flag = %other, "ignoring unrecognized link flag");
            *i += 1;
        }
    }
    Ok(())
}

enum Side {
    Both,
    Local,
    Remote,
}

fn side_of(flag: &str) -> Side {
    if flag.starts_with("-l") {
        Side::Local
    } else if flag.starts_with("-r") {
        Side::Remote
    } else {
        Side::Both
    }
}

fn apply_sides(flag: &str, partial: &mut PartialLink, f: impl Fn(&mut SerialConfig)) {
    match side_of(flag) {
        Side::Both => {
            f(&mut partial.remote_config);
            f(&mut partial.local_config);
        }
        Side::Local => f(&mut partial.local_config),
        Side::Remote => f(&mut partial.remote_config),
    }
}

fn take_value(args: &[String], i: &mut usize, flag: &str) -> Result<String> {
    let value = args.get(*i + 1).cloned().ok_or_else(|| CliError::MissingArg(flag.to_string()))?;
    *i += 2;
    Ok(value)
}

fn parse_u16(value: &str, flag: &str) -> Result<u16> {
    value
        .parse()
        .map_err(|_| CliError::BadValue { flag: flag.to_string(), value: value.to_string() })
}

fn parse_stop_bits(value: &str, flag: &str) -> Result<StopBits> {
    match value {
        "one" => Ok(StopBits::One),
        "one-half" => Ok(StopBits::OneHalf),
        "two" => Ok(StopBits::Two),
        _ => Err(CliError::BadValue { flag: flag.to_string(), value: value.to_string() }),
    }
}

fn parse_parity(value: &str, flag: &str) -> Result<Parity> {
    match value {
        "none" => Ok(Parity::None),
        "even" => Ok(Parity::Even),
        "odd" => Ok(Parity::Odd),
        "mark" => Ok(Parity::Mark),
        "space" => Ok(Parity::Space),
        _ => Err(CliError::BadValue { flag: flag.to_string(), value: value.to_string() }),
    }
}

fn parse_flow_control(value: &str, flag: &str) -> Result<FlowControl> {
    // XON/XOFF is handled by passing the characters through on the wire,
    // not by a selectable flow-control mode, so it isn't a valid CLI value.
    match value {
        "none" => Ok(FlowControl::None),
        "rtscts" => Ok(FlowControl::RtsCts),
        "dsrdtr" => Ok(FlowControl::DsrDtr),
        _ => Err(CliError::BadValue { flag: flag.to_string(), value: value.to_string() }),
    }
}

/// The usage text printed when `soip` is invoked with no arguments.
pub const USAGE: &str = "\
soip [-addr host] [-port port] [-link <link options> ...]...
options:
 -addr [local IP]
 -port [local network port]
link options:
 -addr [remote IP]
 -port [remote network port]
 -rser [remote serial port]
 -lser [local serial port]
 -(l|r|)baud [serial baud]
 -(l|r|)bits [data bits]
 -(l|r|)stops [stop bits] : one|one-half|two
 -(l|r|)parity [parity] : none|even|odd|mark|space
 -(l|r|)flowctrl [flow control] : none|rtscts|dsrdtr
 (l - local only | r - remote only | neither - both)";
