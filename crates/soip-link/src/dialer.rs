//! C7: resolves a peer address, connects, and drives the three initial
//! handshakes that bring up an outgoing link.

use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;

use soip_serial::{SerialConfig, SerialDevice};
use thiserror::Error;

use crate::handler::LinkHandler;
use crate::registry::LinkHandlerDyn;

#[derive(Debug, Error)]
pub enum DialError {
    #[error("address resolution failed: {0}")]
    Resolve(#[source] std::io::Error),

    #[error("could not connect to any resolved address for {host}:{port}")]
    Connect { host: String, port: u16 },

    #[error("failed to spawn link handler: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("handshake step `{0}` failed or timed out")]
    Handshake(&'static str),
}

pub type Result<T> = std::result::Result<T, DialError>;

/// Everything the Dialer needs for one outgoing `-link` group in the CLI
/// grammar (spec §6): the peer address, the two port names, and the two
/// optional configurations (a flag group may leave either unspecified).
#[derive(Debug, Clone)]
pub struct DialSpec {
    pub host: String,
    pub port: u16,
    pub remote_serial: String,
    pub local_serial: String,
    pub remote_config: SerialConfig,
    pub local_config: SerialConfig,
}

pub struct Dialer;

impl Dialer {
    /// Resolves `spec.host:spec.port`, connects to the first address that
    /// accepts, and performs `open_remote_port`, `set_remote_config`,
    /// `open_local_port`, `set_local_config` in that order. The handler is
    /// torn down and the first failing step is reported on any failure.
    pub fn dial<D: SerialDevice + Send + 'static>(spec: &DialSpec) -> Result<Arc<LinkHandler<D>>> {
        let stream = Self::connect(spec)?;
        let handler = LinkHandler::<D>::spawn(stream).map_err(DialError::Spawn)?;

        if !handler.open_remote_port(&spec.remote_serial) {
            handler.shutdown();
            return Err(DialError::Handshake("open_remote_port"));
        }
        if !handler.set_remote_config(spec.remote_config) {
            handler.shutdown();
            return Err(DialError::Handshake("set_remote_config"));
        }
        if !handler.open_local_port(&spec.local_serial) {
            handler.shutdown();
            return Err(DialError::Handshake("open_local_port"));
        }
        if !handler.set_local_config(spec.local_config) {
            handler.shutdown();
            return Err(DialError::Handshake("set_local_config"));
        }

        tracing::info!(host = %spec.host, port = spec.port, "link established");
        Ok(handler)
    }

    fn connect(spec: &DialSpec) -> Result<TcpStream> {
        let addrs: Vec<_> = (spec.host.as_str(), spec.port)
            .to_socket_addrs()
            .map_err(DialError::Resolve)?
            .collect();

        for addr in &addrs {
            match TcpStream::connect(addr) {
                Ok(stream) => return Ok(stream),
                Err(e) => tracing::debug!(%addr, error = %e, "connect attempt failed"),
            }
        }
        Err(DialError::Connect { host: spec.host.clone(), port: spec.port })
    }
}

#[cfg(test)]
mod test {
    use std::net::TcpListener;

    use soip_serial::VirtualDevice;

    use super::*;

    #[test]
    fn connect_failure_is_reported_without_panicking() {
        let spec = DialSpec {
            host: "127.0.0.1".to_string(),
            port: 1, // reserved, nothing listens here
            remote_serial: "/dev/peer".to_string(),
            local_serial: "/dev/local".to_string(),
            remote_config: SerialConfig::default(),
            local_config: SerialConfig::default(),
        };
        let err = Dialer::dial::<VirtualDevice>(&spec).unwrap_err();
        assert!(matches!(err, DialError::Connect { .. }));
    }

    #[test]
    fn dial_succeeds_end_to_end_against_a_scripted_peer() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let peer = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();

            let decoded = crate::frame::read_frame(&mut stream).unwrap();
            assert_eq!(decoded.op_code, crate::protocol::OpCode::OpenPort as u8);
            crate::frame::write_frame(
                &mut stream,
                crate::protocol::OpCode::Confirm as u8,
                &crate::protocol::encode_confirm(true),
            )
            .unwrap();

            let decoded = crate::frame::read_frame(&mut stream).unwrap();
            assert_eq!(decoded.op_code, crate::protocol::OpCode::ConfigurePort as u8);
            crate::frame::write_frame(
                &mut stream,
                crate::protocol::OpCode::Confirm as u8,
                &crate::protocol::encode_confirm(true),
            )
            .unwrap();

            stream
        });

        let spec = DialSpec {
            host: addr.ip().to_string(),
            port: addr.port(),
            remote_serial: "/dev/peer".to_string(),
            local_serial: "/dev/local".to_string(),
            remote_config: SerialConfig::default(),
            local_config: SerialConfig::default(),
        };

        let handler = Dialer::dial::<VirtualDevice>(&spec).unwrap();
        assert!(handler.is_alive());
        let _peer_stream = peer.join().unwrap();
    }
}
