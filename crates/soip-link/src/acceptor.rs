//! C6: listens on a bound address and creates a [`LinkHandler`] per
//! accepted connection.

use std::net::{TcpListener, ToSocketAddrs};

use soip_serial::SerialDevice;

use crate::handler::LinkHandler;
use crate::registry::HandlerRegistry;

/// Binds a listen socket and runs the accept loop on the calling thread
/// until the listener is closed (or an unrecoverable accept error occurs).
pub struct Acceptor {
    listener: TcpListener,
}

impl Acceptor {
    pub fn bind<A: ToSocketAddrs>(addr: A) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        tracing::info!(addr = %listener.local_addr().map(|a| a.to_string()).unwrap_or_default(), "acceptor listening");
        Ok(Self { listener })
    }

    #[must_use]
    pub fn local_addr(&self) -> Option<std::net::SocketAddr> {
        self.listener.local_addr().ok()
    }

    /// Registers one fresh `LinkHandler<D>` per accepted connection and
    /// sweeps dead handlers from the registry between `accept` calls, as
    /// spec §4.7 describes for the combined Acceptor+Dialer process shape.
    /// Returns once the listen socket is closed or accept fails terminally.
    pub fn run<D: SerialDevice + Send + 'static>(&self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    tracing::info!(%peer, "accepted connection");
                    match LinkHandler::<D>::spawn(stream) {
                        Ok(handler) => HandlerRegistry::global().register(handler),
                        Err(e) => tracing::warn!(%peer, error = %e, "failed to spawn link handler"),
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed, stopping acceptor loop");
                    return;
                }
            }
            HandlerRegistry::global().sweep();
        }
    }
}

#[cfg(test)]
mod test {
    use std::net::TcpStream;

    use soip_serial::VirtualDevice;

    use super::*;

    #[test]
    fn bind_picks_an_ephemeral_port_and_accepts() {
        let before = HandlerRegistry::global().len();
        let acceptor = Acceptor::bind("127.0.0.1:0").unwrap();
        let addr = acceptor.local_addr().unwrap();

        std::thread::spawn(move || acceptor.run::<VirtualDevice>());
        let _client = TcpStream::connect(addr).unwrap();

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
        while HandlerRegistry::global().len() <= before && std::time::Instant::now() < deadline {
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        assert!(HandlerRegistry::global().len() > before, "acceptor should have registered a handler");
    }
}
