pub mod acceptor;
pub mod dialer;
pub mod frame;
pub mod handler;
pub mod protocol;
pub mod registry;
pub mod ring;

pub use acceptor::Acceptor;
pub use dialer::{Dialer, DialSpec};
pub use handler::LinkHandler;
pub use registry::HandlerRegistry;
