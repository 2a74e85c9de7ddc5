//! Transport layer: listener, per-connection sessions, relay

mod listener;
mod session;
mod stream;

pub use listener::{Listener, ListenerStats};
pub use session::Session;
pub use stream::NetworkStream;
