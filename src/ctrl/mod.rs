//! TCP control plane.
//!
//! A [`Daemon`] publishes NICs, memory registrations and queue pairs of one
//! process; a [`Connecter`] in another process fetches them and sets up
//! reliable connections through the daemon's [`RecvManager`].

mod connecter;
mod daemon;
mod proto;
mod recv_manager;
mod registry;

pub use self::connecter::Connecter;
pub use self::daemon::{ChannelProvider, ChannelRequest, Daemon};
pub use self::proto::NicAttr;
pub use self::recv_manager::RecvManager;
