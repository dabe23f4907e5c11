//! Small pieces of plumbing shared by `services/reconciler` and
//! `services/materializer`: the static port-name table and the
//! ctrl_c/SIGTERM shutdown future.

pub mod portmap;
pub mod shutdown;

pub use portmap::resolve_eport;
pub use shutdown::shutdown_signal;
