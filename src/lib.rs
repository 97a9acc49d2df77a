//! A Unix-backed core implementation of the WebAssembly System Interface,
//! preview 1 ("WASIp1"): a capability-checked descriptor table, path-open
//! state machine, `poll_oneoff` event multiplexer, and socket layer.
//!
//! A host module wiring guest hostcalls to this crate decodes guest
//! arguments, calls into a [`System`], and writes results back into guest
//! linear memory; this crate owns none of that marshalling.

mod builder;
mod clock;
mod dir;
mod errno;
mod file;
mod poll;
mod socket;
mod system;
mod table;
mod types;

pub use builder::SystemBuilder;
pub use clock::{EntropySource, OsEntropySource, ProcessControl};
pub use errno::{Errno, Result};
pub use socket::{Accepted, AddressInfoHints};
pub use system::{BaseSystem, PathOpenSockets, SocketsExtension, System, TracingSystem};
pub use table::Fd;
pub use types::{
    Advice, AddressFamily, ClockId, Dircookie, Dirent, Event, EventFdReadwrite, EventRwFlags,
    EventType, FdFlagsAccept, FdStat, Fdflags, FileStat, Filetype, Fstflags, HandleRights,
    Lookupflags, Oflags, PrestatDir, Protocol, RiFlags, Rights, RightsExt, RoFlags, SdFlags,
    SockOpt, SockOptValue, SocketAddress, SocketType, Subscription, SubscriptionClock,
    SubscriptionKind, Whence,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_produces_a_system_trait_object() {
        let system: Box<dyn System> = Box::new(SystemBuilder::new().args(vec!["prog".into()]).build().unwrap());
        assert_eq!(system.args_sizes_get(), (1, 5));
    }

    #[test]
    fn tracing_and_path_open_sockets_decorators_compose() {
        let base = SystemBuilder::new().build().unwrap();
        let system: Box<dyn System> = Box::new(TracingSystem::new(PathOpenSockets::new(base)));
        assert_eq!(system.fd_stat_get(999), Err(Errno::Badf));
    }
}
