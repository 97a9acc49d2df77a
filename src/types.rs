//! WASI preview 1 value types: rights, file/descriptor metadata, poll
//! subscriptions and events, and socket addresses.
//!
//! These are Rust-native representations, not wire structs — §4.8 struct
//! layouts are the host module's concern, not this core's.

use bitflags::bitflags;
use std::time::Duration;

bitflags! {
    /// A 64-bit capability mask. Every bit authorizes one WASI operation.
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct Rights: u64 {
        const FD_DATASYNC = 1 << 0;
        const FD_READ = 1 << 1;
        const FD_SEEK = 1 << 2;
        const FD_FDSTAT_SET_FLAGS = 1 << 3;
        const FD_SYNC = 1 << 4;
        const FD_TELL = 1 << 5;
        const FD_WRITE = 1 << 6;
        const FD_ADVISE = 1 << 7;
        const FD_ALLOCATE = 1 << 8;
        const PATH_CREATE_DIRECTORY = 1 << 9;
        const PATH_CREATE_FILE = 1 << 10;
        const PATH_LINK_SOURCE = 1 << 11;
        const PATH_LINK_TARGET = 1 << 12;
        const PATH_OPEN = 1 << 13;
        const FD_READDIR = 1 << 14;
        const PATH_READLINK = 1 << 15;
        const PATH_RENAME_SOURCE = 1 << 16;
        const PATH_RENAME_TARGET = 1 << 17;
        const PATH_FILESTAT_GET = 1 << 18;
        const PATH_FILESTAT_SET_SIZE = 1 << 19;
        const PATH_FILESTAT_SET_TIMES = 1 << 20;
        const FD_FILESTAT_GET = 1 << 21;
        const FD_FILESTAT_SET_SIZE = 1 << 22;
        const FD_FILESTAT_SET_TIMES = 1 << 23;
        const PATH_SYMLINK = 1 << 24;
        const PATH_REMOVE_DIRECTORY = 1 << 25;
        const PATH_UNLINK_FILE = 1 << 26;
        const POLL_FD_READWRITE = 1 << 27;
        const SOCK_SHUTDOWN = 1 << 28;
        const SOCK_ACCEPT = 1 << 29;
    }
}

/// Named shorthands for enforcement-policy defaults, grounded on the
/// `RightsExt` rights templates used throughout `wasi-common`.
pub trait RightsExt: Sized {
    fn block_device_base() -> Self;
    fn block_device_inheriting() -> Self;
    fn character_device_base() -> Self;
    fn character_device_inheriting() -> Self;
    fn directory_base() -> Self;
    fn directory_inheriting() -> Self;
    fn regular_file_base() -> Self;
    fn regular_file_inheriting() -> Self;
    fn socket_base() -> Self;
    fn socket_inheriting() -> Self;
    fn tty_base() -> Self;
    fn tty_inheriting() -> Self;
}

impl RightsExt for Rights {
    fn block_device_base() -> Self {
        Self::all()
    }
    fn block_device_inheriting() -> Self {
        Self::all()
    }
    fn character_device_base() -> Self {
        Self::all()
    }
    fn character_device_inheriting() -> Self {
        Self::all()
    }

    fn directory_base() -> Self {
        Self::FD_FDSTAT_SET_FLAGS
            | Self::FD_SYNC
            | Self::FD_ADVISE
            | Self::PATH_CREATE_DIRECTORY
            | Self::PATH_CREATE_FILE
            | Self::PATH_LINK_SOURCE
            | Self::PATH_LINK_TARGET
            | Self::PATH_OPEN
            | Self::FD_READDIR
            | Self::PATH_READLINK
            | Self::PATH_RENAME_SOURCE
            | Self::PATH_RENAME_TARGET
            | Self::PATH_FILESTAT_GET
            | Self::PATH_FILESTAT_SET_SIZE
            | Self::PATH_FILESTAT_SET_TIMES
            | Self::FD_FILESTAT_GET
            | Self::FD_FILESTAT_SET_TIMES
            | Self::PATH_SYMLINK
            | Self::PATH_UNLINK_FILE
            | Self::PATH_REMOVE_DIRECTORY
            | Self::POLL_FD_READWRITE
    }
    fn directory_inheriting() -> Self {
        Self::all() ^ Self::SOCK_SHUTDOWN ^ Self::SOCK_ACCEPT
    }

    fn regular_file_base() -> Self {
        Self::FD_DATASYNC
            | Self::FD_READ
            | Self::FD_SEEK
            | Self::FD_FDSTAT_SET_FLAGS
            | Self::FD_SYNC
            | Self::FD_TELL
            | Self::FD_WRITE
            | Self::FD_ADVISE
            | Self::FD_ALLOCATE
            | Self::FD_FILESTAT_GET
            | Self::FD_FILESTAT_SET_SIZE
            | Self::FD_FILESTAT_SET_TIMES
            | Self::POLL_FD_READWRITE
    }
    fn regular_file_inheriting() -> Self {
        Self::empty()
    }

    fn socket_base() -> Self {
        Self::FD_READ
            | Self::FD_FDSTAT_SET_FLAGS
            | Self::FD_WRITE
            | Self::FD_FILESTAT_GET
            | Self::POLL_FD_READWRITE
            | Self::SOCK_SHUTDOWN
    }
    fn socket_inheriting() -> Self {
        Self::all()
    }

    fn tty_base() -> Self {
        Self::FD_READ
            | Self::FD_FDSTAT_SET_FLAGS
            | Self::FD_WRITE
            | Self::FD_FILESTAT_GET
            | Self::POLL_FD_READWRITE
    }
    fn tty_inheriting() -> Self {
        Self::empty()
    }
}

/// Rights accompanying a descriptor: what it can do (`base`) and what its
/// children may inherit (`inheriting`).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct HandleRights {
    pub base: Rights,
    pub inheriting: Rights,
}

impl HandleRights {
    pub fn new(base: Rights, inheriting: Rights) -> Self {
        Self { base, inheriting }
    }

    pub fn from_base(base: Rights) -> Self {
        Self { base, inheriting: Rights::empty() }
    }

    pub fn empty() -> Self {
        Self { base: Rights::empty(), inheriting: Rights::empty() }
    }

    /// True iff `self` grants at least everything `other` requires.
    pub fn contains(&self, other: Rights) -> bool {
        self.base.contains(other)
    }
}

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct Fdflags: u16 {
        const APPEND = 1 << 0;
        const DSYNC = 1 << 1;
        const NONBLOCK = 1 << 2;
        const RSYNC = 1 << 3;
        const SYNC = 1 << 4;
    }
}

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct Oflags: u16 {
        const CREAT = 1 << 0;
        const DIRECTORY = 1 << 1;
        const EXCL = 1 << 2;
        const TRUNC = 1 << 3;
    }
}

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct Lookupflags: u32 {
        const SYMLINK_FOLLOW = 1 << 0;
    }
}

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct Fstflags: u16 {
        const ATIM = 1 << 0;
        const ATIM_NOW = 1 << 1;
        const MTIM = 1 << 2;
        const MTIM_NOW = 1 << 3;
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Filetype {
    Unknown,
    BlockDevice,
    CharacterDevice,
    Directory,
    RegularFile,
    SocketDgram,
    SocketStream,
    SymbolicLink,
}

impl From<std::fs::FileType> for Filetype {
    fn from(ft: std::fs::FileType) -> Self {
        if ft.is_file() {
            Filetype::RegularFile
        } else if ft.is_dir() {
            Filetype::Directory
        } else if ft.is_symlink() {
            Filetype::SymbolicLink
        } else {
            Filetype::Unknown
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Advice {
    Normal,
    Sequential,
    Random,
    Willneed,
    Dontneed,
    Noreuse,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Whence {
    Set,
    Cur,
    End,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct FdStat {
    pub file_type: Filetype,
    pub flags: Fdflags,
    pub rights: HandleRights,
}

impl Default for Filetype {
    fn default() -> Self {
        Filetype::Unknown
    }
}

impl Default for Fdflags {
    fn default() -> Self {
        Fdflags::empty()
    }
}

impl Default for HandleRights {
    fn default() -> Self {
        HandleRights::empty()
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct FileStat {
    pub device: u64,
    pub inode: u64,
    pub file_type: Filetype,
    pub nlink: u64,
    pub size: u64,
    pub atim: u64,
    pub mtim: u64,
    pub ctim: u64,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PrestatDir {
    Dir { pr_name_len: usize },
}

pub type Dircookie = u64;
pub const DIRCOOKIE_START: Dircookie = 0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dirent {
    pub next: Dircookie,
    pub inode: u64,
    pub name: String,
    pub file_type: Filetype,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ClockId {
    Realtime,
    Monotonic,
    ProcessCputimeId,
    ThreadCputimeId,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SubscriptionClock {
    pub id: ClockId,
    pub timeout: Duration,
    pub precision: Duration,
    pub abstime: bool,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SubscriptionKind {
    Clock(SubscriptionClock),
    FdRead(u32),
    FdWrite(u32),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub user_data: u64,
    pub kind: SubscriptionKind,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EventType {
    Clock,
    FdRead,
    FdWrite,
}

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct EventRwFlags: u16 {
        const FD_READWRITE_HANGUP = 1 << 0;
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct EventFdReadwrite {
    pub nbytes: u64,
    pub flags: EventRwFlags,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Event {
    pub user_data: u64,
    pub error: crate::errno::Errno,
    pub event_type: EventType,
    pub fd_readwrite: EventFdReadwrite,
}

impl Event {
    pub fn clock(user_data: u64, error: crate::errno::Errno) -> Self {
        Event {
            user_data,
            error,
            event_type: EventType::Clock,
            fd_readwrite: EventFdReadwrite { nbytes: 0, flags: EventRwFlags::empty() },
        }
    }

    pub fn fd(
        user_data: u64,
        error: crate::errno::Errno,
        event_type: EventType,
        nbytes: u64,
        flags: EventRwFlags,
    ) -> Self {
        Event { user_data, error, event_type, fd_readwrite: EventFdReadwrite { nbytes, flags } }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AddressFamily {
    Inet,
    Inet6,
    Unix,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SocketType {
    AnySocket,
    StreamSocket,
    DatagramSocket,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Protocol {
    Ip,
    Tcp,
    Udp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketAddress {
    Inet4 { addr: [u8; 4], port: u16 },
    Inet6 { addr: [u8; 16], port: u16 },
    Unix { name: String },
}

impl SocketAddress {
    pub fn family(&self) -> AddressFamily {
        match self {
            SocketAddress::Inet4 { .. } => AddressFamily::Inet,
            SocketAddress::Inet6 { .. } => AddressFamily::Inet6,
            SocketAddress::Unix { .. } => AddressFamily::Unix,
        }
    }
}

impl From<std::net::SocketAddr> for SocketAddress {
    fn from(addr: std::net::SocketAddr) -> Self {
        match addr {
            std::net::SocketAddr::V4(v4) => {
                SocketAddress::Inet4 { addr: v4.ip().octets(), port: v4.port() }
            }
            std::net::SocketAddr::V6(v6) => {
                SocketAddress::Inet6 { addr: v6.ip().octets(), port: v6.port() }
            }
        }
    }
}

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct SdFlags: u8 {
        const RD = 1 << 0;
        const WR = 1 << 1;
    }
}

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct FdFlagsAccept: u16 {
        const NONBLOCK = 1 << 0;
    }
}

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct RiFlags: u16 {
        const RECV_PEEK = 1 << 0;
        const RECV_WAITALL = 1 << 1;
    }
}

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct RoFlags: u16 {
        const RECV_DATA_TRUNCATED = 1 << 0;
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SockOpt {
    ReuseAddress,
    QuerySocketType,
    QuerySocketError,
    DontRoute,
    Broadcast,
    SendBufferSize,
    RecvBufferSize,
    KeepAlive,
    OobInline,
    RecvLowWatermark,
    QueryAcceptConnections,
    TcpNoDelay,
    Linger,
    RecvTimeout,
    SendTimeout,
    BindToDevice,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SockOptValue {
    Bool(bool),
    Int(i32),
    SocketType(SocketType),
    Errno(crate::errno::Errno),
}
