//! The socket layer (§4.6): stream/datagram sockets over IPv4, IPv6, and
//! Unix, plus name resolution. Built on `rustix::net` the way `dir.rs`
//! builds `path_open` on `rustix::fs` — thin translation, no hand-rolled
//! syscall plumbing.

use crate::errno::{Errno, Result};
use crate::table::{Descriptor, DescriptorTable, Entry, Fd};
use crate::types::{
    AddressFamily, FdFlagsAccept, Filetype, HandleRights, Protocol, RiFlags, Rights, RoFlags,
    SdFlags, SockOpt, SockOptValue, SocketAddress, SocketType,
};
use rustix::fd::{AsFd, OwnedFd};
use rustix::net::{self, AddressFamily as RAddressFamily, Protocol as RProtocol, SocketType as RSocketType};
use std::io::{IoSlice, IoSliceMut};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

fn to_rustix_family(family: AddressFamily) -> RAddressFamily {
    match family {
        AddressFamily::Inet => RAddressFamily::INET,
        AddressFamily::Inet6 => RAddressFamily::INET6,
        AddressFamily::Unix => RAddressFamily::UNIX,
    }
}

/// Resolve the concrete `(type, protocol)` pair and reject nonsensical
/// combinations before touching the host, per §4.6's cross-validation
/// table.
fn resolve_type_protocol(
    family: AddressFamily,
    ty: SocketType,
    protocol: Protocol,
) -> Result<(RSocketType, Option<RProtocol>)> {
    if family == AddressFamily::Unix {
        if !matches!(protocol, Protocol::Ip) {
            return Err(Errno::Protonosupport);
        }
        let rty = match ty {
            SocketType::StreamSocket | SocketType::AnySocket => RSocketType::STREAM,
            SocketType::DatagramSocket => RSocketType::DGRAM,
        };
        return Ok((rty, None));
    }

    let resolved_ty = match (ty, protocol) {
        (SocketType::AnySocket, Protocol::Udp) => RSocketType::DGRAM,
        (SocketType::AnySocket, _) => RSocketType::STREAM,
        (SocketType::StreamSocket, Protocol::Udp) => return Err(Errno::Prototype),
        (SocketType::DatagramSocket, Protocol::Tcp) => return Err(Errno::Prototype),
        (SocketType::StreamSocket, _) => RSocketType::STREAM,
        (SocketType::DatagramSocket, _) => RSocketType::DGRAM,
    };
    let rproto = match protocol {
        Protocol::Ip => None,
        Protocol::Tcp => Some(RProtocol::TCP),
        Protocol::Udp => Some(RProtocol::UDP),
    };
    Ok((resolved_ty, rproto))
}

pub fn sock_open(
    table: &mut DescriptorTable,
    family: AddressFamily,
    ty: SocketType,
    protocol: Protocol,
    rights_base: Rights,
    rights_inheriting: Rights,
) -> Result<Fd> {
    let (rty, rproto) = resolve_type_protocol(family, ty, protocol)?;
    let fd = net::socket(to_rustix_family(family), rty, rproto).map_err(Errno::from)?;
    let file_type = match rty {
        RSocketType::STREAM => Filetype::SocketStream,
        _ => Filetype::SocketDgram,
    };
    let entry = Entry::new(
        Descriptor::Socket(fd),
        file_type,
        HandleRights::new(rights_base, rights_inheriting),
    );
    Ok(table.insert(entry))
}

fn to_std_addr(addr: &SocketAddress) -> Result<SocketAddr> {
    match *addr {
        SocketAddress::Inet4 { addr, port } => {
            Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::from(addr)), port))
        }
        SocketAddress::Inet6 { addr, port } => {
            Ok(SocketAddr::new(IpAddr::V6(Ipv6Addr::from(addr)), port))
        }
        SocketAddress::Unix { .. } => Err(Errno::Inval),
    }
}

pub fn sock_bind(table: &DescriptorTable, fd: Fd, addr: &SocketAddress) -> Result<SocketAddress> {
    let entry = table.lookup_socket_fd(fd, Rights::SOCK_ACCEPT)?;
    let bfd = entry.descriptor.as_fd();
    match addr {
        SocketAddress::Unix { name } => {
            net::bind_unix(bfd, &net::SocketAddrUnix::new(name.as_str()).map_err(Errno::from)?)
                .map_err(Errno::from)?;
        }
        _ => {
            let std_addr = to_std_addr(addr)?;
            net::bind(bfd, &std_addr).map_err(|e| match e {
                rustix::io::Errno::AFNOSUPPORT | rustix::io::Errno::INVAL => Errno::Inval,
                other => Errno::from(other),
            })?;
        }
    }
    sock_local_address(table, fd)
}

pub fn sock_connect(table: &DescriptorTable, fd: Fd, addr: &SocketAddress) -> Result<SocketAddress> {
    let entry = table.lookup_socket_fd(fd, Rights::empty())?;
    let bfd = entry.descriptor.as_fd();
    let result = match addr {
        SocketAddress::Unix { name } => {
            net::connect_unix(bfd, &net::SocketAddrUnix::new(name.as_str()).map_err(Errno::from)?)
        }
        _ => {
            let std_addr = to_std_addr(addr)?;
            net::connect(bfd, &std_addr)
        }
    };
    match result {
        Ok(()) => {}
        Err(rustix::io::Errno::INPROGRESS) => return Err(Errno::Inprogress),
        // Some hosts report EOPNOTSUPP when re-connecting an already
        // connected or listening socket; normalize to EISCONN (§4.6).
        Err(rustix::io::Errno::OPNOTSUPP) => return Err(Errno::Isconn),
        Err(e) => return Err(Errno::from(e)),
    }
    sock_local_address(table, fd)
}

pub fn sock_listen(table: &DescriptorTable, fd: Fd, backlog: u32) -> Result<()> {
    let entry = table.lookup_socket_fd(fd, Rights::SOCK_ACCEPT)?;
    net::listen(entry.descriptor.as_fd(), backlog as i32).map_err(Errno::from)
}

pub struct Accepted {
    pub new_fd: Fd,
    pub peer_addr: SocketAddress,
    pub local_addr: SocketAddress,
}

pub fn sock_accept(
    table: &mut DescriptorTable,
    fd: Fd,
    flags: FdFlagsAccept,
) -> Result<Accepted> {
    let entry = table.lookup_socket_fd(fd, Rights::SOCK_ACCEPT)?;
    let bfd = entry.descriptor.as_fd();
    let parent_rights = entry.rights;
    let parent_file_type = entry.file_type;

    let (accepted, peer): (OwnedFd, _) = if flags.contains(FdFlagsAccept::NONBLOCK) {
        net::acceptfrom_with(bfd, net::SocketFlags::NONBLOCK).map_err(Errno::from)?
    } else {
        net::acceptfrom(bfd).map_err(Errno::from)?
    };

    let peer_addr = socket_addr_any_to_wasi(peer)?;
    let new_rights = HandleRights::new(parent_rights.inheriting, parent_rights.inheriting);
    let new_entry = Entry::new(Descriptor::Socket(accepted), parent_file_type, new_rights);
    let new_fd = table.insert(new_entry);
    let local_addr = sock_local_address(table, new_fd)?;
    Ok(Accepted { new_fd, peer_addr, local_addr })
}

fn socket_addr_any_to_wasi(addr: net::SocketAddrAny) -> Result<SocketAddress> {
    match addr {
        net::SocketAddrAny::V4(v4) => {
            Ok(SocketAddress::Inet4 { addr: v4.ip().octets(), port: v4.port() })
        }
        net::SocketAddrAny::V6(v6) => {
            Ok(SocketAddress::Inet6 { addr: v6.ip().octets(), port: v6.port() })
        }
        net::SocketAddrAny::Unix(u) => Ok(SocketAddress::Unix { name: unix_name(&u) }),
        _ => Err(Errno::Notsup),
    }
}

/// Linux renders the empty (unnamed) peer of an abstract-namespace Unix
/// socket as a zero-length name; normalize that to `@` so a guest never
/// observes an empty string as a real address (§4.6).
fn unix_name(addr: &net::SocketAddrUnix) -> String {
    match addr.path() {
        Some(path) => path.to_string_lossy().into_owned(),
        None => "@".to_string(),
    }
}

pub fn sock_recv(
    table: &DescriptorTable,
    fd: Fd,
    iovs: &mut [IoSliceMut<'_>],
    iflags: RiFlags,
) -> Result<(usize, RoFlags)> {
    let entry = table.lookup_socket_fd(fd, Rights::FD_READ)?;
    let bfd = entry.descriptor.as_fd();
    let mut recv_flags = net::RecvFlags::empty();
    if iflags.contains(RiFlags::RECV_PEEK) {
        recv_flags |= net::RecvFlags::PEEK;
    }
    if iflags.contains(RiFlags::RECV_WAITALL) {
        recv_flags |= net::RecvFlags::WAITALL;
    }
    let result = net::recvmsg(bfd, iovs, &mut Default::default(), recv_flags).map_err(Errno::from)?;
    let mut oflags = RoFlags::empty();
    if result.flags.contains(net::RecvFlags::TRUNC) {
        oflags |= RoFlags::RECV_DATA_TRUNCATED;
    }
    Ok((result.bytes, oflags))
}

pub fn sock_send(table: &DescriptorTable, fd: Fd, iovs: &[IoSlice<'_>]) -> Result<usize> {
    let entry = table.lookup_socket_fd(fd, Rights::FD_WRITE)?;
    net::sendmsg_noaddr(entry.descriptor.as_fd(), iovs, net::SendFlags::empty())
        .map_err(Errno::from)
}

pub fn sock_recvfrom(
    table: &DescriptorTable,
    fd: Fd,
    iovs: &mut [IoSliceMut<'_>],
    iflags: RiFlags,
) -> Result<(usize, RoFlags, SocketAddress)> {
    let entry = table.lookup_socket_fd(fd, Rights::FD_READ)?;
    let bfd = entry.descriptor.as_fd();
    let mut recv_flags = net::RecvFlags::empty();
    if iflags.contains(RiFlags::RECV_PEEK) {
        recv_flags |= net::RecvFlags::PEEK;
    }
    if iflags.contains(RiFlags::RECV_WAITALL) {
        recv_flags |= net::RecvFlags::WAITALL;
    }
    let result = net::recvmsg_any(bfd, iovs, recv_flags).map_err(Errno::from)?;
    let mut oflags = RoFlags::empty();
    if result.flags.contains(net::RecvFlags::TRUNC) {
        oflags |= RoFlags::RECV_DATA_TRUNCATED;
    }
    let peer = match result.address {
        Some(addr) => socket_addr_any_to_wasi(addr)?,
        None => return Err(Errno::Notconn),
    };
    Ok((result.bytes, oflags, peer))
}

pub fn sock_sendto(
    table: &DescriptorTable,
    fd: Fd,
    iovs: &[IoSlice<'_>],
    addr: &SocketAddress,
) -> Result<usize> {
    let entry = table.lookup_socket_fd(fd, Rights::FD_WRITE)?;
    let bfd = entry.descriptor.as_fd();
    match addr {
        SocketAddress::Unix { name } => net::sendmsg_unix(
            bfd,
            &net::SocketAddrUnix::new(name.as_str()).map_err(Errno::from)?,
            iovs,
            net::SendFlags::empty(),
        )
        .map_err(Errno::from),
        _ => {
            let std_addr = to_std_addr(addr)?;
            net::sendmsg(bfd, &std_addr, iovs, net::SendFlags::empty()).map_err(Errno::from)
        }
    }
}

pub fn sock_shutdown(table: &DescriptorTable, fd: Fd, flags: SdFlags) -> Result<()> {
    let entry = table.lookup_socket_fd(fd, Rights::SOCK_SHUTDOWN)?;
    let bfd = entry.descriptor.as_fd();
    let how = match (flags.contains(SdFlags::RD), flags.contains(SdFlags::WR)) {
        (true, true) => net::Shutdown::Both,
        (true, false) => net::Shutdown::Read,
        (false, true) => net::Shutdown::Write,
        (false, false) => return Err(Errno::Inval),
    };
    match net::shutdown(bfd, how) {
        Ok(()) => Ok(()),
        // Linux refuses to shut down a listening socket's nonexistent
        // connection with ENOTCONN; BSD instead rejects it earlier.
        // Normalize to ENOTCONN everywhere the listening-socket case is
        // reachable (§4.6).
        #[cfg(target_os = "linux")]
        Err(rustix::io::Errno::NOTCONN) => Err(Errno::Notconn),
        Err(e) => Err(Errno::from(e)),
    }
}

pub fn sock_local_address(table: &DescriptorTable, fd: Fd) -> Result<SocketAddress> {
    let entry = table.lookup_socket_fd(fd, Rights::empty())?;
    socket_addr_any_to_wasi(net::getsockname_any(entry.descriptor.as_fd()).map_err(Errno::from)?)
}

pub fn sock_remote_address(table: &DescriptorTable, fd: Fd) -> Result<SocketAddress> {
    let entry = table.lookup_socket_fd(fd, Rights::empty())?;
    socket_addr_any_to_wasi(net::getpeername_any(entry.descriptor.as_fd()).map_err(Errno::from)?)
}

pub fn sock_get_opt(table: &DescriptorTable, fd: Fd, opt: SockOpt) -> Result<SockOptValue> {
    let entry = table.lookup_socket_fd(fd, Rights::empty())?;
    let bfd = entry.descriptor.as_fd();
    match opt {
        SockOpt::ReuseAddress => Ok(SockOptValue::Bool(net::sockopt::get_socket_reuseaddr(bfd).map_err(Errno::from)?)),
        SockOpt::DontRoute => Ok(SockOptValue::Bool(net::sockopt::get_socket_dontroute(bfd).map_err(Errno::from)?)),
        SockOpt::Broadcast => Ok(SockOptValue::Bool(net::sockopt::get_socket_broadcast(bfd).map_err(Errno::from)?)),
        SockOpt::KeepAlive => Ok(SockOptValue::Bool(net::sockopt::get_socket_keepalive(bfd).map_err(Errno::from)?)),
        SockOpt::OobInline => Ok(SockOptValue::Bool(net::sockopt::get_socket_oobinline(bfd).map_err(Errno::from)?)),
        SockOpt::TcpNoDelay => Ok(SockOptValue::Bool(net::sockopt::get_tcp_nodelay(bfd).map_err(Errno::from)?)),
        SockOpt::QueryAcceptConnections => {
            Ok(SockOptValue::Bool(net::sockopt::get_socket_acceptconn(bfd).map_err(Errno::from)?))
        }
        SockOpt::RecvLowWatermark => {
            Ok(SockOptValue::Int(net::sockopt::get_socket_rcvlowat(bfd).map_err(Errno::from)? as i32))
        }
        SockOpt::SendBufferSize => {
            let raw = net::sockopt::get_socket_sndbuf(bfd).map_err(Errno::from)?;
            Ok(SockOptValue::Int(halve_on_linux(raw) as i32))
        }
        SockOpt::RecvBufferSize => {
            let raw = net::sockopt::get_socket_rcvbuf(bfd).map_err(Errno::from)?;
            Ok(SockOptValue::Int(halve_on_linux(raw) as i32))
        }
        SockOpt::QuerySocketType => {
            let ty = net::sockopt::get_socket_type(bfd).map_err(Errno::from)?;
            let wasi_ty = if ty == RSocketType::DGRAM {
                SocketType::DatagramSocket
            } else {
                SocketType::StreamSocket
            };
            Ok(SockOptValue::SocketType(wasi_ty))
        }
        SockOpt::QuerySocketError => {
            let raw = net::sockopt::get_socket_error(bfd).map_err(Errno::from)?;
            let errno = match raw {
                Ok(()) => Errno::Success,
                Err(e) => Errno::from(e),
            };
            Ok(SockOptValue::Errno(errno))
        }
        SockOpt::Linger | SockOpt::RecvTimeout | SockOpt::SendTimeout | SockOpt::BindToDevice => {
            Err(Errno::Notsup)
        }
    }
}

#[cfg(target_os = "linux")]
fn halve_on_linux(n: usize) -> usize {
    n / 2
}

#[cfg(not(target_os = "linux"))]
fn halve_on_linux(n: usize) -> usize {
    n
}

pub fn sock_set_opt(table: &DescriptorTable, fd: Fd, opt: SockOpt, value: SockOptValue) -> Result<()> {
    let entry = table.lookup_socket_fd(fd, Rights::empty())?;
    let bfd = entry.descriptor.as_fd();
    let as_bool = || match value {
        SockOptValue::Bool(b) => Ok(b),
        _ => Err(Errno::Inval),
    };
    let as_buffer_size = || match value {
        SockOptValue::Int(n) if n > 0 => Ok(n as usize),
        SockOptValue::Int(_) => Err(Errno::Inval),
        _ => Err(Errno::Inval),
    };
    match opt {
        SockOpt::ReuseAddress => net::sockopt::set_socket_reuseaddr(bfd, as_bool()?).map_err(Errno::from),
        SockOpt::DontRoute => net::sockopt::set_socket_dontroute(bfd, as_bool()?).map_err(Errno::from),
        SockOpt::Broadcast => net::sockopt::set_socket_broadcast(bfd, as_bool()?).map_err(Errno::from),
        SockOpt::KeepAlive => net::sockopt::set_socket_keepalive(bfd, as_bool()?).map_err(Errno::from),
        SockOpt::OobInline => net::sockopt::set_socket_oobinline(bfd, as_bool()?).map_err(Errno::from),
        SockOpt::TcpNoDelay => net::sockopt::set_tcp_nodelay(bfd, as_bool()?).map_err(Errno::from),
        SockOpt::SendBufferSize => {
            net::sockopt::set_socket_sndbuf(bfd, as_buffer_size()?).map_err(Errno::from)
        }
        SockOpt::RecvBufferSize => {
            net::sockopt::set_socket_rcvbuf(bfd, as_buffer_size()?).map_err(Errno::from)
        }
        SockOpt::RecvLowWatermark => {
            net::sockopt::set_socket_rcvlowat(bfd, as_buffer_size()?).map_err(Errno::from)
        }
        SockOpt::QuerySocketType | SockOpt::QuerySocketError | SockOpt::QueryAcceptConnections => {
            Err(Errno::Inval)
        }
        SockOpt::Linger | SockOpt::RecvTimeout | SockOpt::SendTimeout | SockOpt::BindToDevice => {
            Err(Errno::Notsup)
        }
    }
}

/// Hints narrowing [`sock_address_info`] resolution.
#[derive(Debug, Clone, Copy, Default)]
pub struct AddressInfoHints {
    pub family: Option<AddressFamily>,
    pub socktype: Option<SocketType>,
    pub protocol: Option<Protocol>,
    pub numeric_host: bool,
    pub numeric_service: bool,
    pub passive: bool,
}

pub fn sock_address_info(
    name: &str,
    service: &str,
    hints: AddressInfoHints,
    max_results: usize,
) -> Result<Vec<SocketAddress>> {
    if max_results == 0 {
        return Err(Errno::Inval);
    }

    let port = if service.is_empty() {
        0
    } else if hints.numeric_service {
        service.parse::<u16>().map_err(|_| Errno::Inval)?
    } else {
        // Service-name lookups (e.g. "http") require a full resolver, out
        // of scope for the numeric-first core; treat as unresolved.
        return Err(Errno::Canceled);
    };

    if hints.numeric_host {
        let ip: IpAddr = if name.is_empty() && hints.passive {
            match hints.family {
                Some(AddressFamily::Inet6) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
                _ => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            }
        } else {
            name.parse().map_err(|_| Errno::Inval)?
        };
        let addr = SocketAddr::new(ip, port);
        return Ok(vec![SocketAddress::from(addr)].into_iter().take(max_results).collect());
    }

    if name.is_empty() && hints.passive {
        let ip = match hints.family {
            Some(AddressFamily::Inet6) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
            _ => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        };
        return Ok(vec![SocketAddress::from(SocketAddr::new(ip, port))]);
    }

    // Full forward-DNS resolution: delegate to the standard library's
    // resolver (the only portable one available without adding a new
    // async DNS stack), collapsing any failure to ECANCELED per §4.6.
    let lookup = format!("{name}:{port}");
    let resolved = std::net::ToSocketAddrs::to_socket_addrs(&lookup).map_err(|_| Errno::Canceled)?;
    let mut out: Vec<SocketAddress> = Vec::new();
    for addr in resolved {
        if let Some(wanted) = hints.family {
            let matches = match (wanted, addr) {
                (AddressFamily::Inet, SocketAddr::V4(_)) => true,
                (AddressFamily::Inet6, SocketAddr::V6(_)) => true,
                _ => false,
            };
            if !matches {
                continue;
            }
        }
        out.push(SocketAddress::from(addr));
        if out.len() >= max_results {
            break;
        }
    }
    if out.is_empty() {
        return Err(Errno::Canceled);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RightsExt;

    fn open_tcp(table: &mut DescriptorTable) -> Fd {
        sock_open(
            table,
            AddressFamily::Inet,
            SocketType::StreamSocket,
            Protocol::Tcp,
            Rights::socket_base() | Rights::SOCK_ACCEPT,
            Rights::socket_inheriting(),
        )
        .unwrap()
    }

    #[test]
    fn stream_udp_combination_is_prototype_error() {
        let mut table = DescriptorTable::new();
        let err = sock_open(
            &mut table,
            AddressFamily::Inet,
            SocketType::StreamSocket,
            Protocol::Udp,
            Rights::socket_base(),
            Rights::empty(),
        )
        .unwrap_err();
        assert_eq!(err, Errno::Prototype);
    }

    #[test]
    fn unix_socket_with_explicit_protocol_is_unsupported() {
        let mut table = DescriptorTable::new();
        let err = sock_open(
            &mut table,
            AddressFamily::Unix,
            SocketType::StreamSocket,
            Protocol::Tcp,
            Rights::socket_base(),
            Rights::empty(),
        )
        .unwrap_err();
        assert_eq!(err, Errno::Protonosupport);
    }

    #[test]
    fn bind_listen_accept_loopback_round_trip() {
        let mut table = DescriptorTable::new();
        let server = open_tcp(&mut table);
        let bound = sock_bind(
            &table,
            server,
            &SocketAddress::Inet4 { addr: [127, 0, 0, 1], port: 0 },
        )
        .unwrap();
        let SocketAddress::Inet4 { port, .. } = bound else { panic!("expected inet4") };
        assert_ne!(port, 0);
        sock_listen(&table, server, 8).unwrap();

        let client = open_tcp(&mut table);
        let connect_err = sock_connect(
            &table,
            client,
            &SocketAddress::Inet4 { addr: [127, 0, 0, 1], port },
        );
        // Either an immediate success or EINPROGRESS (nonblocking default
        // varies by platform default flags); both are acceptable here.
        assert!(connect_err.is_ok() || connect_err == Err(Errno::Inprogress));

        let accepted = sock_accept(&mut table, server, FdFlagsAccept::empty()).unwrap();
        assert!(table.get(accepted.new_fd).is_some());
    }

    #[test]
    fn numeric_host_resolution_round_trips() {
        let hints = AddressInfoHints { numeric_host: true, numeric_service: true, ..Default::default() };
        let results = sock_address_info("127.0.0.1", "8080", hints, 4).unwrap();
        assert_eq!(results, vec![SocketAddress::Inet4 { addr: [127, 0, 0, 1], port: 8080 }]);
    }

    #[test]
    fn zero_capacity_address_info_is_einval() {
        let hints = AddressInfoHints::default();
        assert_eq!(sock_address_info("localhost", "80", hints, 0), Err(Errno::Inval));
    }

    #[test]
    fn passive_wildcard_address_info() {
        let hints = AddressInfoHints { passive: true, numeric_service: true, ..Default::default() };
        let results = sock_address_info("", "0", hints, 1).unwrap();
        assert_eq!(results, vec![SocketAddress::Inet4 { addr: [0, 0, 0, 0], port: 0 }]);
    }
}
