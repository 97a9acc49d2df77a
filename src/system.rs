//! The `System` boundary (§4.8/§9): the abstract interface a host module
//! binds its guest-facing hostcalls to, a concrete Unix implementation, and
//! the tracing/socket-extension decorators layered on top of it.
//!
//! The decorator shape (inner `Box<dyn System>`, forwarding every method,
//! overriding a few) mirrors how `wasmtime-wasi` wraps its base `WasiCtx`
//! with tracing and with vendor socket-extension shims, rather than baking
//! cross-cutting concerns into the base implementation itself.

use crate::clock::{self, EntropySource, ProcessControl};
use crate::dir::{self, DirIter, PathOpenRequest};
use crate::errno::{Errno, Result};
use crate::file;
use crate::poll::{self, Clocks, Waker};
use crate::socket::{self, Accepted, AddressInfoHints};
use crate::table::{Descriptor, DescriptorTable, Entry, Fd};
use crate::types::*;
use rustix::fd::AsFd;
use std::io::{IoSlice, IoSliceMut};
use std::sync::Mutex;

/// Everything a guest can reach, named after the WASI preview 1 hostcalls
/// it backs. Implementations are free to reject anything with `Errno`;
/// the base implementation backs every call with a real Unix syscall.
pub trait System: Send + Sync {
    fn fd_read(&self, fd: Fd, iovs: &mut [IoSliceMut<'_>]) -> Result<usize>;
    fn fd_write(&self, fd: Fd, iovs: &[IoSlice<'_>]) -> Result<usize>;
    fn fd_pread(&self, fd: Fd, iovs: &mut [IoSliceMut<'_>], offset: u64) -> Result<usize>;
    fn fd_pwrite(&self, fd: Fd, iovs: &[IoSlice<'_>], offset: u64) -> Result<usize>;
    fn fd_seek(&self, fd: Fd, offset: i64, whence: Whence) -> Result<u64>;
    fn fd_tell(&self, fd: Fd) -> Result<u64>;
    fn fd_datasync(&self, fd: Fd) -> Result<()>;
    fn fd_sync(&self, fd: Fd) -> Result<()>;
    fn fd_allocate(&self, fd: Fd, offset: u64, len: u64) -> Result<()>;
    fn fd_advise(&self, fd: Fd, offset: u64, len: u64, advice: Advice) -> Result<()>;
    fn fd_filestat_get(&self, fd: Fd) -> Result<FileStat>;
    fn fd_filestat_set_size(&self, fd: Fd, size: u64) -> Result<()>;
    fn fd_filestat_set_times(&self, fd: Fd, atim: u64, mtim: u64, fst_flags: Fstflags) -> Result<()>;
    fn fd_stat_get(&self, fd: Fd) -> Result<FdStat>;
    fn fd_stat_set_flags(&self, fd: Fd, flags: Fdflags) -> Result<()>;
    fn fd_stat_set_rights(&self, fd: Fd, base: Rights, inheriting: Rights) -> Result<()>;
    fn fd_renumber(&self, from: Fd, to: Fd) -> Result<()>;
    fn fd_close(&self, fd: Fd) -> Result<()>;
    fn fd_prestat_get(&self, fd: Fd) -> Result<PrestatDir>;
    fn fd_prestat_dir_name(&self, fd: Fd) -> Result<String>;

    fn path_open(
        &self,
        parent: Fd,
        lookup_flags: Lookupflags,
        path: &str,
        open_flags: Oflags,
        rights_base: Rights,
        rights_inheriting: Rights,
        fd_flags: Fdflags,
    ) -> Result<Fd>;
    fn path_filestat_get(&self, parent: Fd, lookup_flags: Lookupflags, path: &str) -> Result<FileStat>;
    fn path_unlink_file(&self, parent: Fd, path: &str) -> Result<()>;
    fn path_remove_directory(&self, parent: Fd, path: &str) -> Result<()>;
    fn path_create_directory(&self, parent: Fd, path: &str) -> Result<()>;
    fn path_rename(&self, old_parent: Fd, old_path: &str, new_parent: Fd, new_path: &str) -> Result<()>;
    fn path_link(
        &self,
        old_parent: Fd,
        old_lookup_flags: Lookupflags,
        old_path: &str,
        new_parent: Fd,
        new_path: &str,
    ) -> Result<()>;
    fn path_symlink(&self, old_path: &str, parent: Fd, new_path: &str) -> Result<()>;
    fn path_readlink(&self, parent: Fd, path: &str, buf: &mut [u8]) -> Result<usize>;
    fn path_filestat_set_times(
        &self,
        parent: Fd,
        lookup_flags: Lookupflags,
        path: &str,
        atim: u64,
        mtim: u64,
        fst_flags: Fstflags,
    ) -> Result<()>;

    fn fd_readdir(
        &self,
        fd: Fd,
        cookie: Dircookie,
        max_entries: usize,
        buffer_size_bytes: usize,
    ) -> Result<Vec<Dirent>>;

    fn poll_oneoff(&self, subs: &[Subscription]) -> Result<Vec<Event>>;

    fn sock_open(
        &self,
        family: AddressFamily,
        ty: SocketType,
        protocol: Protocol,
        rights_base: Rights,
        rights_inheriting: Rights,
    ) -> Result<Fd>;
    fn sock_bind(&self, fd: Fd, addr: &SocketAddress) -> Result<SocketAddress>;
    fn sock_connect(&self, fd: Fd, addr: &SocketAddress) -> Result<SocketAddress>;
    fn sock_listen(&self, fd: Fd, backlog: u32) -> Result<()>;
    fn sock_accept(&self, fd: Fd, flags: FdFlagsAccept) -> Result<Accepted>;
    fn sock_recv(&self, fd: Fd, iovs: &mut [IoSliceMut<'_>], iflags: RiFlags) -> Result<(usize, RoFlags)>;
    fn sock_send(&self, fd: Fd, iovs: &[IoSlice<'_>]) -> Result<usize>;
    fn sock_recvfrom(
        &self,
        fd: Fd,
        iovs: &mut [IoSliceMut<'_>],
        iflags: RiFlags,
    ) -> Result<(usize, RoFlags, SocketAddress)>;
    fn sock_sendto(&self, fd: Fd, iovs: &[IoSlice<'_>], addr: &SocketAddress) -> Result<usize>;
    fn sock_shutdown(&self, fd: Fd, flags: SdFlags) -> Result<()>;
    fn sock_get_opt(&self, fd: Fd, opt: SockOpt) -> Result<SockOptValue>;
    fn sock_set_opt(&self, fd: Fd, opt: SockOpt, value: SockOptValue) -> Result<()>;
    fn sock_local_address(&self, fd: Fd) -> Result<SocketAddress>;
    fn sock_remote_address(&self, fd: Fd) -> Result<SocketAddress>;
    fn sock_address_info(
        &self,
        name: &str,
        service: &str,
        hints: AddressInfoHints,
        max_results: usize,
    ) -> Result<Vec<SocketAddress>>;

    fn clock_res_get(&self, id: ClockId) -> Result<std::time::Duration>;
    fn clock_time_get(&self, id: ClockId) -> Result<std::time::Duration>;
    fn random_get(&self, buf: &mut [u8]) -> Result<()>;
    fn args_sizes_get(&self) -> (usize, usize);
    fn args_get(&self) -> Vec<Vec<u8>>;
    fn environ_sizes_get(&self) -> (usize, usize);
    fn environ_get(&self) -> Vec<Vec<u8>>;
    fn proc_exit(&self, code: u32) -> !;
    fn proc_raise(&self, signal: u8) -> Result<()>;
    fn sched_yield(&self) {
        clock::sched_yield();
    }

    /// Wakes any thread blocked in [`System::poll_oneoff`]. Idempotent.
    fn shutdown(&self);
}

/// Optional vendor socket-extension surface (WasmEdge/WASIX). The host
/// module casts its `System` to this trait and returns `ENOSYS` when the
/// cast fails, per §4.8; the base system implements it as all-`ENOSYS`.
pub trait SocketsExtension: Send + Sync {
    fn sock_getsockopt_raw(&self, fd: Fd, level: i32, name: i32) -> Result<Vec<u8>> {
        let _ = (fd, level, name);
        Err(Errno::Nosys)
    }
    fn sock_setsockopt_raw(&self, fd: Fd, level: i32, name: i32, value: &[u8]) -> Result<()> {
        let _ = (fd, level, name, value);
        Err(Errno::Nosys)
    }
}

/// The concrete Unix implementation: one [`DescriptorTable`] behind a
/// mutex, a [`Waker`] for cross-thread poll cancellation, the two clocks,
/// and the configuration collected by [`crate::builder::SystemBuilder`].
pub struct BaseSystem {
    pub(crate) table: Mutex<DescriptorTable>,
    pub(crate) waker: Waker,
    pub(crate) clocks: Clocks,
    pub(crate) args: Vec<String>,
    pub(crate) env: Vec<(String, String)>,
    pub(crate) entropy: Box<dyn EntropySource>,
    pub(crate) process_control: Option<Box<dyn ProcessControl>>,
}

impl BaseSystem {
    fn lock(&self) -> std::sync::MutexGuard<'_, DescriptorTable> {
        self.table.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl System for BaseSystem {
    fn fd_read(&self, fd: Fd, iovs: &mut [IoSliceMut<'_>]) -> Result<usize> {
        file::fd_read(&self.lock(), fd, iovs)
    }
    fn fd_write(&self, fd: Fd, iovs: &[IoSlice<'_>]) -> Result<usize> {
        file::fd_write(&self.lock(), fd, iovs)
    }
    fn fd_pread(&self, fd: Fd, iovs: &mut [IoSliceMut<'_>], offset: u64) -> Result<usize> {
        file::fd_pread(&self.lock(), fd, iovs, offset)
    }
    fn fd_pwrite(&self, fd: Fd, iovs: &[IoSlice<'_>], offset: u64) -> Result<usize> {
        file::fd_pwrite(&self.lock(), fd, iovs, offset)
    }
    fn fd_seek(&self, fd: Fd, offset: i64, whence: Whence) -> Result<u64> {
        file::fd_seek(&self.lock(), fd, offset, whence)
    }
    fn fd_tell(&self, fd: Fd) -> Result<u64> {
        file::fd_tell(&self.lock(), fd)
    }
    fn fd_datasync(&self, fd: Fd) -> Result<()> {
        file::fd_datasync(&self.lock(), fd)
    }
    fn fd_sync(&self, fd: Fd) -> Result<()> {
        file::fd_sync(&self.lock(), fd)
    }
    fn fd_allocate(&self, fd: Fd, offset: u64, len: u64) -> Result<()> {
        file::fd_allocate(&self.lock(), fd, offset, len)
    }
    fn fd_advise(&self, fd: Fd, offset: u64, len: u64, advice: Advice) -> Result<()> {
        file::fd_advise(&self.lock(), fd, offset, len, advice)
    }
    fn fd_filestat_get(&self, fd: Fd) -> Result<FileStat> {
        file::fd_filestat_get(&self.lock(), fd)
    }
    fn fd_filestat_set_size(&self, fd: Fd, size: u64) -> Result<()> {
        file::fd_filestat_set_size(&self.lock(), fd, size)
    }
    fn fd_filestat_set_times(&self, fd: Fd, atim: u64, mtim: u64, fst_flags: Fstflags) -> Result<()> {
        file::fd_filestat_set_times(&self.lock(), fd, atim, mtim, fst_flags)
    }
    fn fd_stat_get(&self, fd: Fd) -> Result<FdStat> {
        file::fd_stat_get(&self.lock(), fd)
    }
    fn fd_stat_set_flags(&self, fd: Fd, flags: Fdflags) -> Result<()> {
        file::fd_stat_set_flags(&mut self.lock(), fd, flags)
    }
    fn fd_stat_set_rights(&self, fd: Fd, base: Rights, inheriting: Rights) -> Result<()> {
        file::fd_stat_set_rights(&mut self.lock(), fd, base, inheriting)
    }
    fn fd_renumber(&self, from: Fd, to: Fd) -> Result<()> {
        file::fd_renumber(&mut self.lock(), from, to)
    }
    fn fd_close(&self, fd: Fd) -> Result<()> {
        file::fd_close(&mut self.lock(), fd)
    }
    fn fd_prestat_get(&self, fd: Fd) -> Result<PrestatDir> {
        let table = self.lock();
        let path = table.lookup_preopen_path(fd)?;
        Ok(PrestatDir::Dir { pr_name_len: path.len() })
    }
    fn fd_prestat_dir_name(&self, fd: Fd) -> Result<String> {
        let table = self.lock();
        table.lookup_preopen_path(fd).map(str::to_string)
    }

    fn path_open(
        &self,
        parent: Fd,
        lookup_flags: Lookupflags,
        path: &str,
        open_flags: Oflags,
        rights_base: Rights,
        rights_inheriting: Rights,
        fd_flags: Fdflags,
    ) -> Result<Fd> {
        let (parent_base, parent_inheriting) = {
            let table = self.lock();
            let entry = table.get(parent).ok_or(Errno::Badf)?;
            (entry.rights.base, entry.rights.inheriting)
        };
        let req = PathOpenRequest {
            parent_rights_base: parent_base,
            parent_rights_inheriting: parent_inheriting,
            lookup_flags,
            path,
            open_flags,
            requested_rights_base: rights_base,
            requested_rights_inheriting: rights_inheriting,
            fd_flags,
        };
        let narrowed = req.resolve()?;

        let table = self.lock();
        let parent_fd = {
            let entry = table.lookup_fd(parent, Rights::PATH_OPEN)?;
            entry.descriptor.as_fd()
        };
        let opened = dir::path_open_at(parent_fd, path, narrowed.host_flags)?;
        drop(table);

        let is_dir = open_flags.contains(Oflags::DIRECTORY);
        let file_type = if is_dir { Filetype::Directory } else { Filetype::RegularFile };
        let descriptor = if is_dir { Descriptor::Dir(opened) } else { Descriptor::File(opened) };
        let rights = HandleRights::new(narrowed.rights_base, narrowed.rights_inheriting);
        let mut entry = Entry::new(descriptor, file_type, rights);
        entry.flags = fd_flags;
        Ok(self.lock().insert(entry))
    }

    fn path_filestat_get(&self, parent: Fd, lookup_flags: Lookupflags, path: &str) -> Result<FileStat> {
        dir::check_path_containment(path)?;
        let host_flags = if lookup_flags.contains(Lookupflags::SYMLINK_FOLLOW) {
            rustix::fs::OFlags::RDONLY
        } else {
            rustix::fs::OFlags::RDONLY | rustix::fs::OFlags::NOFOLLOW
        };
        let table = self.lock();
        let entry = table.lookup_fd(parent, Rights::PATH_FILESTAT_GET)?;
        let parent_fd = entry.descriptor.as_fd();
        let opened = dir::path_open_at(parent_fd, path, host_flags)?;
        drop(table);
        file::filestat_of(opened.as_fd(), Filetype::Unknown)
    }

    fn path_unlink_file(&self, parent: Fd, path: &str) -> Result<()> {
        dir::check_path_containment(path)?;
        let table = self.lock();
        let entry = table.lookup_fd(parent, Rights::PATH_UNLINK_FILE)?;
        rustix::fs::unlinkat(entry.descriptor.as_fd(), path, rustix::fs::AtFlags::empty())
            .map_err(Errno::from)
    }

    fn path_remove_directory(&self, parent: Fd, path: &str) -> Result<()> {
        dir::check_path_containment(path)?;
        let table = self.lock();
        let entry = table.lookup_fd(parent, Rights::PATH_REMOVE_DIRECTORY)?;
        rustix::fs::unlinkat(entry.descriptor.as_fd(), path, rustix::fs::AtFlags::REMOVEDIR)
            .map_err(Errno::from)
    }

    fn path_create_directory(&self, parent: Fd, path: &str) -> Result<()> {
        dir::check_path_containment(path)?;
        let table = self.lock();
        let entry = table.lookup_fd(parent, Rights::PATH_CREATE_DIRECTORY)?;
        rustix::fs::mkdirat(entry.descriptor.as_fd(), path, rustix::fs::Mode::from_raw_mode(0o777))
            .map_err(Errno::from)
    }

    fn path_rename(&self, old_parent: Fd, old_path: &str, new_parent: Fd, new_path: &str) -> Result<()> {
        dir::check_path_containment(old_path)?;
        dir::check_path_containment(new_path)?;
        let table = self.lock();
        let old_entry = table.lookup_fd(old_parent, Rights::PATH_RENAME_SOURCE)?;
        let old_fd = old_entry.descriptor.as_fd();
        let new_entry = table.lookup_fd(new_parent, Rights::PATH_RENAME_TARGET)?;
        let new_fd = new_entry.descriptor.as_fd();
        rustix::fs::renameat(old_fd, old_path, new_fd, new_path).map_err(Errno::from)
    }

    fn path_link(
        &self,
        old_parent: Fd,
        old_lookup_flags: Lookupflags,
        old_path: &str,
        new_parent: Fd,
        new_path: &str,
    ) -> Result<()> {
        dir::check_path_containment(old_path)?;
        dir::check_path_containment(new_path)?;
        let table = self.lock();
        let old_entry = table.lookup_fd(old_parent, Rights::PATH_LINK_SOURCE)?;
        let old_fd = old_entry.descriptor.as_fd();
        let new_entry = table.lookup_fd(new_parent, Rights::PATH_LINK_TARGET)?;
        let new_fd = new_entry.descriptor.as_fd();
        // Not following the symlink fails on most filesystems, matching the
        // source's choice to always pass AT_SYMLINK_FOLLOW here.
        let _ = old_lookup_flags;
        rustix::fs::linkat(old_fd, old_path, new_fd, new_path, rustix::fs::AtFlags::SYMLINK_FOLLOW)
            .map_err(Errno::from)
    }

    fn path_symlink(&self, old_path: &str, parent: Fd, new_path: &str) -> Result<()> {
        // `old_path` is the link's target string, not a path under this
        // sandbox: it is not containment-checked, only `new_path` is.
        dir::check_path_containment(new_path)?;
        let table = self.lock();
        let entry = table.lookup_fd(parent, Rights::PATH_SYMLINK)?;
        rustix::fs::symlinkat(old_path, entry.descriptor.as_fd(), new_path).map_err(Errno::from)
    }

    fn path_readlink(&self, parent: Fd, path: &str, buf: &mut [u8]) -> Result<usize> {
        dir::check_path_containment(path)?;
        let table = self.lock();
        let entry = table.lookup_fd(parent, Rights::PATH_READLINK)?;
        let target = rustix::fs::readlinkat(entry.descriptor.as_fd(), path, Vec::new())
            .map_err(Errno::from)?;
        let bytes = target.as_bytes();
        let n = bytes.len().min(buf.len());
        buf[..n].copy_from_slice(&bytes[..n]);
        Ok(n)
    }

    fn path_filestat_set_times(
        &self,
        parent: Fd,
        lookup_flags: Lookupflags,
        path: &str,
        atim: u64,
        mtim: u64,
        fst_flags: Fstflags,
    ) -> Result<()> {
        dir::check_path_containment(path)?;
        let at_flags = if lookup_flags.contains(Lookupflags::SYMLINK_FOLLOW) {
            rustix::fs::AtFlags::empty()
        } else {
            rustix::fs::AtFlags::SYMLINK_NOFOLLOW
        };
        let table = self.lock();
        let entry = table.lookup_fd(parent, Rights::PATH_FILESTAT_SET_TIMES)?;
        let times = file::timestamps_from_fstflags(atim, mtim, fst_flags);
        rustix::fs::utimensat(entry.descriptor.as_fd(), path, &times, at_flags).map_err(Errno::from)
    }

    fn fd_readdir(
        &self,
        fd: Fd,
        cookie: Dircookie,
        max_entries: usize,
        buffer_size_bytes: usize,
    ) -> Result<Vec<Dirent>> {
        let mut table = self.lock();
        table.lookup_fd(fd, Rights::FD_READDIR)?;
        let iter = if table.dir_iter(fd).is_some() {
            table.dir_iter(fd).unwrap()
        } else {
            let dup = {
                let entry = table.get(fd).ok_or(Errno::Badf)?;
                match entry.descriptor {
                    Descriptor::Dir(_) => {}
                    _ => return Err(Errno::Notdir),
                }
                rustix::io::dup(entry.descriptor.as_fd()).map_err(Errno::from)?
            };
            table.set_dir_iter(fd, DirIter::new(dup)?)
        };
        let mut out = Vec::new();
        iter.read_dir_entries(&mut out, cookie, max_entries, buffer_size_bytes)?;
        Ok(out)
    }

    fn poll_oneoff(&self, subs: &[Subscription]) -> Result<Vec<Event>> {
        let table = self.lock();
        poll::poll_oneoff(&table, &self.waker, &self.clocks, subs)
    }

    fn sock_open(
        &self,
        family: AddressFamily,
        ty: SocketType,
        protocol: Protocol,
        rights_base: Rights,
        rights_inheriting: Rights,
    ) -> Result<Fd> {
        socket::sock_open(&mut self.lock(), family, ty, protocol, rights_base, rights_inheriting)
    }
    fn sock_bind(&self, fd: Fd, addr: &SocketAddress) -> Result<SocketAddress> {
        socket::sock_bind(&self.lock(), fd, addr)
    }
    fn sock_connect(&self, fd: Fd, addr: &SocketAddress) -> Result<SocketAddress> {
        socket::sock_connect(&self.lock(), fd, addr)
    }
    fn sock_listen(&self, fd: Fd, backlog: u32) -> Result<()> {
        socket::sock_listen(&self.lock(), fd, backlog)
    }
    fn sock_accept(&self, fd: Fd, flags: FdFlagsAccept) -> Result<Accepted> {
        socket::sock_accept(&mut self.lock(), fd, flags)
    }
    fn sock_recv(&self, fd: Fd, iovs: &mut [IoSliceMut<'_>], iflags: RiFlags) -> Result<(usize, RoFlags)> {
        socket::sock_recv(&self.lock(), fd, iovs, iflags)
    }
    fn sock_send(&self, fd: Fd, iovs: &[IoSlice<'_>]) -> Result<usize> {
        socket::sock_send(&self.lock(), fd, iovs)
    }
    fn sock_recvfrom(
        &self,
        fd: Fd,
        iovs: &mut [IoSliceMut<'_>],
        iflags: RiFlags,
    ) -> Result<(usize, RoFlags, SocketAddress)> {
        socket::sock_recvfrom(&self.lock(), fd, iovs, iflags)
    }
    fn sock_sendto(&self, fd: Fd, iovs: &[IoSlice<'_>], addr: &SocketAddress) -> Result<usize> {
        socket::sock_sendto(&self.lock(), fd, iovs, addr)
    }
    fn sock_shutdown(&self, fd: Fd, flags: SdFlags) -> Result<()> {
        socket::sock_shutdown(&self.lock(), fd, flags)
    }
    fn sock_get_opt(&self, fd: Fd, opt: SockOpt) -> Result<SockOptValue> {
        socket::sock_get_opt(&self.lock(), fd, opt)
    }
    fn sock_set_opt(&self, fd: Fd, opt: SockOpt, value: SockOptValue) -> Result<()> {
        socket::sock_set_opt(&self.lock(), fd, opt, value)
    }
    fn sock_local_address(&self, fd: Fd) -> Result<SocketAddress> {
        socket::sock_local_address(&self.lock(), fd)
    }
    fn sock_remote_address(&self, fd: Fd) -> Result<SocketAddress> {
        socket::sock_remote_address(&self.lock(), fd)
    }
    fn sock_address_info(
        &self,
        name: &str,
        service: &str,
        hints: AddressInfoHints,
        max_results: usize,
    ) -> Result<Vec<SocketAddress>> {
        socket::sock_address_info(name, service, hints, max_results)
    }

    fn clock_res_get(&self, id: ClockId) -> Result<std::time::Duration> {
        clock::clock_res_get(id)
    }
    fn clock_time_get(&self, id: ClockId) -> Result<std::time::Duration> {
        clock::clock_time_get(id, || (self.clocks.realtime)(), || (self.clocks.monotonic)())
    }
    fn random_get(&self, buf: &mut [u8]) -> Result<()> {
        clock::random_get(self.entropy.as_ref(), buf)
    }
    fn args_sizes_get(&self) -> (usize, usize) {
        clock::args_sizes_get(&self.args)
    }
    fn args_get(&self) -> Vec<Vec<u8>> {
        clock::args_get(&self.args)
    }
    fn environ_sizes_get(&self) -> (usize, usize) {
        clock::environ_sizes_get(&self.env)
    }
    fn environ_get(&self) -> Vec<Vec<u8>> {
        clock::environ_get(&self.env)
    }
    fn proc_exit(&self, code: u32) -> ! {
        clock::proc_exit(self.process_control.as_deref(), code)
    }
    fn proc_raise(&self, signal: u8) -> Result<()> {
        clock::proc_raise(self.process_control.as_deref(), signal)
    }

    fn shutdown(&self) {
        self.waker.shutdown();
    }
}

impl SocketsExtension for BaseSystem {}

/// Wraps an inner `System`, opening a `tracing` span around every call
/// (§4.9). Errors are logged at `DEBUG`; this does not change behavior.
pub struct TracingSystem<S> {
    inner: S,
}

impl<S: System> TracingSystem<S> {
    pub fn new(inner: S) -> Self {
        TracingSystem { inner }
    }
}

macro_rules! traced {
    ($self:ident, $name:literal, $call:expr) => {{
        let _span = tracing::span!(tracing::Level::DEBUG, $name).entered();
        let result = $call;
        if let Err(ref e) = result {
            tracing::debug!(errno = %e, call = $name, "call failed");
        }
        result
    }};
}

impl<S: System> System for TracingSystem<S> {
    fn fd_read(&self, fd: Fd, iovs: &mut [IoSliceMut<'_>]) -> Result<usize> {
        traced!(self, "fd_read", self.inner.fd_read(fd, iovs))
    }
    fn fd_write(&self, fd: Fd, iovs: &[IoSlice<'_>]) -> Result<usize> {
        traced!(self, "fd_write", self.inner.fd_write(fd, iovs))
    }
    fn fd_pread(&self, fd: Fd, iovs: &mut [IoSliceMut<'_>], offset: u64) -> Result<usize> {
        traced!(self, "fd_pread", self.inner.fd_pread(fd, iovs, offset))
    }
    fn fd_pwrite(&self, fd: Fd, iovs: &[IoSlice<'_>], offset: u64) -> Result<usize> {
        traced!(self, "fd_pwrite", self.inner.fd_pwrite(fd, iovs, offset))
    }
    fn fd_seek(&self, fd: Fd, offset: i64, whence: Whence) -> Result<u64> {
        traced!(self, "fd_seek", self.inner.fd_seek(fd, offset, whence))
    }
    fn fd_tell(&self, fd: Fd) -> Result<u64> {
        traced!(self, "fd_tell", self.inner.fd_tell(fd))
    }
    fn fd_datasync(&self, fd: Fd) -> Result<()> {
        traced!(self, "fd_datasync", self.inner.fd_datasync(fd))
    }
    fn fd_sync(&self, fd: Fd) -> Result<()> {
        traced!(self, "fd_sync", self.inner.fd_sync(fd))
    }
    fn fd_allocate(&self, fd: Fd, offset: u64, len: u64) -> Result<()> {
        traced!(self, "fd_allocate", self.inner.fd_allocate(fd, offset, len))
    }
    fn fd_advise(&self, fd: Fd, offset: u64, len: u64, advice: Advice) -> Result<()> {
        traced!(self, "fd_advise", self.inner.fd_advise(fd, offset, len, advice))
    }
    fn fd_filestat_get(&self, fd: Fd) -> Result<FileStat> {
        traced!(self, "fd_filestat_get", self.inner.fd_filestat_get(fd))
    }
    fn fd_filestat_set_size(&self, fd: Fd, size: u64) -> Result<()> {
        traced!(self, "fd_filestat_set_size", self.inner.fd_filestat_set_size(fd, size))
    }
    fn fd_filestat_set_times(&self, fd: Fd, atim: u64, mtim: u64, fst_flags: Fstflags) -> Result<()> {
        traced!(self, "fd_filestat_set_times", self.inner.fd_filestat_set_times(fd, atim, mtim, fst_flags))
    }
    fn fd_stat_get(&self, fd: Fd) -> Result<FdStat> {
        traced!(self, "fd_stat_get", self.inner.fd_stat_get(fd))
    }
    fn fd_stat_set_flags(&self, fd: Fd, flags: Fdflags) -> Result<()> {
        traced!(self, "fd_stat_set_flags", self.inner.fd_stat_set_flags(fd, flags))
    }
    fn fd_stat_set_rights(&self, fd: Fd, base: Rights, inheriting: Rights) -> Result<()> {
        traced!(self, "fd_stat_set_rights", self.inner.fd_stat_set_rights(fd, base, inheriting))
    }
    fn fd_renumber(&self, from: Fd, to: Fd) -> Result<()> {
        traced!(self, "fd_renumber", self.inner.fd_renumber(from, to))
    }
    fn fd_close(&self, fd: Fd) -> Result<()> {
        traced!(self, "fd_close", self.inner.fd_close(fd))
    }
    fn fd_prestat_get(&self, fd: Fd) -> Result<PrestatDir> {
        traced!(self, "fd_prestat_get", self.inner.fd_prestat_get(fd))
    }
    fn fd_prestat_dir_name(&self, fd: Fd) -> Result<String> {
        traced!(self, "fd_prestat_dir_name", self.inner.fd_prestat_dir_name(fd))
    }
    fn path_open(
        &self,
        parent: Fd,
        lookup_flags: Lookupflags,
        path: &str,
        open_flags: Oflags,
        rights_base: Rights,
        rights_inheriting: Rights,
        fd_flags: Fdflags,
    ) -> Result<Fd> {
        traced!(
            self,
            "path_open",
            self.inner.path_open(parent, lookup_flags, path, open_flags, rights_base, rights_inheriting, fd_flags)
        )
    }
    fn path_filestat_get(&self, parent: Fd, lookup_flags: Lookupflags, path: &str) -> Result<FileStat> {
        traced!(self, "path_filestat_get", self.inner.path_filestat_get(parent, lookup_flags, path))
    }
    fn path_unlink_file(&self, parent: Fd, path: &str) -> Result<()> {
        traced!(self, "path_unlink_file", self.inner.path_unlink_file(parent, path))
    }
    fn path_remove_directory(&self, parent: Fd, path: &str) -> Result<()> {
        traced!(self, "path_remove_directory", self.inner.path_remove_directory(parent, path))
    }
    fn path_create_directory(&self, parent: Fd, path: &str) -> Result<()> {
        traced!(self, "path_create_directory", self.inner.path_create_directory(parent, path))
    }
    fn path_rename(&self, old_parent: Fd, old_path: &str, new_parent: Fd, new_path: &str) -> Result<()> {
        traced!(self, "path_rename", self.inner.path_rename(old_parent, old_path, new_parent, new_path))
    }
    fn path_link(
        &self,
        old_parent: Fd,
        old_lookup_flags: Lookupflags,
        old_path: &str,
        new_parent: Fd,
        new_path: &str,
    ) -> Result<()> {
        traced!(
            self,
            "path_link",
            self.inner.path_link(old_parent, old_lookup_flags, old_path, new_parent, new_path)
        )
    }
    fn path_symlink(&self, old_path: &str, parent: Fd, new_path: &str) -> Result<()> {
        traced!(self, "path_symlink", self.inner.path_symlink(old_path, parent, new_path))
    }
    fn path_readlink(&self, parent: Fd, path: &str, buf: &mut [u8]) -> Result<usize> {
        traced!(self, "path_readlink", self.inner.path_readlink(parent, path, buf))
    }
    fn path_filestat_set_times(
        &self,
        parent: Fd,
        lookup_flags: Lookupflags,
        path: &str,
        atim: u64,
        mtim: u64,
        fst_flags: Fstflags,
    ) -> Result<()> {
        traced!(
            self,
            "path_filestat_set_times",
            self.inner.path_filestat_set_times(parent, lookup_flags, path, atim, mtim, fst_flags)
        )
    }
    fn fd_readdir(
        &self,
        fd: Fd,
        cookie: Dircookie,
        max_entries: usize,
        buffer_size_bytes: usize,
    ) -> Result<Vec<Dirent>> {
        traced!(self, "fd_readdir", self.inner.fd_readdir(fd, cookie, max_entries, buffer_size_bytes))
    }
    fn poll_oneoff(&self, subs: &[Subscription]) -> Result<Vec<Event>> {
        traced!(self, "poll_oneoff", self.inner.poll_oneoff(subs))
    }
    fn sock_open(
        &self,
        family: AddressFamily,
        ty: SocketType,
        protocol: Protocol,
        rights_base: Rights,
        rights_inheriting: Rights,
    ) -> Result<Fd> {
        traced!(self, "sock_open", self.inner.sock_open(family, ty, protocol, rights_base, rights_inheriting))
    }
    fn sock_bind(&self, fd: Fd, addr: &SocketAddress) -> Result<SocketAddress> {
        traced!(self, "sock_bind", self.inner.sock_bind(fd, addr))
    }
    fn sock_connect(&self, fd: Fd, addr: &SocketAddress) -> Result<SocketAddress> {
        traced!(self, "sock_connect", self.inner.sock_connect(fd, addr))
    }
    fn sock_listen(&self, fd: Fd, backlog: u32) -> Result<()> {
        traced!(self, "sock_listen", self.inner.sock_listen(fd, backlog))
    }
    fn sock_accept(&self, fd: Fd, flags: FdFlagsAccept) -> Result<Accepted> {
        traced!(self, "sock_accept", self.inner.sock_accept(fd, flags))
    }
    fn sock_recv(&self, fd: Fd, iovs: &mut [IoSliceMut<'_>], iflags: RiFlags) -> Result<(usize, RoFlags)> {
        traced!(self, "sock_recv", self.inner.sock_recv(fd, iovs, iflags))
    }
    fn sock_send(&self, fd: Fd, iovs: &[IoSlice<'_>]) -> Result<usize> {
        traced!(self, "sock_send", self.inner.sock_send(fd, iovs))
    }
    fn sock_recvfrom(
        &self,
        fd: Fd,
        iovs: &mut [IoSliceMut<'_>],
        iflags: RiFlags,
    ) -> Result<(usize, RoFlags, SocketAddress)> {
        traced!(self, "sock_recvfrom", self.inner.sock_recvfrom(fd, iovs, iflags))
    }
    fn sock_sendto(&self, fd: Fd, iovs: &[IoSlice<'_>], addr: &SocketAddress) -> Result<usize> {
        traced!(self, "sock_sendto", self.inner.sock_sendto(fd, iovs, addr))
    }
    fn sock_shutdown(&self, fd: Fd, flags: SdFlags) -> Result<()> {
        traced!(self, "sock_shutdown", self.inner.sock_shutdown(fd, flags))
    }
    fn sock_get_opt(&self, fd: Fd, opt: SockOpt) -> Result<SockOptValue> {
        traced!(self, "sock_get_opt", self.inner.sock_get_opt(fd, opt))
    }
    fn sock_set_opt(&self, fd: Fd, opt: SockOpt, value: SockOptValue) -> Result<()> {
        traced!(self, "sock_set_opt", self.inner.sock_set_opt(fd, opt, value))
    }
    fn sock_local_address(&self, fd: Fd) -> Result<SocketAddress> {
        traced!(self, "sock_local_address", self.inner.sock_local_address(fd))
    }
    fn sock_remote_address(&self, fd: Fd) -> Result<SocketAddress> {
        traced!(self, "sock_remote_address", self.inner.sock_remote_address(fd))
    }
    fn sock_address_info(
        &self,
        name: &str,
        service: &str,
        hints: AddressInfoHints,
        max_results: usize,
    ) -> Result<Vec<SocketAddress>> {
        traced!(self, "sock_address_info", self.inner.sock_address_info(name, service, hints, max_results))
    }
    fn clock_res_get(&self, id: ClockId) -> Result<std::time::Duration> {
        self.inner.clock_res_get(id)
    }
    fn clock_time_get(&self, id: ClockId) -> Result<std::time::Duration> {
        self.inner.clock_time_get(id)
    }
    fn random_get(&self, buf: &mut [u8]) -> Result<()> {
        self.inner.random_get(buf)
    }
    fn args_sizes_get(&self) -> (usize, usize) {
        self.inner.args_sizes_get()
    }
    fn args_get(&self) -> Vec<Vec<u8>> {
        self.inner.args_get()
    }
    fn environ_sizes_get(&self) -> (usize, usize) {
        self.inner.environ_sizes_get()
    }
    fn environ_get(&self) -> Vec<Vec<u8>> {
        self.inner.environ_get()
    }
    fn proc_exit(&self, code: u32) -> ! {
        self.inner.proc_exit(code)
    }
    fn proc_raise(&self, signal: u8) -> Result<()> {
        self.inner.proc_raise(signal)
    }
    fn shutdown(&self) {
        self.inner.shutdown()
    }
}

fn parse_tcp_uri(path: &str) -> Option<(bool, &str)> {
    if let Some(rest) = path.strip_prefix("tcp+listen://") {
        Some((true, rest))
    } else if let Some(rest) = path.strip_prefix("tcp+dial://") {
        Some((false, rest))
    } else {
        None
    }
}

/// Optional adapter letting `path_open` of a `tcp+listen://host:port` or
/// `tcp+dial://host:port` URI hand back a socket descriptor instead of
/// opening a file, for guests that want to request a listener or an
/// outbound connection through the same call they use for files.
/// Every other call passes straight through to `inner`.
pub struct PathOpenSockets<S> {
    inner: S,
}

impl<S: System> PathOpenSockets<S> {
    pub fn new(inner: S) -> Self {
        PathOpenSockets { inner }
    }

    fn open_tcp_uri(&self, listen: bool, hostport: &str, rights_base: Rights, rights_inheriting: Rights) -> Result<Fd> {
        use std::net::ToSocketAddrs;
        let std_addr = hostport.to_socket_addrs().map_err(|_| Errno::Inval)?.next().ok_or(Errno::Inval)?;
        let addr = SocketAddress::from(std_addr);
        let fd =
            self.inner.sock_open(addr.family(), SocketType::StreamSocket, Protocol::Tcp, rights_base, rights_inheriting)?;
        if listen {
            self.inner.sock_bind(fd, &addr)?;
            self.inner.sock_listen(fd, 128)?;
        } else {
            self.inner.sock_connect(fd, &addr)?;
        }
        Ok(fd)
    }
}

impl<S: System> System for PathOpenSockets<S> {
    fn fd_read(&self, fd: Fd, iovs: &mut [IoSliceMut<'_>]) -> Result<usize> {
        self.inner.fd_read(fd, iovs)
    }
    fn fd_write(&self, fd: Fd, iovs: &[IoSlice<'_>]) -> Result<usize> {
        self.inner.fd_write(fd, iovs)
    }
    fn fd_pread(&self, fd: Fd, iovs: &mut [IoSliceMut<'_>], offset: u64) -> Result<usize> {
        self.inner.fd_pread(fd, iovs, offset)
    }
    fn fd_pwrite(&self, fd: Fd, iovs: &[IoSlice<'_>], offset: u64) -> Result<usize> {
        self.inner.fd_pwrite(fd, iovs, offset)
    }
    fn fd_seek(&self, fd: Fd, offset: i64, whence: Whence) -> Result<u64> {
        self.inner.fd_seek(fd, offset, whence)
    }
    fn fd_tell(&self, fd: Fd) -> Result<u64> {
        self.inner.fd_tell(fd)
    }
    fn fd_datasync(&self, fd: Fd) -> Result<()> {
        self.inner.fd_datasync(fd)
    }
    fn fd_sync(&self, fd: Fd) -> Result<()> {
        self.inner.fd_sync(fd)
    }
    fn fd_allocate(&self, fd: Fd, offset: u64, len: u64) -> Result<()> {
        self.inner.fd_allocate(fd, offset, len)
    }
    fn fd_advise(&self, fd: Fd, offset: u64, len: u64, advice: Advice) -> Result<()> {
        self.inner.fd_advise(fd, offset, len, advice)
    }
    fn fd_filestat_get(&self, fd: Fd) -> Result<FileStat> {
        self.inner.fd_filestat_get(fd)
    }
    fn fd_filestat_set_size(&self, fd: Fd, size: u64) -> Result<()> {
        self.inner.fd_filestat_set_size(fd, size)
    }
    fn fd_filestat_set_times(&self, fd: Fd, atim: u64, mtim: u64, fst_flags: Fstflags) -> Result<()> {
        self.inner.fd_filestat_set_times(fd, atim, mtim, fst_flags)
    }
    fn fd_stat_get(&self, fd: Fd) -> Result<FdStat> {
        self.inner.fd_stat_get(fd)
    }
    fn fd_stat_set_flags(&self, fd: Fd, flags: Fdflags) -> Result<()> {
        self.inner.fd_stat_set_flags(fd, flags)
    }
    fn fd_stat_set_rights(&self, fd: Fd, base: Rights, inheriting: Rights) -> Result<()> {
        self.inner.fd_stat_set_rights(fd, base, inheriting)
    }
    fn fd_renumber(&self, from: Fd, to: Fd) -> Result<()> {
        self.inner.fd_renumber(from, to)
    }
    fn fd_close(&self, fd: Fd) -> Result<()> {
        self.inner.fd_close(fd)
    }
    fn fd_prestat_get(&self, fd: Fd) -> Result<PrestatDir> {
        self.inner.fd_prestat_get(fd)
    }
    fn fd_prestat_dir_name(&self, fd: Fd) -> Result<String> {
        self.inner.fd_prestat_dir_name(fd)
    }
    fn path_open(
        &self,
        parent: Fd,
        lookup_flags: Lookupflags,
        path: &str,
        open_flags: Oflags,
        rights_base: Rights,
        rights_inheriting: Rights,
        fd_flags: Fdflags,
    ) -> Result<Fd> {
        if let Some((listen, hostport)) = parse_tcp_uri(path) {
            return self.open_tcp_uri(listen, hostport, rights_base, rights_inheriting);
        }
        self.inner.path_open(parent, lookup_flags, path, open_flags, rights_base, rights_inheriting, fd_flags)
    }
    fn path_filestat_get(&self, parent: Fd, lookup_flags: Lookupflags, path: &str) -> Result<FileStat> {
        self.inner.path_filestat_get(parent, lookup_flags, path)
    }
    fn path_unlink_file(&self, parent: Fd, path: &str) -> Result<()> {
        self.inner.path_unlink_file(parent, path)
    }
    fn path_remove_directory(&self, parent: Fd, path: &str) -> Result<()> {
        self.inner.path_remove_directory(parent, path)
    }
    fn path_create_directory(&self, parent: Fd, path: &str) -> Result<()> {
        self.inner.path_create_directory(parent, path)
    }
    fn path_rename(&self, old_parent: Fd, old_path: &str, new_parent: Fd, new_path: &str) -> Result<()> {
        self.inner.path_rename(old_parent, old_path, new_parent, new_path)
    }
    fn path_link(
        &self,
        old_parent: Fd,
        old_lookup_flags: Lookupflags,
        old_path: &str,
        new_parent: Fd,
        new_path: &str,
    ) -> Result<()> {
        self.inner.path_link(old_parent, old_lookup_flags, old_path, new_parent, new_path)
    }
    fn path_symlink(&self, old_path: &str, parent: Fd, new_path: &str) -> Result<()> {
        self.inner.path_symlink(old_path, parent, new_path)
    }
    fn path_readlink(&self, parent: Fd, path: &str, buf: &mut [u8]) -> Result<usize> {
        self.inner.path_readlink(parent, path, buf)
    }
    fn path_filestat_set_times(
        &self,
        parent: Fd,
        lookup_flags: Lookupflags,
        path: &str,
        atim: u64,
        mtim: u64,
        fst_flags: Fstflags,
    ) -> Result<()> {
        self.inner.path_filestat_set_times(parent, lookup_flags, path, atim, mtim, fst_flags)
    }
    fn fd_readdir(
        &self,
        fd: Fd,
        cookie: Dircookie,
        max_entries: usize,
        buffer_size_bytes: usize,
    ) -> Result<Vec<Dirent>> {
        self.inner.fd_readdir(fd, cookie, max_entries, buffer_size_bytes)
    }
    fn poll_oneoff(&self, subs: &[Subscription]) -> Result<Vec<Event>> {
        self.inner.poll_oneoff(subs)
    }
    fn sock_open(
        &self,
        family: AddressFamily,
        ty: SocketType,
        protocol: Protocol,
        rights_base: Rights,
        rights_inheriting: Rights,
    ) -> Result<Fd> {
        self.inner.sock_open(family, ty, protocol, rights_base, rights_inheriting)
    }
    fn sock_bind(&self, fd: Fd, addr: &SocketAddress) -> Result<SocketAddress> {
        self.inner.sock_bind(fd, addr)
    }
    fn sock_connect(&self, fd: Fd, addr: &SocketAddress) -> Result<SocketAddress> {
        self.inner.sock_connect(fd, addr)
    }
    fn sock_listen(&self, fd: Fd, backlog: u32) -> Result<()> {
        self.inner.sock_listen(fd, backlog)
    }
    fn sock_accept(&self, fd: Fd, flags: FdFlagsAccept) -> Result<Accepted> {
        self.inner.sock_accept(fd, flags)
    }
    fn sock_recv(&self, fd: Fd, iovs: &mut [IoSliceMut<'_>], iflags: RiFlags) -> Result<(usize, RoFlags)> {
        self.inner.sock_recv(fd, iovs, iflags)
    }
    fn sock_send(&self, fd: Fd, iovs: &[IoSlice<'_>]) -> Result<usize> {
        self.inner.sock_send(fd, iovs)
    }
    fn sock_recvfrom(
        &self,
        fd: Fd,
        iovs: &mut [IoSliceMut<'_>],
        iflags: RiFlags,
    ) -> Result<(usize, RoFlags, SocketAddress)> {
        self.inner.sock_recvfrom(fd, iovs, iflags)
    }
    fn sock_sendto(&self, fd: Fd, iovs: &[IoSlice<'_>], addr: &SocketAddress) -> Result<usize> {
        self.inner.sock_sendto(fd, iovs, addr)
    }
    fn sock_shutdown(&self, fd: Fd, flags: SdFlags) -> Result<()> {
        self.inner.sock_shutdown(fd, flags)
    }
    fn sock_get_opt(&self, fd: Fd, opt: SockOpt) -> Result<SockOptValue> {
        self.inner.sock_get_opt(fd, opt)
    }
    fn sock_set_opt(&self, fd: Fd, opt: SockOpt, value: SockOptValue) -> Result<()> {
        self.inner.sock_set_opt(fd, opt, value)
    }
    fn sock_local_address(&self, fd: Fd) -> Result<SocketAddress> {
        self.inner.sock_local_address(fd)
    }
    fn sock_remote_address(&self, fd: Fd) -> Result<SocketAddress> {
        self.inner.sock_remote_address(fd)
    }
    fn sock_address_info(
        &self,
        name: &str,
        service: &str,
        hints: AddressInfoHints,
        max_results: usize,
    ) -> Result<Vec<SocketAddress>> {
        self.inner.sock_address_info(name, service, hints, max_results)
    }
    fn clock_res_get(&self, id: ClockId) -> Result<std::time::Duration> {
        self.inner.clock_res_get(id)
    }
    fn clock_time_get(&self, id: ClockId) -> Result<std::time::Duration> {
        self.inner.clock_time_get(id)
    }
    fn random_get(&self, buf: &mut [u8]) -> Result<()> {
        self.inner.random_get(buf)
    }
    fn args_sizes_get(&self) -> (usize, usize) {
        self.inner.args_sizes_get()
    }
    fn args_get(&self) -> Vec<Vec<u8>> {
        self.inner.args_get()
    }
    fn environ_sizes_get(&self) -> (usize, usize) {
        self.inner.environ_sizes_get()
    }
    fn environ_get(&self) -> Vec<Vec<u8>> {
        self.inner.environ_get()
    }
    fn proc_exit(&self, code: u32) -> ! {
        self.inner.proc_exit(code)
    }
    fn proc_raise(&self, signal: u8) -> Result<()> {
        self.inner.proc_raise(signal)
    }
    fn shutdown(&self) {
        self.inner.shutdown()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::OsEntropySource;

    fn test_system() -> BaseSystem {
        BaseSystem {
            table: Mutex::new(DescriptorTable::new()),
            waker: Waker::new().unwrap(),
            clocks: Clocks {
                realtime: Box::new(|| std::time::Duration::from_secs(0)),
                monotonic: Box::new(|| std::time::Instant::now().elapsed()),
            },
            args: vec!["prog".to_string()],
            env: vec![],
            entropy: Box::new(OsEntropySource),
            process_control: None,
        }
    }

    #[test]
    fn args_roundtrip_through_trait_object() {
        let sys: Box<dyn System> = Box::new(test_system());
        assert_eq!(sys.args_sizes_get(), (1, 5));
    }

    #[test]
    fn unknown_fd_is_badf_through_trait_object() {
        let sys: Box<dyn System> = Box::new(test_system());
        assert_eq!(sys.fd_stat_get(42), Err(Errno::Badf));
    }

    #[test]
    fn tracing_decorator_forwards_results_unchanged() {
        let inner = test_system();
        let traced = TracingSystem::new(inner);
        assert_eq!(traced.fd_stat_get(42), Err(Errno::Badf));
    }

    #[test]
    fn path_open_listen_uri_yields_bound_listening_socket() {
        let system = PathOpenSockets::new(test_system());
        let fd = system.path_open(
            0,
            Lookupflags::empty(),
            "tcp+listen://127.0.0.1:0",
            Oflags::empty(),
            Rights::socket_base(),
            Rights::socket_inheriting(),
            Fdflags::empty(),
        );
        let fd = fd.expect("listen uri opens a socket");
        let addr = system.sock_local_address(fd).unwrap();
        match addr {
            SocketAddress::Inet4 { port, .. } => assert_ne!(port, 0, "kernel assigns the ephemeral port"),
            other => panic!("unexpected address family: {other:?}"),
        }
    }

    fn preopened_dir_system() -> (BaseSystem, tempfile::TempDir, Fd) {
        let tmp = tempfile::tempdir().unwrap();
        let system = test_system();
        let opened = rustix::fs::open(
            tmp.path(),
            rustix::fs::OFlags::RDONLY | rustix::fs::OFlags::DIRECTORY,
            rustix::fs::Mode::empty(),
        )
        .unwrap();
        let mut entry = Entry::new(
            Descriptor::Dir(opened),
            Filetype::Directory,
            HandleRights::new(Rights::directory_base(), Rights::directory_inheriting()),
        );
        entry.preopen_path = Some("/".to_string());
        let fd = system.lock().insert(entry);
        (system, tmp, fd)
    }

    #[test]
    fn path_rename_moves_file_within_preopen() {
        let (system, tmp, fd) = preopened_dir_system();
        std::fs::File::create(tmp.path().join("old")).unwrap();
        system.path_rename(fd, "old", fd, "new").unwrap();
        assert!(!tmp.path().join("old").exists());
        assert!(tmp.path().join("new").exists());
    }

    #[test]
    fn path_link_creates_second_name() {
        let (system, tmp, fd) = preopened_dir_system();
        std::fs::File::create(tmp.path().join("a")).unwrap();
        system.path_link(fd, Lookupflags::empty(), "a", fd, "b").unwrap();
        assert!(tmp.path().join("b").exists());
    }

    #[test]
    fn path_symlink_then_readlink_round_trips_target() {
        let (system, tmp, fd) = preopened_dir_system();
        system.path_symlink("target-does-not-exist", fd, "link").unwrap();
        let meta = std::fs::symlink_metadata(tmp.path().join("link")).unwrap();
        assert!(meta.file_type().is_symlink());

        let mut buf = [0u8; 64];
        let n = system.path_readlink(fd, "link", &mut buf).unwrap();
        assert_eq!(&buf[..n], b"target-does-not-exist");
    }

    #[test]
    fn path_filestat_set_times_updates_mtime() {
        let (system, tmp, fd) = preopened_dir_system();
        std::fs::File::create(tmp.path().join("f")).unwrap();
        system
            .path_filestat_set_times(fd, Lookupflags::empty(), "f", 0, 0, Fstflags::MTIM_NOW)
            .unwrap();
        let stat = system.path_filestat_get(fd, Lookupflags::empty(), "f").unwrap();
        assert!(stat.mtim > 0);
    }

    #[test]
    fn path_open_without_tcp_prefix_falls_through_to_inner() {
        let system = PathOpenSockets::new(test_system());
        let result = system.path_open(
            0,
            Lookupflags::empty(),
            "/etc/hosts",
            Oflags::empty(),
            Rights::empty(),
            Rights::empty(),
            Fdflags::empty(),
        );
        assert_eq!(result, Err(Errno::Badf), "fd 0 in test_system carries no directory");
    }
}
