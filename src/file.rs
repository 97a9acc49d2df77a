//! Per-descriptor file operations (§4.2): blocking calls retry whole on
//! `EINTR`, vectored I/O only retries on `EINTR` if nothing transferred yet,
//! grounded on the retry placement in `wasi-common`'s hostcalls layer
//! (translated here from `nix`/libc onto `rustix`).

use crate::errno::{Errno, Result};
use crate::table::{Descriptor, DescriptorTable, Fd};
use crate::types::{Advice, FdStat, Fdflags, FileStat, Filetype, Fstflags, Rights, Whence};
use rustix::fd::BorrowedFd;
use rustix::fs::{OFlags, Timestamps};
use std::io::{IoSlice, IoSliceMut};

/// Run `f` until it doesn't return `EINTR`. Used for the "blocking
/// operations" class of §4.2 (advise, allocate, datasync, sync, fstat,
/// ftruncate, seek, ...).
fn retry_eintr<T>(mut f: impl FnMut() -> rustix::io::Result<T>) -> rustix::io::Result<T> {
    loop {
        match f() {
            Err(rustix::io::Errno::INTR) => continue,
            other => return other,
        }
    }
}

pub fn fd_read(table: &DescriptorTable, fd: Fd, iovs: &mut [IoSliceMut<'_>]) -> Result<usize> {
    let entry = table.lookup_fd(fd, Rights::FD_READ)?;
    let bfd = entry.descriptor.as_fd();
    io_retry(|| rustix::io::readv(bfd, iovs))
}

pub fn fd_write(table: &DescriptorTable, fd: Fd, iovs: &[IoSlice<'_>]) -> Result<usize> {
    let entry = table.lookup_fd(fd, Rights::FD_WRITE)?;
    let bfd = entry.descriptor.as_fd();
    io_retry(|| rustix::io::writev(bfd, iovs))
}

pub fn fd_pread(
    table: &DescriptorTable,
    fd: Fd,
    iovs: &mut [IoSliceMut<'_>],
    offset: u64,
) -> Result<usize> {
    let entry = table.lookup_fd(fd, Rights::FD_READ | Rights::FD_SEEK)?;
    let bfd = entry.descriptor.as_fd();
    io_retry(|| rustix::io::preadv(bfd, iovs, offset))
}

pub fn fd_pwrite(
    table: &DescriptorTable,
    fd: Fd,
    iovs: &[IoSlice<'_>],
    offset: u64,
) -> Result<usize> {
    let entry = table.lookup_fd(fd, Rights::FD_WRITE | Rights::FD_SEEK)?;
    let bfd = entry.descriptor.as_fd();
    io_retry(|| rustix::io::pwritev(bfd, iovs, offset))
}

/// I/O operations only retry `EINTR` when zero bytes have transferred so
/// far; a partial transfer is returned to the caller to resume (§4.2).
fn io_retry(mut f: impl FnMut() -> rustix::io::Result<usize>) -> Result<usize> {
    loop {
        match f() {
            Ok(n) => return Ok(n),
            Err(rustix::io::Errno::INTR) => continue,
            Err(e) => return Err(Errno::from(e)),
        }
    }
}

pub fn fd_seek(table: &DescriptorTable, fd: Fd, offset: i64, whence: Whence) -> Result<u64> {
    let required = match whence {
        Whence::Cur if offset == 0 => Rights::FD_TELL,
        _ => Rights::FD_SEEK,
    };
    let entry = table.lookup_fd(fd, required)?;
    let bfd = entry.descriptor.as_fd();
    let sf = match whence {
        Whence::Set => rustix::fs::SeekFrom::Start(offset.max(0) as u64),
        Whence::Cur => rustix::fs::SeekFrom::Current(offset),
        Whence::End => rustix::fs::SeekFrom::End(offset),
    };
    retry_eintr(|| rustix::fs::seek(bfd, sf)).map_err(Errno::from)
}

pub fn fd_tell(table: &DescriptorTable, fd: Fd) -> Result<u64> {
    fd_seek(table, fd, 0, Whence::Cur)
}

pub fn fd_datasync(table: &DescriptorTable, fd: Fd) -> Result<()> {
    let entry = table.lookup_fd(fd, Rights::FD_DATASYNC)?;
    let bfd = entry.descriptor.as_fd();
    retry_eintr(|| rustix::fs::fdatasync(bfd)).map_err(Errno::from)
}

pub fn fd_sync(table: &DescriptorTable, fd: Fd) -> Result<()> {
    let entry = table.lookup_fd(fd, Rights::FD_SYNC)?;
    let bfd = entry.descriptor.as_fd();
    retry_eintr(|| rustix::fs::fsync(bfd)).map_err(Errno::from)
}

pub fn fd_allocate(table: &DescriptorTable, fd: Fd, offset: u64, len: u64) -> Result<()> {
    let entry = table.lookup_fd(fd, Rights::FD_ALLOCATE)?;
    let bfd = entry.descriptor.as_fd();
    retry_eintr(|| rustix::fs::fallocate(bfd, rustix::fs::FallocateFlags::empty(), offset, len))
        .map_err(Errno::from)
}

pub fn fd_filestat_set_size(table: &DescriptorTable, fd: Fd, size: u64) -> Result<()> {
    let entry = table.lookup_fd(fd, Rights::FD_FILESTAT_SET_SIZE)?;
    let bfd = entry.descriptor.as_fd();
    retry_eintr(|| rustix::fs::ftruncate(bfd, size)).map_err(Errno::from)
}

/// Build the host `Timestamps` pair from a WASI `(atim, mtim, fst_flags)`
/// triple (§4.2): a field with neither `*_NOW` nor its base flag set is left
/// unchanged (`UTIME_OMIT`), shared by `fd_filestat_set_times` here and
/// `path_filestat_set_times` in `system.rs`.
pub fn timestamps_from_fstflags(atim: u64, mtim: u64, fst_flags: Fstflags) -> Timestamps {
    let omit = rustix::fs::Timespec { tv_sec: 0, tv_nsec: rustix::fs::UTIME_OMIT as _ };
    let now = rustix::fs::Timespec { tv_sec: 0, tv_nsec: rustix::fs::UTIME_NOW as _ };
    let last_access = if fst_flags.contains(Fstflags::ATIM_NOW) {
        now
    } else if fst_flags.contains(Fstflags::ATIM) {
        rustix::fs::Timespec { tv_sec: (atim / 1_000_000_000) as i64, tv_nsec: (atim % 1_000_000_000) as _ }
    } else {
        omit
    };
    let last_modification = if fst_flags.contains(Fstflags::MTIM_NOW) {
        now
    } else if fst_flags.contains(Fstflags::MTIM) {
        rustix::fs::Timespec { tv_sec: (mtim / 1_000_000_000) as i64, tv_nsec: (mtim % 1_000_000_000) as _ }
    } else {
        omit
    };
    Timestamps { last_access, last_modification }
}

pub fn fd_filestat_set_times(
    table: &DescriptorTable,
    fd: Fd,
    atim: u64,
    mtim: u64,
    fst_flags: Fstflags,
) -> Result<()> {
    let entry = table.lookup_fd(fd, Rights::FD_FILESTAT_SET_TIMES)?;
    let bfd = entry.descriptor.as_fd();
    let times = timestamps_from_fstflags(atim, mtim, fst_flags);
    retry_eintr(|| rustix::fs::futimens(bfd, &times)).map_err(Errno::from)
}

/// No portable `posix_fadvise` on every target; platforms lacking it
/// silently succeed, per §4.2.
#[cfg_attr(not(target_os = "linux"), allow(unused_variables))]
pub fn fd_advise(table: &DescriptorTable, fd: Fd, offset: u64, len: u64, advice: Advice) -> Result<()> {
    let entry = table.lookup_fd(fd, Rights::FD_ADVISE)?;
    #[cfg(target_os = "linux")]
    {
        let bfd = entry.descriptor.as_fd();
        let host_advice = match advice {
            Advice::Normal => rustix::fs::Advice::Normal,
            Advice::Sequential => rustix::fs::Advice::Sequential,
            Advice::Random => rustix::fs::Advice::Random,
            Advice::Willneed => rustix::fs::Advice::WillNeed,
            Advice::Dontneed => rustix::fs::Advice::DontNeed,
            Advice::Noreuse => rustix::fs::Advice::NoReuse,
        };
        retry_eintr(|| rustix::fs::fadvise(bfd, offset, len, host_advice)).map_err(Errno::from)?;
    }
    Ok(())
}

pub fn fd_stat_get(table: &DescriptorTable, fd: Fd) -> Result<FdStat> {
    let entry = table.get(fd).ok_or(Errno::Badf)?;
    Ok(entry.stat())
}

/// Read current `O_APPEND`/`O_NONBLOCK` via fcntl, diff against the
/// requested flags, reject sync/dsync/rsync changes, apply the rest, and
/// mirror the result into the stored `fdstat.flags`.
pub fn fd_stat_set_flags(table: &mut DescriptorTable, fd: Fd, new_flags: Fdflags) -> Result<()> {
    {
        let entry = table.lookup_fd(fd, Rights::FD_FDSTAT_SET_FLAGS)?;
        let current = entry.flags;
        let toggled = current ^ new_flags;
        if toggled.intersects(Fdflags::SYNC | Fdflags::DSYNC | Fdflags::RSYNC) {
            return Err(Errno::Nosys);
        }
        let bfd = entry.descriptor.as_fd();
        let mut host_flags = retry_eintr(|| rustix::fs::fcntl_getfl(bfd)).map_err(Errno::from)?;
        host_flags.set(OFlags::APPEND, new_flags.contains(Fdflags::APPEND));
        host_flags.set(OFlags::NONBLOCK, new_flags.contains(Fdflags::NONBLOCK));
        retry_eintr(|| rustix::fs::fcntl_setfl(bfd, host_flags)).map_err(Errno::from)?;
    }
    let entry = table.lookup_fd_mut(fd, Rights::FD_FDSTAT_SET_FLAGS)?;
    entry.flags = new_flags;
    Ok(())
}

/// Rights are monotone-downward: this may only clear bits, never set new
/// ones (§3 invariants, tested in table.rs/system.rs).
pub fn fd_stat_set_rights(
    table: &mut DescriptorTable,
    fd: Fd,
    base: Rights,
    inheriting: Rights,
) -> Result<()> {
    let entry = table.get_mut(fd).ok_or(Errno::Badf)?;
    if !entry.rights.base.contains(base) || !entry.rights.inheriting.contains(inheriting) {
        return Err(Errno::Notcapable);
    }
    entry.rights.base = base;
    entry.rights.inheriting = inheriting;
    Ok(())
}

/// §3: stdio FDs (0/1/2) must observably zero size and timestamps
/// regardless of what the host reports.
pub fn fd_filestat_get(table: &DescriptorTable, fd: Fd) -> Result<FileStat> {
    let entry = table.lookup_fd(fd, Rights::FD_FILESTAT_GET)?;
    let bfd = entry.descriptor.as_fd();
    let mut stat = filestat_from_host(bfd, entry.file_type)?;
    if entry.descriptor.is_stdio() {
        stat.size = 0;
        stat.atim = 0;
        stat.mtim = 0;
        stat.ctim = 0;
    }
    Ok(stat)
}

/// Stat a host fd directly, bypassing the descriptor table. Used by
/// `path_filestat_get`, which stats a path relative to a parent directory
/// without creating a lasting table entry for it.
pub fn filestat_of(fd: BorrowedFd<'_>, file_type: Filetype) -> Result<FileStat> {
    filestat_from_host(fd, file_type)
}

fn filestat_from_host(fd: BorrowedFd<'_>, file_type: Filetype) -> Result<FileStat> {
    let st = retry_eintr(|| rustix::fs::fstat(fd)).map_err(Errno::from)?;
    Ok(FileStat {
        device: st.st_dev as u64,
        inode: st.st_ino as u64,
        file_type,
        nlink: st.st_nlink as u64,
        size: st.st_size as u64,
        atim: timespec_to_nanos(st.st_atime as i64, st.st_atime_nsec as i64),
        mtim: timespec_to_nanos(st.st_mtime as i64, st.st_mtime_nsec as i64),
        ctim: timespec_to_nanos(st.st_ctime as i64, st.st_ctime_nsec as i64),
    })
}

fn timespec_to_nanos(secs: i64, nsecs: i64) -> u64 {
    (secs as i128 * 1_000_000_000 + nsecs as i128).max(0) as u64
}

/// Pre-opens may be closed like any other descriptor (§3 lifecycle).
/// Close always succeeds from the guest's point of view; the table entry
/// is removed first and `Descriptor`'s `OwnedFd` closes the host fd on
/// drop, so there is no host-level error to surface back.
pub fn fd_close(table: &mut DescriptorTable, fd: Fd) -> Result<()> {
    table.get(fd).ok_or(Errno::Badf)?;
    table.delete(fd);
    Ok(())
}

pub fn fd_renumber(table: &mut DescriptorTable, from: Fd, to: Fd) -> Result<()> {
    table.renumber(from, to)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Entry;
    use crate::types::{HandleRights, RightsExt};
    use std::io::{IoSlice, IoSliceMut, Write};

    fn file_entry_over_pipe() -> (DescriptorTable, Fd, rustix::fd::OwnedFd) {
        let mut table = DescriptorTable::new();
        let (r, w) = rustix::pipe::pipe().unwrap();
        let fd = table.insert(Entry::new(
            Descriptor::File(r),
            Filetype::CharacterDevice,
            HandleRights::new(Rights::tty_base() | Rights::FD_SEEK | Rights::FD_TELL, Rights::empty()),
        ));
        (table, fd, w)
    }

    #[test]
    fn read_write_round_trip_through_pipe() {
        let (table, fd, w) = file_entry_over_pipe();
        let mut w = std::fs::File::from(w);
        w.write_all(b"hello").unwrap();
        drop(w);

        let mut buf = [0u8; 5];
        let n = fd_read(&table, fd, &mut [IoSliceMut::new(&mut buf)]).unwrap();
        assert_eq!(n, 5);
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn nonblocking_read_on_empty_pipe_is_eagain() {
        let (mut table, fd, _w) = file_entry_over_pipe();
        fd_stat_set_flags(&mut table, fd, Fdflags::NONBLOCK).unwrap();
        let mut buf = [0u8; 8];
        let err = fd_read(&table, fd, &mut [IoSliceMut::new(&mut buf)]).unwrap_err();
        assert_eq!(err, Errno::Again);
    }

    #[test]
    fn seek_rejects_bad_whence_via_type_system() {
        // Whence is a closed enum; EINVAL only arises at the host-module
        // decode boundary (out of scope here). Exercise the fd_tell special
        // case instead: lacking FD_SEEK but holding FD_TELL still permits
        // offset=0, whence=current.
        let mut table = DescriptorTable::new();
        let (r, _w) = rustix::pipe::pipe().unwrap();
        let fd = table.insert(Entry::new(
            Descriptor::File(r),
            Filetype::RegularFile,
            HandleRights::new(Rights::FD_TELL, Rights::empty()),
        ));
        // A pipe isn't seekable, so lseek itself will fail with ESPIPE, but
        // the rights check (the thing under test) must pass.
        let err = fd_seek(&table, fd, 0, Whence::Cur).unwrap_err();
        assert_ne!(err, Errno::Notcapable);
    }

    #[test]
    fn stdio_filestat_is_zeroed() {
        let mut table = DescriptorTable::new();
        let (r, _w) = rustix::pipe::pipe().unwrap();
        let fd = table.insert(Entry::new(
            Descriptor::Stdio(r),
            Filetype::CharacterDevice,
            HandleRights::new(Rights::tty_base(), Rights::empty()),
        ));
        let stat = fd_filestat_get(&table, fd).unwrap();
        assert_eq!(stat.size, 0);
        assert_eq!(stat.atim, 0);
        assert_eq!(stat.mtim, 0);
        assert_eq!(stat.ctim, 0);
    }

    #[test]
    fn filestat_set_times_now_updates_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        std::fs::File::create(&path).unwrap();
        let rfd = rustix::fs::open(&path, OFlags::RDWR, rustix::fs::Mode::empty()).unwrap();
        let mut table = DescriptorTable::new();
        let fd = table.insert(Entry::new(
            Descriptor::File(rfd),
            Filetype::RegularFile,
            HandleRights::new(Rights::regular_file_base(), Rights::empty()),
        ));
        fd_filestat_set_times(&table, fd, 0, 0, Fstflags::MTIM_NOW).unwrap();
        let stat = fd_filestat_get(&table, fd).unwrap();
        assert!(stat.mtim > 0);
    }

    #[test]
    fn rights_set_is_clear_only() {
        let mut table = DescriptorTable::new();
        let (r, _w) = rustix::pipe::pipe().unwrap();
        let fd = table.insert(Entry::new(
            Descriptor::File(r),
            Filetype::RegularFile,
            HandleRights::new(Rights::regular_file_base(), Rights::empty()),
        ));
        assert_eq!(
            fd_stat_set_rights(&mut table, fd, Rights::all(), Rights::empty()),
            Err(Errno::Notcapable)
        );
        fd_stat_set_rights(&mut table, fd, Rights::FD_READ, Rights::empty()).unwrap();
        assert_eq!(table.get(fd).unwrap().rights.base, Rights::FD_READ);
    }
}
