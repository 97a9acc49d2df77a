//! The dense, capability-checked descriptor table.
//!
//! Guest-visible handles are 32-bit `Fd`s backed by a bitmap-plus-array
//! allocator (no pointer graphs, no reference counting — "use an arena +
//! index", per the design notes). A side map tracks live directory
//! iterators so that closing an `Fd` also drops its cursor.

use crate::dir::DirIter;
use crate::errno::{Errno, Result};
use crate::types::{Filetype, HandleRights, Rights};
use rustix::fd::OwnedFd;
use std::collections::HashMap;

pub type Fd = u32;

const BLOCK_BITS: usize = 64;

/// What kind of host object a table entry wraps.
pub enum Descriptor {
    File(OwnedFd),
    Dir(OwnedFd),
    Socket(OwnedFd),
    /// Stdio descriptors: a real host fd, but filestat is observably zeroed
    /// per the stdio zeroing invariant regardless of what the host reports.
    Stdio(OwnedFd),
}

impl Descriptor {
    pub fn as_fd(&self) -> rustix::fd::BorrowedFd<'_> {
        match self {
            Descriptor::File(fd)
            | Descriptor::Dir(fd)
            | Descriptor::Socket(fd)
            | Descriptor::Stdio(fd) => fd.as_fd(),
        }
    }

    pub fn is_stdio(&self) -> bool {
        matches!(self, Descriptor::Stdio(_))
    }
}

use rustix::fd::AsFd;

/// A live table entry: the host object plus its WASI-visible capability
/// state.
pub struct Entry {
    pub descriptor: Descriptor,
    pub file_type: Filetype,
    pub rights: HandleRights,
    pub flags: crate::types::Fdflags,
    /// Set at construction time for pre-opened directories; never created
    /// afterwards (pre-opens are only established before the first guest
    /// call runs).
    pub preopen_path: Option<String>,
}

impl Entry {
    pub fn new(descriptor: Descriptor, file_type: Filetype, rights: HandleRights) -> Self {
        Entry {
            descriptor,
            file_type,
            rights,
            flags: crate::types::Fdflags::empty(),
            preopen_path: None,
        }
    }

    pub fn stat(&self) -> crate::types::FdStat {
        crate::types::FdStat { file_type: self.file_type, flags: self.flags, rights: self.rights }
    }
}

/// Dense bitmap + object-array descriptor table.
///
/// Insertion scans for the first zero bit via trailing-zeros of the
/// complement of each 64-bit block; the table grows by whole blocks when
/// every bit is set.
#[derive(Default)]
pub struct DescriptorTable {
    bitmap: Vec<u64>,
    entries: Vec<Option<Entry>>,
    dir_iters: HashMap<Fd, DirIter>,
}

impl DescriptorTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.bitmap.iter().map(|b| b.count_ones() as usize).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn capacity(&self) -> usize {
        self.bitmap.len() * BLOCK_BITS
    }

    fn grow_to(&mut self, min_slots: usize) {
        while self.capacity() < min_slots {
            self.bitmap.push(0);
            for _ in 0..BLOCK_BITS {
                self.entries.push(None);
            }
        }
    }

    fn is_set(&self, fd: Fd) -> bool {
        let idx = fd as usize;
        if idx >= self.capacity() {
            return false;
        }
        let block = idx / BLOCK_BITS;
        let bit = idx % BLOCK_BITS;
        self.bitmap[block] & (1u64 << bit) != 0
    }

    fn set_bit(&mut self, fd: Fd) {
        let idx = fd as usize;
        let block = idx / BLOCK_BITS;
        let bit = idx % BLOCK_BITS;
        self.bitmap[block] |= 1u64 << bit;
    }

    fn clear_bit(&mut self, fd: Fd) {
        let idx = fd as usize;
        if idx >= self.capacity() {
            return;
        }
        let block = idx / BLOCK_BITS;
        let bit = idx % BLOCK_BITS;
        self.bitmap[block] &= !(1u64 << bit);
    }

    /// Insert `obj` at the lowest free slot, returning its new `Fd`.
    pub fn insert(&mut self, obj: Entry) -> Fd {
        loop {
            for (block_idx, &mask) in self.bitmap.iter().enumerate() {
                let free = !mask;
                if free != 0 {
                    let bit = free.trailing_zeros() as usize;
                    let fd = (block_idx * BLOCK_BITS + bit) as Fd;
                    self.set_bit(fd);
                    self.entries[fd as usize] = Some(obj);
                    return fd;
                }
            }
            // Every existing block is full; grow by one block and retry.
            self.grow_to(self.capacity() + BLOCK_BITS);
        }
    }

    /// Place `obj` at exactly `fd`, growing the table if necessary.
    /// Returns the prior occupant, if any (used by `fd_renumber`).
    pub fn assign(&mut self, fd: Fd, obj: Entry) -> Option<Entry> {
        self.grow_to(fd as usize + 1);
        let prior = if self.is_set(fd) { self.entries[fd as usize].take() } else { None };
        self.set_bit(fd);
        self.entries[fd as usize] = Some(obj);
        prior
    }

    pub fn get(&self, fd: Fd) -> Option<&Entry> {
        if !self.is_set(fd) {
            return None;
        }
        self.entries.get(fd as usize).and_then(|e| e.as_ref())
    }

    pub fn get_mut(&mut self, fd: Fd) -> Option<&mut Entry> {
        if !self.is_set(fd) {
            return None;
        }
        self.entries.get_mut(fd as usize).and_then(|e| e.as_mut())
    }

    /// Remove and return the entry at `fd`, along with its dir-iterator if
    /// one was live.
    pub fn delete(&mut self, fd: Fd) -> Option<Entry> {
        if !self.is_set(fd) {
            return None;
        }
        self.clear_bit(fd);
        self.dir_iters.remove(&fd);
        self.entries[fd as usize].take()
    }

    pub fn range(&self) -> impl Iterator<Item = (Fd, &Entry)> {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(i, e)| e.as_ref().map(|e| (i as Fd, e)))
    }

    pub fn dir_iter(&mut self, fd: Fd) -> Option<&mut DirIter> {
        self.dir_iters.get_mut(&fd)
    }

    pub fn dir_iter_or_insert_with(&mut self, fd: Fd, f: impl FnOnce() -> DirIter) -> &mut DirIter {
        self.dir_iters.entry(fd).or_insert_with(f)
    }

    /// Cache a freshly constructed iterator for `fd`, replacing any prior
    /// one. Used when construction itself can fail (duplicating and
    /// opening the directory stream), unlike `dir_iter_or_insert_with`
    /// whose closure cannot.
    pub fn set_dir_iter(&mut self, fd: Fd, iter: DirIter) -> &mut DirIter {
        self.dir_iters.insert(fd, iter);
        self.dir_iters.get_mut(&fd).expect("just inserted")
    }

    /// Capability-checked lookup: the descriptor must exist and must hold
    /// every bit in `required`.
    pub fn lookup_fd(&self, fd: Fd, required: Rights) -> Result<&Entry> {
        let entry = self.get(fd).ok_or(Errno::Badf)?;
        if !entry.rights.base.contains(required) {
            return Err(Errno::Notcapable);
        }
        Ok(entry)
    }

    pub fn lookup_fd_mut(&mut self, fd: Fd, required: Rights) -> Result<&mut Entry> {
        let entry = self.get_mut(fd).ok_or(Errno::Badf)?;
        if !entry.rights.base.contains(required) {
            return Err(Errno::Notcapable);
        }
        Ok(entry)
    }

    pub fn lookup_socket_fd(&self, fd: Fd, required: Rights) -> Result<&Entry> {
        let entry = self.lookup_fd(fd, required)?;
        match entry.descriptor {
            Descriptor::Socket(_) => Ok(entry),
            _ => Err(Errno::Notsock),
        }
    }

    pub fn lookup_preopen_path(&self, fd: Fd) -> Result<&str> {
        let entry = self.get(fd).ok_or(Errno::Badf)?;
        match (&entry.preopen_path, entry.file_type) {
            (Some(path), Filetype::Directory) => Ok(path.as_str()),
            (Some(_), _) => Err(Errno::Notdir),
            (None, _) => Err(Errno::Badf),
        }
    }

    /// Move the entry at `from` to `to`, closing whatever previously
    /// occupied `to` (host fd and dir-iterator included). Forbidden when
    /// either side is a pre-open.
    pub fn renumber(&mut self, from: Fd, to: Fd) -> Result<()> {
        {
            let from_entry = self.get(from).ok_or(Errno::Badf)?;
            if from_entry.preopen_path.is_some() {
                return Err(Errno::Notsup);
            }
        }
        if let Some(to_entry) = self.get(to) {
            if to_entry.preopen_path.is_some() {
                return Err(Errno::Notsup);
            }
        }
        let moved = self.delete(from).ok_or(Errno::Badf)?;
        // delete() on `to` drops its prior host fd (via OwnedFd's Drop) and
        // its dir-iterator; assign() then places `moved` there atomically
        // from the table's point of view.
        self.delete(to);
        let dir_iter = self.dir_iters.remove(&from);
        self.assign(to, moved);
        if let Some(it) = dir_iter {
            self.dir_iters.insert(to, it);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RightsExt;
    use rustix::fd::AsFd;

    fn dummy_entry() -> Entry {
        let (r, _w) = rustix::pipe::pipe().unwrap();
        Entry::new(
            Descriptor::File(r),
            Filetype::RegularFile,
            HandleRights::new(Rights::regular_file_base(), Rights::empty()),
        )
    }

    #[test]
    fn insert_picks_lowest_free_slot() {
        let mut t = DescriptorTable::new();
        let a = t.insert(dummy_entry());
        let b = t.insert(dummy_entry());
        assert_eq!(a, 0);
        assert_eq!(b, 1);
        t.delete(a);
        let c = t.insert(dummy_entry());
        assert_eq!(c, 0, "freed slot is reused before growing");
    }

    #[test]
    fn descriptor_density_after_inserts_and_deletes() {
        let mut t = DescriptorTable::new();
        let mut fds = vec![];
        for _ in 0..10 {
            fds.push(t.insert(dummy_entry()));
        }
        for fd in fds.iter().take(4) {
            t.delete(*fd);
        }
        let max_fd = t.range().map(|(fd, _)| fd).max().unwrap_or(0);
        // N=10, K=4: max live fd must stay within a small block-rounding
        // constant of N - K.
        assert!(max_fd <= 10, "max_fd={max_fd} exceeds N");
    }

    #[test]
    fn assign_reports_prior_occupant() {
        let mut t = DescriptorTable::new();
        let fd = t.insert(dummy_entry());
        let (prior, _) = (t.assign(fd, dummy_entry()), ());
        assert!(prior.is_some());
    }

    #[test]
    fn renumber_moves_entry_and_vacates_source() {
        let mut t = DescriptorTable::new();
        let from = t.insert(dummy_entry());
        t.renumber(from, 5).unwrap();
        assert!(t.get(from).is_none());
        assert!(t.get(5).is_some());
    }

    #[test]
    fn renumber_forbidden_on_preopen() {
        let mut t = DescriptorTable::new();
        let mut e = dummy_entry();
        e.preopen_path = Some("/tmp".to_string());
        let fd = t.insert(e);
        assert_eq!(t.renumber(fd, 9), Err(Errno::Notsup));
    }

    #[test]
    fn lookup_fd_enforces_rights() {
        let mut t = DescriptorTable::new();
        let fd = t.insert(dummy_entry());
        assert!(t.lookup_fd(fd, Rights::FD_READ).is_ok());
        assert_eq!(t.lookup_fd(fd, Rights::SOCK_ACCEPT), Err(Errno::Notcapable));
        assert_eq!(t.lookup_fd(999, Rights::FD_READ).unwrap_err(), Errno::Badf);
    }
}
