//! `poll_oneoff`: the single-thread event multiplexer (§4.5).
//!
//! Readiness is reported through the host `poll()`; a self-pipe ("wake
//! pipe") lets [`crate::system::System::shutdown`] interrupt any in-flight
//! poll from another thread without a mutex guarding the hot path.

use crate::errno::{Errno, Result};
use crate::table::{DescriptorTable, Fd};
use crate::types::{
    ClockId, Event, EventRwFlags, EventType, Subscription, SubscriptionKind, Rights,
};
use rustix::event::{poll, PollFd, PollFlags};
use rustix::fd::{AsFd, BorrowedFd, OwnedFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Closures supplying the two clocks `poll_oneoff` understands. Other clock
/// IDs are rejected per-subscription with `ENOTSUP`, never at the call level.
pub struct Clocks {
    pub realtime: Box<dyn Fn() -> Duration + Send + Sync>,
    pub monotonic: Box<dyn Fn() -> Duration + Send + Sync>,
}

impl Clocks {
    pub fn now(&self, id: ClockId) -> Option<Duration> {
        match id {
            ClockId::Realtime => Some((self.realtime)()),
            ClockId::Monotonic => Some((self.monotonic)()),
            ClockId::ProcessCputimeId | ClockId::ThreadCputimeId => None,
        }
    }
}

/// The self-pipe used to wake a blocked `poll()` from `shutdown()`. Lazily
/// created on first use so a `System` that never polls never pays for it.
pub struct Waker {
    read: OwnedFd,
    write: Mutex<Option<OwnedFd>>,
    shutdown: AtomicBool,
}

impl Waker {
    pub fn new() -> std::io::Result<Self> {
        let (read, write) = rustix::pipe::pipe()?;
        Ok(Waker { read, write: Mutex::new(Some(write)), shutdown: AtomicBool::new(false) })
    }

    pub fn read_fd(&self) -> BorrowedFd<'_> {
        self.read.as_fd()
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Idempotent: closes the write end once, waking any in-flight poll.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.write.lock().unwrap().take();
    }
}

enum Slot {
    Pending(Subscription),
    Filled(Event),
}

/// `poll_oneoff(subs, events) -> n`, per §4.5.
pub fn poll_oneoff(
    table: &DescriptorTable,
    waker: &Waker,
    clocks: &Clocks,
    subs: &[Subscription],
) -> Result<Vec<Event>> {
    if subs.is_empty() {
        return Err(Errno::Inval);
    }

    let mut slots: Vec<Slot> = subs.iter().copied().map(Slot::Pending).collect();

    let mut earliest_deadline: Option<Duration> = None;
    let mut earliest_slot: Option<usize> = None;

    // First pass: resolve every fd-subscription to a borrow that outlives
    // the pollfd array (a `PollFd` stores a reference, so the borrows must
    // live in a stable Vec rather than as per-iteration temporaries), and
    // compute the earliest clock deadline.
    let mut fd_borrows: Vec<(usize, BorrowedFd<'_>, bool)> = Vec::with_capacity(subs.len());

    for (i, sub) in subs.iter().enumerate() {
        match sub.kind {
            SubscriptionKind::Clock(c) => {
                let now = clocks.now(c.id);
                let Some(now) = now else {
                    slots[i] = Slot::Filled(Event::clock(sub.user_data, Errno::Notsup));
                    continue;
                };
                let relative = if c.abstime {
                    c.timeout.checked_sub(now).unwrap_or(Duration::ZERO)
                } else {
                    c.timeout
                };
                if earliest_deadline.map_or(true, |d| relative < d) {
                    earliest_deadline = Some(relative);
                    earliest_slot = Some(i);
                }
            }
            SubscriptionKind::FdRead(fd) | SubscriptionKind::FdWrite(fd) => {
                let write = matches!(sub.kind, SubscriptionKind::FdWrite(_));
                match resolve_fd_subscription(table, fd, write) {
                    Ok(borrowed) => fd_borrows.push((i, borrowed, write)),
                    Err(e) => {
                        let event_type =
                            if write { EventType::FdWrite } else { EventType::FdRead };
                        slots[i] = Slot::Filled(Event::fd(
                            sub.user_data,
                            e,
                            event_type,
                            0,
                            EventRwFlags::empty(),
                        ));
                    }
                }
            }
        }
    }

    // Pollfd array: wake pipe first, then one entry per resolved
    // fd-subscription (indices recorded so revents map back to `slots`).
    let mut pollfds: Vec<PollFd<'_>> = Vec::with_capacity(fd_borrows.len() + 1);
    pollfds.push(PollFd::new(&waker.read, PollFlags::IN));
    let mut pollfd_slot: Vec<usize> = Vec::with_capacity(fd_borrows.len());
    for (slot_idx, borrowed, write) in &fd_borrows {
        let flags = if *write { PollFlags::OUT } else { PollFlags::IN };
        pollfds.push(PollFd::new(borrowed, flags));
        pollfd_slot.push(*slot_idx);
    }

    loop {
        if waker.is_shutdown() {
            return Ok(subs
                .iter()
                .map(|s| cancelled_event(s))
                .collect());
        }

        let any_filled = slots.iter().any(|s| matches!(s, Slot::Filled(_)));
        if any_filled && earliest_deadline.is_none() && pollfd_slot.is_empty() {
            return Ok(pack(slots));
        }

        let timeout_ms: i32 = match earliest_deadline {
            Some(d) => d.as_millis().min(i32::MAX as u128) as i32,
            None => -1,
        };

        let ready = match poll(&mut pollfds, timeout_ms) {
            Ok(n) => n,
            Err(rustix::io::Errno::INTR) => continue,
            Err(e) => return Err(Errno::from(e)),
        };

        if waker.is_shutdown() {
            return Ok(subs.iter().map(cancelled_event).collect());
        }

        if pollfds[0].revents().intersects(PollFlags::IN | PollFlags::HUP) {
            // Spurious/unused wake byte; shutdown (if any) is observed via
            // the flag above, not the byte itself.
            continue;
        }

        if ready == 0 {
            // Timed out: the earliest clock subscription fires.
            if let Some(slot) = earliest_slot {
                if let SubscriptionKind::Clock(_) = subs[slot].kind {
                    slots[slot] = Slot::Filled(Event::clock(subs[slot].user_data, Errno::Success));
                }
            }
            return Ok(pack(slots));
        }

        for (pfd_idx, &slot_idx) in pollfd_slot.iter().enumerate() {
            let revents = pollfds[pfd_idx + 1].revents();
            if revents.is_empty() {
                continue;
            }
            let sub = subs[slot_idx];
            let write = matches!(sub.kind, SubscriptionKind::FdWrite(_));
            let event_type = if write { EventType::FdWrite } else { EventType::FdRead };
            // Per the open question on POLLHUP: never surface `hangup` here;
            // Linux does not reliably report POLLHUP for disconnected TCP
            // sockets, so callers discover hangup via the subsequent I/O.
            slots[slot_idx] =
                Slot::Filled(Event::fd(sub.user_data, Errno::Success, event_type, 0, EventRwFlags::empty()));
        }

        if slots.iter().any(|s| matches!(s, Slot::Filled(_))) {
            return Ok(pack(slots));
        }
    }
}

fn cancelled_event(sub: &Subscription) -> Event {
    let event_type = match sub.kind {
        SubscriptionKind::Clock(_) => EventType::Clock,
        SubscriptionKind::FdRead(_) => EventType::FdRead,
        SubscriptionKind::FdWrite(_) => EventType::FdWrite,
    };
    Event::fd(sub.user_data, Errno::Canceled, event_type, 0, EventRwFlags::empty())
}

fn resolve_fd_subscription(
    table: &DescriptorTable,
    fd: Fd,
    _write: bool,
) -> Result<BorrowedFd<'_>> {
    let entry = table.lookup_fd(fd, Rights::POLL_FD_READWRITE)?;
    Ok(entry.descriptor.as_fd())
}

/// Pack the slots that have completed (error, timeout, or readiness) densely
/// in subscription order, dropping any still-`Pending` slot. A normal return
/// from the poll loop can leave slots pending — e.g. a timeout only resolves
/// the earliest clock subscription, and a readiness event on one fd leaves
/// every other not-yet-ready fd subscription untouched — and those are simply
/// not yet complete, not cancelled. `ECANCELED` is reserved for the
/// `shutdown()` path, which reports it for every subscription directly
/// rather than going through `pack`.
fn pack(slots: Vec<Slot>) -> Vec<Event> {
    slots
        .into_iter()
        .filter_map(|s| match s {
            Slot::Filled(e) => Some(e),
            Slot::Pending(_) => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{Descriptor, Entry};
    use crate::types::{HandleRights, RightsExt, SubscriptionClock};
    use std::time::{SystemTime, UNIX_EPOCH};

    fn clocks() -> Clocks {
        Clocks {
            realtime: Box::new(|| SystemTime::now().duration_since(UNIX_EPOCH).unwrap()),
            monotonic: Box::new(|| std::time::Instant::now().elapsed()),
        }
    }

    #[test]
    fn empty_subscriptions_is_einval() {
        let table = DescriptorTable::new();
        let waker = Waker::new().unwrap();
        let c = clocks();
        assert_eq!(poll_oneoff(&table, &waker, &c, &[]), Err(Errno::Inval));
    }

    #[test]
    fn bad_fd_yields_single_ebadf_event_without_blocking() {
        let table = DescriptorTable::new();
        let waker = Waker::new().unwrap();
        let c = clocks();
        let subs = vec![Subscription { user_data: 42, kind: SubscriptionKind::FdRead(999) }];
        let events = poll_oneoff(&table, &waker, &c, &subs).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].error, Errno::Badf);
        assert_eq!(events[0].user_data, 42);
    }

    #[test]
    fn relative_clock_timeout_fires() {
        let table = DescriptorTable::new();
        let waker = Waker::new().unwrap();
        let c = clocks();
        let subs = vec![Subscription {
            user_data: 7,
            kind: SubscriptionKind::Clock(SubscriptionClock {
                id: ClockId::Monotonic,
                timeout: Duration::from_millis(10),
                precision: Duration::ZERO,
                abstime: false,
            }),
        }];
        let start = std::time::Instant::now();
        let events = poll_oneoff(&table, &waker, &c, &subs).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(10));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].error, Errno::Success);
        assert_eq!(events[0].event_type, EventType::Clock);
    }

    #[test]
    fn fd_read_ready_on_pipe_write() {
        let mut table = DescriptorTable::new();
        let (r, w) = rustix::pipe::pipe().unwrap();
        let fd = table.insert(Entry::new(
            Descriptor::File(r),
            crate::types::Filetype::CharacterDevice,
            HandleRights::new(Rights::tty_base(), Rights::empty()),
        ));
        rustix::io::write(&w, b"x").unwrap();
        let waker = Waker::new().unwrap();
        let c = clocks();
        let subs = vec![Subscription { user_data: 1, kind: SubscriptionKind::FdRead(fd) }];
        let events = poll_oneoff(&table, &waker, &c, &subs).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].error, Errno::Success);
        assert_eq!(events[0].event_type, EventType::FdRead);
    }

    #[test]
    fn shutdown_cancels_pending_poll() {
        use std::sync::Arc;
        use std::thread;

        let table = Arc::new(DescriptorTable::new());
        let waker = Arc::new(Waker::new().unwrap());
        let c = Arc::new(clocks());

        let waker2 = waker.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            waker2.shutdown();
        });

        let subs = vec![Subscription {
            user_data: 3,
            kind: SubscriptionKind::Clock(SubscriptionClock {
                id: ClockId::Monotonic,
                timeout: Duration::from_secs(30),
                precision: Duration::ZERO,
                abstime: false,
            }),
        }];
        let events = poll_oneoff(&table, &waker, &c, &subs).unwrap();
        handle.join().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].error, Errno::Canceled);
    }
}
