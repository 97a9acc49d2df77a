//! Clocks, randomness, command-line/environment vectors, and process
//! control (§4.7): the small collection of calls that don't hang off a
//! descriptor.

use crate::errno::{Errno, Result};
use crate::types::ClockId;
use std::time::Duration;

/// Where `random_get` draws its bytes from. Swappable in tests for
/// determinism; production builds wire this to the host CSPRNG.
pub trait EntropySource: Send + Sync {
    fn fill(&self, buf: &mut [u8]) -> std::io::Result<()>;
}

/// `getrandom(2)` via the standard library's OS RNG hook, matching the
/// host-entropy convention used throughout `wasi-common`'s clock/random
/// hostcalls.
pub struct OsEntropySource;

impl EntropySource for OsEntropySource {
    fn fill(&self, buf: &mut [u8]) -> std::io::Result<()> {
        getrandom(buf)
    }
}

#[cfg(target_os = "linux")]
fn getrandom(buf: &mut [u8]) -> std::io::Result<()> {
    let mut filled = 0;
    while filled < buf.len() {
        match rustix::rand::getrandom(&mut buf[filled..], rustix::rand::GetRandomFlags::empty()) {
            Ok(n) if n > 0 => filled += n,
            Ok(_) => return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof)),
            Err(rustix::io::Errno::INTR) => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn getrandom(buf: &mut [u8]) -> std::io::Result<()> {
    use std::fs::File;
    use std::io::Read;
    File::open("/dev/urandom")?.read_exact(buf)
}

pub fn clock_res_get(id: ClockId) -> Result<Duration> {
    match id {
        ClockId::Realtime | ClockId::Monotonic => Ok(Duration::from_nanos(1)),
        ClockId::ProcessCputimeId | ClockId::ThreadCputimeId => Err(Errno::Notsup),
    }
}

pub fn clock_time_get(
    id: ClockId,
    realtime: impl Fn() -> Duration,
    monotonic: impl Fn() -> Duration,
) -> Result<Duration> {
    match id {
        ClockId::Realtime => Ok(realtime()),
        ClockId::Monotonic => Ok(monotonic()),
        ClockId::ProcessCputimeId | ClockId::ThreadCputimeId => Err(Errno::Notsup),
    }
}

/// A short read from the entropy source (anything other than filling the
/// whole buffer) is treated as `EIO`, since `random_get` has no partial-
/// result return value to report it through.
pub fn random_get(source: &dyn EntropySource, buf: &mut [u8]) -> Result<()> {
    source.fill(buf).map_err(|_| Errno::Io)
}

pub fn args_sizes_get(args: &[String]) -> (usize, usize) {
    let count = args.len();
    let buf_size = args.iter().map(|a| a.len() + 1).sum();
    (count, buf_size)
}

pub fn args_get(args: &[String]) -> Vec<Vec<u8>> {
    args.iter()
        .map(|a| {
            let mut bytes = a.clone().into_bytes();
            bytes.push(0);
            bytes
        })
        .collect()
}

pub fn environ_sizes_get(env: &[(String, String)]) -> (usize, usize) {
    let count = env.len();
    let buf_size = env.iter().map(|(k, v)| k.len() + 1 + v.len() + 1).sum();
    (count, buf_size)
}

pub fn environ_get(env: &[(String, String)]) -> Vec<Vec<u8>> {
    env.iter()
        .map(|(k, v)| {
            let mut bytes = Vec::with_capacity(k.len() + v.len() + 2);
            bytes.extend_from_slice(k.as_bytes());
            bytes.push(b'=');
            bytes.extend_from_slice(v.as_bytes());
            bytes.push(0);
            bytes
        })
        .collect()
}

/// Hook for `proc_exit`: the embedder decides what "exit" means (unwind,
/// terminate the host process, tear down a sandbox). Absent a hook,
/// `proc_exit`/`proc_raise` are `ENOSYS`, matching the rest of this core's
/// "optional capability, not a guaranteed syscall" stance.
pub trait ProcessControl: Send + Sync {
    fn exit(&self, code: u32) -> !;
    fn raise(&self, signal: u8) -> Result<()>;
}

pub fn proc_exit(control: Option<&dyn ProcessControl>, code: u32) -> ! {
    match control {
        Some(c) => c.exit(code),
        None => std::process::exit(code as i32),
    }
}

pub fn proc_raise(control: Option<&dyn ProcessControl>, signal: u8) -> Result<()> {
    match control {
        Some(c) => c.raise(signal),
        None => Err(Errno::Nosys),
    }
}

pub fn sched_yield() {
    std::thread::yield_now();
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedEntropy(u8);
    impl EntropySource for FixedEntropy {
        fn fill(&self, buf: &mut [u8]) -> std::io::Result<()> {
            buf.fill(self.0);
            Ok(())
        }
    }

    struct FailingEntropy;
    impl EntropySource for FailingEntropy {
        fn fill(&self, _buf: &mut [u8]) -> std::io::Result<()> {
            Err(std::io::Error::from(std::io::ErrorKind::Other))
        }
    }

    #[test]
    fn random_get_fills_whole_buffer() {
        let mut buf = [0u8; 16];
        random_get(&FixedEntropy(0xab), &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0xab));
    }

    #[test]
    fn random_get_failure_is_eio() {
        let mut buf = [0u8; 4];
        assert_eq!(random_get(&FailingEntropy, &mut buf), Err(Errno::Io));
    }

    #[test]
    fn cputime_clocks_are_not_supported() {
        assert_eq!(clock_res_get(ClockId::ProcessCputimeId), Err(Errno::Notsup));
        assert_eq!(
            clock_time_get(ClockId::ThreadCputimeId, Duration::default, Duration::default),
            Err(Errno::Notsup)
        );
    }

    #[test]
    fn args_sizes_match_args_get_byte_layout() {
        let args = vec!["prog".to_string(), "x".to_string()];
        let (count, size) = args_sizes_get(&args);
        assert_eq!(count, 2);
        let encoded = args_get(&args);
        assert_eq!(encoded.iter().map(|b| b.len()).sum::<usize>(), size);
        assert_eq!(encoded[0], b"prog\0");
        assert_eq!(encoded[1], b"x\0");
    }

    #[test]
    fn environ_get_uses_key_equals_value_nul_layout() {
        let env = vec![("A".to_string(), "1".to_string())];
        let encoded = environ_get(&env);
        assert_eq!(encoded[0], b"A=1\0");
        let (count, size) = environ_sizes_get(&env);
        assert_eq!(count, 1);
        assert_eq!(size, 4);
    }

    #[test]
    fn proc_raise_without_hook_is_nosys() {
        assert_eq!(proc_raise(None, 9), Err(Errno::Nosys));
    }
}
