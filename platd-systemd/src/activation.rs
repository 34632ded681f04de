// -*- coding: utf-8 -*-
//
// platd - daemon platform lifecycle
//
// Copyright (C) 2024 The platd developers
//
// Licensed under the Apache License version 2.0
// or the MIT license, at your option.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Socket activation handshake.
//!
//! The supervisor passes `LISTEN_FDS` consecutive listening sockets starting
//! at [SD_LISTEN_FDS_START] and announces the intended receiver in `LISTEN_PID`.

use anyhow::{self as ah, format_err as err};
use log::{debug, error, log_enabled, Level};
use nix::fcntl::{fcntl, FcntlArg, FdFlag, OFlag};
use std::{ffi::OsString, io, os::fd::RawFd};

/// The first inherited descriptor. 0 through 2 are the standard streams.
pub const SD_LISTEN_FDS_START: RawFd = 3;

const ENV_LISTEN_PID: &str = "LISTEN_PID";
const ENV_LISTEN_FDS: &str = "LISTEN_FDS";

/// Exit status used for [fatal] termination.
pub const FATAL_EXIT_CODE: i32 = 255;

/// Source of the activation request.
pub trait ActivationEnv {
    /// Get a process environment variable.
    fn var(&self, name: &str) -> Option<OsString>;

    /// Our own process identifier.
    fn pid(&self) -> u32;
}

/// The real process environment.
pub struct ProcessEnv;

impl ActivationEnv for ProcessEnv {
    fn var(&self, name: &str) -> Option<OsString> {
        std::env::var_os(name)
    }

    fn pid(&self) -> u32 {
        std::process::id()
    }
}

/// Per-descriptor flag setter.
pub trait FdControl {
    fn set_nonblock(&self, fd: RawFd) -> io::Result<()>;
    fn set_cloexec(&self, fd: RawFd) -> io::Result<()>;
}

/// [FdControl] backed by `fcntl(2)`.
pub struct SysFdControl;

impl FdControl for SysFdControl {
    fn set_nonblock(&self, fd: RawFd) -> io::Result<()> {
        let flags = OFlag::from_bits_retain(fcntl(fd, FcntlArg::F_GETFL)?);
        if !flags.contains(OFlag::O_NONBLOCK) {
            fcntl(fd, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;
        }
        Ok(())
    }

    fn set_cloexec(&self, fd: RawFd) -> io::Result<()> {
        fcntl(fd, FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))?;
        Ok(())
    }
}

/// Parse a decimal number in the range `minval..=maxval`.
///
/// Leading whitespace and a sign are accepted, trailing garbage is not.
/// The error message is one of "invalid", "too small" or "too large".
fn parse_ranged(s: &str, minval: i64, maxval: i64) -> ah::Result<i64> {
    let s = s.trim_start_matches(|c: char| c.is_ascii_whitespace());
    let (neg, digits) = if let Some(d) = s.strip_prefix('-') {
        (true, d)
    } else if let Some(d) = s.strip_prefix('+') {
        (false, d)
    } else {
        (false, s)
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(err!("invalid"));
    }
    let val = match digits.parse::<i64>() {
        Ok(v) if neg => -v,
        Ok(v) => v,
        Err(_) if neg => i64::MIN,
        Err(_) => i64::MAX,
    };
    if val < minval {
        Err(err!("too small"))
    } else if val > maxval {
        Err(err!("too large"))
    } else {
        Ok(val)
    }
}

/// Parse an activation variable or produce a diagnostic naming its contents.
fn parse_env(name: &str, value: &OsString, maxval: i64) -> ah::Result<i64> {
    let Some(s) = value.to_str() else {
        return Err(err!("invalid ${name} contents {value:?}: invalid"));
    };
    parse_ranged(s, 1, maxval).map_err(|e| err!("invalid ${name} contents {s:?}: {e}"))
}

/// Adopt the sockets passed by the supervisor.
///
/// Returns `Ok(None)` if we have not been socket activated.
/// Otherwise the inherited fds are made non-blocking and close-on-exec,
/// appended to `socks` and the highest appended fd is returned.
///
/// This must be called at most once per process.
/// A second call appends the same fds again.
pub fn resolve_activation(
    env: &impl ActivationEnv,
    fdctl: &impl FdControl,
    socks: &mut Vec<RawFd>,
    max_socks: usize,
) -> ah::Result<Option<RawFd>> {
    let Some(value) = env.var(ENV_LISTEN_PID) else {
        return Ok(None);
    };

    let pid = parse_env(ENV_LISTEN_PID, &value, i32::MAX.into())?;
    let own_pid = env.pid();
    if pid != i64::from(own_pid) {
        return Err(err!("bad LISTEN_PID: {pid} vs pid {own_pid}"));
    }

    let Some(value) = env.var(ENV_LISTEN_FDS) else {
        return Err(err!("cannot listen: LISTEN_PID set without LISTEN_FDS"));
    };
    let max_socks = i64::try_from(max_socks)
        .unwrap_or(i64::MAX)
        .min((RawFd::MAX - SD_LISTEN_FDS_START).into());
    let nfds = parse_env(ENV_LISTEN_FDS, &value, max_socks)?;
    // nfds is bounded by the RawFd range above.
    let nfds = nfds as RawFd;

    let mut maxfd = None;
    for fd in SD_LISTEN_FDS_START..SD_LISTEN_FDS_START + nfds {
        debug!("socket activation: using fd {fd}");
        fdctl
            .set_nonblock(fd)
            .map_err(|e| err!("cannot listen: bad file descriptor {fd}: {e}"))?;
        fdctl
            .set_cloexec(fd)
            .map_err(|e| err!("cannot listen: fcntl fd {fd}: {e}"))?;
        socks.push(fd);
        maxfd = Some(fd);
    }
    debug!("socket activation: {nfds} sockets from socket activation");
    Ok(maxfd)
}

/// Terminate the process after a protocol violation.
pub fn fatal(msg: &str) -> ! {
    if log_enabled!(Level::Error) {
        error!("{msg}");
    } else {
        eprintln!("{msg}");
    }
    std::process::exit(FATAL_EXIT_CODE);
}

/// Adopt the sockets passed by the supervisor, or die trying.
///
/// Any inconsistency in the activation request terminates the process,
/// because we could end up serving on sockets we do not own.
/// See [resolve_activation].
pub fn socket_activation(socks: &mut Vec<RawFd>, max_socks: usize) -> Option<RawFd> {
    match resolve_activation(&ProcessEnv, &SysFdControl, socks, max_socks) {
        Ok(maxfd) => maxfd,
        Err(e) => fatal(&format!("socket activation: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        cell::RefCell,
        collections::HashMap,
        os::{fd::AsRawFd as _, unix::net::UnixListener},
    };

    const PID: u32 = 4242;
    const PID_STR: &str = "4242";

    struct FakeEnv(HashMap<&'static str, OsString>);

    impl FakeEnv {
        fn new(vars: &[(&'static str, &str)]) -> Self {
            Self(vars.iter().map(|(k, v)| (*k, OsString::from(*v))).collect())
        }
    }

    impl ActivationEnv for FakeEnv {
        fn var(&self, name: &str) -> Option<OsString> {
            self.0.get(name).cloned()
        }

        fn pid(&self) -> u32 {
            PID
        }
    }

    /// Records all flag operations. Fds in `bad` fail.
    #[derive(Default)]
    struct FakeFds {
        bad: Vec<RawFd>,
        log: RefCell<Vec<(&'static str, RawFd)>>,
    }

    impl FdControl for FakeFds {
        fn set_nonblock(&self, fd: RawFd) -> io::Result<()> {
            if self.bad.contains(&fd) {
                return Err(io::Error::from(nix::errno::Errno::EBADF));
            }
            self.log.borrow_mut().push(("nonblock", fd));
            Ok(())
        }

        fn set_cloexec(&self, fd: RawFd) -> io::Result<()> {
            self.log.borrow_mut().push(("cloexec", fd));
            Ok(())
        }
    }

    #[test]
    fn test_parse_ranged() {
        assert_eq!(parse_ranged("1", 1, 10).unwrap(), 1);
        assert_eq!(parse_ranged("10", 1, 10).unwrap(), 10);
        assert_eq!(parse_ranged("+7", 1, 10).unwrap(), 7);
        assert_eq!(parse_ranged("  7", 1, 10).unwrap(), 7);
        assert_eq!(parse_ranged("0", 1, 10).unwrap_err().to_string(), "too small");
        assert_eq!(parse_ranged("-3", 1, 10).unwrap_err().to_string(), "too small");
        assert_eq!(parse_ranged("11", 1, 10).unwrap_err().to_string(), "too large");
        assert_eq!(
            parse_ranged("99999999999999999999999", 1, 10)
                .unwrap_err()
                .to_string(),
            "too large"
        );
        assert_eq!(parse_ranged("", 1, 10).unwrap_err().to_string(), "invalid");
        assert_eq!(parse_ranged("-", 1, 10).unwrap_err().to_string(), "invalid");
        assert_eq!(parse_ranged("3x", 1, 10).unwrap_err().to_string(), "invalid");
        assert_eq!(parse_ranged("3 ", 1, 10).unwrap_err().to_string(), "invalid");
        assert_eq!(parse_ranged("0x3", 1, 10).unwrap_err().to_string(), "invalid");
    }

    #[test]
    fn test_not_activated() {
        let env = FakeEnv::new(&[("LISTEN_FDS", "3")]);
        let fds = FakeFds::default();
        let mut socks = vec![10, 11];
        let maxfd = resolve_activation(&env, &fds, &mut socks, 16).unwrap();
        assert_eq!(maxfd, None);
        assert_eq!(socks, vec![10, 11]);
        assert!(fds.log.borrow().is_empty());
    }

    #[test]
    fn test_activated() {
        let env = FakeEnv::new(&[("LISTEN_PID", PID_STR), ("LISTEN_FDS", "3")]);
        let fds = FakeFds::default();
        let mut socks = vec![];
        let maxfd = resolve_activation(&env, &fds, &mut socks, 16).unwrap();
        assert_eq!(maxfd, Some(5));
        assert_eq!(socks, vec![3, 4, 5]);
        assert_eq!(
            *fds.log.borrow(),
            vec![
                ("nonblock", 3),
                ("cloexec", 3),
                ("nonblock", 4),
                ("cloexec", 4),
                ("nonblock", 5),
                ("cloexec", 5),
            ]
        );
    }

    #[test]
    fn test_activated_appends() {
        let env = FakeEnv::new(&[("LISTEN_PID", PID_STR), ("LISTEN_FDS", "2")]);
        let fds = FakeFds::default();
        let mut socks = vec![42];
        let maxfd = resolve_activation(&env, &fds, &mut socks, 2).unwrap();
        assert_eq!(maxfd, Some(4));
        assert_eq!(socks, vec![42, 3, 4]);
    }

    #[test]
    fn test_not_idempotent() {
        let env = FakeEnv::new(&[("LISTEN_PID", PID_STR), ("LISTEN_FDS", "2")]);
        let fds = FakeFds::default();
        let mut socks = vec![];
        resolve_activation(&env, &fds, &mut socks, 16).unwrap();
        resolve_activation(&env, &fds, &mut socks, 16).unwrap();
        assert_eq!(socks, vec![3, 4, 3, 4]);
    }

    #[test]
    fn test_bad_pid() {
        let fds = FakeFds::default();
        let mut socks = vec![];

        let env = FakeEnv::new(&[("LISTEN_PID", "1"), ("LISTEN_FDS", "1")]);
        let e = resolve_activation(&env, &fds, &mut socks, 16).unwrap_err();
        assert_eq!(e.to_string(), format!("bad LISTEN_PID: 1 vs pid {PID}"));

        for pid in ["", "abc", "0", "-1", "2147483648", "4242abc"] {
            let env = FakeEnv::new(&[("LISTEN_PID", pid), ("LISTEN_FDS", "1")]);
            let e = resolve_activation(&env, &fds, &mut socks, 16).unwrap_err();
            assert!(e.to_string().starts_with("invalid $LISTEN_PID contents"));
            assert!(e.to_string().contains(&format!("{pid:?}")));
        }

        assert!(socks.is_empty());
        assert!(fds.log.borrow().is_empty());
    }

    #[test]
    fn test_missing_fds() {
        let env = FakeEnv::new(&[("LISTEN_PID", PID_STR)]);
        let fds = FakeFds::default();
        let mut socks = vec![];
        let e = resolve_activation(&env, &fds, &mut socks, 16).unwrap_err();
        assert!(e.to_string().contains("LISTEN_PID set without LISTEN_FDS"));
        assert!(socks.is_empty());
    }

    #[test]
    fn test_bad_fd_count() {
        let fds = FakeFds::default();
        let mut socks = vec![7];
        for (count, reason) in [
            ("0", "too small"),
            ("-2", "too small"),
            ("5", "too large"),
            ("many", "invalid"),
            ("", "invalid"),
        ] {
            let env = FakeEnv::new(&[("LISTEN_PID", PID_STR), ("LISTEN_FDS", count)]);
            let e = resolve_activation(&env, &fds, &mut socks, 4).unwrap_err();
            assert!(e.to_string().starts_with("invalid $LISTEN_FDS contents"));
            assert!(e.to_string().ends_with(reason));
        }
        assert_eq!(socks, vec![7]);
        assert!(fds.log.borrow().is_empty());
    }

    #[test]
    fn test_bad_descriptor() {
        let env = FakeEnv::new(&[("LISTEN_PID", PID_STR), ("LISTEN_FDS", "4")]);
        let fds = FakeFds {
            bad: vec![5],
            ..Default::default()
        };
        let mut socks = vec![];
        let e = resolve_activation(&env, &fds, &mut socks, 16).unwrap_err();
        assert!(e
            .to_string()
            .starts_with("cannot listen: bad file descriptor 5"));
        assert_eq!(socks, vec![3, 4]);
    }

    #[test]
    fn test_huge_max_socks() {
        let env = FakeEnv::new(&[("LISTEN_PID", PID_STR), ("LISTEN_FDS", "1")]);
        let fds = FakeFds::default();
        let mut socks = vec![];
        let maxfd = resolve_activation(&env, &fds, &mut socks, usize::MAX).unwrap();
        assert_eq!(maxfd, Some(3));
    }

    #[test]
    fn test_sys_fdctl() {
        let dir = tempfile::tempdir().unwrap();
        let sock = UnixListener::bind(dir.path().join("fdctl.sock")).unwrap();
        let fd = sock.as_raw_fd();

        let flags = OFlag::from_bits_retain(fcntl(fd, FcntlArg::F_GETFL).unwrap());
        assert!(!flags.contains(OFlag::O_NONBLOCK));

        SysFdControl.set_nonblock(fd).unwrap();
        SysFdControl.set_nonblock(fd).unwrap();
        SysFdControl.set_cloexec(fd).unwrap();

        let flags = OFlag::from_bits_retain(fcntl(fd, FcntlArg::F_GETFL).unwrap());
        assert!(flags.contains(OFlag::O_NONBLOCK));
        let fdflags = FdFlag::from_bits_retain(fcntl(fd, FcntlArg::F_GETFD).unwrap());
        assert!(fdflags.contains(FdFlag::FD_CLOEXEC));
        drop(sock);

        assert!(SysFdControl.set_nonblock(-1).is_err());
        assert!(SysFdControl.set_cloexec(-1).is_err());
    }
}

// vim: ts=4 sw=4 expandtab
