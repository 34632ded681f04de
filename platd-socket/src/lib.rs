// -*- coding: utf-8 -*-
//
// platd - daemon platform lifecycle
//
// Copyright (C) 2024 The platd developers
//
// Licensed under the Apache License version 2.0
// or the MIT license, at your option.
// SPDX-License-Identifier: Apache-2.0 OR MIT

use anyhow::{self as ah, format_err as err, Context as _};
use libc::{S_IFMT, S_IFSOCK};
use log::info;
use nix::sys::{
    socket::{getsockname, getsockopt, sockopt, AddressFamily, SockaddrLike as _, SockaddrStorage},
    stat::{fstat, SFlag},
};
use std::{
    fmt,
    fs::{metadata, remove_file},
    net::TcpListener as StdTcpListener,
    os::{
        fd::{AsFd, AsRawFd as _, FromRawFd as _, OwnedFd, RawFd},
        unix::{fs::MetadataExt as _, net::UnixListener as StdUnixListener},
    },
    path::Path,
};
use tokio::net::{TcpListener, TcpStream, UnixListener, UnixStream};

/// Take ownership of a socket activation fd.
fn adopt_fd(fd: RawFd) -> OwnedFd {
    // SAFETY:
    // The fd is open and was handed to us by the supervisor.
    // Socket activation passed its ownership to us.
    unsafe { OwnedFd::from_raw_fd(fd) }
}

enum Listener {
    Tcp(TcpListener),
    Unix(UnixListener),
}

/// A listening socket of the daemon.
pub struct PlatSocket {
    sock: Listener,
}

/// Address family of an inherited socket.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Family {
    Inet,
    Unix,
}

/// Check that `fd` is a listening socket and get its family.
fn check_listen_fd(fd: &impl AsFd) -> ah::Result<Family> {
    let raw = fd.as_fd().as_raw_fd();
    let st = fstat(raw).with_context(|| format!("fstat fd {raw}"))?;
    if !SFlag::from_bits_truncate(st.st_mode).contains(SFlag::S_IFSOCK) {
        return Err(err!("fd {raw} is not a socket"));
    }
    if !getsockopt(fd, sockopt::AcceptConn).with_context(|| format!("getsockopt fd {raw}"))? {
        return Err(err!("fd {raw} is not a listening socket"));
    }
    let addr: SockaddrStorage =
        getsockname(raw).with_context(|| format!("getsockname fd {raw}"))?;
    match addr.family() {
        Some(AddressFamily::Inet | AddressFamily::Inet6) => Ok(Family::Inet),
        Some(AddressFamily::Unix) => Ok(Family::Unix),
        family => Err(err!("fd {raw}: unsupported address family {family:?}")),
    }
}

impl PlatSocket {
    /// Create a new [PlatSocket] with the specified path.
    fn new(sock_path: &Path) -> ah::Result<Self> {
        if let Ok(meta) = metadata(sock_path) {
            if meta.mode() & S_IFMT == S_IFSOCK {
                remove_file(sock_path).context("Remove existing socket")?;
            }
        }
        let sock = UnixListener::bind(sock_path).context("Bind socket")?;
        Ok(Self {
            sock: Listener::Unix(sock),
        })
    }

    /// Take ownership of an inherited listening socket.
    ///
    /// Must be called from within a tokio runtime.
    pub fn from_fd(fd: RawFd) -> ah::Result<Self> {
        let fd = adopt_fd(fd);
        let family = check_listen_fd(&fd)?;
        Self::from_owned(fd, family)
    }

    fn from_owned(fd: OwnedFd, family: Family) -> ah::Result<Self> {
        let sock = match family {
            Family::Inet => {
                let sock = StdTcpListener::from(fd);
                sock.set_nonblocking(true)
                    .context("Set socket non-blocking")?;
                Listener::Tcp(TcpListener::from_std(sock).context("Register socket")?)
            }
            Family::Unix => {
                let sock = StdUnixListener::from(fd);
                sock.set_nonblocking(true)
                    .context("Set socket non-blocking")?;
                Listener::Unix(UnixListener::from_std(sock).context("Register socket")?)
            }
        };
        Ok(Self { sock })
    }

    /// Create [PlatSocket]s from the socket activation fds,
    /// or a single one at the specified path, if we were not activated.
    ///
    /// All fds are owned by us afterwards, even on error.
    /// Must be called from within a tokio runtime.
    pub fn from_activation_or_path(fds: &[RawFd], sock_path: &Path) -> ah::Result<Vec<Self>> {
        if fds.is_empty() {
            info!("Creating socket {sock_path:?}.");
            return Ok(vec![Self::new(sock_path)?]);
        }
        info!("Using {} socket(s) from socket activation.", fds.len());
        let fds: Vec<OwnedFd> = fds.iter().map(|fd| adopt_fd(*fd)).collect();
        // Validate all before registering any.
        let families = fds.iter().map(|fd| check_listen_fd(fd)).collect::<ah::Result<Vec<_>>>()?;
        fds.into_iter()
            .zip(families)
            .map(|(fd, family)| Self::from_owned(fd, family))
            .collect()
    }

    pub fn local_addr(&self) -> String {
        match &self.sock {
            Listener::Tcp(s) => s
                .local_addr()
                .map(|a| a.to_string())
                .unwrap_or_else(|_| "tcp:?".to_string()),
            Listener::Unix(s) => s
                .local_addr()
                .ok()
                .and_then(|a| a.as_pathname().map(|p| p.display().to_string()))
                .unwrap_or_else(|| "unix:?".to_string()),
        }
    }

    pub async fn accept(&mut self) -> ah::Result<PlatSocketConn> {
        match &self.sock {
            Listener::Tcp(s) => {
                let (stream, addr) = s.accept().await.context("Accept")?;
                Ok(PlatSocketConn {
                    stream: Stream::Tcp(stream),
                    peer: addr.to_string(),
                })
            }
            Listener::Unix(s) => {
                let (stream, _addr) = s.accept().await.context("Accept")?;
                let peer = match stream.peer_cred() {
                    Ok(cred) => format!(
                        "unix:pid={},uid={}",
                        cred.pid().unwrap_or(-1),
                        cred.uid()
                    ),
                    Err(_) => "unix".to_string(),
                };
                Ok(PlatSocketConn {
                    stream: Stream::Unix(stream),
                    peer,
                })
            }
        }
    }
}

enum Stream {
    Tcp(TcpStream),
    Unix(UnixStream),
}

/// An accepted connection.
pub struct PlatSocketConn {
    stream: Stream,
    peer: String,
}

impl PlatSocketConn {
    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn is_tcp(&self) -> bool {
        matches!(self.stream, Stream::Tcp(_))
    }
}

impl fmt::Display for PlatSocketConn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.peer)
    }
}


// vim: ts=4 sw=4 expandtab
