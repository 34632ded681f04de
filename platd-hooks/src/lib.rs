// -*- coding: utf-8 -*-
//
// platd - daemon platform lifecycle
//
// Copyright (C) 2024 The platd developers
//
// Licensed under the Apache License version 2.0
// or the MIT license, at your option.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Platform hooks around the daemon's listen, fork and restart points.
//!
//! A platform implements the subset of [PlatformHooks] it supports.
//! Everything else stays a no-op.

#![forbid(unsafe_code)]

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "linux")]
mod memlock;
mod oom;

pub use crate::oom::{OomAdjust, OOM_ADJ_PATH, OOM_SCORE_ADJ_MAX, OOM_SCORE_ADJ_MIN};
#[cfg(target_os = "linux")]
pub use crate::{linux::LinuxPlatform, memlock::memlock_onfault_setup};

use std::os::fd::RawFd;

pub type Pid = libc::pid_t;

/// Platform tunables.
#[derive(Clone, Debug)]
pub struct PlatformConfig {
    /// Value written to the OOM score adjustment. `None` leaves it alone.
    pub oom_score_adj: Option<i32>,
    /// Lock our memory on fault, so page migration does not stall us.
    pub memlock_onfault: bool,
    /// Send readiness and reload notifications to the supervisor.
    pub notify: bool,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            oom_score_adj: Some(OOM_SCORE_ADJ_MIN),
            memlock_onfault: true,
            notify: true,
        }
    }
}

/// Optional platform operations.
///
/// None of these fail. Problems are logged and the daemon continues.
pub trait PlatformHooks {
    /// Apply new tunables, e.g. after a configuration reload.
    fn reconfigure(&mut self, _conf: &PlatformConfig) {}

    /// Protect the listening process from the OOM killer.
    fn adjust_oom(&mut self) {}

    /// Undo [PlatformHooks::adjust_oom].
    fn restore_oom(&mut self) {}

    /// Lock memory on fault.
    fn protect_memory(&mut self) {}

    /// Tell the supervisor that we are ready to serve.
    fn notify_ready(&mut self) {}

    /// Tell the supervisor that we are reloading.
    fn notify_reload(&mut self) {}

    fn register_fork_contract_pre(&mut self) {}
    fn register_fork_contract_parent(&mut self, _child: Pid) {}
    fn register_fork_contract_child(&mut self) {}
}

/// Platform without any supported hooks.
#[derive(Default)]
pub struct NoopPlatform;

impl NoopPlatform {
    pub fn new(_conf: &PlatformConfig) -> Self {
        Self
    }
}

impl PlatformHooks for NoopPlatform {}

/// The hooks implementation selected for the build target.
#[cfg(target_os = "linux")]
pub type NativePlatform = LinuxPlatform;
#[cfg(not(target_os = "linux"))]
pub type NativePlatform = NoopPlatform;

/// Lifecycle sequencing points of the daemon.
pub struct Lifecycle<H> {
    hooks: H,
}

impl<H: PlatformHooks> Lifecycle<H> {
    pub fn new(hooks: H) -> Self {
        Self { hooks }
    }

    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    pub fn hooks_mut(&mut self) -> &mut H {
        &mut self.hooks
    }

    /// Called before the listening sockets are set up.
    pub fn pre_listen(&mut self) {
        self.hooks.adjust_oom();
        self.hooks.protect_memory();
    }

    /// Called after the listening sockets are set up.
    pub fn post_listen(&mut self) {
        self.hooks.notify_ready();
    }

    /// Called before forking a session process.
    pub fn pre_fork(&mut self) {
        self.hooks.register_fork_contract_pre();
    }

    /// Called before the daemon restarts itself.
    pub fn pre_restart(&mut self) {
        self.hooks.notify_reload();
        self.hooks.restore_oom();
    }

    /// Called in the parent after a successful fork.
    pub fn post_fork_parent(&mut self, child: Pid) {
        self.hooks.register_fork_contract_parent(child);
    }

    /// Called in the child after a successful fork.
    pub fn post_fork_child(&mut self) {
        self.hooks.register_fork_contract_child();
        self.hooks.restore_oom();
    }

    /// Called in the session process before it starts serving.
    ///
    /// Memory locks are not inherited across fork, so lock again.
    pub fn pre_session_start(&mut self) {
        self.hooks.protect_memory();
    }

    /// Adopt the listening sockets passed by the supervisor.
    ///
    /// See [platd_systemd::socket_activation].
    pub fn socket_activation(&mut self, socks: &mut Vec<RawFd>, max_socks: usize) -> Option<RawFd> {
        platd_systemd::socket_activation(socks, max_socks)
    }
}


// vim: ts=4 sw=4 expandtab
