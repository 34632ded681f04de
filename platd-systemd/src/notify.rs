// -*- coding: utf-8 -*-
//
// platd - daemon platform lifecycle
//
// Copyright (C) 2024 The platd developers
//
// Licensed under the Apache License version 2.0
// or the MIT license, at your option.
// SPDX-License-Identifier: Apache-2.0 OR MIT

use anyhow::{self as ah, Context as _};
use sd_notify::NotifyState;

/// Check whether a supervisor notification socket is available.
pub fn have_notify_socket() -> bool {
    std::env::var_os("NOTIFY_SOCKET").is_some_and(|s| !s.is_empty())
}

/// Notify ready-status to systemd.
///
/// If [unset_environment] is true, all environment variables related
/// to this operation will be cleared.
pub fn systemd_notify_ready(unset_environment: bool) -> ah::Result<()> {
    sd_notify::notify(unset_environment, &[NotifyState::Ready]).context("Systemd notify READY=1")
}

/// Notify systemd that we are reloading.
///
/// The monotonic timestamp lets `Type=notify-reload` units match the
/// reload request with this notification.
pub fn systemd_notify_reload(unset_environment: bool) -> ah::Result<()> {
    let stamp = NotifyState::monotonic_usec_now().context("Monotonic clock")?;
    sd_notify::notify(unset_environment, &[NotifyState::Reloading, stamp])
        .context("Systemd notify RELOADING=1")
}


// vim: ts=4 sw=4 expandtab
