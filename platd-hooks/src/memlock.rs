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
use nix::sys::mman::{mlockall, MlockAllFlags};

/// Lock all current and future pages once they are faulted in.
///
/// This keeps page compaction from migrating our pages
/// while we are busy handling connections.
/// Locks are dropped on fork. The child has to call this again.
pub fn memlock_onfault_setup() -> ah::Result<()> {
    let onfault = MlockAllFlags::from_bits_retain(libc::MCL_ONFAULT);
    mlockall(MlockAllFlags::MCL_CURRENT | MlockAllFlags::MCL_FUTURE | onfault)
        .context("Unable to lock memory")
}

// vim: ts=4 sw=4 expandtab
