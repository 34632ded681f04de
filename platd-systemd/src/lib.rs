// -*- coding: utf-8 -*-
//
// platd - daemon platform lifecycle
//
// Copyright (C) 2024 The platd developers
//
// Licensed under the Apache License version 2.0
// or the MIT license, at your option.
// SPDX-License-Identifier: Apache-2.0 OR MIT

#![forbid(unsafe_code)]

mod activation;
mod notify;

pub use activation::{
    fatal, resolve_activation, socket_activation, ActivationEnv, FdControl, ProcessEnv,
    SysFdControl, FATAL_EXIT_CODE, SD_LISTEN_FDS_START,
};
pub use notify::{have_notify_socket, systemd_notify_ready, systemd_notify_reload};

// vim: ts=4 sw=4 expandtab
