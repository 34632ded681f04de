// -*- coding: utf-8 -*-
//
// platd - daemon platform lifecycle
//
// Copyright (C) 2024 The platd developers
//
// Licensed under the Apache License version 2.0
// or the MIT license, at your option.
// SPDX-License-Identifier: Apache-2.0 OR MIT

use crate::{memlock::memlock_onfault_setup, oom::OomAdjust, PlatformConfig, PlatformHooks};
use log::{debug, info};
use platd_systemd::{systemd_notify_ready, systemd_notify_reload};

/// Linux hooks: OOM score, memory locking and systemd notification.
pub struct LinuxPlatform {
    conf: PlatformConfig,
    oom: OomAdjust,
}

impl LinuxPlatform {
    pub fn new(conf: &PlatformConfig) -> Self {
        Self::with_oom(conf, OomAdjust::new())
    }

    pub fn with_oom(conf: &PlatformConfig, oom: OomAdjust) -> Self {
        Self {
            conf: conf.clone(),
            oom,
        }
    }

    pub fn oom(&self) -> &OomAdjust {
        &self.oom
    }
}

impl PlatformHooks for LinuxPlatform {
    fn reconfigure(&mut self, conf: &PlatformConfig) {
        self.conf = conf.clone();
    }

    fn adjust_oom(&mut self) {
        if let Some(value) = self.conf.oom_score_adj {
            if let Err(e) = self.oom.setup(value) {
                info!("OOM adjust: {e:#}");
            }
        }
    }

    fn restore_oom(&mut self) {
        if let Err(e) = self.oom.restore() {
            info!("OOM restore: {e:#}");
        }
    }

    fn protect_memory(&mut self) {
        if !self.conf.memlock_onfault {
            return;
        }
        match memlock_onfault_setup() {
            Ok(()) => debug!("Locked memory on fault."),
            Err(e) => info!("{e:#}"),
        }
    }

    fn notify_ready(&mut self) {
        if self.conf.notify {
            if let Err(e) = systemd_notify_ready(false) {
                info!("{e:#}");
            }
        }
    }

    fn notify_reload(&mut self) {
        if self.conf.notify {
            if let Err(e) = systemd_notify_reload(false) {
                info!("{e:#}");
            }
        }
    }
}


// vim: ts=4 sw=4 expandtab
