// -*- coding: utf-8 -*-
//
// platd - daemon platform lifecycle
//
// Copyright (C) 2024 The platd developers
//
// Licensed under the Apache License version 2.0
// or the MIT license, at your option.
// SPDX-License-Identifier: Apache-2.0 OR MIT

use crate::numparse::{parse_bool, parse_i32, parse_usize};
use anyhow::{self as ah, format_err as err, Context as _};
use configparser::ini::Ini;
use log::info;
use platd_hooks::{PlatformConfig, OOM_SCORE_ADJ_MAX, OOM_SCORE_ADJ_MIN};
use std::path::{Path, PathBuf};

pub const CONF_PATH: &str = "/etc/platd/platd.conf";
const SECT: &str = "PLATD";

const DEFAULT_MAX_SOCKETS: usize = 16;

#[derive(Clone, Debug)]
pub struct PlatdConfig {
    max_sockets: usize,
    socket_path: Option<PathBuf>,
    platform: PlatformConfig,
}

impl Default for PlatdConfig {
    fn default() -> Self {
        Self {
            max_sockets: DEFAULT_MAX_SOCKETS,
            socket_path: None,
            platform: PlatformConfig::default(),
        }
    }
}

impl PlatdConfig {
    /// Load the configuration file.
    ///
    /// A missing file gives the default configuration.
    pub fn load(path: &Path) -> ah::Result<Self> {
        if !path.exists() {
            info!("No configuration {path:?}. Using defaults.");
            return Ok(Default::default());
        }
        let mut ini = Ini::new_cs();
        if let Err(e) = ini.load(path) {
            return Err(err!("Failed to load configuration {path:?}: {e}"));
        };
        Self::from_ini(&ini).with_context(|| format!("Configuration {path:?}"))
    }

    fn from_ini(ini: &Ini) -> ah::Result<Self> {
        let mut conf = Self::default();

        if let Some(v) = ini.get(SECT, "max-sockets") {
            conf.max_sockets = parse_usize(&v).context("max-sockets")?;
            if conf.max_sockets == 0 {
                return Err(err!("max-sockets: Must be at least 1"));
            }
        }
        if let Some(v) = ini.get(SECT, "socket-path") {
            conf.socket_path = Some(PathBuf::from(v.trim()));
        }
        if let Some(v) = ini.get(SECT, "oom-score-adj") {
            conf.platform.oom_score_adj = match v.trim() {
                "none" | "off" => None,
                v => {
                    let v = parse_i32(v).context("oom-score-adj")?;
                    if !(OOM_SCORE_ADJ_MIN..=OOM_SCORE_ADJ_MAX).contains(&v) {
                        return Err(err!(
                            "oom-score-adj: Not in range {OOM_SCORE_ADJ_MIN}..={OOM_SCORE_ADJ_MAX}"
                        ));
                    }
                    Some(v)
                }
            };
        }
        if let Some(v) = ini.get(SECT, "memlock-onfault") {
            conf.platform.memlock_onfault = parse_bool(&v).context("memlock-onfault")?;
        }
        if let Some(v) = ini.get(SECT, "notify") {
            conf.platform.notify = parse_bool(&v).context("notify")?;
        }

        Ok(conf)
    }

    /// Upper bound of sockets accepted from socket activation.
    pub fn max_sockets(&self) -> usize {
        self.max_sockets
    }

    /// Path of the socket to create, if we are not socket activated.
    pub fn socket_path(&self, rundir: &Path) -> PathBuf {
        self.socket_path
            .clone()
            .unwrap_or_else(|| rundir.join(SOCK_FILE))
    }

    pub fn platform(&self) -> &PlatformConfig {
        &self.platform
    }
}

pub const SOCK_FILE: &str = "platd.sock";


// vim: ts=4 sw=4 expandtab
