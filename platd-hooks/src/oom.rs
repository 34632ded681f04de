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
use log::debug;
use std::{
    fs::{read_to_string, OpenOptions},
    io::{ErrorKind, Write as _},
    path::{Path, PathBuf},
};

pub const OOM_ADJ_PATH: &str = "/proc/self/oom_score_adj";
pub const OOM_SCORE_ADJ_MIN: i32 = -1000;
pub const OOM_SCORE_ADJ_MAX: i32 = 1000;

/// OOM killer score adjustment with restore.
pub struct OomAdjust {
    path: PathBuf,
    saved: Option<i32>,
}

impl OomAdjust {
    pub fn new() -> Self {
        Self::with_path(Path::new(OOM_ADJ_PATH))
    }

    pub fn with_path(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            saved: None,
        }
    }

    /// The value found before the first successful [OomAdjust::setup].
    pub fn saved(&self) -> Option<i32> {
        self.saved
    }

    fn write(&self, value: i32) -> ah::Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&self.path)
            .with_context(|| format!("Open {}", self.path.display()))?;
        writeln!(file, "{value}").with_context(|| format!("Write {}", self.path.display()))
    }

    /// Save the current score adjustment and replace it with `value`.
    ///
    /// A kernel without OOM score support is not an error.
    pub fn setup(&mut self, value: i32) -> ah::Result<()> {
        if !(OOM_SCORE_ADJ_MIN..=OOM_SCORE_ADJ_MAX).contains(&value) {
            return Err(err!(
                "OOM score adjustment {value} not in range \
                 {OOM_SCORE_ADJ_MIN}..={OOM_SCORE_ADJ_MAX}"
            ));
        }
        let old = match read_to_string(&self.path) {
            Ok(s) => s,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("{} not present.", self.path.display());
                return Ok(());
            }
            Err(e) => {
                return Err(err!("Read {}: {e}", self.path.display()));
            }
        };
        let old: i32 = old
            .trim()
            .parse()
            .with_context(|| format!("Parse {}", self.path.display()))?;
        self.write(value)?;
        // Keep the very first value across repeated setups.
        if self.saved.is_none() {
            self.saved = Some(old);
        }
        debug!("Set {} from {old} to {value}", self.path.display());
        Ok(())
    }

    /// Restore the saved score adjustment, if any.
    pub fn restore(&mut self) -> ah::Result<()> {
        if let Some(saved) = self.saved {
            self.write(saved)?;
            debug!("Set {} to {saved}", self.path.display());
        }
        Ok(())
    }
}

impl Default for OomAdjust {
    fn default() -> Self {
        Self::new()
    }
}


// vim: ts=4 sw=4 expandtab
