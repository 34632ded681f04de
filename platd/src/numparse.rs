// -*- coding: utf-8 -*-
//
// platd - daemon platform lifecycle
//
// Copyright (C) 2024 The platd developers
//
// Licensed under the Apache License version 2.0
// or the MIT license, at your option.
// SPDX-License-Identifier: Apache-2.0 OR MIT

use anyhow::{self as ah, format_err as err};

pub fn parse_usize(s: &str) -> ah::Result<usize> {
    Ok(s.trim().parse::<usize>()?)
}

pub fn parse_i32(s: &str) -> ah::Result<i32> {
    Ok(s.trim().parse::<i32>()?)
}

pub fn parse_bool(s: &str) -> ah::Result<bool> {
    let s = s.to_lowercase();
    let s = s.trim();
    match s {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(err!("Invalid boolean string")),
    }
}


// vim: ts=4 sw=4 expandtab
