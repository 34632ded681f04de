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

mod config;
mod numparse;

use crate::config::{PlatdConfig, CONF_PATH};
use anyhow::{self as ah, format_err as err, Context as _};
use clap::Parser;
use log::{error, info, LevelFilter};
use platd_hooks::{Lifecycle, NativePlatform, PlatformHooks as _};
use platd_socket::PlatSocket;
use std::{num::NonZeroUsize, os::fd::RawFd, path::PathBuf, sync::Arc, time::Duration};
use tokio::{
    runtime,
    signal::unix::{signal, SignalKind},
    sync, task,
};

#[derive(Parser, Debug, Clone)]
struct Opts {
    /// Path to the configuration file.
    #[arg(long, default_value = CONF_PATH)]
    config: PathBuf,

    /// The run directory for runtime data.
    #[arg(long, default_value = "/run")]
    rundir: PathBuf,

    /// Never use sockets from socket activation.
    #[arg(long, default_value = "false")]
    no_activation: bool,

    /// Log level. Overrides RUST_LOG.
    #[arg(long)]
    log_level: Option<LevelFilter>,

    /// Set the number async worker threads.
    #[arg(long, default_value = "2")]
    worker_threads: NonZeroUsize,
}

fn init_logging(opts: &Opts) {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(LevelFilter::Info);
    builder.parse_default_env();
    if let Some(level) = opts.log_level {
        builder.filter_level(level);
    }
    builder.init();
}

async fn async_main(
    opts: Arc<Opts>,
    mut conf: PlatdConfig,
    mut lifecycle: Lifecycle<NativePlatform>,
    fds: Vec<RawFd>,
) -> ah::Result<()> {
    let (main_exit_tx, mut main_exit_rx) = sync::mpsc::channel(1);

    let mut sigterm = signal(SignalKind::terminate()).context("SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("SIGINT handler")?;
    let mut sighup = signal(SignalKind::hangup()).context("SIGHUP handler")?;

    let socks = PlatSocket::from_activation_or_path(&fds, &conf.socket_path(&opts.rundir))?;

    // Task: Socket handler.
    for mut sock in socks {
        let main_exit_tx = main_exit_tx.clone();
        info!("Listening on {}.", sock.local_addr());
        task::spawn(async move {
            loop {
                match sock.accept().await {
                    Ok(conn) => {
                        info!("Connection from {conn}.");
                    }
                    Err(e) => {
                        let _ = main_exit_tx.send(Err(e)).await;
                        break;
                    }
                }
            }
        });
    }

    lifecycle.post_listen();

    // Main task.
    let exitcode;
    loop {
        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM: Terminating.");
                exitcode = Ok(());
                break;
            }
            _ = sigint.recv() => {
                exitcode = Err(err!("Interrupted by SIGINT."));
                break;
            }
            _ = sighup.recv() => {
                info!("SIGHUP: Reloading.");
                lifecycle.pre_restart();
                match PlatdConfig::load(&opts.config) {
                    Ok(new_conf) => conf = new_conf,
                    Err(e) => error!("Reload failed, keeping old configuration: {e:#}"),
                }
                lifecycle.hooks_mut().reconfigure(conf.platform());
                lifecycle.pre_listen();
                lifecycle.post_listen();
            }
            code = main_exit_rx.recv() => {
                if let Some(code) = code {
                    exitcode = code;
                } else {
                    exitcode = Err(err!("Unknown error code."));
                }
                break;
            }
        }
    }
    exitcode
}

fn main() -> ah::Result<()> {
    let opts = Arc::new(Opts::parse());
    init_logging(&opts);

    let conf = PlatdConfig::load(&opts.config)?;

    // Platform setup and socket activation run single threaded,
    // before the runtime exists.
    let mut lifecycle = Lifecycle::new(NativePlatform::new(conf.platform()));
    lifecycle.pre_listen();

    let mut fds = vec![];
    if !opts.no_activation {
        if let Some(maxfd) = lifecycle.socket_activation(&mut fds, conf.max_sockets()) {
            info!("Socket activation: {} fds, highest fd {maxfd}.", fds.len());
        }
    }

    runtime::Builder::new_multi_thread()
        .thread_keep_alive(Duration::from_millis(0))
        .worker_threads(opts.worker_threads.into())
        .enable_all()
        .build()
        .context("Tokio runtime builder")?
        .block_on(async_main(opts, conf, lifecycle, fds))
}

// vim: ts=4 sw=4 expandtab
