//! # Device repair and reinstallation
//!
//! Recovers a device carrying two redundant operating system partition
//! sets (`A` and `B`) on one fixed disk. A selected target becomes an
//! ordered plan of disk operations (partitioning, formatting, imaging the
//! running installer onto both root slots, boot configuration and firmware
//! staging) executed with a guarantee that the installer is never left
//! frozen or with stray mounts.

// See https://doc.rust-lang.org/rustc/lints/listing/allowed-by-default.html
#![deny(missing_docs)]
#![deny(missing_debug_implementations)]
#![forbid(unused_must_use)]
#![deny(unsafe_code)]
#![deny(clippy::dbg_macro)]
#![deny(clippy::todo)]

pub mod cli;

mod blockdev;
mod bootconf;
mod config;
mod firmware;
mod guard;
mod imager;
mod mkfs;
mod mount;
mod partitions;
mod plan;
mod prompt;
mod reboot;
mod repair;
mod runner;
mod sanitize;
mod status;
mod task;
mod verify;

#[cfg(test)]
mod testutil;
