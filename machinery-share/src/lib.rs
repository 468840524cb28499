//! # machinery-share
//!
//! The Share Engine (spec §4.6): normalizes loose share specs, registers
//! persistent `vboxsf` mounts (rewriting `bootlocal.sh`), and drives
//! `rsync` sync in either direction for non-VirtualBox drivers.

pub mod rsync;
pub mod spec;
pub mod vboxsf;

pub use spec::{resolve as resolve_share, ResolvedShare, ShareType};
