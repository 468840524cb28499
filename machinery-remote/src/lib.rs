//! # machinery-remote
//!
//! `docker-machine ssh`-wrapped guest introspection (spec §4.1 "Unix
//! Remote") plus the narrow set of `VBoxManage` operations the core
//! invokes (port-forward, shared-folder add, graceful halt).

pub mod ssh;
pub mod virtualbox;

pub use ssh::UnixRemote;
pub use virtualbox::VBoxRemote;
