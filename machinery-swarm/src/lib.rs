//! # machinery-swarm
//!
//! Classic (token-discovery) Swarm and Swarm Mode (spec §4.4): master
//! election and join flags for the former; the join protocol, leave,
//! manager picker, network creation, and stack deploy for the latter.

pub mod classic;
pub mod mode;
pub mod token;

pub use classic::{enforce_single_master, join_flags};
pub use mode::stack;
pub use mode::{create_network, join, leave, node_ls, pick_manager, JoinResult, NodeEntry, Role};
pub use token::{TokenPair, TokenStore};
