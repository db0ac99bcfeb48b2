//! Networked register virtual machine.
//!
//! Clients upload a program of fixed-width instructions over a small binary
//! protocol, edit it in place and run it on a single VM shared by every
//! connection. Execution is sliced so one long-running program never stalls
//! the other clients.

pub mod network;
pub mod types;
pub mod utils;
pub mod virtual_machine;
