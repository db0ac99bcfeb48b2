//! Test utilities shared by the VM, protocol and server tests.
