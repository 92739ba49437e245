//! Configuration shared by the tunnel-xlat binaries.

pub mod config;
