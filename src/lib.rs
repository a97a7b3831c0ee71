//! polythene: validate packaged artifacts inside an ephemeral rootfs
//!
//! A container image is exported once (`pull`) into a durable per-UUID
//! directory; commands run against that tree later (`exec`) through the
//! strongest isolation mechanism the host supports, negotiated by
//! side-effect-free probes before anything consequential executes.

pub mod backend;
pub mod cli;
pub mod export;
pub mod ident;
pub mod probe;
pub mod runner;
pub mod store;
pub mod types;
