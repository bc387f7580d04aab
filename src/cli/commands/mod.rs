//! One module per subcommand.

#[cfg(feature = "audit-log")]
pub mod audit_cmd;
pub mod generate;
pub mod init;
pub mod legacy;
pub mod list;
pub mod rotate;
pub mod sync;
pub mod trust;
