//! The persistence layer: master-DB (salts + version gate, §4.8), per-object
//! DB I/O (§4.10), and directory reconciliation at startup (§4.10 "Read").

pub mod master;
pub mod object;

pub use master::MasterDb;
