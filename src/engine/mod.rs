//! Engine modules: the planner that turns a provisioning request and a
//! block-device snapshot into a concrete partition layout.
//!
//! Leaves first: `size` and `inventory` are pure or read-only, `free_space`,
//! `geometry` and `raid` drive single backend operations, and `provision`
//! composes them.

pub mod free_space;
pub mod geometry;
pub mod inventory;
pub mod provision;
pub mod raid;
pub mod request;
pub mod size;
pub mod storage;
