#![forbid(unsafe_code)]
//! MendFS volume layer.
//!
//! Everything the maintenance tools consume as a collaborator: the
//! free-space bitmap, the root directory, and the file lifecycle over a
//! [`mfs_block::SectorDevice`]. The maintenance core (`mfs-maint`) sits on
//! top of this crate and never reaches around it except to read raw
//! sectors, which is the point of forensic recovery.

mod free_map;
mod volume;

pub use crate::free_map::FreeMap;
pub use crate::volume::{FileHandle, Volume};
