//! Splits LAS/LAZ point clouds into one file per classification code.
//!
//! For every distinct classification code in a source file, one copy of the
//! file is written in which points whose code is in the keep set stay as they
//! are and all other points are set to "unclassified" (1).

pub mod classify;
pub mod las_io;
pub mod split;
