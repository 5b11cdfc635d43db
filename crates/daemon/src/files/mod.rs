//! Filesystem side effects of uploads.
//!
//! Everything a client uploads arrives wrapped in a tar container, either
//! streamed through the SCP sink or dropped into the working directory over
//! SFTP. This module extracts those archives.
//!
//! # Security
//!
//! Entry paths are resolved relative to the extraction root. Absolute paths
//! and `..` components are rejected before anything is written.

pub mod unpack;

pub use unpack::{find_tarballs, unpack, unpack_file, Extracted, UnpackError};
