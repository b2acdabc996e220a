//! The "real file" collaborator.
//!
//! The codec and the transfer engine only ever touch storage through
//! [`RealFile`], so the backing store can be a local disk, a mounted share,
//! or anything else that can hand out seekable streams. Every call to
//! [`RealFile::input_stream`]/[`RealFile::output_stream`] opens an
//! independent handle; transfer workers rely on that to address disjoint
//! byte ranges of one physical file concurrently.

use std::io::{Read, Seek, Write};

use crate::error::Result;

pub mod local;

pub use local::LocalFile;

/// A seekable read-only view of a real file.
pub trait ReadStream: Read + Seek + Send {}

impl<T: Read + Seek + Send> ReadStream for T {}

/// A seekable read-write view of a real file. Reads are required so the
/// encrypt view can merge partial chunks in place.
pub trait RandomAccessStream: Read + Write + Seek + Send {}

impl<T: Read + Write + Seek + Send> RandomAccessStream for T {}

/// Storage abstraction consumed by the codec and the transfer engine.
pub trait RealFile: Send + Sync {
    fn exists(&self) -> bool;

    fn is_dir(&self) -> bool;

    /// Physical length in bytes.
    fn len(&self) -> Result<u64>;

    /// Base name of the file within its parent directory.
    fn name(&self) -> String;

    /// Display form of the full path, for logs and errors only.
    fn display_path(&self) -> String;

    fn delete(&self) -> Result<()>;

    /// Sets the physical length, creating the file if needed. Shrinking
    /// drops the tail; growing extends with zeros.
    fn resize(&self, len: u64) -> Result<()>;

    /// Creates an empty file named `name` under this directory.
    fn create_file(&self, name: &str) -> Result<Box<dyn RealFile>>;

    /// Creates a directory named `name` under this directory.
    fn create_directory(&self, name: &str) -> Result<Box<dyn RealFile>>;

    fn list_files(&self) -> Result<Vec<Box<dyn RealFile>>>;

    /// Moves this file into `dir`, optionally renaming it.
    fn move_to(&self, dir: &dyn RealFile, new_name: Option<&str>) -> Result<Box<dyn RealFile>>;

    /// Copies this file into `dir`, optionally renaming it.
    fn copy_to(&self, dir: &dyn RealFile, new_name: Option<&str>) -> Result<Box<dyn RealFile>>;

    /// Handle to a child of this directory; the child need not exist.
    fn child(&self, name: &str) -> Box<dyn RealFile>;

    fn parent(&self) -> Option<Box<dyn RealFile>>;

    /// Opens a fresh seekable read handle.
    fn input_stream(&self) -> Result<Box<dyn ReadStream>>;

    /// Opens a fresh seekable read-write handle. Existing content is kept;
    /// the container layer decides what may be overwritten.
    fn output_stream(&self) -> Result<Box<dyn RandomAccessStream>>;
}
