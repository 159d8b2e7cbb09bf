//! View and validate zipped Zarr hierarchies (`.zarr.zip`, `.ozx`) with [`zarrs`].
//!
//! An archive is opened through [`storage::ZipStore`], a read-only `zarrs` store over the
//! entries of a zip archive held in another store (HTTP range requests or the filesystem).
//! [`viewer::MetadataViewer`] renders the attributes of its root group into a page element,
//! and [`validate::validate`] checks it against the zipped OME-Zarr conventions.

mod error;
pub mod locator;
pub mod metadata;
pub mod storage;
pub mod validate;
pub mod viewer;

pub use zarrs;

pub use error::{Error, Result};
pub use locator::SourceLocator;
pub use metadata::RootGroup;
pub use storage::{ZipStore, open_archive};
pub use viewer::{DisplaySink, HtmlPage, MetadataViewer, ViewerOptions};
