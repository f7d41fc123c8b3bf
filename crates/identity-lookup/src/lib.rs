//! Patient identification backends
//!
//! Implementations of the session's `IdentityLookup` capability:
//! - `HttpLookupClient` posts the captured frame to the clinic backend
//! - `GalleryLookup` matches face descriptors against enrolled patients

pub mod config;
pub mod gallery;
pub mod http;

pub use config::{LookupBackend, LookupConfig};
pub use gallery::{GalleryError, GalleryLookup};
pub use http::HttpLookupClient;
