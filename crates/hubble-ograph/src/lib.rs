//! # hubble-ograph
//!
//! Link preview metadata for hubble entries.
//!
//! [`MetadataExtractor`] validates a URL, fetches the page with a browser
//! user agent and picks the OpenGraph title, description, favicon, author,
//! thumbnail and site type. Relative favicon and thumbnail links are
//! resolved against the page. [`LinkMetadataCache`] keeps results in the
//! key-value store for a day.

pub mod cache;
pub mod extractor;

pub use cache::LinkMetadataCache;
pub use extractor::{extract_from_html, resolve_url, validate_url, MetadataExtractor};
