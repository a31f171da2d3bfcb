//! Data carried through the upload pipeline and returned over HTTP.
//!
//! Nothing here is persisted except the URLs appended to the recent-uploads
//! log; every other value lives for one request.

pub mod upload;
