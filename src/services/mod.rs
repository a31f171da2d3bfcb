//! Upload pipeline and the collaborators it is wired to.

pub mod keys;
pub mod object_storage;
pub mod recent_uploads;
pub mod scratch;
pub mod upload_service;
pub mod validation;
