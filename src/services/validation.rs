//! Request gates that run before any side effect.
//!
//! Each check either passes or yields a `RejectReason`; the pipeline runs them
//! in a fixed order and stops at the first failure.

use crate::{
    errors::RejectReason,
    models::upload::{UploadPayload, UploadRequest},
};
use std::collections::BTreeSet;

pub const DEFAULT_ALLOWED_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "gif"];
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 5 * 1024 * 1024;
const MAX_FILENAME_LEN: usize = 255;

/// Names Windows refuses to use as files regardless of extension.
const RESERVED_NAMES: [&str; 22] = [
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Which files the service accepts.
#[derive(Debug, Clone)]
pub struct UploadPolicy {
    /// Lower-case extensions without the leading dot.
    pub allowed_extensions: BTreeSet<String>,
    /// `None` disables the size check.
    pub max_upload_bytes: Option<u64>,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            allowed_extensions: DEFAULT_ALLOWED_EXTENSIONS
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
            max_upload_bytes: Some(DEFAULT_MAX_UPLOAD_BYTES),
        }
    }
}

/// Fails when no file part arrived or its name is blank.
pub fn check_presence(request: Option<&UploadRequest>) -> Result<&UploadRequest, RejectReason> {
    let request = request.ok_or(RejectReason::MissingFile)?;
    if request.filename.trim().is_empty() {
        return Err(RejectReason::EmptyFilename);
    }
    Ok(request)
}

/// Lower-cased text after the last `.`, or `None` when there is no dot.
pub fn file_extension(filename: &str) -> Option<String> {
    filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
}

/// Returns the accepted extension.
pub fn check_extension(
    filename: &str,
    allowed: &BTreeSet<String>,
) -> Result<String, RejectReason> {
    match file_extension(filename) {
        Some(ext) if allowed.contains(&ext) => Ok(ext),
        _ => Err(RejectReason::DisallowedExtension),
    }
}

pub fn check_size(payload: &UploadPayload, max_bytes: Option<u64>) -> Result<(), RejectReason> {
    match max_bytes {
        Some(max) if payload.len() > max => Err(RejectReason::SizeExceeded),
        _ => Ok(()),
    }
}

/// Reduce a client-supplied filename to a safe base name.
///
/// Directory components are dropped, whitespace runs become `_`, anything
/// outside `[A-Za-z0-9._-]` is removed, and leading/trailing dots and
/// underscores are trimmed. The result must still end in `.{extension}`;
/// otherwise the name is rejected rather than stored under a different type.
///
/// Non-ASCII characters are dropped, not transliterated: `résumé.png` becomes
/// `rsum.png`, and a stem made only of non-ASCII characters (`фото.png`) is
/// rejected with `InvalidFilename`.
pub fn sanitize_filename(filename: &str, extension: &str) -> Result<String, RejectReason> {
    let base = filename.rsplit(['/', '\\']).next().unwrap_or_default();

    let words: Vec<String> = base
        .split_whitespace()
        .map(|word| {
            word.chars()
                .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
                .collect::<String>()
        })
        .filter(|word| !word.is_empty())
        .collect();
    let joined = words.join("_");
    let mut name = joined
        .trim_matches(|c| c == '.' || c == '_')
        .to_string();

    let suffix = format!(".{extension}");
    let stem_len = name.len().saturating_sub(suffix.len());
    if !name.to_ascii_lowercase().ends_with(&suffix) || stem_len == 0 {
        return Err(RejectReason::InvalidFilename);
    }

    if name.len() > MAX_FILENAME_LEN {
        let (stem, ext) = name.split_at(stem_len);
        let keep = MAX_FILENAME_LEN.saturating_sub(ext.len());
        name = format!("{}{}", &stem[..keep], ext);
    }

    let stem = &name[..name.len() - suffix.len()];
    if RESERVED_NAMES
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(stem))
    {
        name.insert(0, '_');
    }

    Ok(name)
}

/// Content type for the stored object: the declared one, or a guess from the
/// extension.
pub fn resolve_content_type(declared: Option<&str>, extension: &str) -> String {
    if let Some(declared) = declared.map(str::trim).filter(|ct| !ct.is_empty()) {
        return declared.to_string();
    }
    match extension {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        _ => "application/octet-stream",
    }
    .to_string()
}
