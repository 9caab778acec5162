//! Blob store key layout.
//!
//! Every key the pipeline reads or writes is derived here, so the layout
//! lives in exactly one place:
//!
//! - staging:    `uploads/tmp/{user_id}/{category}/{unix_seconds}_{token}.{ext}`
//! - original:   `originals/{hash[:2]}/{hash}/original`
//! - derivative: `derivatives/{hash[:2]}/{hash}/v{version}/{rendition}.{format}`

use uuid::Uuid;

/// Content types accepted at presign time. Detection from magic bytes still
/// decides what actually gets processed.
pub const ACCEPTED_CONTENT_TYPES: &[&str] = &[
    "image/jpeg",
    "image/png",
    "image/webp",
    "image/gif",
    "image/heic",
    "image/heif",
    "image/avif",
];

/// Staging key for a fresh upload. The token keeps concurrent uploads from
/// the same user in the same second distinct.
pub fn staging_key(
    user_id: Uuid,
    category: &str,
    unix_seconds: i64,
    upload_id: Uuid,
    ext: &str,
) -> String {
    let token = &upload_id.simple().to_string()[..8];
    format!(
        "uploads/tmp/{}/{}/{}_{}.{}",
        user_id, category, unix_seconds, token, ext
    )
}

/// Canonical content-addressed location of an untransformed original.
pub fn original_key(content_hash: &str) -> String {
    format!(
        "originals/{}/{}/original",
        &content_hash[..2],
        content_hash
    )
}

/// Deterministic derivative location; a pure function of hash, version,
/// rendition, and format.
pub fn derivative_key(content_hash: &str, version: i32, rendition: &str, format: &str) -> String {
    format!(
        "derivatives/{}/{}/v{}/{}.{}",
        &content_hash[..2],
        content_hash,
        version,
        rendition,
        format
    )
}

/// Staging prefix a user is allowed to finalize or delete under.
pub fn staging_prefix(user_id: Uuid) -> String {
    format!("uploads/tmp/{}/", user_id)
}

/// Permanent upload prefix a user is allowed to delete under.
pub fn permanent_prefix(user_id: Uuid) -> String {
    format!("uploads/{}/", user_id)
}

/// MIME type for a derivative format.
pub fn content_type_for_format(format: &str) -> &'static str {
    match format {
        "avif" => "image/avif",
        "webp" => "image/webp",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        _ => "application/octet-stream",
    }
}

/// File extension inferred from a declared content type, for staging keys
/// whose filename lacks one.
pub fn extension_for_content_type(content_type: &str) -> &'static str {
    match content_type {
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "image/webp" => "webp",
        "image/gif" => "gif",
        "image/heic" | "image/heif" => "heic",
        "image/avif" => "avif",
        _ => "bin",
    }
}
