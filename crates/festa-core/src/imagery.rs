//! Image-file handling shared by the daemon and the pipeline: decoding
//! uploads to RGB, the upload extension allow-list, and filename
//! sanitization for anything that ends up on disk.

use image::RgbImage;
use std::path::Path;
use thiserror::Error;

/// File extensions accepted for selfie and event-photo uploads.
pub const ALLOWED_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

#[derive(Error, Debug)]
pub enum ImageryError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to decode {path}: {source}")]
    Decode {
        path: String,
        source: image::ImageError,
    },
}

/// Whether a filename carries an allowed image extension (case-insensitive).
/// Files without any extension are rejected.
pub fn allowed_file(filename: &str) -> bool {
    match filename.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => {
            let ext = ext.to_ascii_lowercase();
            ALLOWED_EXTENSIONS.contains(&ext.as_str())
        }
        _ => false,
    }
}

/// Sanitize a user-supplied name for use as a file or directory name.
///
/// Keeps ASCII alphanumerics, `-`, `_` and `.`; everything else becomes `_`.
/// Leading dots are stripped so the result can never be a dotfile or a
/// `..` path component. Returns `None` when nothing survives.
pub fn sanitize_filename(name: &str) -> Option<String> {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();

    let cleaned = cleaned.trim_start_matches('.').to_string();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

/// Decode an image file into an 8-bit RGB buffer.
pub fn load_rgb(path: &Path) -> Result<RgbImage, ImageryError> {
    let bytes = std::fs::read(path).map_err(|source| ImageryError::Read {
        path: path.display().to_string(),
        source,
    })?;

    let img = image::load_from_memory(&bytes).map_err(|source| ImageryError::Decode {
        path: path.display().to_string(),
        source,
    })?;

    Ok(img.to_rgb8())
}
