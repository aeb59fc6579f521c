//! HTTP request handlers.

use super::{ApiError, AppContext};
use crate::matcher;
use crate::store::GuestRecord;
use axum::body::Bytes;
use axum::extract::{Multipart, Path, State};
use axum::http::header;
use axum::response::{Html, IntoResponse, Redirect, Response};
use chrono::Utc;
use festa_core::imagery;

const INDEX_HTML: &str = include_str!("index.html");
const NO_ALBUM_MESSAGE: &str = "No matched photos found.";

/// GET / — the upload/registration page.
pub async fn home() -> Html<&'static str> {
    Html(INDEX_HTML)
}

/// POST /upload_selfie — register a guest from a selfie.
///
/// Form fields: `name` (text) and `selfie` (file). The selfie must carry an
/// allowed extension and contain a detectable face; on success the roster
/// entry for that name is created or silently overwritten.
pub async fn upload_selfie(
    State(ctx): State<AppContext>,
    mut multipart: Multipart,
) -> Result<Redirect, ApiError> {
    let mut name: Option<String> = None;
    let mut selfie: Option<(String, Bytes)> = None;

    while let Some(field) = multipart.next_field().await.map_err(|_| ApiError::InvalidUpload)? {
        let field_name = field.name().map(str::to_owned);
        match field_name.as_deref() {
            Some("name") => {
                name = Some(field.text().await.map_err(|_| ApiError::InvalidUpload)?);
            }
            Some("selfie") => {
                let file_name = field.file_name().map(str::to_owned);
                let data = field.bytes().await.map_err(|_| ApiError::InvalidUpload)?;
                if let Some(file_name) = file_name {
                    selfie = Some((file_name, data));
                }
            }
            _ => {}
        }
    }

    let raw_name = name.ok_or(ApiError::InvalidUpload)?;
    let (file_name, data) = selfie.ok_or(ApiError::InvalidUpload)?;
    if !imagery::allowed_file(&file_name) {
        return Err(ApiError::InvalidUpload);
    }
    let guest_name = imagery::sanitize_filename(&raw_name).ok_or(ApiError::InvalidUpload)?;

    // One stored selfie per guest, keyed by name.
    let selfie_file = format!("{guest_name}.jpg");
    let selfie_path = ctx.config.guest_dir().join(&selfie_file);
    tokio::fs::write(&selfie_path, &data)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    let embedding = ctx.source.embed_best(&selfie_path).await?;

    let record = GuestRecord {
        name: guest_name.clone(),
        embedding,
        selfie_file,
        registered_at: Utc::now(),
    };

    {
        let mut roster = ctx.roster.write().await;
        if roster.insert(record).is_some() {
            tracing::info!(guest = %guest_name, "re-registration overwrote previous reference");
        }
        roster.save().map_err(|e| ApiError::Internal(e.to_string()))?;
    }

    tracing::info!(guest = %guest_name, "guest registered");
    Ok(Redirect::to("/"))
}

/// POST /upload_event — save a batch of event photos.
///
/// Every `eventphotos` file part with an allowed extension is written
/// unmodified under its sanitized filename; invalid parts are skipped.
pub async fn upload_event(
    State(ctx): State<AppContext>,
    mut multipart: Multipart,
) -> Result<Redirect, ApiError> {
    while let Some(field) = multipart.next_field().await.map_err(|_| ApiError::InvalidUpload)? {
        if field.name() != Some("eventphotos") {
            continue;
        }
        let Some(file_name) = field.file_name().map(str::to_owned) else {
            continue;
        };
        let data = field.bytes().await.map_err(|_| ApiError::InvalidUpload)?;

        if !imagery::allowed_file(&file_name) {
            tracing::debug!(file = %file_name, "skipping upload with disallowed extension");
            continue;
        }
        let Some(safe_name) = imagery::sanitize_filename(&file_name) else {
            continue;
        };

        tokio::fs::write(ctx.config.event_dir().join(&safe_name), &data)
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?;
        tracing::debug!(file = %safe_name, "event photo saved");
    }

    Ok(Redirect::to("/"))
}

/// GET /match_faces — run the full match pass and report completion.
pub async fn match_faces(State(ctx): State<AppContext>) -> Result<String, ApiError> {
    let guests = ctx.roster.read().await.snapshot();

    matcher::run_match_pass(
        ctx.source.as_ref(),
        &guests,
        &ctx.config.event_dir(),
        &ctx.config.matched_dir(),
        ctx.config.similarity_threshold,
    )
    .await
    .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok("Matching complete.".to_string())
}

/// GET /view_album/:guest_name — list a guest's matched photos.
pub async fn view_album(
    State(ctx): State<AppContext>,
    Path(guest_name): Path<String>,
) -> Result<Response, ApiError> {
    let Some(guest) = imagery::sanitize_filename(&guest_name) else {
        return Ok(NO_ALBUM_MESSAGE.into_response());
    };

    let album = ctx.config.matched_dir().join(&guest);
    if !album.is_dir() {
        return Ok(NO_ALBUM_MESSAGE.into_response());
    }

    let mut files: Vec<String> = std::fs::read_dir(&album)
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_file())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    files.sort();

    Ok(Html(render_album(&guest, &files)).into_response())
}

/// GET /matched_photos/:guest/:filename — stream one matched photo.
pub async fn matched_photo(
    State(ctx): State<AppContext>,
    Path((guest, filename)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let guest = imagery::sanitize_filename(&guest).ok_or(ApiError::NotFound)?;
    let filename = imagery::sanitize_filename(&filename).ok_or(ApiError::NotFound)?;

    let path = ctx.config.matched_dir().join(&guest).join(&filename);
    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(ApiError::NotFound);
        }
        Err(err) => return Err(ApiError::Internal(err.to_string())),
    };

    Ok(([(header::CONTENT_TYPE, content_type_for(&filename))], bytes).into_response())
}

fn render_album(guest: &str, files: &[String]) -> String {
    let items: String = files
        .iter()
        .map(|file| {
            format!("    <li><a href=\"/matched_photos/{guest}/{file}\">{file}</a></li>\n")
        })
        .collect();

    format!(
        "<!DOCTYPE html>\n<html>\n<head><title>Album — {guest}</title></head>\n<body>\n  \
         <h1>Photos of {guest}</h1>\n  <ul>\n{items}  </ul>\n  <a href=\"/\">Back</a>\n\
         </body>\n</html>\n"
    )
}

fn content_type_for(filename: &str) -> &'static str {
    match filename.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase()) {
        Some(ext) if ext == "png" => "image/png",
        Some(ext) if ext == "jpg" || ext == "jpeg" => "image/jpeg",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_mapping() {
        assert_eq!(content_type_for("a.png"), "image/png");
        assert_eq!(content_type_for("a.JPG"), "image/jpeg");
        assert_eq!(content_type_for("a.jpeg"), "image/jpeg");
        assert_eq!(content_type_for("a.bin"), "application/octet-stream");
        assert_eq!(content_type_for("noext"), "application/octet-stream");
    }

    #[test]
    fn test_render_album_links_files() {
        let html = render_album("alice", &["one.jpg".into(), "two.png".into()]);
        assert!(html.contains("/matched_photos/alice/one.jpg"));
        assert!(html.contains("/matched_photos/alice/two.png"));
        assert!(html.contains("Photos of alice"));
    }

    #[test]
    fn test_render_album_empty() {
        let html = render_album("bob", &[]);
        assert!(html.contains("Photos of bob"));
        assert!(!html.contains("<li>"));
    }
}
