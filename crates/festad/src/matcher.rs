//! The match pass: a destructive full resync of the album tree.
//!
//! Every pass deletes `matched_photos/` and rebuilds it by scanning every
//! event photo against every registered guest — O(guests × photos), no
//! indexing, no incremental update. Album readers racing a pass can observe
//! an empty or partially repopulated album; that non-atomicity is a
//! documented property of the resync, not a bug.

use crate::engine::FaceSource;
use crate::store::GuestRecord;
use festa_core::{CosineMatcher, PhotoMatcher};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MatchPassError {
    #[error("I/O error during match pass: {0}")]
    Io(#[from] std::io::Error),
    #[error("blocking filesystem task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Tally of one full pass. Surfaced in logs; the HTTP caller only gets the
/// static completion message.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MatchReport {
    pub photos_scanned: usize,
    pub copies_made: usize,
    pub photos_failed: usize,
}

/// Run one full match pass.
///
/// Provider failures on a single photo are logged, counted, and treated as
/// no-match for that photo; the pass continues. A photo matching several
/// guests is copied into each of their albums.
pub async fn run_match_pass(
    source: &dyn FaceSource,
    guests: &[GuestRecord],
    event_dir: &Path,
    matched_dir: &Path,
    threshold: f32,
) -> Result<MatchReport, MatchPassError> {
    let photos = reset_output_tree(event_dir.to_path_buf(), matched_dir.to_path_buf()).await?;

    let mut report = MatchReport::default();
    let matcher = CosineMatcher;

    for (photo_path, file_name) in photos {
        report.photos_scanned += 1;

        let faces = match source.embed_all(&photo_path).await {
            Ok(faces) => faces,
            Err(err) => {
                tracing::warn!(
                    photo = %photo_path.display(),
                    error = %err,
                    "provider failure; treating photo as no-match"
                );
                report.photos_failed += 1;
                continue;
            }
        };

        if faces.is_empty() {
            continue;
        }

        let mut matched_guests = Vec::new();
        for guest in guests {
            let result = matcher.compare(&guest.embedding, &faces, threshold);
            if !result.matched {
                continue;
            }

            tracing::info!(
                guest = %guest.name,
                photo = %photo_path.display(),
                similarity = result.similarity,
                "photo matched"
            );
            matched_guests.push(guest.name.clone());
        }

        if matched_guests.is_empty() {
            continue;
        }

        let matched_root = matched_dir.to_path_buf();
        let copied = tokio::task::spawn_blocking(move || -> std::io::Result<usize> {
            for guest in &matched_guests {
                let album = matched_root.join(guest);
                std::fs::create_dir_all(&album)?;
                std::fs::copy(&photo_path, album.join(&file_name))?;
            }
            Ok(matched_guests.len())
        })
        .await??;
        report.copies_made += copied;
    }

    tracing::info!(
        scanned = report.photos_scanned,
        copies = report.copies_made,
        failed = report.photos_failed,
        "match pass complete"
    );

    Ok(report)
}

/// Wipe and recreate the album tree, then list the event photos. All
/// blocking filesystem work runs off the async workers.
async fn reset_output_tree(
    event_dir: PathBuf,
    matched_dir: PathBuf,
) -> Result<Vec<(PathBuf, OsString)>, MatchPassError> {
    let photos = tokio::task::spawn_blocking(move || -> std::io::Result<Vec<(PathBuf, OsString)>> {
        if matched_dir.exists() {
            std::fs::remove_dir_all(&matched_dir)?;
        }
        std::fs::create_dir_all(&matched_dir)?;

        let mut photos: Vec<(PathBuf, OsString)> = std::fs::read_dir(&event_dir)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_file())
            .map(|entry| (entry.path(), entry.file_name()))
            .collect();
        photos.sort_by(|a, b| a.1.cmp(&b.1));
        Ok(photos)
    })
    .await??;

    Ok(photos)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineError, FaceFuture};
    use chrono::Utc;
    use festa_core::Embedding;
    use std::collections::{BTreeSet, HashMap, HashSet};
    use std::path::PathBuf;

    /// Provider fake keyed by event-photo filename.
    struct FakeSource {
        faces: HashMap<String, Vec<Embedding>>,
        failing: HashSet<String>,
    }

    impl FakeSource {
        fn new() -> Self {
            Self { faces: HashMap::new(), failing: HashSet::new() }
        }

        fn with_faces(mut self, file: &str, faces: &[&[f32]]) -> Self {
            let faces = faces
                .iter()
                .map(|v| Embedding { values: v.to_vec(), model_version: None })
                .collect();
            self.faces.insert(file.to_string(), faces);
            self
        }

        fn with_failure(mut self, file: &str) -> Self {
            self.failing.insert(file.to_string());
            self
        }
    }

    impl FaceSource for FakeSource {
        fn embed_best<'a>(&'a self, photo: &'a Path) -> FaceFuture<'a, Embedding> {
            Box::pin(async move {
                let name = photo.file_name().unwrap().to_string_lossy().to_string();
                self.faces
                    .get(&name)
                    .and_then(|faces| faces.first().cloned())
                    .ok_or(EngineError::NoFaceDetected)
            })
        }

        fn embed_all<'a>(&'a self, photo: &'a Path) -> FaceFuture<'a, Vec<Embedding>> {
            Box::pin(async move {
                let name = photo.file_name().unwrap().to_string_lossy().to_string();
                if self.failing.contains(&name) {
                    return Err(EngineError::ChannelClosed);
                }
                Ok(self.faces.get(&name).cloned().unwrap_or_default())
            })
        }
    }

    fn guest(name: &str, values: &[f32]) -> GuestRecord {
        GuestRecord {
            name: name.to_string(),
            embedding: Embedding { values: values.to_vec(), model_version: None },
            selfie_file: format!("{name}.jpg"),
            registered_at: Utc::now(),
        }
    }

    fn write_photo(dir: &Path, name: &str) {
        std::fs::write(dir.join(name), b"image bytes").unwrap();
    }

    /// Collect `guest/file` pairs from the album tree, sorted.
    fn album_tree(matched_dir: &Path) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        for guest_dir in std::fs::read_dir(matched_dir).unwrap().filter_map(|e| e.ok()) {
            let guest = guest_dir.file_name().to_string_lossy().to_string();
            for file in std::fs::read_dir(guest_dir.path()).unwrap().filter_map(|e| e.ok()) {
                out.insert(format!("{guest}/{}", file.file_name().to_string_lossy()));
            }
        }
        out
    }

    fn dirs() -> (tempfile::TempDir, PathBuf, PathBuf) {
        let tmp = tempfile::tempdir().unwrap();
        let event = tmp.path().join("event_photos");
        let matched = tmp.path().join("matched_photos");
        std::fs::create_dir_all(&event).unwrap();
        (tmp, event, matched)
    }

    #[tokio::test]
    async fn test_zero_guests_yields_empty_tree() {
        let (_tmp, event, matched) = dirs();
        write_photo(&event, "a.jpg");
        write_photo(&event, "b.jpg");

        let source = FakeSource::new().with_faces("a.jpg", &[&[1.0, 0.0]]);
        let report = run_match_pass(&source, &[], &event, &matched, 0.4).await.unwrap();

        assert_eq!(report.photos_scanned, 2);
        assert_eq!(report.copies_made, 0);
        assert!(album_tree(&matched).is_empty());
    }

    #[tokio::test]
    async fn test_photo_with_two_guests_lands_in_both_albums() {
        let (_tmp, event, matched) = dirs();
        write_photo(&event, "group.jpg");

        let source =
            FakeSource::new().with_faces("group.jpg", &[&[1.0, 0.0, 0.0], &[0.0, 1.0, 0.0]]);
        let guests = vec![guest("alice", &[1.0, 0.0, 0.0]), guest("bob", &[0.0, 1.0, 0.0])];

        let report = run_match_pass(&source, &guests, &event, &matched, 0.4).await.unwrap();

        assert_eq!(report.copies_made, 2);
        let tree = album_tree(&matched);
        assert!(tree.contains("alice/group.jpg"));
        assert!(tree.contains("bob/group.jpg"));
    }

    #[tokio::test]
    async fn test_below_threshold_not_copied() {
        let (_tmp, event, matched) = dirs();
        write_photo(&event, "stranger.jpg");

        let source = FakeSource::new().with_faces("stranger.jpg", &[&[0.0, 1.0]]);
        let guests = vec![guest("alice", &[1.0, 0.0])];

        let report = run_match_pass(&source, &guests, &event, &matched, 0.4).await.unwrap();

        assert_eq!(report.copies_made, 0);
        assert!(album_tree(&matched).is_empty());
    }

    #[tokio::test]
    async fn test_repeat_pass_is_idempotent() {
        let (_tmp, event, matched) = dirs();
        write_photo(&event, "p.jpg");

        let source = FakeSource::new().with_faces("p.jpg", &[&[1.0, 0.0]]);
        let guests = vec![guest("alice", &[1.0, 0.0])];

        run_match_pass(&source, &guests, &event, &matched, 0.4).await.unwrap();
        let first = album_tree(&matched);
        run_match_pass(&source, &guests, &event, &matched, 0.4).await.unwrap();
        let second = album_tree(&matched);

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_pass_wipes_stale_albums() {
        let (_tmp, event, matched) = dirs();
        write_photo(&event, "p.jpg");

        let source = FakeSource::new().with_faces("p.jpg", &[&[1.0, 0.0]]);
        run_match_pass(&source, &[guest("alice", &[1.0, 0.0])], &event, &matched, 0.4)
            .await
            .unwrap();
        assert!(!album_tree(&matched).is_empty());

        // Alice left the roster; her album must not survive the next pass.
        run_match_pass(&source, &[], &event, &matched, 0.4).await.unwrap();
        assert!(album_tree(&matched).is_empty());
    }

    #[tokio::test]
    async fn test_provider_failure_skips_photo_and_continues() {
        let (_tmp, event, matched) = dirs();
        write_photo(&event, "broken.jpg");
        write_photo(&event, "fine.jpg");

        let source = FakeSource::new()
            .with_failure("broken.jpg")
            .with_faces("fine.jpg", &[&[1.0, 0.0]]);
        let guests = vec![guest("alice", &[1.0, 0.0])];

        let report = run_match_pass(&source, &guests, &event, &matched, 0.4).await.unwrap();

        assert_eq!(report.photos_scanned, 2);
        assert_eq!(report.photos_failed, 1);
        assert_eq!(report.copies_made, 1);
        assert!(album_tree(&matched).contains("alice/fine.jpg"));
    }
}
