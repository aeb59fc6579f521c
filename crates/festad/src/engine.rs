//! Inference engine: a dedicated OS thread owning both ONNX sessions,
//! driven by an mpsc request channel with oneshot replies.
//!
//! The `ort` sessions are `&mut` at inference time and loading them is
//! expensive, so they live on one thread for the life of the process; all
//! callers go through the clone-safe [`EngineHandle`]. A match pass
//! therefore serializes with any in-flight enrollment.

use festa_core::{imagery, Embedding, FaceDetector, FaceRecognizer};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("detector error: {0}")]
    Detector(#[from] festa_core::detector::DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] festa_core::recognizer::RecognizerError),
    #[error("image error: {0}")]
    Imagery(#[from] festa_core::imagery::ImageryError),
    #[error("no face detected")]
    NoFaceDetected,
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Boxed future returned by the provider seam.
pub type FaceFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, EngineError>> + Send + 'a>>;

/// The embedding provider seam between the HTTP layer and inference.
///
/// Implemented by [`EngineHandle`] in production and by fakes in tests, so
/// the upload and match paths can be exercised without model files.
pub trait FaceSource: Send + Sync {
    /// Embedding of the single best (highest-confidence) face in an image.
    /// Fails with [`EngineError::NoFaceDetected`] when the image has none.
    fn embed_best<'a>(&'a self, photo: &'a Path) -> FaceFuture<'a, Embedding>;

    /// Embeddings of every face detected in an image, possibly empty.
    fn embed_all<'a>(&'a self, photo: &'a Path) -> FaceFuture<'a, Vec<Embedding>>;
}

/// Messages sent from handlers to the engine thread.
enum EngineRequest {
    EmbedBest {
        photo: PathBuf,
        reply: oneshot::Sender<Result<Embedding, EngineError>>,
    },
    EmbedAll {
        photo: PathBuf,
        reply: oneshot::Sender<Result<Vec<Embedding>, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl FaceSource for EngineHandle {
    fn embed_best<'a>(&'a self, photo: &'a Path) -> FaceFuture<'a, Embedding> {
        Box::pin(async move {
            let (reply_tx, reply_rx) = oneshot::channel();
            self.tx
                .send(EngineRequest::EmbedBest {
                    photo: photo.to_path_buf(),
                    reply: reply_tx,
                })
                .await
                .map_err(|_| EngineError::ChannelClosed)?;
            reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
        })
    }

    fn embed_all<'a>(&'a self, photo: &'a Path) -> FaceFuture<'a, Vec<Embedding>> {
        Box::pin(async move {
            let (reply_tx, reply_rx) = oneshot::channel();
            self.tx
                .send(EngineRequest::EmbedAll {
                    photo: photo.to_path_buf(),
                    reply: reply_tx,
                })
                .await
                .map_err(|_| EngineError::ChannelClosed)?;
            reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
        })
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// Loads both ONNX models synchronously and fails fast if either file is
/// missing, then enters the request loop.
pub fn spawn(
    scrfd_model: &Path,
    arcface_model: &Path,
    detector_confidence: f32,
) -> Result<EngineHandle, EngineError> {
    let mut detector = FaceDetector::load(scrfd_model, detector_confidence)?;
    tracing::info!(path = %scrfd_model.display(), "SCRFD detector loaded");

    let mut recognizer = FaceRecognizer::load(arcface_model)?;
    tracing::info!(path = %arcface_model.display(), "ArcFace recognizer loaded");

    let (tx, mut rx) = mpsc::channel::<EngineRequest>(16);

    std::thread::Builder::new()
        .name("festa-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::EmbedBest { photo, reply } => {
                        let result = run_embed_best(&mut detector, &mut recognizer, &photo);
                        let _ = reply.send(result);
                    }
                    EngineRequest::EmbedAll { photo, reply } => {
                        let result = run_embed_all(&mut detector, &mut recognizer, &photo);
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .expect("failed to spawn engine thread");

    Ok(EngineHandle { tx })
}

/// Detect faces and extract the embedding of the highest-confidence one.
fn run_embed_best(
    detector: &mut FaceDetector,
    recognizer: &mut FaceRecognizer,
    photo: &Path,
) -> Result<Embedding, EngineError> {
    let image = imagery::load_rgb(photo)?;
    let faces = detector.detect(&image)?;

    // detect() sorts by confidence, highest first.
    let face = faces.first().ok_or(EngineError::NoFaceDetected)?;
    tracing::debug!(
        photo = %photo.display(),
        faces = faces.len(),
        confidence = face.confidence,
        "enrollment face selected"
    );

    Ok(recognizer.extract(&image, face)?)
}

/// Detect every face in a photo and extract one embedding per face.
/// A face whose extraction fails is logged and skipped; the rest survive.
fn run_embed_all(
    detector: &mut FaceDetector,
    recognizer: &mut FaceRecognizer,
    photo: &Path,
) -> Result<Vec<Embedding>, EngineError> {
    let image = imagery::load_rgb(photo)?;
    let faces = detector.detect(&image)?;

    let mut embeddings = Vec::with_capacity(faces.len());
    for face in &faces {
        match recognizer.extract(&image, face) {
            Ok(embedding) => embeddings.push(embedding),
            Err(err) => {
                tracing::warn!(
                    photo = %photo.display(),
                    error = %err,
                    "embedding extraction failed for one face; skipping it"
                );
            }
        }
    }

    Ok(embeddings)
}
