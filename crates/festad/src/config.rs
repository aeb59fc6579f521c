use std::path::PathBuf;

/// Daemon configuration, loaded from environment variables and passed
/// explicitly into each component.
pub struct Config {
    /// Root directory for all daemon state (uploads, albums, roster).
    pub data_dir: PathBuf,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Cosine similarity threshold for a positive match.
    pub similarity_threshold: f32,
    /// Minimum detection confidence for a face to be considered.
    pub detector_confidence: f32,
    /// HTTP listen port.
    pub port: u16,
}

impl Config {
    /// Load configuration from `FESTA_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self {
            data_dir: std::env::var("FESTA_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("festa-data")),
            model_dir: std::env::var("FESTA_MODEL_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("models")),
            similarity_threshold: env_f32("FESTA_SIMILARITY_THRESHOLD", 0.40),
            detector_confidence: env_f32(
                "FESTA_DETECTOR_CONFIDENCE",
                festa_core::detector::DEFAULT_CONFIDENCE_THRESHOLD,
            ),
            port: env_u16("FESTA_PORT", 5800),
        }
    }

    /// Directory holding uploaded guest selfies.
    pub fn guest_dir(&self) -> PathBuf {
        self.data_dir.join("guest_photos")
    }

    /// Directory holding uploaded event photos.
    pub fn event_dir(&self) -> PathBuf {
        self.data_dir.join("event_photos")
    }

    /// Output tree of per-guest matched albums.
    pub fn matched_dir(&self) -> PathBuf {
        self.data_dir.join("matched_photos")
    }

    /// Path of the persisted guest roster file.
    pub fn roster_path(&self) -> PathBuf {
        self.data_dir.join("guest_roster.json")
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> PathBuf {
        self.model_dir.join("det_10g.onnx")
    }

    /// Path to the ArcFace recognition model.
    pub fn arcface_model_path(&self) -> PathBuf {
        self.model_dir.join("w600k_r50.onnx")
    }

    /// Create the upload and album directories if absent.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        for dir in [self.guest_dir(), self.event_dir(), self.matched_dir()] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u16(key: &str, default: u16) -> u16 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
