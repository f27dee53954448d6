//! Bundle persistence - one PNG per plane plus the recomposited color image

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use image::{GrayImage, ImageError, RgbImage};
use thiserror::Error;
use tracing::info;

use crate::capture::bundle::CaptureBundle;
use crate::capture::separate::{self, Plane, PlaneLabel};

#[derive(Debug, Error)]
pub enum SaveError {
    #[error("capture io: {0}")]
    Io(#[from] std::io::Error),
    #[error("png encoding: {0}")]
    Image(#[from] ImageError),
    #[error("plane {0:?} byte count does not match its geometry")]
    BadPlane(PlaneLabel),
}

/// Where one saved bundle landed.
#[derive(Debug, Clone)]
pub struct SavedCapture {
    pub directory: PathBuf,
    pub files: Vec<PathBuf>,
}

/// Writes capture bundles under `root`, one directory each, named by
/// wall-clock stamp plus a running index so back-to-back saves inside
/// the same millisecond never land in the same directory.
pub struct BundleSaver {
    root: PathBuf,
    sequence: AtomicU64,
}

impl BundleSaver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            sequence: AtomicU64::new(0),
        }
    }

    /// Persist whatever planes the bundle holds. A partial bundle
    /// produces a partial directory; gaps were already reported upstream.
    pub fn save(&self, bundle: &CaptureBundle) -> Result<SavedCapture, SaveError> {
        let index = self.sequence.fetch_add(1, Ordering::Relaxed);
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S_%3f");
        let directory = self.root.join(format!("capture_{stamp}_{index:04}"));
        fs::create_dir_all(&directory)?;

        let mut files = Vec::with_capacity(5);
        for plane in &bundle.planes {
            files.push(write_plane(&directory, plane)?);
        }

        // Recomposite the full-color image when all three planes are there.
        if let (Some(r), Some(g), Some(b)) = (
            bundle.plane(PlaneLabel::R),
            bundle.plane(PlaneLabel::G),
            bundle.plane(PlaneLabel::B),
        ) {
            let packed = separate::interleave_rgb(r, g, b);
            let image = RgbImage::from_raw(r.width, r.height, packed)
                .ok_or(SaveError::BadPlane(PlaneLabel::R))?;
            let path = directory.join("rgb.png");
            image.save(&path)?;
            files.push(path);
        }

        info!(
            directory = %directory.display(),
            files = files.len(),
            index,
            "capture saved"
        );
        Ok(SavedCapture { directory, files })
    }

    /// Saves begun so far; also the next directory index.
    pub fn saved_count(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }
}

fn write_plane(directory: &Path, plane: &Plane) -> Result<PathBuf, SaveError> {
    let image = GrayImage::from_raw(plane.width, plane.height, plane.data.to_vec())
        .ok_or(SaveError::BadPlane(plane.label))?;
    let path = directory.join(format!("{}.png", plane.label.file_stem()));
    image.save(&path)?;
    Ok(path)
}
