//! Save-to-peer output.
//!
//! Writes pipeline images as PNG files into a directory the editing host
//! picks up from, and returns a manifest of what was written.

use crate::codec;
use crate::config::OutputConfig;
use crate::error::Result;
use crate::tensor::ImageTensor;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

/// Manifest entry for one saved image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedImage {
    pub filename: String,
    pub subfolder: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// `<prefix>_<NNNN>.png` for a 0-based index
pub fn output_filename(prefix: &str, index: usize) -> String {
    format!("{}_{:04}.png", prefix, index)
}

/// Encode and write every image, creating `output_dir` if needed.
///
/// Stops at the first failure: unlike the forwarder, a local disk error is
/// not a per-item condition.
pub fn save_batch(images: &[ImageTensor], output_dir: &Path, prefix: &str) -> Result<Vec<SavedImage>> {
    fs::create_dir_all(output_dir)?;

    let mut saved = Vec::with_capacity(images.len());
    for (index, tensor) in images.iter().enumerate() {
        let raster = codec::tensor_to_image(tensor)?;
        let png = codec::encode(&raster)?;

        let filename = output_filename(prefix, index);
        let path = output_dir.join(&filename);
        fs::write(&path, &png)?;
        debug!(path = %path.display(), size_bytes = png.len(), "Saved image");

        saved.push(SavedImage {
            filename,
            subfolder: String::new(),
            kind: "output".to_string(),
        });
    }

    info!(
        output_dir = %output_dir.display(),
        count = saved.len(),
        "Saved image batch"
    );

    Ok(saved)
}

/// Save into the configured output directory with the configured prefix
pub fn save_to_output(images: &[ImageTensor], config: &OutputConfig) -> Result<Vec<SavedImage>> {
    save_batch(images, &config.output_dir, &config.filename_prefix)
}
