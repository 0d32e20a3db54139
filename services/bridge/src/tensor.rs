//! Pipeline-side pixel buffers.
//!
//! The generative pipeline works on normalized float planes rather than
//! encoded rasters. Values are row-major and expected in `[0.0, 1.0]`.

use serde::{Deserialize, Serialize};

/// Default edge length of the placeholder returned when nothing is available
pub const PLACEHOLDER_SIZE: u32 = 64;

/// Interleaved image plane (`height * width * channels` values)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageTensor {
    pub width: u32,
    pub height: u32,
    pub channels: u32,
    pub data: Vec<f32>,
}

/// Single-channel mask plane (`height * width` values)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaskTensor {
    pub width: u32,
    pub height: u32,
    pub data: Vec<f32>,
}

/// Product of the dimensions as a `usize`, `None` if it does not fit
fn element_count(dims: &[u32]) -> Option<usize> {
    dims.iter()
        .try_fold(1usize, |acc, &d| acc.checked_mul(d as usize))
}

impl ImageTensor {
    /// All-zero image of the given dimensions.
    ///
    /// Dimensions whose product does not fit in memory addressing give an
    /// empty buffer, which is not well-formed.
    pub fn zeros(width: u32, height: u32, channels: u32) -> Self {
        let len = element_count(&[width, height, channels]).unwrap_or(0);
        Self {
            width,
            height,
            channels,
            data: vec![0.0; len],
        }
    }

    /// Value at pixel `(x, y)`, channel `c`
    pub fn get(&self, x: u32, y: u32, c: u32) -> Option<f32> {
        if x >= self.width || y >= self.height || c >= self.channels {
            return None;
        }
        let idx = (y as usize)
            .checked_mul(self.width as usize)?
            .checked_add(x as usize)?
            .checked_mul(self.channels as usize)?
            .checked_add(c as usize)?;
        self.data.get(idx).copied()
    }

    /// Whether `data` matches the declared dimensions
    pub fn is_well_formed(&self) -> bool {
        element_count(&[self.width, self.height, self.channels]) == Some(self.data.len())
    }
}

impl MaskTensor {
    pub fn zeros(width: u32, height: u32) -> Self {
        let len = element_count(&[width, height]).unwrap_or(0);
        Self {
            width,
            height,
            data: vec![0.0; len],
        }
    }

    pub fn get(&self, x: u32, y: u32) -> Option<f32> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = (y as usize)
            .checked_mul(self.width as usize)?
            .checked_add(x as usize)?;
        self.data.get(idx).copied()
    }

    pub fn is_well_formed(&self) -> bool {
        element_count(&[self.width, self.height]) == Some(self.data.len())
    }

    pub fn is_all_zero(&self) -> bool {
        self.data.iter().all(|v| *v == 0.0)
    }
}

/// Image/mask pair handed to the pipeline
pub type Selection = (ImageTensor, MaskTensor);

/// Blank 3-channel image with a matching blank mask
pub fn placeholder(size: u32) -> Selection {
    (ImageTensor::zeros(size, size, 3), MaskTensor::zeros(size, size))
}
