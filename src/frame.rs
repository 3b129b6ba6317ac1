//! Captured frames
//!
//! A `Frame` is an immutable RGB raster. Frames come from a `FrameSource`;
//! the shipped source decodes a photo from disk, camera hardware is handled
//! outside this crate.
//!
//! `TempEncoding` holds the transient PNG file used to serialize a frame for
//! the OCR service. The file is removed when the guard drops.

use image::{ImageFormat, ImageReader, RgbImage};
use rand::Rng;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// One still image captured from a frame source
#[derive(Debug, Clone)]
pub(crate) struct Frame {
    image: RgbImage,
}

impl Frame {
    /// Build a frame from a tightly packed RGB8 pixel buffer
    #[cfg(test)]
    pub fn from_rgb(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self, FrameError> {
        let expected = width as usize * height as usize * 3;
        if width == 0 || height == 0 {
            return Err(FrameError::EmptyFrame);
        }
        let actual = pixels.len();
        let image = RgbImage::from_raw(width, height, pixels)
            .ok_or(FrameError::BufferSize { expected, actual })?;
        Ok(Self { image })
    }

    /// Decode a frame from an image file (PNG or JPEG)
    pub fn open(path: &Path) -> Result<Self, FrameError> {
        let reader = ImageReader::open(path)
            .map_err(|e| FrameError::Unavailable(format!("{}: {}", path.display(), e)))?
            .with_guessed_format()?;
        let decoded = reader
            .decode()
            .map_err(|e| FrameError::Decode(e.to_string()))?;
        let image = decoded.to_rgb8();
        if image.width() == 0 || image.height() == 0 {
            return Err(FrameError::EmptyFrame);
        }
        Ok(Self { image })
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Encode the frame as PNG bytes
    pub fn encode_png(&self) -> Result<Vec<u8>, FrameError> {
        let mut buffer = Cursor::new(Vec::new());
        self.image
            .write_to(&mut buffer, ImageFormat::Png)
            .map_err(|e| FrameError::Encode(e.to_string()))?;
        Ok(buffer.into_inner())
    }
}

/// Supplies frames on demand
pub(crate) trait FrameSource {
    fn next_frame(&mut self) -> Result<Frame, FrameError>;
}

/// Frame source backed by a photo on disk
pub(crate) struct ImageFileSource {
    path: PathBuf,
}

impl ImageFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl FrameSource for ImageFileSource {
    fn next_frame(&mut self) -> Result<Frame, FrameError> {
        let frame = Frame::open(&self.path)?;
        debug!(
            path = %self.path.display(),
            width = frame.width(),
            height = frame.height(),
            "Captured frame"
        );
        Ok(frame)
    }
}

/// PNG encoding of a frame written to a scratch directory
///
/// Deleted on drop, so every exit path of the owning operation cleans up.
pub(crate) struct TempEncoding {
    path: PathBuf,
    bytes: Vec<u8>,
}

impl TempEncoding {
    pub fn create(frame: &Frame, dir: &Path) -> Result<Self, FrameError> {
        let bytes = frame.encode_png()?;
        let suffix: u64 = rand::thread_rng().gen();
        let path = dir.join(format!("pagetalk-capture-{:016x}.png", suffix));
        fs::write(&path, &bytes)?;
        debug!("Wrote temporary frame encoding to {:?}", path);
        Ok(Self { path, bytes })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl Drop for TempEncoding {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!("Failed to delete temporary encoding {:?}: {}", self.path, e);
        }
    }
}

/// Frame errors
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("Camera or image source unavailable: {0}")]
    Unavailable(String),

    #[error("Frame has no pixels")]
    EmptyFrame,

    #[error("Pixel buffer has {actual} bytes, expected {expected}")]
    BufferSize { expected: usize, actual: usize },

    #[error("Failed to decode image: {0}")]
    Decode(String),

    #[error("Failed to encode image: {0}")]
    Encode(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

#[cfg(test)]
pub(crate) fn test_frame() -> Frame {
    let pixels = (0..4 * 3 * 3).map(|i| (i * 7 % 256) as u8).collect();
    Frame::from_rgb(4, 3, pixels).expect("valid test frame")
}
