//! Base64 image decoding.
//!
//! Accepts raw base64 or a data URI (`data:image/png;base64,...`) and yields
//! an RGB8 raster for the detector.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("image payload is empty")]
    Empty,
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("unreadable image: {0}")]
    Image(#[from] image::ImageError),
    #[error("image has zero width or height")]
    ZeroSized,
}

/// Strip an optional data-URI header: everything up to and including the first comma.
fn strip_header(input: &str) -> &str {
    match input.split_once(',') {
        Some((_, payload)) => payload,
        None => input,
    }
}

/// Decode a base64 (optionally data-URI prefixed) image into RGB8.
pub fn decode_image(input: &str) -> Result<RgbImage, DecodeError> {
    let payload = strip_header(input.trim());

    // Line-wrapped base64 (MIME style) is common from browser and mail clients.
    let compact: String = payload
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    if compact.is_empty() {
        return Err(DecodeError::Empty);
    }

    let bytes = STANDARD.decode(compact.as_bytes())?;
    decode_image_bytes(&bytes)
}

/// Decode an encoded image container (PNG, JPEG, ...) into RGB8.
pub fn decode_image_bytes(bytes: &[u8]) -> Result<RgbImage, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }

    let img = image::load_from_memory(bytes)?.to_rgb8();
    if img.width() == 0 || img.height() == 0 {
        return Err(DecodeError::ZeroSized);
    }

    tracing::debug!(width = img.width(), height = img.height(), "decoded image");
    Ok(img)
}
