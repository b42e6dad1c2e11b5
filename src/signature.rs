use std::io::Cursor;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{imageops::FilterType, ImageReader, Limits};

use crate::error::ContractError;
use crate::pdf::RasterImage;

const DATA_URI_PREFIX: &str = "data:image/";
const BASE64_MARKER: &str = ";base64";

/// Images wider or taller than this are refused before their pixels are
/// decoded.
pub const MAX_SIGNATURE_SIDE: u32 = 2000;
const MAX_DECODE_BYTES: u64 = 64 * 1024 * 1024;

/// Decoded signatures are shrunk to fit this box. The signature is drawn at
/// 200x100 points, so anything denser is never visible.
pub const STORED_SIGNATURE_BOUNDS: (u32, u32) = (800, 400);

/// Decodes a `data:image/<type>;base64,<payload>` URI into raster pixels.
///
/// Whitespace inside the payload is ignored, so line-wrapped base64 is
/// accepted. Every failure, from a malformed URI to an undecodable or
/// oversized image, is reported as [`ContractError::InvalidSignatureData`].
pub fn decode_data_uri(data_uri: &str) -> Result<RasterImage, ContractError> {
    let (header, payload) = data_uri
        .trim()
        .split_once(',')
        .ok_or_else(|| invalid("missing comma-delimited payload"))?;

    let media_type = header
        .strip_prefix(DATA_URI_PREFIX)
        .and_then(|rest| rest.strip_suffix(BASE64_MARKER))
        .ok_or_else(|| invalid("expected a base64 encoded image data URI"))?;
    if media_type.is_empty() {
        return Err(invalid("image type is missing"));
    }

    let payload: String = payload
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    if payload.is_empty() {
        return Err(invalid("payload is empty"));
    }
    let bytes = STANDARD
        .decode(payload)
        .map_err(|err| invalid(format!("payload is not valid base64: {err}")))?;

    let mut limits = Limits::default();
    limits.max_image_width = Some(MAX_SIGNATURE_SIDE);
    limits.max_image_height = Some(MAX_SIGNATURE_SIDE);
    limits.max_alloc = Some(MAX_DECODE_BYTES);

    let mut reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|err| invalid(format!("payload is not a readable image: {err}")))?;
    reader.limits(limits);
    let mut image = reader
        .decode()
        .map_err(|err| invalid(format!("payload is not a readable image: {err}")))?;
    if image.width() == 0 || image.height() == 0 {
        return Err(invalid("image has no pixels"));
    }

    let (max_width, max_height) = STORED_SIGNATURE_BOUNDS;
    if image.width() > max_width || image.height() > max_height {
        image = image.resize(max_width, max_height, FilterType::Lanczos3);
    }

    Ok(RasterImage::from_rgba(&image.into_rgba8()))
}

fn invalid(message: impl Into<String>) -> ContractError {
    ContractError::InvalidSignatureData(message.into())
}
