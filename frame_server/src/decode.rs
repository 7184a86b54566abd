use base64::{
    alphabet,
    engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
    Engine,
};
use std::borrow::Cow;
use thiserror::Error;

const DATA_URI_SCHEME: &str = "data:";
const BASE64_MARKER: &str = ";base64,";

// Browsers and canvas encoders are inconsistent about trailing padding.
const FRAME_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("frame payload is empty")]
    Empty,
    #[error("frame payload is not valid base64: {0}")]
    InvalidBase64(#[from] base64::DecodeError),
    #[error("frame of {size} bytes exceeds the {max} byte limit")]
    TooLarge { size: usize, max: usize },
}

/// Removes a leading `data:<media type>;base64,` marker when present.
pub fn strip_media_type(payload: &str) -> &str {
    payload
        .strip_prefix(DATA_URI_SCHEME)
        .and_then(|rest| rest.find(BASE64_MARKER).map(|idx| &rest[idx + BASE64_MARKER.len()..]))
        .unwrap_or(payload)
}

/// Decodes an encoded frame payload into raw image bytes.
///
/// Oversize payloads are rejected from the encoded length first, so a huge
/// payload is never fully decoded.
pub fn decode_frame(payload: &str, max_bytes: usize) -> Result<Vec<u8>, DecodeError> {
    let encoded = strip_media_type(payload.trim());
    let encoded: Cow<'_, str> = if encoded.bytes().any(|b| b.is_ascii_whitespace()) {
        Cow::Owned(encoded.chars().filter(|c| !c.is_ascii_whitespace()).collect())
    } else {
        Cow::Borrowed(encoded)
    };

    if encoded.is_empty() {
        return Err(DecodeError::Empty);
    }

    let estimate = base64::decoded_len_estimate(encoded.len());
    if estimate > max_bytes.saturating_add(3) {
        return Err(DecodeError::TooLarge {
            size: estimate,
            max: max_bytes,
        });
    }

    let bytes = FRAME_ENGINE.decode(encoded.as_bytes())?;
    if bytes.len() > max_bytes {
        return Err(DecodeError::TooLarge {
            size: bytes.len(),
            max: max_bytes,
        });
    }

    Ok(bytes)
}
