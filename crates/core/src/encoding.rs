//! Data-URL and base64 payload handling shared by the converters and the
//! storage providers.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use thiserror::Error;

/// Errors decoding inbound payloads.
#[derive(Debug, Error)]
pub enum PayloadError {
    /// A `data:` URL without the mandatory comma separator.
    #[error("invalid data URL: missing ',' separator")]
    MalformedDataUrl,

    /// The base64 body did not decode.
    #[error("invalid base64 data: {0}")]
    InvalidBase64(#[from] base64::DecodeError),
}

/// Decode a payload that is either raw base64 or a
/// `data:<mime>;base64,<payload>` URL.
///
/// Returns the MIME type declared by the data URL, when present, and the
/// decoded bytes.
pub fn decode_payload(data: &str) -> Result<(Option<String>, Vec<u8>), PayloadError> {
    if let Some(rest) = data.strip_prefix("data:") {
        let (header, body) = rest.split_once(',').ok_or(PayloadError::MalformedDataUrl)?;

        let mime = header
            .split(';')
            .next()
            .filter(|mime| !mime.is_empty())
            .map(str::to_owned);

        let bytes = STANDARD.decode(body.trim())?;
        return Ok((mime, bytes));
    }

    let bytes = STANDARD.decode(data.trim())?;
    Ok((None, bytes))
}

/// Encode `bytes` as a `data:` URL with the given MIME type.
pub fn to_data_url(mime: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime, STANDARD.encode(bytes))
}
