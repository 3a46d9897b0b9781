//! Media conversion: audio to Opus-in-Ogg, images to progressive JPEG.
//!
//! Both converters work over in-memory pipelines with zero on-disk
//! scratch and honor per-request deadlines through [`OpContext`].

mod audio;
mod config;
mod error;
mod exec;
mod image;
mod probe;
mod types;

pub use audio::AudioConverter;
pub use config::{ConverterConfig, ImageEngine};
pub use error::ConverterError;
pub use image::ImageConverter;
pub use types::{
    AudioConverterStats, AudioRequest, AudioResponse, ImageConverterStats, ImageRequest,
    ImageResponse,
};

use crate::context::OpContext;
use crate::downloader::Downloader;
use crate::encoding::decode_payload;

/// Obtain raw input bytes: fetch the URL through the downloader, or
/// strip an optional data-URL preamble and base64-decode.
pub(crate) async fn resolve_input(
    downloader: &Downloader,
    ctx: &OpContext,
    data: &str,
    is_url: bool,
) -> Result<Vec<u8>, ConverterError> {
    if is_url {
        Ok(downloader.download(ctx, data).await?)
    } else {
        let (_, bytes) = decode_payload(data)?;
        Ok(bytes)
    }
}

/// Collapse per-item batch results into the aggregate contract: the
/// first failure (in input order) wins, tagged with its index.
pub fn collect_batch<T>(results: Vec<Result<T, ConverterError>>) -> Result<Vec<T>, ConverterError> {
    let mut collected = Vec::with_capacity(results.len());
    for (index, result) in results.into_iter().enumerate() {
        match result {
            Ok(value) => collected.push(value),
            Err(err) => return Err(ConverterError::batch_item(index, err)),
        }
    }
    Ok(collected)
}
