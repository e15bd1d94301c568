//! Still-image transforms on the `image` crate.
//!
//! Decode, pixel work and encode run on the blocking pool; only the file read
//! and the atomic write happen on the async side.

use std::io::Cursor;
use std::path::Path;

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageFormat, ImageOutputFormat};
use pixq_models::{content_type_for, TransformParams};
use tracing::debug;

use crate::error::{MediaError, MediaResult};
use crate::fs_utils::write_atomic;
use crate::geometry::{plan, Geometry};
use crate::transformer::TransformOutput;

/// JPEG quality used for every re-encode.
pub const JPEG_QUALITY: u8 = 95;

/// Apply `params` to the image at `input` and write the result to `output`.
///
/// With `params == None` the image is decoded and re-encoded unchanged.
pub async fn transform_image(
    input: &Path,
    output: &Path,
    params: Option<&TransformParams>,
) -> MediaResult<TransformOutput> {
    let bytes = tokio::fs::read(input).await?;
    if bytes.is_empty() {
        return Err(MediaError::decode(format!("{} is empty", input.display())));
    }

    let target_format = ImageFormat::from_path(output).ok();
    let params = params.cloned();
    let (encoded, width, height) = tokio::task::spawn_blocking(move || {
        let (img, source_format) = decode(&bytes)?;
        let img = match params {
            Some(params) => {
                let (w, h) = img.dimensions();
                apply(img, plan(w, h, &params)?)
            }
            None => img,
        };
        let (width, height) = img.dimensions();
        let encoded = encode(&img, target_format.unwrap_or(source_format))?;
        Ok::<_, MediaError>((encoded, width, height))
    })
    .await
    .map_err(|e| MediaError::internal(format!("image task failed: {}", e)))??;

    debug!(
        "Encoded {}x{} image ({} bytes) to {}",
        width,
        height,
        encoded.len(),
        output.display()
    );
    write_atomic(output, encoded).await?;

    Ok(TransformOutput {
        path: output.to_path_buf(),
        width: Some(width),
        height: Some(height),
        content_type: content_type_for(&output.to_string_lossy()).to_string(),
    })
}

fn decode(bytes: &[u8]) -> MediaResult<(DynamicImage, ImageFormat)> {
    let format = image::guess_format(bytes)
        .map_err(|e| MediaError::decode(format!("unrecognized image data: {}", e)))?;
    let img = image::load_from_memory_with_format(bytes, format)
        .map_err(|e| MediaError::decode(e.to_string()))?;
    Ok((img, format))
}

fn apply(img: DynamicImage, geometry: Geometry) -> DynamicImage {
    match geometry {
        Geometry::Resize { width, height } => img.resize_exact(width, height, FilterType::Lanczos3),
        Geometry::Crop { x, y, width, height } => img.crop_imm(x, y, width, height),
    }
}

fn encode(img: &DynamicImage, format: ImageFormat) -> MediaResult<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    let result = match format {
        // JPEG has no alpha channel
        ImageFormat::Jpeg => DynamicImage::ImageRgb8(img.to_rgb8())
            .write_to(&mut buf, ImageOutputFormat::Jpeg(JPEG_QUALITY)),
        other => img.write_to(&mut buf, ImageOutputFormat::from(other)),
    };
    result.map_err(|e| MediaError::UnsupportedFormat(format!("cannot encode {:?}: {}", format, e)))?;
    Ok(buf.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgba};

    fn write_png(path: &Path, width: u32, height: u32) {
        let img = ImageBuffer::from_pixel(width, height, Rgba([200u8, 40, 40, 255]));
        img.save_with_format(path, ImageFormat::Png).unwrap();
    }

    #[tokio::test]
    async fn test_resize_to_width() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("cat.png");
        let output = dir.path().join("cat-job1.png");
        write_png(&input, 400, 300);

        let out = transform_image(&input, &output, Some(&TransformParams::ResizeToWidthPx { width: 100 }))
            .await
            .unwrap();

        assert_eq!((out.width, out.height), (Some(100), Some(75)));
        assert_eq!(out.content_type, "image/png");
        assert_eq!(image::open(&output).unwrap().dimensions(), (100, 75));
    }

    #[tokio::test]
    async fn test_crop_then_jpeg_output() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("cat.png");
        let output = dir.path().join("cat-job2.jpg");
        write_png(&input, 200, 100);

        let out = transform_image(&input, &output, Some(&TransformParams::CropByPercentage { percentage: 50.0 }))
            .await
            .unwrap();

        assert_eq!((out.width, out.height), (Some(100), Some(50)));
        assert_eq!(out.content_type, "image/jpeg");
        let bytes = std::fs::read(&output).unwrap();
        assert_eq!(image::guess_format(&bytes).unwrap(), ImageFormat::Jpeg);
    }

    #[tokio::test]
    async fn test_reencode_keeps_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("a.png");
        let output = dir.path().join("a-enc.png");
        write_png(&input, 32, 16);

        let out = transform_image(&input, &output, None).await.unwrap();
        assert_eq!((out.width, out.height), (Some(32), Some(16)));
    }

    #[tokio::test]
    async fn test_garbage_input_is_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("bad.png");
        std::fs::write(&input, b"definitely not a png").unwrap();

        let err = transform_image(&input, &dir.path().join("out.png"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::Decode(_)));
        assert!(err.is_permanent());
    }

    #[tokio::test]
    async fn test_zero_dimension_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("wide.png");
        let output = dir.path().join("wide-out.png");
        write_png(&input, 1000, 1);

        let err = transform_image(&input, &output, Some(&TransformParams::ResizeToWidthPx { width: 10 }))
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::InvalidParameter(_)));
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn test_missing_input_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = transform_image(&dir.path().join("nope.png"), &dir.path().join("o.png"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::Io(_)));
        assert!(!err.is_permanent());
    }
}
