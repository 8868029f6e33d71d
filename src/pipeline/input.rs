//! Input resolution: turn a user-supplied path, URL or upload into a decoded
//! card image.
//!
//! URLs are downloaded into a `TempDir` that is dropped as soon as the bytes
//! are in memory. Decoding happens here, once, so every later stage works on
//! a `DynamicImage` and an unreadable file fails before any CPU work is spent.

use crate::error::CardReaderError;
use image::DynamicImage;
use std::path::PathBuf;
use tempfile::TempDir;
use tracing::{debug, info};

/// A decoded card photo plus the name it was loaded under.
#[derive(Debug, Clone)]
pub struct LoadedImage {
    /// File name or URL, used in error messages and logs.
    pub source_name: String,
    pub image: DynamicImage,
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve and decode the input.
///
/// If the input is a URL, download it first. If it is a local file,
/// validate it exists and is readable.
pub async fn load_input(input: &str, timeout_secs: u64) -> Result<LoadedImage, CardReaderError> {
    if input.trim().is_empty() {
        return Err(CardReaderError::InvalidInput {
            input: input.to_string(),
        });
    }
    let bytes = if is_url(input) {
        download_url(input, timeout_secs).await?
    } else {
        read_local(input).await?
    };
    decode_image(input, &bytes)
}

/// Decode in-memory bytes (an upload, a test fixture) into a card image.
pub fn decode_image(source_name: &str, bytes: &[u8]) -> Result<LoadedImage, CardReaderError> {
    let image = image::load_from_memory(bytes).map_err(|e| CardReaderError::NotAnImage {
        source_name: source_name.to_string(),
        detail: e.to_string(),
    })?;
    debug!(
        "Decoded '{}': {}x{}",
        source_name,
        image.width(),
        image.height()
    );
    Ok(LoadedImage {
        source_name: source_name.to_string(),
        image,
    })
}

async fn read_local(path_str: &str) -> Result<Vec<u8>, CardReaderError> {
    let path = PathBuf::from(path_str);

    if !path.exists() {
        return Err(CardReaderError::FileNotFound { path });
    }

    match tokio::fs::read(&path).await {
        Ok(bytes) => {
            debug!("Read local image: {} ({} bytes)", path.display(), bytes.len());
            Ok(bytes)
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            Err(CardReaderError::PermissionDenied { path })
        }
        Err(_) => Err(CardReaderError::FileNotFound { path }),
    }
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<Vec<u8>, CardReaderError> {
    info!("Downloading image from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| CardReaderError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            CardReaderError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            CardReaderError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    if !response.status().is_success() {
        return Err(CardReaderError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let filename = filename_from_url(url);
    let bytes = response
        .bytes()
        .await
        .map_err(|e| CardReaderError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    // Spool to disk so a failed decode leaves something to inspect under RUST_LOG=debug.
    let temp_dir = TempDir::new().map_err(|e| CardReaderError::Internal(e.to_string()))?;
    let file_path = temp_dir.path().join(&filename);
    tokio::fs::write(&file_path, &bytes)
        .await
        .map_err(|e| CardReaderError::Internal(format!("Failed to write temp file: {}", e)))?;
    debug!("Downloaded {} bytes to {}", bytes.len(), file_path.display());

    Ok(bytes.to_vec())
}

/// Last path segment of the URL when it looks like a file name.
fn filename_from_url(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() && last.contains('.') {
                    return last.to_string();
                }
            }
        }
    }
    "downloaded-card".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, RgbImage};
    use std::io::Cursor;

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/card.jpg"));
        assert!(is_url("http://example.com/card.png"));
        assert!(!is_url("/tmp/card.jpg"));
        assert!(!is_url("card.jpg"));
        assert!(!is_url(""));
    }

    #[test]
    fn filename_from_url_uses_last_segment() {
        assert_eq!(filename_from_url("https://x.test/a/card.jpg"), "card.jpg");
        assert_eq!(filename_from_url("https://x.test/a/"), "downloaded-card");
    }

    #[test]
    fn decode_rejects_non_image_bytes() {
        let err = decode_image("notes.txt", b"hello, not a picture").unwrap_err();
        assert!(matches!(err, CardReaderError::NotAnImage { .. }));
    }

    #[tokio::test]
    async fn missing_file_is_reported() {
        let err = load_input("/definitely/not/here.png", 5).await.unwrap_err();
        assert!(matches!(err, CardReaderError::FileNotFound { .. }));
    }

    #[tokio::test]
    async fn local_png_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("card.png");
        let img = RgbImage::from_pixel(8, 4, image::Rgb([200, 10, 10]));
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageFormat::Png).unwrap();
        std::fs::write(&path, buf.into_inner()).unwrap();

        let loaded = load_input(path.to_str().unwrap(), 5).await.unwrap();
        assert_eq!(loaded.image.width(), 8);
        assert_eq!(loaded.image.height(), 4);
    }
}
