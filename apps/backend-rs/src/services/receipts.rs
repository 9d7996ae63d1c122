//! Receipt images attached to installment payments.

use std::path::{Path, PathBuf};

use chrono::{Datelike, NaiveDate};

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone)]
pub struct ReceiptUpload {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

fn extension_for(upload: &ReceiptUpload) -> String {
    let from_type = match upload.content_type.as_str() {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        "image/gif" => Some("gif"),
        "image/heic" => Some("heic"),
        _ => None,
    };
    if let Some(ext) = from_type {
        return ext.to_string();
    }
    Path::new(&upload.file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .filter(|ext| !ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or_else(|| "img".to_string())
}

pub fn validate_receipt(upload: &ReceiptUpload, max_bytes: usize) -> AppResult<()> {
    if !upload.content_type.to_ascii_lowercase().starts_with("image/") {
        return Err(AppError::BadRequest(
            "The receipt must be an image file.".to_string(),
        ));
    }
    if upload.bytes.is_empty() {
        return Err(AppError::BadRequest("The receipt file is empty.".to_string()));
    }
    if upload.bytes.len() > max_bytes {
        return Err(AppError::BadRequest(format!(
            "The receipt exceeds the {} KB limit.",
            max_bytes / 1024
        )));
    }
    Ok(())
}

/// Media-relative path a receipt is stored under.
pub fn receipt_path(upload: &ReceiptUpload, payment_date: NaiveDate) -> String {
    format!(
        "receipts/{}/{:02}/{}.{}",
        payment_date.year(),
        payment_date.month(),
        uuid::Uuid::new_v4(),
        extension_for(upload)
    )
}

/// Write the image under `media_root` and return its media-relative path.
pub async fn store_receipt(
    media_root: &str,
    upload: &ReceiptUpload,
    payment_date: NaiveDate,
) -> AppResult<String> {
    let relative = receipt_path(upload, payment_date);
    let target: PathBuf = Path::new(media_root).join(&relative);
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(|error| {
            AppError::Internal(format!("Could not create the receipts directory: {error}"))
        })?;
    }
    tokio::fs::write(&target, &upload.bytes)
        .await
        .map_err(|error| AppError::Internal(format!("Could not store the receipt: {error}")))?;
    tracing::debug!(path = %relative, size = upload.bytes.len(), "Receipt stored");
    Ok(relative)
}

/// Best-effort cleanup when the payment transaction fails after the write.
pub async fn discard_receipt(media_root: &str, relative: &str) {
    if let Err(error) = tokio::fs::remove_file(Path::new(media_root).join(relative)).await {
        tracing::warn!(path = %relative, error = %error, "Could not remove orphaned receipt");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upload(content_type: &str, file_name: &str, size: usize) -> ReceiptUpload {
        ReceiptUpload {
            file_name: file_name.to_string(),
            content_type: content_type.to_string(),
            bytes: vec![0u8; size],
        }
    }

    #[test]
    fn only_images_within_limit_pass() {
        assert!(validate_receipt(&upload("image/png", "a.png", 10), 100).is_ok());
        assert!(validate_receipt(&upload("application/pdf", "a.pdf", 10), 100).is_err());
        assert!(validate_receipt(&upload("image/png", "a.png", 101), 100).is_err());
        assert!(validate_receipt(&upload("image/png", "a.png", 0), 100).is_err());
    }

    #[test]
    fn paths_are_dated_and_typed() {
        let date = NaiveDate::from_ymd_opt(2026, 4, 9).unwrap();
        let path = receipt_path(&upload("image/jpeg", "scan.JPEG", 1), date);
        assert!(path.starts_with("receipts/2026/04/"));
        assert!(path.ends_with(".jpg"));
        let path = receipt_path(&upload("image/x-raw", "scan.TIF", 1), date);
        assert!(path.ends_with(".tif"));
        let path = receipt_path(&upload("image/x-raw", "../../etc", 1), date);
        assert!(path.ends_with(".img"));
    }

    #[tokio::test]
    async fn stored_receipts_land_under_media_root() {
        let root = std::env::temp_dir().join(format!("receipts-{}", uuid::Uuid::new_v4()));
        let root = root.to_string_lossy().to_string();
        let date = NaiveDate::from_ymd_opt(2026, 4, 9).unwrap();
        let relative = store_receipt(&root, &upload("image/png", "r.png", 4), date)
            .await
            .unwrap();
        let stored = tokio::fs::read(Path::new(&root).join(&relative)).await.unwrap();
        assert_eq!(stored.len(), 4);
        discard_receipt(&root, &relative).await;
        assert!(!Path::new(&root).join(&relative).exists());
        let _ = tokio::fs::remove_dir_all(&root).await;
    }
}
