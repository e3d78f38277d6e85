use bytes::Bytes;
use tracing::{error, warn};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

pub struct UploadItem {
    pub body: Bytes,
    pub content_type: String,
}

/// Profile image a file is uploaded for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSlot {
    Avatar,
    CoverImage,
}

impl ImageSlot {
    /// Multipart field name carrying the file.
    pub fn field_name(self) -> &'static str {
        match self {
            ImageSlot::Avatar => "avatar",
            ImageSlot::CoverImage => "coverImage",
        }
    }

    fn key_prefix(self) -> &'static str {
        match self {
            ImageSlot::Avatar => "avatar",
            ImageSlot::CoverImage => "cover",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ImageSlot::Avatar => "avatar",
            ImageSlot::CoverImage => "cover image",
        }
    }
}

/// An object written to the media host.
#[derive(Debug, Clone)]
pub struct StoredImage {
    pub key: String,
    pub url: String,
}

fn ext_from_mime(ct: &str) -> Option<&'static str> {
    match ct {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        "image/gif" => Some("gif"),
        "image/heic" => Some("heic"),
        _ => None,
    }
}

/// Rejects empty files and non-image content types.
pub fn check_image(slot: ImageSlot, item: &UploadItem) -> AppResult<&'static str> {
    if item.body.is_empty() {
        return Err(AppError::bad_request(format!("{} file is missing", slot.label())));
    }
    ext_from_mime(&item.content_type).ok_or_else(|| {
        AppError::bad_request(format!(
            "{} must be a jpeg, png, webp, gif or heic image",
            slot.label()
        ))
    })
}

pub async fn upload_image(
    st: &AppState,
    user_id: Uuid,
    slot: ImageSlot,
    item: UploadItem,
) -> AppResult<StoredImage> {
    let ext = check_image(slot, &item)?;
    let key = format!("users/{}/{}-{}.{}", user_id, slot.key_prefix(), Uuid::new_v4(), ext);
    st.storage
        .put_object(&key, item.body, &item.content_type)
        .await
        .map_err(|e| {
            error!(error = ?e, %user_id, key = %key, "media upload failed");
            AppError::internal(format!("Error while uploading {}", slot.label()))
        })?;
    let url = st.storage.object_url(&key);
    Ok(StoredImage { key, url })
}

/// Best-effort removal of an object whose database write did not go through.
pub async fn discard(st: &AppState, image: &StoredImage) {
    if let Err(e) = st.storage.delete_object(&image.key).await {
        warn!(error = ?e, key = %image.key, "failed to remove orphaned upload");
    }
}
