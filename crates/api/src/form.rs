//! Multipart upload parsing shared by the operation handlers.

use std::collections::HashMap;

use axum::body::Bytes;
use axum::extract::Multipart;

use crate::error::{AppError, AppResult};

/// Name of the multipart part carrying the source image.
pub const IMAGE_FIELD: &str = "image";

/// An operation upload: the source image plus any text fields.
#[derive(Debug, Default)]
pub struct UploadForm {
    image: Option<Bytes>,
    fields: HashMap<String, String>,
}

impl UploadForm {
    /// Drain `multipart` into an [`UploadForm`].
    ///
    /// Parts without a name are skipped. A repeated name keeps the last
    /// value.
    pub async fn from_multipart(mut multipart: Multipart) -> AppResult<Self> {
        let mut form = UploadForm::default();

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| AppError::BadRequest(e.body_text()))?
        {
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };

            if name == IMAGE_FIELD {
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::BadRequest(e.body_text()))?;
                form.image = Some(data);
            } else {
                let value = field
                    .text()
                    .await
                    .map_err(|e| AppError::BadRequest(e.body_text()))?;
                form.fields.insert(name, value);
            }
        }

        Ok(form)
    }

    /// The uploaded image bytes, or 400 when absent or empty.
    pub fn require_image(&self) -> AppResult<&[u8]> {
        match &self.image {
            Some(bytes) if !bytes.is_empty() => Ok(bytes),
            _ => Err(AppError::BadRequest(format!(
                "missing required file field '{IMAGE_FIELD}'"
            ))),
        }
    }

    /// A text field, treating blank values as absent.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    /// A text field that must be present.
    pub fn require_field(&self, name: &str) -> AppResult<&str> {
        self.field(name)
            .ok_or_else(|| AppError::BadRequest(format!("missing required field '{name}'")))
    }
}
