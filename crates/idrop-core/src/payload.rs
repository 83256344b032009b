// SPDX-License-Identifier: AGPL-3.0
// iDrop Core - File payloads
//
// Files travel as `data:<mime>;base64,<bytes>` URLs stored in the transfer
// record itself, so a receiver can rebuild the original file with no second
// round trip.

use crate::types::AppError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::path::Path;

const FALLBACK_MIME: &str = "application/octet-stream";

/// A file selected for sending, already encoded as a data URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileAttachment {
    pub name: String,
    pub mime_type: String,
    pub data_url: String,
}

impl FileAttachment {
    /// Encode raw bytes. The MIME type is guessed from the name when absent.
    pub fn from_bytes(name: &str, mime_type: Option<&str>, bytes: &[u8]) -> Self {
        let mime_type = mime_type
            .and_then(valid_mime)
            .unwrap_or_else(|| guess_mime(name));

        Self {
            name: name.to_string(),
            data_url: encode_data_url(&mime_type, bytes),
            mime_type,
        }
    }

    /// Read a file from disk and encode it
    pub async fn from_path(path: &Path) -> Result<Self, AppError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| AppError::FileIo(format!("Failed to read {}: {}", path.display(), e)))?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("file")
            .to_string();

        Ok(Self::from_bytes(&name, None, &bytes))
    }
}

/// A stored file payload turned back into bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFile {
    pub name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl DecodedFile {
    /// Value for a `Content-Disposition` header
    pub fn content_disposition(&self) -> String {
        let safe = sanitize_file_name(&self.name, "download");
        format!("attachment; filename=\"{}\"", safe.replace('"', "'"))
    }

    /// Value for a `Content-Type` header, octet-stream unless the stored type parses
    pub fn content_type(&self) -> String {
        valid_mime(&self.mime_type).unwrap_or_else(|| FALLBACK_MIME.to_string())
    }
}

/// The trimmed MIME type if it parses and is safe to put in a header
pub fn valid_mime(mime_type: &str) -> Option<String> {
    let trimmed = mime_type.trim();
    if trimmed.chars().any(char::is_control) {
        return None;
    }
    trimmed
        .parse::<mime_guess::Mime>()
        .ok()
        .map(|_| trimmed.to_string())
}

pub fn guess_mime(name: &str) -> String {
    mime_guess::from_path(name)
        .first_raw()
        .unwrap_or(FALLBACK_MIME)
        .to_string()
}

pub fn encode_data_url(mime_type: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime_type, STANDARD.encode(bytes))
}

/// Split a data URL into its MIME type and decoded bytes
pub fn decode_data_url(data_url: &str) -> Result<(String, Vec<u8>), AppError> {
    let rest = data_url
        .strip_prefix("data:")
        .ok_or_else(|| AppError::InvalidPayload("missing data: prefix".to_string()))?;
    let (header, data) = rest
        .split_once(',')
        .ok_or_else(|| AppError::InvalidPayload("missing payload separator".to_string()))?;

    let (mime_type, is_base64) = match header.strip_suffix(";base64") {
        Some(mime) => (mime, true),
        None => (header, false),
    };
    let mime_type = if mime_type.is_empty() {
        FALLBACK_MIME
    } else {
        mime_type
    };

    let bytes = if is_base64 {
        STANDARD
            .decode(data.trim())
            .map_err(|e| AppError::InvalidPayload(format!("bad base64: {}", e)))?
    } else {
        data.as_bytes().to_vec()
    };

    Ok((mime_type.to_string(), bytes))
}

/// Keep only the final path component of a user-supplied file name, minus
/// control characters
pub fn sanitize_file_name(name: &str, fallback: &str) -> String {
    let printable: String = name.chars().filter(|c| !c.is_control()).collect();
    Path::new(printable.trim())
        .file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.trim())
        .filter(|n| !n.is_empty() && *n != "." && *n != "..")
        .map(|n| n.to_string())
        .unwrap_or_else(|| fallback.to_string())
}
