use serde::{Deserialize, Serialize};

use crate::access::AccessType;

/// `Content-Disposition` mode for a served file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    Inline,
    Attachment,
}

impl Disposition {
    /// Video, audio and HTML render inline; everything else downloads.
    #[must_use]
    pub fn for_mime(mime_type: &str) -> Self {
        let mime = mime_type.to_ascii_lowercase();
        if mime.contains("video/") || mime.contains("audio/") || mime.contains("/html") {
            Self::Inline
        } else {
            Self::Attachment
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inline => "inline",
            Self::Attachment => "attachment",
        }
    }

    /// Counter bucket for a response served with this disposition.
    #[must_use]
    pub fn access_type(self) -> AccessType {
        match self {
            Self::Inline => AccessType::View,
            Self::Attachment => AccessType::Download,
        }
    }
}

impl std::fmt::Display for Disposition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

const MIME_TYPES: &[(&str, &str)] = &[
    ("mp4", "video/mp4"),
    ("m4v", "video/x-m4v"),
    ("mkv", "video/x-matroska"),
    ("webm", "video/webm"),
    ("mov", "video/quicktime"),
    ("avi", "video/x-msvideo"),
    ("mp3", "audio/mpeg"),
    ("m4a", "audio/mp4"),
    ("ogg", "audio/ogg"),
    ("flac", "audio/flac"),
    ("wav", "audio/wav"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("png", "image/png"),
    ("gif", "image/gif"),
    ("webp", "image/webp"),
    ("pdf", "application/pdf"),
    ("html", "text/html"),
    ("htm", "text/html"),
    ("txt", "text/plain"),
    ("json", "application/json"),
    ("zip", "application/zip"),
    ("rar", "application/vnd.rar"),
    ("7z", "application/x-7z-compressed"),
    ("tar", "application/x-tar"),
    ("gz", "application/gzip"),
    ("apk", "application/vnd.android.package-archive"),
];

/// Guess a MIME type from a file name's extension.
#[must_use]
pub fn guess_mime_type(file_name: &str) -> Option<&'static str> {
    let (_, ext) = file_name.rsplit_once('.')?;
    let ext = ext.to_ascii_lowercase();
    MIME_TYPES
        .iter()
        .find(|(e, _)| *e == ext)
        .map(|(_, mime)| *mime)
}

/// Extension used when a file name has to be synthesized: the MIME subtype,
/// or `unknown`.
#[must_use]
pub fn mime_extension(mime_type: &str) -> &str {
    match mime_type.split_once('/') {
        Some((_, subtype)) if !subtype.is_empty() => {
            subtype.split(';').next().unwrap_or(subtype).trim()
        }
        _ => "unknown",
    }
}
