//! Content-Type inference for objects without an explicit header.

use std::collections::HashMap;

/// Resolves a Content-Type value for a key.
pub trait ContentTypeResolver: Send + Sync {
    /// Content-Type for `path`, including a charset where applicable.
    fn content_type(&self, path: &str) -> String;
}

const FALLBACK: &str = "application/octet-stream";

const BUILTIN: &[(&str, &str)] = &[
    ("html", "text/html"),
    ("htm", "text/html"),
    ("css", "text/css"),
    ("js", "application/javascript"),
    ("mjs", "application/javascript"),
    ("json", "application/json"),
    ("map", "application/json"),
    ("webmanifest", "application/manifest+json"),
    ("xml", "application/xml"),
    ("txt", "text/plain"),
    ("md", "text/markdown"),
    ("csv", "text/csv"),
    ("svg", "image/svg+xml"),
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("gif", "image/gif"),
    ("webp", "image/webp"),
    ("avif", "image/avif"),
    ("ico", "image/x-icon"),
    ("woff", "font/woff"),
    ("woff2", "font/woff2"),
    ("ttf", "font/ttf"),
    ("otf", "font/otf"),
    ("pdf", "application/pdf"),
    ("zip", "application/zip"),
    ("gz", "application/gzip"),
    ("wasm", "application/wasm"),
    ("mp4", "video/mp4"),
    ("webm", "video/webm"),
    ("mp3", "audio/mpeg"),
    ("wav", "audio/wav"),
    ("ogg", "audio/ogg"),
];

/// Extension-based resolver.
///
/// Textual types get `; charset=utf-8`. Unknown extensions resolve to
/// `application/octet-stream`.
#[derive(Debug, Clone)]
pub struct ExtensionContentTypes {
    types: HashMap<String, String>,
}

impl ExtensionContentTypes {
    /// Create a resolver with the built-in table.
    pub fn new() -> Self {
        let types = BUILTIN
            .iter()
            .map(|(ext, mime)| (ext.to_string(), mime.to_string()))
            .collect();
        Self { types }
    }

    /// Map an extension (without the dot) to a MIME type.
    pub fn with_type(mut self, ext: &str, mime: impl Into<String>) -> Self {
        self.types.insert(ext.to_ascii_lowercase(), mime.into());
        self
    }

    fn mime_for(&self, path: &str) -> &str {
        let name = path.rsplit('/').next().unwrap_or(path);
        name.rsplit_once('.')
            .filter(|(stem, _)| !stem.is_empty())
            .and_then(|(_, ext)| self.types.get(&ext.to_ascii_lowercase()))
            .map(String::as_str)
            .unwrap_or(FALLBACK)
    }
}

impl Default for ExtensionContentTypes {
    fn default() -> Self {
        Self::new()
    }
}

fn is_textual(mime: &str) -> bool {
    mime.starts_with("text/")
        || matches!(
            mime,
            "application/javascript" | "application/json" | "application/xml" | "image/svg+xml"
        )
}

impl ContentTypeResolver for ExtensionContentTypes {
    fn content_type(&self, path: &str) -> String {
        let mime = self.mime_for(path);
        if is_textual(mime) {
            format!("{}; charset=utf-8", mime)
        } else {
            mime.to_string()
        }
    }
}
