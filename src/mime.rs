// Copyright (c) 2025-present, the SiloBang authors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Extension-to-MIME resolution. The extension table always wins over a
//! caller-supplied hint; an unknown extension falls back to the hint, and
//! the hint falling back to the generic octet stream type.

/// Resolves a MIME type from an origin filename's extension, falling back to
/// a caller-supplied hint and finally `application/octet-stream`.
#[must_use]
pub fn resolve(origin_name: &str, hint: Option<&str>) -> String {
    let extension = origin_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase());

    let from_table = extension.as_deref().and_then(from_extension);

    from_table
        .map(str::to_string)
        .or_else(|| hint.map(str::to_string))
        .unwrap_or_else(|| "application/octet-stream".to_string())
}

fn from_extension(extension: &str) -> Option<&'static str> {
    match extension {
        "glb" => Some("model/gltf-binary"),
        "gltf" => Some("model/gltf+json"),
        "obj" => Some("text/plain"),
        "fbx" => Some("application/octet-stream"),
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        _ => None,
    }
}
