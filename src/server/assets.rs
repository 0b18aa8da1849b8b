//!
//! Asset resolution and metadata
//! -----------------------------
//! The security boundary of the server: maps a raw URL path onto a file
//! guaranteed to live under the asset root, stats it, and derives the cache
//! validators and content descriptor used to build response headers.

use std::borrow::Cow;
use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;

use httpdate::fmt_http_date;

use crate::error::{ServeError, ServeResult};

/// Percent-decode a raw URL path. Every `%` must introduce a two-hex-digit
/// escape and the decoded bytes must be valid UTF-8; anything else is a
/// malformed request path.
fn decode_path(raw: &str) -> ServeResult<Cow<'_, str>> {
    let bytes = raw.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if i + 2 >= bytes.len()
                || !bytes[i + 1].is_ascii_hexdigit()
                || !bytes[i + 2].is_ascii_hexdigit()
            {
                return Err(ServeError::ClientProtocol);
            }
            i += 3;
        } else {
            i += 1;
        }
    }
    urlencoding::decode(raw).map_err(|_| ServeError::ClientProtocol)
}

/// Resolve a raw (still percent-encoded) URL path to an absolute filesystem
/// path underneath `root`, or reject it.
///
/// Decoding failures and any resolution that escapes the root yield
/// `ClientProtocol` (400), distinct from "file not found". The resolution is
/// purely lexical: `.`/`..` segments are collapsed without consulting the
/// filesystem, so rejected paths cause no I/O at all. A `..` that would pop
/// past the root is a rejection, not a clamp to the root.
pub fn resolve_under_root(root: &Path, raw_path: &str) -> ServeResult<PathBuf> {
    let decoded = decode_path(raw_path)?;
    let relative = decoded.trim_start_matches('/');
    let mut resolved = root.to_path_buf();
    let mut depth: usize = 0;
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => {
                resolved.push(part);
                depth += 1;
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if depth == 0 {
                    return Err(ServeError::ClientProtocol);
                }
                resolved.pop();
                depth -= 1;
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(ServeError::ClientProtocol);
            }
        }
    }
    // Invariant: the resolved path lies under the root.
    if !resolved.starts_with(root) {
        return Err(ServeError::ClientProtocol);
    }
    Ok(resolved)
}

/// Size and cache-validation metadata for one resolved file, re-derived per
/// request. The ETag is weak: size plus modification time in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetMeta {
    pub size: u64,
    pub etag: String,
    pub last_modified: String,
}

impl AssetMeta {
    /// Stat `path` and derive validators. Missing files, permission errors
    /// and non-regular files all collapse to `NotFound`.
    pub async fn lookup(path: &Path) -> ServeResult<Self> {
        let meta = tokio::fs::metadata(path)
            .await
            .map_err(|_| ServeError::NotFound)?;
        if !meta.is_file() {
            return Err(ServeError::NotFound);
        }
        let modified = meta.modified().map_err(|_| ServeError::NotFound)?;
        let mtime_ms = modified
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        Ok(AssetMeta {
            size: meta.len(),
            etag: format!("W/\"{}-{}\"", meta.len(), mtime_ms),
            last_modified: fmt_http_date(modified),
        })
    }
}

/// Media type and optional content encoding, derived purely from the path
/// suffix. Pre-compressed assets (`*.gz`) report the encoding and take their
/// media type from the inner extension; the server never transforms content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentDescriptor {
    pub media_type: &'static str,
    pub encoding: Option<&'static str>,
}

pub fn content_descriptor(path: &Path) -> ContentDescriptor {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match name.strip_suffix(".gz") {
        Some(inner) => ContentDescriptor {
            media_type: media_type_for(inner),
            encoding: Some("gzip"),
        },
        None => ContentDescriptor {
            media_type: media_type_for(&name),
            encoding: None,
        },
    }
}

fn media_type_for(name: &str) -> &'static str {
    let ext = name.rsplit('.').next().unwrap_or("");
    match ext {
        "json" | "geojson" => "application/json; charset=utf-8",
        "b3dm" | "i3dm" | "pnts" | "cmpt" | "glb" | "bin" | "ktx2" => "application/octet-stream",
        "gltf" => "model/gltf+json",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn root() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = std::fs::canonicalize(dir.path()).expect("canonicalize");
        (dir, root)
    }

    #[test]
    fn plain_path_resolves_under_root() {
        let (_dir, root) = root();
        let resolved = resolve_under_root(&root, "/tiles/0/0/0.b3dm").expect("resolve");
        assert_eq!(resolved, root.join("tiles/0/0/0.b3dm"));
    }

    #[test]
    fn traversal_is_rejected_without_io() {
        let (_dir, root) = root();
        assert_eq!(
            resolve_under_root(&root, "/../../etc/passwd"),
            Err(ServeError::ClientProtocol)
        );
        assert_eq!(
            resolve_under_root(&root, "/tiles/..%2F..%2F..%2Fetc/passwd"),
            Err(ServeError::ClientProtocol)
        );
    }

    #[test]
    fn interior_parent_segments_that_pop_past_root_are_rejected() {
        let (_dir, root) = root();
        // One real segment, two pops: the second would climb out of the
        // root and must reject rather than land back on the root.
        assert_eq!(
            resolve_under_root(&root, "/tiles/../../outside.txt"),
            Err(ServeError::ClientProtocol)
        );
        assert_eq!(
            resolve_under_root(&root, "/a/b/../../../etc/passwd"),
            Err(ServeError::ClientProtocol)
        );
        // Balanced pops that stay inside remain fine.
        let resolved = resolve_under_root(&root, "/a/b/../../c.json").expect("resolve");
        assert_eq!(resolved, root.join("c.json"));
    }

    #[test]
    fn malformed_percent_sequences_are_rejected() {
        let (_dir, root) = root();
        for raw in ["/%zz.glb", "/tile%2", "/%", "/%g1/x", "/a%0zb"] {
            assert_eq!(
                resolve_under_root(&root, raw),
                Err(ServeError::ClientProtocol),
                "{raw}"
            );
        }
        // Valid escapes still decode.
        let resolved = resolve_under_root(&root, "/maps/%41.png").expect("resolve");
        assert_eq!(resolved, root.join("maps/A.png"));
    }

    #[test]
    fn dot_segments_inside_root_are_collapsed() {
        let (_dir, root) = root();
        let resolved = resolve_under_root(&root, "/a/./b/../c.json").expect("resolve");
        assert_eq!(resolved, root.join("a/c.json"));
    }

    #[test]
    fn duplicate_and_trailing_separators_are_tolerated() {
        let (_dir, root) = root();
        let resolved = resolve_under_root(&root, "//tiles//set//tileset.json").expect("resolve");
        assert_eq!(resolved, root.join("tiles/set/tileset.json"));
    }

    #[test]
    fn percent_encoded_names_decode() {
        let (_dir, root) = root();
        let resolved = resolve_under_root(&root, "/maps/old%20town.png").expect("resolve");
        assert_eq!(resolved, root.join("maps/old town.png"));
    }

    #[test]
    fn invalid_utf8_encoding_is_rejected() {
        let (_dir, root) = root();
        assert_eq!(
            resolve_under_root(&root, "/%ff%fe"),
            Err(ServeError::ClientProtocol)
        );
    }

    #[test]
    fn root_path_resolves_to_root() {
        let (_dir, root) = root();
        assert_eq!(resolve_under_root(&root, "/").expect("resolve"), root);
    }

    #[test]
    fn media_types_follow_suffix_table() {
        let cases: &[(&str, &str)] = &[
            ("tileset.json", "application/json; charset=utf-8"),
            ("ward.geojson", "application/json; charset=utf-8"),
            ("tile.b3dm", "application/octet-stream"),
            ("cloud.pnts", "application/octet-stream"),
            ("model.glb", "application/octet-stream"),
            ("texture.ktx2", "application/octet-stream"),
            ("scene.gltf", "model/gltf+json"),
            ("map.png", "image/png"),
            ("photo.jpg", "image/jpeg"),
            ("photo.jpeg", "image/jpeg"),
            ("overlay.webp", "image/webp"),
            ("mystery.xyz", "application/octet-stream"),
            ("noextension", "application/octet-stream"),
        ];
        for (name, want) in cases {
            let got = content_descriptor(Path::new(name));
            assert_eq!(got.media_type, *want, "media type for {name}");
            assert_eq!(got.encoding, None, "encoding for {name}");
        }
    }

    #[test]
    fn gz_suffix_types_by_inner_extension() {
        let d = content_descriptor(Path::new("tile.b3dm.gz"));
        assert_eq!(d.media_type, "application/octet-stream");
        assert_eq!(d.encoding, Some("gzip"));

        let d = content_descriptor(Path::new("data.json.gz"));
        assert_eq!(d.media_type, "application/json; charset=utf-8");
        assert_eq!(d.encoding, Some("gzip"));

        let d = content_descriptor(Path::new("scene.gltf.gz"));
        assert_eq!(d.media_type, "model/gltf+json");
        assert_eq!(d.encoding, Some("gzip"));
    }

    #[test]
    fn case_insensitive_suffix_match() {
        let d = content_descriptor(Path::new("TILE.B3DM.GZ"));
        assert_eq!(d.media_type, "application/octet-stream");
        assert_eq!(d.encoding, Some("gzip"));
    }

    #[tokio::test]
    async fn lookup_reports_size_and_weak_etag() {
        let (_dir, root) = root();
        let path = root.join("model.glb");
        let mut f = std::fs::File::create(&path).expect("create");
        f.write_all(&[0u8; 500]).expect("write");
        drop(f);

        let meta = AssetMeta::lookup(&path).await.expect("lookup");
        assert_eq!(meta.size, 500);
        assert!(meta.etag.starts_with("W/\"500-"));
        assert!(meta.last_modified.ends_with("GMT"));
    }

    #[tokio::test]
    async fn lookup_collapses_missing_and_directory_to_not_found() {
        let (_dir, root) = root();
        assert_eq!(
            AssetMeta::lookup(&root.join("absent.glb")).await,
            Err(ServeError::NotFound)
        );
        assert_eq!(AssetMeta::lookup(&root).await, Err(ServeError::NotFound));
    }
}
