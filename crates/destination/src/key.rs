//! Object key construction.
//!
//! Destinations that store files under a key of our choosing (local
//! directories, object storage) use a content-addressed key: the BLAKE3 hash
//! of the file contents plus the original extension, optionally under a
//! prefix. Uploading the same bytes twice lands on the same key.

use crate::error::{ErrorKind, Result};

/// Normalize a `/`-separated key prefix.
///
/// Empty segments and `.` are dropped, `..` pops the previous segment.
/// Prefixes that would climb above the root, contain null bytes or
/// backslashes, or normalize to nothing are rejected.
///
/// ```
/// use fanout_destination::normalize_prefix;
/// assert_eq!(normalize_prefix("images//2024/./").unwrap(), "images/2024");
/// assert_eq!(normalize_prefix("a/../b").unwrap(), "b");
/// assert!(normalize_prefix("../escape").is_err());
/// assert!(normalize_prefix("/").is_err());
/// ```
pub fn normalize_prefix(prefix: &str) -> Result<String> {
    let invalid = || ErrorKind::Config(format!("invalid key prefix `{prefix}`"));
    let mut segments: Vec<&str> = Vec::new();
    for segment in prefix.split('/') {
        match segment {
            "" | "." => {},
            ".." => {
                if segments.pop().is_none() {
                    exn::bail!(invalid());
                }
            },
            s if s.contains('\0') || s.contains('\\') => exn::bail!(invalid()),
            s => segments.push(s),
        }
    }
    match segments.is_empty() {
        true => exn::bail!(invalid()),
        false => Ok(segments.join("/")),
    }
}

/// Build the content-addressed key for `contents`.
pub fn content_key(prefix: Option<&str>, contents: &[u8], extension: Option<&str>) -> String {
    let hash = blake3::hash(contents).to_hex();
    let name = match extension {
        Some(ext) => format!("{hash}.{ext}"),
        None => hash.to_string(),
    };
    match prefix {
        Some(prefix) => format!("{prefix}/{name}"),
        None => name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("images", "images")]
    #[case("/images/", "images")]
    #[case("a//b/./c", "a/b/c")]
    #[case("a/b/../c", "a/c")]
    fn test_valid_prefixes(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(normalize_prefix(input).unwrap(), expected);
    }

    #[rstest]
    #[case("")]
    #[case("./")]
    #[case("..")]
    #[case("a/../../b")]
    #[case("a\0b")]
    #[case("a\\b")]
    fn test_invalid_prefixes(#[case] input: &str) {
        let err = normalize_prefix(input).unwrap_err();
        assert!(matches!(&*err, ErrorKind::Config(_)));
    }

    #[test]
    fn test_content_key_is_stable() {
        let a = content_key(None, b"same bytes", Some("png"));
        let b = content_key(None, b"same bytes", Some("png"));
        assert_eq!(a, b);
        assert!(a.ends_with(".png"));
        // 64 hex chars + ".png"
        assert_eq!(a.len(), 68);
        assert_ne!(a, content_key(None, b"other bytes", Some("png")));
    }

    #[test]
    fn test_content_key_with_prefix() {
        let key = content_key(Some("uploads"), b"data", None);
        assert!(key.starts_with("uploads/"));
        assert!(!key.contains('.'));
    }
}
