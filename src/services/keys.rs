//! Object key generation.
//!
//! Key format: `{domain}/{owner}/{context...}/{kind}/{uuid}-{file_name}`.
//! Every upload attempt gets a fresh uuid so identically named files never
//! collide and a new upload never overwrites an older object in place.

use crate::models::upload::UploadKind;
use uuid::Uuid;

pub const MAX_FILE_NAME_LEN: usize = 120;
pub const MAX_SEGMENT_LEN: usize = 64;
pub const FALLBACK_FILE_NAME: &str = "file";

/// Reduce `raw` to `[A-Za-z0-9._-]`, with runs of anything else collapsed
/// into a single `-`, runs of `.` collapsed into one and leading/trailing
/// separators trimmed. The result never contains `..`.
fn sanitize(raw: &str, max_len: usize) -> String {
    let mut out = String::with_capacity(raw.len().min(max_len));
    for c in raw.chars() {
        let c = if c.is_ascii_alphanumeric() || c == '.' || c == '_' {
            c
        } else {
            '-'
        };
        if (c == '-' || c == '.') && out.ends_with(c) {
            continue;
        }
        out.push(c);
    }

    let trimmed = out.trim_matches(|c| c == '-' || c == '.');
    // Only ASCII survives the filter, so byte truncation is char-safe.
    let truncated = &trimmed[..trimmed.len().min(max_len)];
    truncated.trim_end_matches(|c| c == '-' || c == '.').to_string()
}

/// Sanitize a user-supplied file name. Directory components are dropped;
/// an empty result becomes [`FALLBACK_FILE_NAME`].
pub fn sanitize_file_name(file_name: &str) -> String {
    let base = file_name
        .rsplit(|c| c == '/' || c == '\\')
        .next()
        .unwrap_or(file_name);
    let clean = sanitize(base, MAX_FILE_NAME_LEN);
    if clean.is_empty() {
        FALLBACK_FILE_NAME.to_string()
    } else {
        clean
    }
}

/// Sanitize one path segment of a context id. May return an empty string;
/// callers treat that as invalid input.
pub fn sanitize_segment(segment: &str) -> String {
    sanitize(segment, MAX_SEGMENT_LEN)
}

/// Build the storage key for one upload attempt. Pure given `suffix`.
pub fn build_key(
    domain: &str,
    owner: &str,
    context_path: &[String],
    kind: UploadKind,
    file_name: &str,
    suffix: Uuid,
) -> String {
    let mut segments: Vec<String> = Vec::with_capacity(context_path.len() + 4);
    segments.push(domain.to_string());
    segments.push(owner.to_ascii_lowercase());
    segments.extend(context_path.iter().cloned());
    segments.push(kind.as_str().to_string());
    segments.push(format!("{}-{}", suffix, sanitize_file_name(file_name)));
    segments.join("/")
}

/// Split a `contextId` on `/` and sanitize each piece. `None` when any piece
/// is empty after sanitizing.
pub fn context_path(context_id: &str) -> Option<Vec<String>> {
    let segments: Vec<String> = context_id.split('/').map(sanitize_segment).collect();
    if segments.is_empty() || segments.iter().any(String::is_empty) {
        return None;
    }
    Some(segments)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allowed(c: char) -> bool {
        c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')
    }

    #[test]
    fn strips_directories_and_symbols() {
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(
            sanitize_file_name(r"C:\Users\me\My Clip (final).mp4"),
            "My-Clip-final-.mp4"
        );
        assert_eq!(sanitize_file_name("a   b!!c.mov"), "a-b-c.mov");
        assert_eq!(sanitize_file_name("vidéo.mp4"), "vid-o.mp4");
    }

    #[test]
    fn dot_runs_collapse() {
        assert_eq!(sanitize_file_name("take..2.mp4"), "take.2.mp4");
        assert_eq!(sanitize_file_name("a...b....mov"), "a.b.mov");
        assert_eq!(context_path("v1..final"), Some(vec!["v1.final".to_string()]));

        let key = build_key(
            "uploads",
            "0xabc",
            &context_path("x..y/z").unwrap(),
            UploadKind::Video,
            "take..2.mp4",
            Uuid::new_v4(),
        );
        assert!(!key.contains(".."), "{key}");
    }

    #[test]
    fn empty_names_fall_back() {
        assert_eq!(sanitize_file_name(""), FALLBACK_FILE_NAME);
        assert_eq!(sanitize_file_name("///"), FALLBACK_FILE_NAME);
        assert_eq!(sanitize_file_name("%%%"), FALLBACK_FILE_NAME);
        assert_eq!(sanitize_file_name(".."), FALLBACK_FILE_NAME);
    }

    #[test]
    fn long_names_are_bounded() {
        let name = format!("{}.mp4", "x".repeat(500));
        let clean = sanitize_file_name(&name);
        assert_eq!(clean.len(), MAX_FILE_NAME_LEN);
        assert!(clean.chars().all(allowed));
    }

    #[test]
    fn key_layout() {
        let suffix = Uuid::nil();
        let key = build_key(
            "uploads",
            "0xAbCd",
            &["export-7".to_string()],
            UploadKind::Video,
            "my clip.mp4",
            suffix,
        );
        assert_eq!(
            key,
            "uploads/0xabcd/export-7/video/00000000-0000-0000-0000-000000000000-my-clip.mp4"
        );
    }

    #[test]
    fn fresh_suffix_means_fresh_key() {
        let ctx = vec!["e".to_string()];
        let a = build_key("d", "o", &ctx, UploadKind::Video, "x.mp4", Uuid::new_v4());
        let b = build_key("d", "o", &ctx, UploadKind::Video, "x.mp4", Uuid::new_v4());
        assert_ne!(a, b);
    }

    #[test]
    fn basename_never_contains_forbidden_characters() {
        for raw in ["a/b c.mp4", "weird$#@!name?.mov", "tab\there.mkv", "   ", "ß∂ƒ"] {
            let key = build_key(
                "uploads",
                "0xabc",
                &["ctx".to_string()],
                UploadKind::Video,
                raw,
                Uuid::new_v4(),
            );
            let basename = key.rsplit('/').next().unwrap();
            assert!(!basename.is_empty());
            assert!(basename.chars().all(allowed), "{basename}");
            assert!(basename.len() <= 36 + 1 + MAX_FILE_NAME_LEN);
        }
    }

    #[test]
    fn context_ids_split_into_segments() {
        assert_eq!(
            context_path("export-1/clips"),
            Some(vec!["export-1".to_string(), "clips".to_string()])
        );
        assert_eq!(context_path("a b"), Some(vec!["a-b".to_string()]));
        assert_eq!(context_path(""), None);
        assert_eq!(context_path("a//b"), None);
        assert_eq!(context_path(".."), None);
    }
}
