use sha2::{Digest, Sha256};
use std::path::Path;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

pub fn is_markdown_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("md") || ext.eq_ignore_ascii_case("markdown"))
        .unwrap_or(false)
}

pub fn to_slash(path: &Path) -> String {
    path.components()
        .filter_map(|c| c.as_os_str().to_str())
        .collect::<Vec<_>>()
        .join("/")
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut h = Sha256::new();
    h.update(bytes);
    hex::encode(h.finalize())
}

pub fn now_utc() -> OffsetDateTime {
    OffsetDateTime::now_utc()
}

pub fn now_rfc3339() -> String {
    format_rfc3339(now_utc())
}

pub fn format_rfc3339(dt: OffsetDateTime) -> String {
    dt.format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

pub fn parse_rfc3339(s: &str) -> Option<OffsetDateTime> {
    OffsetDateTime::parse(s, &Rfc3339).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn markdown_extensions() {
        assert!(is_markdown_path(Path::new("a/b.md")));
        assert!(is_markdown_path(Path::new("a/b.MD")));
        assert!(is_markdown_path(Path::new("a/b.markdown")));
        assert!(!is_markdown_path(Path::new("a/b.txt")));
        assert!(!is_markdown_path(Path::new("a/b")));
    }

    #[test]
    fn rfc3339_round_trip() {
        let now = now_utc();
        let formatted = format_rfc3339(now);
        let parsed = parse_rfc3339(&formatted).expect("should parse back");
        assert_eq!(parsed.unix_timestamp(), now.unix_timestamp());
    }

    #[test]
    fn slash_paths() {
        let p: PathBuf = ["3-Resources", "deep", "note.md"].iter().collect();
        assert_eq!(to_slash(&p), "3-Resources/deep/note.md");
    }

    #[test]
    fn hash_is_stable() {
        assert_eq!(sha256_hex(b"abc"), sha256_hex(b"abc"));
        assert_ne!(sha256_hex(b"abc"), sha256_hex(b"abd"));
    }
}
