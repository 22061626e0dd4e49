use std::path::Path;

/// Pulls link candidates out of a body, in order of first appearance.
/// Two forms are recognized: `[[target]]` wiki links (alias and section
/// suffixes stripped) and `[text](target)` markdown links (external
/// schemes skipped, `.md` targets reduced to their file stem).
pub fn extract_link_candidates(body: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut push = |candidate: &str| {
        let candidate = candidate.trim();
        if !candidate.is_empty() && !out.iter().any(|c| c == candidate) {
            out.push(candidate.to_string());
        }
    };

    let bytes = body.as_bytes();
    let mut i = 0;
    while i + 4 <= bytes.len() {
        if bytes[i] == b'[' && bytes[i + 1] == b'[' {
            if let Some(end) = body[i + 2..].find("]]") {
                let inner = &body[i + 2..i + 2 + end];
                let inner = inner.split('|').next().unwrap_or(inner);
                let inner = inner.split('#').next().unwrap_or(inner);
                push(inner);
                i = i + 2 + end + 2;
                continue;
            }
        }
        i += 1;
    }

    let mut j = 0;
    while let Some(start) = body[j..].find("](") {
        let open = j + start + 2;
        let Some(close_rel) = body[open..].find(')') else {
            break;
        };
        let close = open + close_rel;
        let mut target = body[open..close].trim().trim_matches('<').trim_matches('>');
        if let Some(hash) = target.find('#') {
            target = &target[..hash];
        }
        if let Some(q) = target.find('?') {
            target = &target[..q];
        }
        if target.starts_with("http://")
            || target.starts_with("https://")
            || target.starts_with("mailto:")
        {
            j = close + 1;
            continue;
        }
        if let Some(stripped) = target.strip_suffix(".md") {
            let stem = Path::new(stripped)
                .file_name()
                .and_then(|s| s.to_str())
                .unwrap_or(stripped);
            push(stem);
        } else {
            push(target);
        }
        j = close + 1;
    }

    out
}

/// Non-overlapping occurrences of `token` in `body`; the link-strength
/// input. Zero mentions still count as one declared link.
pub fn count_mentions(body: &str, token: &str) -> usize {
    if token.is_empty() {
        return 0;
    }
    body.matches(token).count()
}
