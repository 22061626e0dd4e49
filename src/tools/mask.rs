use std::sync::OnceLock;

use regex::Regex;

fn re(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("static regex"))
}

/// Scrubs emails, card-like digit groups, and phone numbers before
/// anything reaches a log line. Pure function, applied at emission time.
pub fn mask_sensitive(text: &str) -> String {
    static EMAIL: OnceLock<Regex> = OnceLock::new();
    static CARD: OnceLock<Regex> = OnceLock::new();
    static PHONE: OnceLock<Regex> = OnceLock::new();

    let text = re(
        &EMAIL,
        r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}",
    )
    .replace_all(text, "[email]");
    let text = re(&CARD, r"\b\d{4}[-\s]?\d{4}[-\s]?\d{4}[-\s]?\d{4}\b")
        .replace_all(&text, "[card]");
    let text = re(
        &PHONE,
        r"\+\d[\d\s().-]{6,}\d|\b\d{3}[-.\s]\d{3,4}[-.\s]\d{4}\b",
    )
    .replace_all(&text, "[phone]");
    text.into_owned()
}

/// Masked, truncated preview of a tool input for log lines.
pub fn input_preview(value: &serde_json::Value, max_chars: usize) -> String {
    let raw = value.to_string();
    let masked = mask_sensitive(&raw);
    if masked.chars().count() <= max_chars {
        return masked;
    }
    let mut out: String = masked.chars().take(max_chars).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_emails() {
        assert_eq!(
            mask_sensitive("contact alice@example.com please"),
            "contact [email] please"
        );
    }

    #[test]
    fn masks_cards_and_phones() {
        assert_eq!(
            mask_sensitive("card 4111 1111 1111 1111 ok"),
            "card [card] ok"
        );
        assert_eq!(mask_sensitive("call +1 (555) 010-4477 now"), "call [phone] now");
        assert_eq!(mask_sensitive("or 555-010-4477"), "or [phone]");
    }

    #[test]
    fn leaves_uids_alone() {
        let uid = "20240101T123456000001Z";
        assert_eq!(mask_sensitive(uid), uid);
    }

    #[test]
    fn preview_truncates() {
        let value = serde_json::json!({"query": "x".repeat(400)});
        let preview = input_preview(&value, 200);
        assert_eq!(preview.chars().count(), 201);
        assert!(preview.ends_with('…'));
    }
}
