use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use time::OffsetDateTime;

use crate::error::{Error, Result};
use crate::uid::{generate_uid, is_uid};
use crate::utils::{format_rfc3339, now_utc, parse_rfc3339};

pub const DEFAULT_TITLE: &str = "Untitled";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    Projects,
    Areas,
    Resources,
    Archives,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Projects,
        Category::Areas,
        Category::Resources,
        Category::Archives,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Projects => "Projects",
            Category::Areas => "Areas",
            Category::Resources => "Resources",
            Category::Archives => "Archives",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "Projects" => Some(Category::Projects),
            "Areas" => Some(Category::Areas),
            "Resources" => Some(Category::Resources),
            "Archives" => Some(Category::Archives),
            _ => None,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Default for Category {
    fn default() -> Self {
        Category::Resources
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseMode {
    /// Missing or malformed headers get a synthesized default; unknown
    /// scalar fields are preserved as opaque extras.
    Lenient,
    /// Malformed headers and unknown fields are rejected.
    Strict,
}

/// The `---`-fenced metadata block prefixing a note body.
#[derive(Debug, Clone, PartialEq)]
pub struct NoteHeader {
    pub id: String,
    pub title: String,
    pub category: Category,
    /// Set semantics; insertion order retained for display.
    pub tags: Vec<String>,
    pub project: Option<String>,
    pub created: OffsetDateTime,
    pub updated: OffsetDateTime,
    /// Target UIDs, excluding self.
    pub links: Vec<String>,
    /// Unknown fields carried through lenient parses.
    pub extra: BTreeMap<String, Value>,
}

impl NoteHeader {
    pub fn new(title: &str, category: Category) -> Self {
        let now = now_utc();
        Self {
            id: generate_uid(),
            title: title.to_string(),
            category,
            tags: Vec::new(),
            project: None,
            created: now,
            updated: now,
            links: Vec::new(),
            extra: BTreeMap::new(),
        }
    }

    fn synthesized() -> Self {
        Self::new(DEFAULT_TITLE, Category::Resources)
    }

    /// UID present and well-formed, title non-empty, tags non-empty
    /// strings, project non-empty when set, no self-link, created ≤ updated.
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(Error::Parse("header is missing an id".to_string()));
        }
        if !is_uid(&self.id) {
            return Err(Error::Parse(format!("malformed uid '{}'", self.id)));
        }
        if self.title.trim().is_empty() {
            return Err(Error::Parse("title must not be empty".to_string()));
        }
        if self.tags.iter().any(|t| t.trim().is_empty()) {
            return Err(Error::Parse("tags must be non-empty strings".to_string()));
        }
        if self
            .project
            .as_deref()
            .is_some_and(|p| p.trim().is_empty())
        {
            return Err(Error::Parse("project must not be blank".to_string()));
        }
        if self.links.iter().any(|l| l == &self.id) {
            return Err(Error::Parse("links must not include the note itself".to_string()));
        }
        if self.created > self.updated {
            return Err(Error::Parse("created must not be after updated".to_string()));
        }
        Ok(())
    }

    pub fn touch(&mut self) {
        self.updated = now_utc();
        if self.created > self.updated {
            self.updated = self.created;
        }
    }
}

const HEADER_KEYS: [&str; 8] = [
    "id", "title", "category", "tags", "project", "created", "updated", "links",
];

fn is_fence(line: &str) -> bool {
    line.trim_end_matches(|c| c == '\n' || c == '\r') == "---"
}

/// Splits a leading `---` fence off the document by scanning lines: the
/// opening fence must be the very first line, and the header runs to the
/// next line that is exactly `---` (CRLF tolerated). The body is
/// everything after that line, byte for byte; without a closing fence
/// the whole document is body.
pub fn split_header(text: &str) -> (Option<&str>, &str) {
    let mut lines = text.split_inclusive('\n');
    match lines.next() {
        Some(first) if first.ends_with('\n') && is_fence(first) => {}
        _ => return (None, text),
    }

    let yaml_start = text.find('\n').map_or(text.len(), |i| i + 1);
    let mut cursor = yaml_start;
    for line in lines {
        if is_fence(line) {
            let body_start = cursor + line.len();
            return (Some(&text[yaml_start..cursor]), &text[body_start..]);
        }
        cursor += line.len();
    }
    (None, text)
}

fn yaml_key(name: &str) -> Value {
    Value::from(name)
}

fn get_string(mapping: &Mapping, field: &str) -> Option<String> {
    match mapping.get(yaml_key(field))? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    }
}

fn get_string_seq(mapping: &Mapping, field: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    if let Some(Value::Sequence(seq)) = mapping.get(yaml_key(field)) {
        for item in seq {
            if let Value::String(s) = item {
                let s = s.trim();
                if !s.is_empty() && !out.iter().any(|existing| existing == s) {
                    out.push(s.to_string());
                }
            }
        }
    }
    out
}

fn header_from_mapping(mapping: Mapping, mode: ParseMode) -> Result<NoteHeader> {
    let strict = mode == ParseMode::Strict;

    let id = match get_string(&mapping, "id") {
        Some(id) if is_uid(&id) => id,
        Some(id) if strict => return Err(Error::Parse(format!("malformed uid '{id}'"))),
        None if strict => return Err(Error::Parse("header is missing an id".to_string())),
        _ => generate_uid(),
    };

    let title = match get_string(&mapping, "title") {
        Some(t) => t,
        None if strict => return Err(Error::Parse("title must not be empty".to_string())),
        None => DEFAULT_TITLE.to_string(),
    };

    let category = match mapping.get(yaml_key("category")) {
        Some(Value::String(raw)) => match Category::parse(raw) {
            Some(c) => c,
            None if strict => {
                return Err(Error::Parse(format!("unknown category '{raw}'")))
            }
            None => Category::default(),
        },
        Some(_) if strict => return Err(Error::Parse("category must be a string".to_string())),
        _ => Category::default(),
    };

    let tags = get_string_seq(&mapping, "tags");
    let project = get_string(&mapping, "project");

    let now = now_utc();
    let created = get_string(&mapping, "created")
        .and_then(|s| parse_rfc3339(&s))
        .unwrap_or(now);
    let mut updated = get_string(&mapping, "updated")
        .and_then(|s| parse_rfc3339(&s))
        .unwrap_or(now);
    if created > updated {
        updated = created;
    }

    let links: Vec<String> = get_string_seq(&mapping, "links")
        .into_iter()
        .filter(|l| l != &id)
        .collect();

    let mut extra = BTreeMap::new();
    for (k, v) in mapping {
        let Value::String(name) = k else { continue };
        if HEADER_KEYS.contains(&name.as_str()) {
            continue;
        }
        if strict {
            return Err(Error::Parse(format!("unknown header field '{name}'")));
        }
        extra.insert(name, v);
    }

    Ok(NoteHeader {
        id,
        title,
        category,
        tags,
        project,
        created,
        updated,
        links,
        extra,
    })
}

/// Parses a document into `(header, body)`. The body is returned exactly
/// as found; a missing or malformed header synthesizes a default in
/// lenient mode and fails `ParseError` in strict mode.
pub fn parse_note(text: &str, mode: ParseMode) -> Result<(NoteHeader, String)> {
    let (yaml, body) = split_header(text);

    let Some(yaml) = yaml else {
        return match mode {
            ParseMode::Lenient => Ok((NoteHeader::synthesized(), body.to_string())),
            ParseMode::Strict => Err(Error::Parse("document has no header".to_string())),
        };
    };

    let mapping: Mapping = if yaml.trim().is_empty() {
        Mapping::new()
    } else {
        match serde_yaml::from_str(yaml) {
            Ok(m) => m,
            Err(e) => {
                return match mode {
                    ParseMode::Lenient => Ok((NoteHeader::synthesized(), body.to_string())),
                    ParseMode::Strict => Err(Error::Parse(format!("bad header yaml: {e}"))),
                }
            }
        }
    };

    let header = header_from_mapping(mapping, mode)?;
    Ok((header, body.to_string()))
}

/// Serializes with the stable key order `id, title, category, tags,
/// project, created, updated, links`, extras after. `project` is omitted
/// when unset. The body is appended byte-for-byte after the closing fence.
pub fn serialize_note(header: &NoteHeader, body: &str) -> String {
    let mut mapping = Mapping::new();
    mapping.insert(yaml_key("id"), Value::String(header.id.clone()));
    mapping.insert(yaml_key("title"), Value::String(header.title.clone()));
    mapping.insert(
        yaml_key("category"),
        Value::String(header.category.as_str().to_string()),
    );
    mapping.insert(
        yaml_key("tags"),
        Value::Sequence(header.tags.iter().cloned().map(Value::String).collect()),
    );
    if let Some(project) = &header.project {
        mapping.insert(yaml_key("project"), Value::String(project.clone()));
    }
    mapping.insert(
        yaml_key("created"),
        Value::String(format_rfc3339(header.created)),
    );
    mapping.insert(
        yaml_key("updated"),
        Value::String(format_rfc3339(header.updated)),
    );
    mapping.insert(
        yaml_key("links"),
        Value::Sequence(header.links.iter().cloned().map(Value::String).collect()),
    );
    for (name, value) in &header.extra {
        mapping.insert(yaml_key(name), value.clone());
    }

    let yaml = serde_yaml::to_string(&mapping).unwrap_or_default();
    format!("---\n{yaml}---\n{body}")
}
