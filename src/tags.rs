//! Header-cell tag grammar.
//!
//! A header cell has the form `<name>(@<tag>)*`. Tags are unordered and
//! matched case-insensitively:
//!
//! - `PM` excludes the column from every generated target and wins over any
//!   other scope tag.
//! - `Client`, `Server`, `All` select the generation scope (default `All`).
//! - `Lan` / `Localization` mark the column for localization extraction.
//! - `Ref` / `Reference` / `ref_<type>` / `Ref(<type>)` mark a cross-table
//!   reference.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Diagnostic, DiagnosticCode};

const FIELD_PREFIX: &str = "Field_";
const REFERENCE_ID_SUFFIXES: &[&str] = &["_id", "_ID", "Id", "ID"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum GenerationScope {
    /// Excluded from all code generation (`@PM`).
    None,
    ClientOnly,
    ServerOnly,
    #[default]
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CodeTarget {
    Client,
    Server,
}

impl CodeTarget {
    pub const ALL: [CodeTarget; 2] = [CodeTarget::Client, CodeTarget::Server];

    pub fn as_str(self) -> &'static str {
        match self {
            CodeTarget::Client => "client",
            CodeTarget::Server => "server",
        }
    }
}

impl GenerationScope {
    pub fn is_excluded(self) -> bool {
        self == GenerationScope::None
    }

    pub fn includes(self, target: CodeTarget) -> bool {
        match self {
            GenerationScope::None => false,
            GenerationScope::All => true,
            GenerationScope::ClientOnly => target == CodeTarget::Client,
            GenerationScope::ServerOnly => target == CodeTarget::Server,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            GenerationScope::None => "none",
            GenerationScope::ClientOnly => "client",
            GenerationScope::ServerOnly => "server",
            GenerationScope::All => "all",
        }
    }
}

impl fmt::Display for GenerationScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference marker found on a header. `target` is `None` only when no type
/// name could be derived, in which case a diagnostic is attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceTag {
    pub target: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderTags {
    pub raw: String,
    pub name: String,
    pub scope: GenerationScope,
    pub localized: bool,
    pub reference: Option<ReferenceTag>,
    pub diagnostics: Vec<Diagnostic>,
}

impl HeaderTags {
    pub fn is_empty(&self) -> bool {
        self.name.is_empty()
    }

    pub fn reference_target(&self) -> Option<&str> {
        self.reference.as_ref().and_then(|r| r.target.as_deref())
    }
}

enum Tag {
    Pm,
    Scope(GenerationScope),
    Localized,
    Reference(Option<String>),
    Unknown,
}

fn classify_tag(tag: &str) -> Tag {
    let lowered = tag.to_ascii_lowercase();
    match lowered.as_str() {
        "pm" => return Tag::Pm,
        "client" => return Tag::Scope(GenerationScope::ClientOnly),
        "server" => return Tag::Scope(GenerationScope::ServerOnly),
        "all" => return Tag::Scope(GenerationScope::All),
        "lan" | "localization" => return Tag::Localized,
        "ref" | "reference" => return Tag::Reference(None),
        _ => {}
    }
    if lowered.starts_with("ref_") {
        let target = tag["ref_".len()..].trim();
        return Tag::Reference((!target.is_empty()).then(|| target.to_string()));
    }
    if let Some((head, inner)) = split_parenthetical(tag)
        && matches!(head.to_ascii_lowercase().as_str(), "ref" | "reference")
    {
        return Tag::Reference((!inner.is_empty()).then(|| inner.to_string()));
    }
    Tag::Unknown
}

/// Splits `Head(inner)` into `("Head", "inner")`.
fn split_parenthetical(text: &str) -> Option<(&str, &str)> {
    let trimmed = text.trim();
    let open = trimmed.find('(')?;
    let inner = trimmed[open + 1..].strip_suffix(')')?;
    Some((trimmed[..open].trim(), inner.trim()))
}

/// Replaces characters that are not identifier-safe and guards against a
/// leading digit.
pub fn sanitize_name(raw: &str) -> String {
    let cleaned = raw
        .trim()
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '_' => c,
            _ => '_',
        })
        .collect::<String>();
    if cleaned.starts_with(|c: char| c.is_ascii_digit()) {
        format!("{FIELD_PREFIX}{cleaned}")
    } else {
        cleaned
    }
}

fn derive_reference_target(name: &str) -> Option<String> {
    REFERENCE_ID_SUFFIXES
        .iter()
        .find_map(|suffix| name.strip_suffix(suffix))
        .map(|stem| stem.trim_end_matches('_'))
        .filter(|stem| !stem.is_empty())
        .map(str::to_string)
}

pub fn parse_header(cell: &str) -> HeaderTags {
    let raw = cell.trim();
    let mut parts = raw.split('@');
    let name_part = parts.next().unwrap_or_default().trim();

    let mut diagnostics = Vec::new();
    let mut excluded = false;
    let mut scopes = Vec::new();
    let mut localized = false;
    let mut reference: Option<ReferenceTag> = None;

    for tag in parts.map(str::trim).filter(|t| !t.is_empty()) {
        match classify_tag(tag) {
            Tag::Pm => excluded = true,
            Tag::Scope(scope) => scopes.push(scope),
            Tag::Localized => localized = true,
            Tag::Reference(explicit) => {
                let previous = reference.take().and_then(|r| r.target);
                reference = Some(ReferenceTag {
                    target: explicit.or(previous),
                });
            }
            Tag::Unknown => diagnostics.push(Diagnostic::warning(
                DiagnosticCode::UnknownTag,
                format!("Unknown tag '@{tag}' on header '{raw}' ignored"),
            )),
        }
    }

    let mut distinct = scopes.clone();
    distinct.dedup();
    if distinct.len() > 1 {
        diagnostics.push(Diagnostic::warning(
            DiagnosticCode::ConflictingScopeTags,
            format!(
                "Header '{raw}' combines conflicting scope tags; using the last one ({})",
                scopes.last().copied().unwrap_or_default()
            ),
        ));
    }

    // `Name(Target)` only names a target on reference headers; elsewhere the
    // parenthetical is part of the name.
    let (name_text, parenthetical) = match split_parenthetical(name_part) {
        Some((head, inner)) if reference.is_some() => {
            (head, (!inner.is_empty()).then(|| inner.to_string()))
        }
        _ => (name_part, None),
    };
    let name = if name_text.is_empty() {
        String::new()
    } else {
        sanitize_name(name_text)
    };

    let scope = if excluded {
        GenerationScope::None
    } else {
        scopes.last().copied().unwrap_or_default()
    };

    if let Some(tag) = reference.as_mut()
        && tag.target.is_none()
    {
        tag.target = parenthetical.or_else(|| derive_reference_target(&name));
        if tag.target.is_none() {
            diagnostics.push(Diagnostic::warning(
                DiagnosticCode::MissingReferenceTarget,
                format!(
                    "Reference header '{raw}' does not name a target type; treating it as a plain field"
                ),
            ));
        }
    }

    HeaderTags {
        raw: raw.to_string(),
        name,
        scope,
        localized,
        reference,
        diagnostics,
    }
}
