//! Domain types shared by the blueprint compiler and the sync engine.
//!
//! Relative paths inside a project are carried as `String` with forward
//! slashes; they double as Chronicle keys and must compare byte-for-byte.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Permissions
// ---------------------------------------------------------------------------

/// Unix permission bits for a planned entry, serialized as an octal string
/// such as `"755"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Permissions(pub u32);

impl Permissions {
    /// Parse an octal mode (`"755"`, `"0644"`) or one of the named presets.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if let Some(named) = Self::named(raw) {
            return Some(named);
        }
        if raw.is_empty() || raw.len() > 4 || !raw.chars().all(|c| ('0'..='7').contains(&c)) {
            return None;
        }
        u32::from_str_radix(raw, 8).ok().map(Self)
    }

    /// Named presets accepted after `%%` on a form line.
    pub fn named(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "executable" | "exec" | "bin" | "script" => Some(Self(0o755)),
            "readonly" => Some(Self(0o444)),
            "secret" | "private" => Some(Self(0o600)),
            "public" => Some(Self(0o644)),
            _ => None,
        }
    }

    pub fn mode(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03o}", self.0)
    }
}

impl TryFrom<String> for Permissions {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| format!("invalid permission mode '{value}'"))
    }
}

impl From<Permissions> for String {
    fn from(p: Permissions) -> Self {
        p.to_string()
    }
}

// ---------------------------------------------------------------------------
// Planned entries
// ---------------------------------------------------------------------------

/// How a planned file relates to whatever is already on disk.
///
/// For every variant other than `None` the entry's `content` holds the
/// fragment (append/prepend) or the regex pattern (subtract/rewrite).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum MutationOp {
    #[default]
    None,
    Append,
    Prepend,
    Subtract,
    Rewrite { replacement: String },
}

impl MutationOp {
    pub fn is_none(&self) -> bool {
        matches!(self, MutationOp::None)
    }
}

/// One resolved file or directory the blueprint intends to exist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedEntry {
    pub path: String,
    pub is_dir: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permissions: Option<Permissions>,
    pub line: usize,
    #[serde(default, skip_serializing_if = "MutationOp::is_none")]
    pub mutation: MutationOp,
}

impl PlannedEntry {
    pub fn dir(path: impl Into<String>, line: usize) -> Self {
        Self {
            path: path.into(),
            is_dir: true,
            content: None,
            seed: None,
            permissions: None,
            line,
            mutation: MutationOp::None,
        }
    }

    pub fn file(path: impl Into<String>, content: impl Into<String>, line: usize) -> Self {
        Self {
            path: path.into(),
            is_dir: false,
            content: Some(content.into()),
            seed: None,
            permissions: None,
            line,
            mutation: MutationOp::None,
        }
    }
}

/// An orchestration command that survived visibility filtering.
///
/// The core never executes these; they are handed to the caller in
/// document order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedCommand {
    pub line: usize,
    pub command: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub undo: Vec<String>,
}

// ---------------------------------------------------------------------------
// Diagnostics
// ---------------------------------------------------------------------------

/// Severity grading for diagnostics and write failures.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    #[default]
    Error,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "info" => Ok(Severity::Info),
            "warning" | "warn" => Ok(Severity::Warning),
            "error" => Ok(Severity::Error),
            "critical" | "fatal" => Ok(Severity::Critical),
            other => Err(format!(
                "unknown severity '{other}'; expected: info, warning, error, critical"
            )),
        }
    }
}

/// Machine-readable category of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticCode {
    /// Malformed form or variable syntax.
    Syntax,
    UnknownDirective,
    MissingCondition,
    OrphanCloser,
    UnclosedBlock,
    /// Indentation the block stack cannot place.
    Indentation,
    /// A condition or loop expression failed to evaluate.
    LogicFault,
    Template,
    Collision,
    UnsafePath,
    RecursionLimit,
    /// Emitted by `@print` / `@warn` / `@error`.
    Message,
}

impl fmt::Display for DiagnosticCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DiagnosticCode::Syntax => "syntax",
            DiagnosticCode::UnknownDirective => "unknown-directive",
            DiagnosticCode::MissingCondition => "missing-condition",
            DiagnosticCode::OrphanCloser => "orphan-closer",
            DiagnosticCode::UnclosedBlock => "unclosed-block",
            DiagnosticCode::Indentation => "indentation",
            DiagnosticCode::LogicFault => "logic-fault",
            DiagnosticCode::Template => "template",
            DiagnosticCode::Collision => "collision",
            DiagnosticCode::UnsafePath => "unsafe-path",
            DiagnosticCode::RecursionLimit => "recursion-limit",
            DiagnosticCode::Message => "message",
        };
        f.write_str(s)
    }
}

/// A compile- or resolve-time finding tied to a blueprint line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub line: usize,
    pub severity: Severity,
    pub code: DiagnosticCode,
    pub message: String,
}

impl Diagnostic {
    pub fn new(
        line: usize,
        severity: Severity,
        code: DiagnosticCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            line,
            severity,
            code,
            message: message.into(),
        }
    }

    pub fn warning(line: usize, code: DiagnosticCode, message: impl Into<String>) -> Self {
        Self::new(line, Severity::Warning, code, message)
    }

    pub fn error(line: usize, code: DiagnosticCode, message: impl Into<String>) -> Self {
        Self::new(line, Severity::Error, code, message)
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "line {}: {} [{}] {}",
            self.line, self.severity, self.code, self.message
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permissions_parse_octal_and_named() {
        assert_eq!(Permissions::parse("755"), Some(Permissions(0o755)));
        assert_eq!(Permissions::parse("0600"), Some(Permissions(0o600)));
        assert_eq!(Permissions::parse("executable"), Some(Permissions(0o755)));
        assert_eq!(Permissions::parse("readonly"), Some(Permissions(0o444)));
        assert_eq!(Permissions::parse("secret"), Some(Permissions(0o600)));
        assert_eq!(Permissions::parse("798"), None);
        assert_eq!(Permissions::parse(""), None);
    }

    #[test]
    fn permissions_serialize_as_octal_string() {
        let json = serde_json::to_string(&Permissions(0o644)).unwrap();
        assert_eq!(json, "\"644\"");
        let back: Permissions = serde_json::from_str("\"755\"").unwrap();
        assert_eq!(back, Permissions(0o755));
    }

    #[test]
    fn severity_orders_from_info_to_critical() {
        assert!(Severity::Info < Severity::Warning);
        assert!(Severity::Warning < Severity::Error);
        assert!(Severity::Error < Severity::Critical);
        assert_eq!("warn".parse::<Severity>().unwrap(), Severity::Warning);
        assert!("loud".parse::<Severity>().is_err());
    }

    #[test]
    fn planned_entry_omits_default_mutation_in_json() {
        let entry = PlannedEntry::file("src/main.py", "print(1)", 2);
        let json = serde_json::to_string(&entry).unwrap();
        assert!(!json.contains("mutation"));

        let mut appended = entry.clone();
        appended.mutation = MutationOp::Append;
        let json = serde_json::to_string(&appended).unwrap();
        assert!(json.contains(r#""mutation":{"op":"append"}"#));
    }

    #[test]
    fn diagnostic_display_includes_line_and_code() {
        let d = Diagnostic::error(7, DiagnosticCode::OrphanCloser, "@endif without @if");
        assert_eq!(d.to_string(), "line 7: error [orphan-closer] @endif without @if");
    }
}
