//! Lexical classifier: one blueprint line in, one [`ClassifiedLine`] out.
//!
//! Classification order (first match wins):
//!
//! | Prefix                                   | Kind                 |
//! |------------------------------------------|----------------------|
//! | whitespace only                          | `Blank`              |
//! | `#`, `//`                                | `Comment`            |
//! | `%%`                                     | `Command`            |
//! | `$$`, `let `, `def `, `const `           | `Variable`           |
//! | `@keyword`                               | `Logic`              |
//! | `name[: type] = value`                   | `Variable`           |
//! | anything else                            | `Form`               |

use scaffold_core::types::Permissions;

pub const DEFAULT_TAB_WIDTH: usize = 4;

const ZERO_WIDTH: &[char] = &['\u{feff}', '\u{200b}', '\u{200c}', '\u{200d}', '\u{2060}'];
const TREE_GLYPHS: &[char] = &['│', '├', '└', '─', '┬', '┼', '┃', '┣', '┗', '━', '|'];
const FORM_OPERATORS: &[&str] = &["::", "<<", "+=", "^=", "-=", "~="];

/// Well-known files that carry no extension but are never directories.
const EXTENSIONLESS_FILES: &[&str] = &[
    "Makefile",
    "Dockerfile",
    "LICENSE",
    "README",
    "Procfile",
    "Gemfile",
    "Rakefile",
    "Jenkinsfile",
    "Vagrantfile",
    "CODEOWNERS",
];

// ---------------------------------------------------------------------------
// Line kinds
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Directive {
    If,
    Elif,
    Else,
    EndIf,
    For,
    EndFor,
    Print,
    Warn,
    Error,
}

impl Directive {
    pub const ALL: [Directive; 9] = [
        Directive::If,
        Directive::Elif,
        Directive::Else,
        Directive::EndIf,
        Directive::For,
        Directive::EndFor,
        Directive::Print,
        Directive::Warn,
        Directive::Error,
    ];

    pub fn keyword(self) -> &'static str {
        match self {
            Directive::If => "if",
            Directive::Elif => "elif",
            Directive::Else => "else",
            Directive::EndIf => "endif",
            Directive::For => "for",
            Directive::EndFor => "endfor",
            Directive::Print => "print",
            Directive::Warn => "warn",
            Directive::Error => "error",
        }
    }

    pub fn from_keyword(keyword: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|d| d.keyword() == keyword)
    }

    /// `elif`, `else`, `endif`, `endfor`: lines that close a sibling frame.
    pub fn is_closer(self) -> bool {
        matches!(
            self,
            Directive::Elif | Directive::Else | Directive::EndIf | Directive::EndFor
        )
    }

    /// Directives whose following lines form a body.
    pub fn opens_block(self) -> bool {
        matches!(
            self,
            Directive::If | Directive::Elif | Directive::Else | Directive::For
        )
    }

    pub fn requires_argument(self) -> bool {
        matches!(self, Directive::If | Directive::Elif | Directive::For)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicLine {
    pub directive: Directive,
    pub argument: Option<String>,
    /// `@if cond -> path :: content` carries its single child form here.
    pub inline_form: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandLine {
    /// `%% post-run` (block follows) or `%% post-run <command>`.
    PostRun { inline: Option<String> },
    /// `%% on-undo` marker; only meaningful inside a post-run block.
    OnUndo,
    Unknown { hook: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableLine {
    pub name: String,
    pub type_hint: Option<String>,
    /// `None` when the value is the indented block that follows (`$$ name:`).
    pub value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentValue {
    Inline(String),
    /// Opening `"""`/`'''` without a close on the same line.
    Block {
        delimiter: &'static str,
        head: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    Append,
    Prepend,
    Subtract,
    Rewrite,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormModifier {
    None,
    Content(ContentValue),
    Seed(String),
    Mutation(MutationKind, ContentValue),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormLine {
    /// Cleaned path with any trailing `/` or `:` removed.
    pub path: String,
    pub trailing_slash: bool,
    /// Path ended with `:`, so the indented block below is file content.
    pub block_marker: bool,
    pub modifier: FormModifier,
    pub permissions: Option<Permissions>,
}

impl FormLine {
    /// Whether the last path segment names a file rather than a directory.
    pub fn looks_like_file(&self) -> bool {
        let name = self.path.rsplit('/').next().unwrap_or(&self.path);
        if EXTENSIONLESS_FILES.contains(&name) {
            return true;
        }
        match name.rfind('.') {
            Some(0) => name.len() > 1,
            Some(idx) => idx + 1 < name.len(),
            None => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineKind {
    Blank,
    Comment,
    Command(CommandLine),
    Variable(VariableLine),
    Logic(LogicLine),
    UnknownDirective {
        keyword: String,
        suggestion: Option<&'static str>,
    },
    Form(FormLine),
    Malformed {
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedLine {
    /// 1-based source line.
    pub number: usize,
    pub indent: usize,
    /// Line text with indentation and trailing whitespace removed.
    pub text: String,
    pub kind: LineKind,
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Remove BOMs and zero-width characters that would otherwise skew indentation.
pub fn clean(raw: &str) -> String {
    raw.chars().filter(|c| !ZERO_WIDTH.contains(c)).collect()
}

/// Visual indent of `line`: spaces count 1, tabs advance to the next multiple
/// of `tab_width`.
pub fn measure_indent(line: &str, tab_width: usize) -> usize {
    let tab_width = tab_width.max(1);
    let mut width = 0;
    for ch in line.chars() {
        match ch {
            ' ' => width += 1,
            '\t' => width += tab_width - (width % tab_width),
            _ => break,
        }
    }
    width
}

/// Indent of a structural line: tree glyphs pasted from `tree` output count
/// as one column each, so `├── a.py` nests like `    a.py`.
pub fn structural_indent(line: &str, tab_width: usize) -> usize {
    let tab_width = tab_width.max(1);
    let mut width = 0;
    for ch in line.chars() {
        match ch {
            '\t' => width += tab_width - (width % tab_width),
            c if c == ' ' || c == '\u{a0}' || TREE_GLYPHS.contains(&c) => width += 1,
            _ => break,
        }
    }
    width
}

pub fn classify(raw: &str, number: usize, tab_width: usize) -> ClassifiedLine {
    let cleaned = clean(raw);
    let indent = structural_indent(&cleaned, tab_width);
    let text = cleaned.trim().to_string();
    let kind = classify_text(&text);
    ClassifiedLine {
        number,
        indent,
        text,
        kind,
    }
}

fn classify_text(text: &str) -> LineKind {
    if text.is_empty() {
        return LineKind::Blank;
    }
    if text.starts_with('#') || text.starts_with("//") {
        return LineKind::Comment;
    }
    if let Some(rest) = text.strip_prefix("%%") {
        return classify_command(rest.trim());
    }
    for prefix in ["$$", "let ", "def ", "const "] {
        if let Some(rest) = text.strip_prefix(prefix) {
            return match parse_variable(rest.trim()) {
                Ok(var) => LineKind::Variable(var),
                Err(reason) => LineKind::Malformed { reason },
            };
        }
    }
    if let Some(rest) = text.strip_prefix('@') {
        if let Some(kind) = classify_directive(rest) {
            return kind;
        }
    }
    if is_bare_assignment(text) {
        return match parse_variable(text) {
            Ok(var) => LineKind::Variable(var),
            Err(reason) => LineKind::Malformed { reason },
        };
    }
    match parse_form(text) {
        Ok(form) => LineKind::Form(form),
        Err(reason) => LineKind::Malformed { reason },
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

fn classify_command(rest: &str) -> LineKind {
    let (hook, tail) = match rest.split_once(char::is_whitespace) {
        Some((hook, tail)) => (hook, tail.trim()),
        None => (rest, ""),
    };
    let hook = hook.trim_end_matches(':');
    let command = match hook.to_ascii_lowercase().as_str() {
        "post-run" | "post_run" | "postrun" => CommandLine::PostRun {
            inline: (!tail.is_empty()).then(|| tail.to_string()),
        },
        "on-undo" | "on_undo" => CommandLine::OnUndo,
        _ => CommandLine::Unknown {
            hook: hook.to_string(),
        },
    };
    LineKind::Command(command)
}

// ---------------------------------------------------------------------------
// Variables
// ---------------------------------------------------------------------------

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// `name = value` or `name: type = value` where `=` is not part of `==`
/// and the type hint does not start a `::` content operator.
fn is_bare_assignment(text: &str) -> bool {
    let name_end = text
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(text.len());
    if !is_identifier(&text[..name_end]) {
        return false;
    }
    let mut rest = text[name_end..].trim_start();
    if let Some(typed) = rest.strip_prefix(':') {
        if typed.starts_with(':') {
            return false;
        }
        match typed.find('=') {
            Some(eq) if !typed[..eq].trim().is_empty() => rest = &typed[eq..],
            _ => return false,
        }
    }
    rest.starts_with('=') && !rest.starts_with("==")
}

fn parse_variable(rest: &str) -> Result<VariableLine, String> {
    let (lhs, value) = match rest.split_once('=') {
        Some((lhs, rhs)) => (lhs.trim(), Some(unquote(rhs.trim()))),
        None => match rest.strip_suffix(':') {
            Some(lhs) => (lhs.trim(), None),
            None => {
                return Err(format!(
                    "variable definition '{rest}' needs '= value' or a trailing ':' block"
                ))
            }
        },
    };
    let (name, type_hint) = match lhs.split_once(':') {
        Some((name, hint)) => (name.trim(), Some(hint.trim().to_string())),
        None => (lhs, None),
    };
    if !is_identifier(name) {
        return Err(format!("'{name}' is not a valid variable name"));
    }
    Ok(VariableLine {
        name: name.to_string(),
        type_hint: type_hint.filter(|h| !h.is_empty()),
        value,
    })
}

// ---------------------------------------------------------------------------
// Directives
// ---------------------------------------------------------------------------

/// `None` means the `@` did not introduce a directive (e.g. `@types/node/`).
fn classify_directive(rest: &str) -> Option<LineKind> {
    let keyword_end = rest
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '-'))
        .unwrap_or(rest.len());
    let keyword = &rest[..keyword_end];
    let after = &rest[keyword_end..];
    if keyword.is_empty() || !(after.is_empty() || after.starts_with([' ', '\t', ':'])) {
        return None;
    }

    let normalized = keyword.to_ascii_lowercase().replace(['_', '-'], "");
    let Some(directive) = Directive::from_keyword(&normalized) else {
        return Some(LineKind::UnknownDirective {
            keyword: keyword.to_string(),
            suggestion: suggest_directive(&normalized),
        });
    };

    let mut argument = after.trim();
    let mut inline_form = None;
    if directive == Directive::If {
        if let Some((cond, form)) = argument.split_once("->") {
            argument = cond.trim();
            inline_form = Some(form.trim().to_string());
        }
    }
    let argument = argument.strip_suffix(':').unwrap_or(argument).trim();
    let argument = strip_braces(argument);

    Some(LineKind::Logic(LogicLine {
        directive,
        argument: (!argument.is_empty()).then(|| argument.to_string()),
        inline_form,
    }))
}

fn strip_braces(s: &str) -> &str {
    match s.strip_prefix("{{").and_then(|s| s.strip_suffix("}}")) {
        Some(inner) => inner.trim(),
        None => s,
    }
}

fn suggest_directive(keyword: &str) -> Option<&'static str> {
    Directive::ALL
        .iter()
        .map(|d| (edit_distance(keyword, d.keyword()), d.keyword()))
        .filter(|(distance, _)| *distance <= 2)
        .min_by_key(|(distance, _)| *distance)
        .map(|(_, kw)| kw)
}

fn edit_distance(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    for (i, ca) in a.chars().enumerate() {
        let mut current = vec![i + 1; b.len() + 1];
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            current[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(current[j] + 1);
        }
        prev = current;
    }
    prev[b.len()]
}

// ---------------------------------------------------------------------------
// Forms
// ---------------------------------------------------------------------------

fn parse_form(text: &str) -> Result<FormLine, String> {
    let (body, permissions) = split_permissions(text);

    let operator = FORM_OPERATORS
        .iter()
        .filter_map(|op| body.find(op).map(|pos| (pos, *op)))
        .min_by_key(|(pos, _)| *pos);
    let (head, modifier) = match operator {
        None => (body, FormModifier::None),
        Some((pos, op)) => {
            let tail = body[pos + op.len()..].trim();
            let modifier = match op {
                "::" => FormModifier::Content(parse_content_value(tail)),
                "<<" => {
                    let seed = unquote(tail);
                    if seed.is_empty() {
                        return Err("'<<' needs a seed path".to_string());
                    }
                    FormModifier::Seed(seed)
                }
                "+=" => FormModifier::Mutation(MutationKind::Append, parse_content_value(tail)),
                "^=" => FormModifier::Mutation(MutationKind::Prepend, parse_content_value(tail)),
                "-=" => FormModifier::Mutation(MutationKind::Subtract, parse_content_value(tail)),
                _ => FormModifier::Mutation(MutationKind::Rewrite, parse_content_value(tail)),
            };
            (&body[..pos], modifier)
        }
    };

    let mut path = clean_path(head);
    if path.contains("%%") {
        return Err(format!("invalid permission suffix in '{text}'"));
    }
    let block_marker = path.ends_with(':');
    if block_marker {
        path.pop();
    }
    let trailing_slash = path.ends_with('/') || path.ends_with('\\');
    let path = path.trim_end_matches(['/', '\\']).to_string();
    if path.is_empty() {
        return Err(format!("form line '{text}' has no path"));
    }

    Ok(FormLine {
        path,
        trailing_slash,
        block_marker,
        modifier,
        permissions,
    })
}

fn split_permissions(text: &str) -> (&str, Option<Permissions>) {
    if let Some((body, token)) = text.rsplit_once("%%") {
        if let Some(perms) = Permissions::parse(token) {
            return (body.trim_end(), Some(perms));
        }
    }
    (text, None)
}

fn clean_path(head: &str) -> String {
    let trimmed = head
        .trim()
        .trim_start_matches(|c: char| TREE_GLYPHS.contains(&c) || c.is_whitespace());
    unquote(trimmed.trim())
}

fn parse_content_value(tail: &str) -> ContentValue {
    for delimiter in ["\"\"\"", "'''"] {
        if let Some(rest) = tail.strip_prefix(delimiter) {
            return match rest.find(delimiter) {
                Some(end) => ContentValue::Inline(rest[..end].to_string()),
                None => ContentValue::Block {
                    delimiter,
                    head: rest.to_string(),
                },
            };
        }
    }
    ContentValue::Inline(unquote(tail))
}

/// Strip one pair of matching quotes; double quotes also honour `\n`, `\t`,
/// `\"` and `\\`.
pub fn unquote(s: &str) -> String {
    let s = s.trim();
    if s.len() >= 2 {
        if let Some(inner) = s.strip_prefix('"').and_then(|s| s.strip_suffix('"')) {
            return unescape(inner);
        }
        if let Some(inner) = s.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')) {
            return inner.to_string();
        }
    }
    s.to_string()
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn kind(text: &str) -> LineKind {
        classify(text, 1, DEFAULT_TAB_WIDTH).kind
    }

    fn form(text: &str) -> FormLine {
        match kind(text) {
            LineKind::Form(form) => form,
            other => panic!("expected form, got {other:?}"),
        }
    }

    #[rstest]
    #[case("    x", 4)]
    #[case("\tx", 4)]
    #[case("  \tx", 4)]
    #[case("    \tx", 8)]
    #[case("\u{feff}  x", 2)]
    #[case("│   └── x", 8)]
    #[case("x", 0)]
    fn indent_normalizes_tabs(#[case] line: &str, #[case] expected: usize) {
        assert_eq!(classify(line, 1, 4).indent, expected);
    }

    #[rstest]
    #[case("", LineKind::Blank)]
    #[case("   ", LineKind::Blank)]
    #[case("# a comment", LineKind::Comment)]
    #[case("// also a comment", LineKind::Comment)]
    fn trivial_kinds(#[case] text: &str, #[case] expected: LineKind) {
        assert_eq!(kind(text), expected);
    }

    #[test]
    fn variables_in_all_spellings() {
        for text in [
            "$$ name = \"demo\"",
            "let name = demo",
            "const name = 'demo'",
            "name = demo",
        ] {
            match kind(text) {
                LineKind::Variable(v) => {
                    assert_eq!(v.name, "name", "{text}");
                    assert_eq!(v.value.as_deref(), Some("demo"), "{text}");
                }
                other => panic!("{text}: {other:?}"),
            }
        }
    }

    #[test]
    fn typed_and_block_variables() {
        match kind("$$ port: int = 8080") {
            LineKind::Variable(v) => {
                assert_eq!(v.type_hint.as_deref(), Some("int"));
                assert_eq!(v.value.as_deref(), Some("8080"));
            }
            other => panic!("{other:?}"),
        }
        match kind("$$ banner:") {
            LineKind::Variable(v) => assert!(v.value.is_none()),
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn content_with_equals_is_not_an_assignment() {
        let f = form("Makefile :: CC=gcc");
        assert_eq!(f.path, "Makefile");
        assert_eq!(
            f.modifier,
            FormModifier::Content(ContentValue::Inline("CC=gcc".to_string()))
        );
    }

    #[test]
    fn directives_strip_colon_and_braces() {
        match kind("@if {{ use_docker }}:") {
            LineKind::Logic(l) => {
                assert_eq!(l.directive, Directive::If);
                assert_eq!(l.argument.as_deref(), Some("use_docker"));
            }
            other => panic!("{other:?}"),
        }
        match kind("@endif") {
            LineKind::Logic(l) => {
                assert_eq!(l.directive, Directive::EndIf);
                assert!(l.argument.is_none());
            }
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn inline_if_carries_its_form() {
        match kind("@if docker -> Dockerfile :: FROM python") {
            LineKind::Logic(l) => {
                assert_eq!(l.argument.as_deref(), Some("docker"));
                assert_eq!(l.inline_form.as_deref(), Some("Dockerfile :: FROM python"));
            }
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn unknown_directive_suggests_nearest() {
        assert_eq!(
            kind("@elsif x"),
            LineKind::UnknownDirective {
                keyword: "elsif".to_string(),
                suggestion: Some("elif"),
            }
        );
        assert!(matches!(
            kind("@frobnicate"),
            LineKind::UnknownDirective {
                suggestion: None,
                ..
            }
        ));
    }

    #[test]
    fn scoped_package_dir_is_a_form() {
        let f = form("@types/node/");
        assert_eq!(f.path, "@types/node");
        assert!(f.trailing_slash);
    }

    #[test]
    fn post_run_headers() {
        assert_eq!(
            kind("%% post-run"),
            LineKind::Command(CommandLine::PostRun { inline: None })
        );
        assert_eq!(
            kind("%% post-run git init"),
            LineKind::Command(CommandLine::PostRun {
                inline: Some("git init".to_string())
            })
        );
        assert_eq!(kind("%% on-undo"), LineKind::Command(CommandLine::OnUndo));
    }

    #[test]
    fn form_operators() {
        let f = form("src/main.py :: \"print(1)\"");
        assert_eq!(f.path, "src/main.py");
        assert_eq!(
            f.modifier,
            FormModifier::Content(ContentValue::Inline("print(1)".to_string()))
        );

        let f = form("src/app.py << src/main.py");
        assert_eq!(f.modifier, FormModifier::Seed("src/main.py".to_string()));

        let f = form("notes.txt += \"- item\"");
        assert_eq!(
            f.modifier,
            FormModifier::Mutation(
                MutationKind::Append,
                ContentValue::Inline("- item".to_string())
            )
        );

        let f = form("config.ini ~= debug=true => debug=false");
        assert!(matches!(
            f.modifier,
            FormModifier::Mutation(MutationKind::Rewrite, _)
        ));
    }

    #[test]
    fn triple_quote_opens_or_closes_on_same_line() {
        let f = form("README.md :: \"\"\"");
        assert_eq!(
            f.modifier,
            FormModifier::Content(ContentValue::Block {
                delimiter: "\"\"\"",
                head: String::new()
            })
        );
        let f = form("one.txt :: \"\"\"single\"\"\"");
        assert_eq!(
            f.modifier,
            FormModifier::Content(ContentValue::Inline("single".to_string()))
        );
    }

    #[test]
    fn permissions_suffix_and_tree_glyphs() {
        let f = form("├── run.sh :: \"echo hi\" %% 755");
        assert_eq!(f.path, "run.sh");
        assert_eq!(f.permissions, Some(Permissions(0o755)));

        let f = form("deploy.sh %% executable");
        assert_eq!(f.permissions, Some(Permissions(0o755)));

        assert!(matches!(kind("bad.sh %% 999"), LineKind::Malformed { .. }));
    }

    #[rstest]
    #[case("main.py", true)]
    #[case(".gitignore", true)]
    #[case("Makefile", true)]
    #[case("src", false)]
    #[case("v1.", false)]
    fn file_detection(#[case] path: &str, #[case] is_file: bool) {
        assert_eq!(form(path).looks_like_file(), is_file);
    }

    #[test]
    fn block_marker_strips_colon() {
        let f = form("setup.cfg:");
        assert!(f.block_marker);
        assert_eq!(f.path, "setup.cfg");
    }
}
