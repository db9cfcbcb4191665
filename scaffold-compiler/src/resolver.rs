//! Logic resolver: walks the AST under the variable context and flattens it
//! into the planned entries and commands one run will act on.
//!
//! Conditional chains follow a three-state machine per sibling list:
//! `@if` resets the chain to `Pending`, the first true branch moves it to
//! `Entered`, and `@else` or `@endif` close it. A condition fault only hides
//! its own branch; the chain stays `Pending` so a later `@elif`/`@else` can
//! still be taken.

use std::collections::BTreeSet;

use serde_json::{Map, Value};

use scaffold_core::paths;
use scaffold_core::types::{
    Diagnostic, DiagnosticCode, MutationOp, PlannedEntry, ResolvedCommand, Severity,
};

use crate::ast::{EntryTemplate, LogicNode, NodeId, NodeKind};
use crate::context::{coerce, parse_scalar, VariableContext};
use crate::engine::TemplateEngine;
use crate::lexer::Directive;
use crate::parser::ParsedBlueprint;
use crate::CompileOptions;

/// Nesting beyond this aborts the walk with a critical diagnostic.
pub const MAX_RECURSION_DEPTH: usize = 100;

// ---------------------------------------------------------------------------
// VirtualManifest
// ---------------------------------------------------------------------------

/// Paths planned so far in the current walk; `exists()` consults it before
/// the disk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VirtualManifest {
    paths: BTreeSet<String>,
}

impl VirtualManifest {
    /// Returns `true` if the path was not yet known.
    pub fn register(&mut self, path: impl Into<String>) -> bool {
        self.paths.insert(path.into())
    }

    pub fn contains(&self, path: &str) -> bool {
        self.paths.contains(path)
    }

    pub fn snapshot(&self) -> BTreeSet<String> {
        self.paths.clone()
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainState {
    /// No branch of the current chain has been taken yet.
    Pending,
    /// A branch was taken; later branches are skipped.
    Entered,
    /// No open chain, or a condition faulted.
    Closed,
}

#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub entries: Vec<PlannedEntry>,
    pub commands: Vec<ResolvedCommand>,
    pub diagnostics: Vec<Diagnostic>,
    /// Final variable values after layering and coercion.
    pub variables: Map<String, Value>,
}

/// Marker for an aborted walk; the diagnostic is already recorded.
struct DepthExceeded;

pub fn resolve(parsed: &ParsedBlueprint, options: &CompileOptions) -> Resolution {
    let mut resolver = Resolver {
        parsed,
        engine: TemplateEngine::new(options.project_root.clone()),
        context: VariableContext::from_values(&options.defaults),
        manifest: VirtualManifest::default(),
        entries: Vec::new(),
        commands: Vec::new(),
        diagnostics: Vec::new(),
    };
    resolver.seed_variables(options);

    let root = parsed.ast.root();
    if resolver.walk(root, "", 0).is_err() {
        tracing::warn!("blueprint nesting exceeded {MAX_RECURSION_DEPTH} levels; walk aborted");
    }

    resolver.diagnostics.sort_by_key(|d| d.line);
    Resolution {
        entries: resolver.entries,
        commands: resolver.commands,
        diagnostics: resolver.diagnostics,
        variables: resolver.context.values().clone(),
    }
}

struct Resolver<'a> {
    parsed: &'a ParsedBlueprint,
    engine: TemplateEngine,
    context: VariableContext,
    manifest: VirtualManifest,
    entries: Vec<PlannedEntry>,
    commands: Vec<ResolvedCommand>,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> Resolver<'a> {
    /// Layer script definitions over the defaults; overrides win over both.
    fn seed_variables(&mut self, options: &CompileOptions) {
        for (name, value) in &options.overrides {
            self.context.set(name.clone(), value.clone());
        }
        let parsed = self.parsed;
        for def in &parsed.variables {
            if options.overrides.contains_key(&def.name) {
                continue;
            }
            let raw = match self.engine.render(&def.value, &self.context, &self.manifest) {
                Ok(rendered) => rendered,
                Err(e) => {
                    self.push(Diagnostic::warning(
                        def.line,
                        DiagnosticCode::Template,
                        format!("variable '{}' kept unrendered: {e}", def.name),
                    ));
                    def.value.clone()
                }
            };
            let mut value = parse_scalar(&raw);
            if let Some(hint) = &def.type_hint {
                match coerce(value.clone(), hint) {
                    Ok(coerced) => value = coerced,
                    Err(reason) => self.push(Diagnostic::warning(
                        def.line,
                        DiagnosticCode::Syntax,
                        format!("variable '{}': {reason}", def.name),
                    )),
                }
            }
            self.context.set(def.name.clone(), value);
        }
    }

    fn walk(&mut self, parent: NodeId, base: &str, depth: usize) -> Result<(), DepthExceeded> {
        let parsed = self.parsed;
        if depth > MAX_RECURSION_DEPTH {
            self.push(Diagnostic::new(
                parsed.ast.node(parent).line,
                Severity::Critical,
                DiagnosticCode::RecursionLimit,
                format!("nesting deeper than {MAX_RECURSION_DEPTH} levels"),
            ));
            return Err(DepthExceeded);
        }

        let mut chain = ChainState::Closed;
        for &child in parsed.ast.children(parent) {
            let node = parsed.ast.node(child);
            match &node.kind {
                NodeKind::Root => {}
                NodeKind::Logic(logic) => {
                    self.logic(child, node.line, logic, base, &mut chain, depth)?
                }
                NodeKind::Form(template) => {
                    chain = ChainState::Closed;
                    self.form(child, node.line, template, base, depth)?
                }
                NodeKind::Commands(lines) => {
                    chain = ChainState::Closed;
                    self.commands(lines)
                }
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Logic
    // -----------------------------------------------------------------------

    fn logic(
        &mut self,
        id: NodeId,
        line: usize,
        logic: &LogicNode,
        base: &str,
        chain: &mut ChainState,
        depth: usize,
    ) -> Result<(), DepthExceeded> {
        let argument = logic.argument.as_deref();
        match logic.directive {
            Directive::If => {
                *chain = ChainState::Pending;
                if self.condition(line, argument, chain) {
                    self.walk(id, base, depth + 1)?;
                }
            }
            Directive::Elif => {
                if *chain == ChainState::Pending && self.condition(line, argument, chain) {
                    self.walk(id, base, depth + 1)?;
                }
            }
            Directive::Else => {
                let enter = *chain == ChainState::Pending;
                *chain = ChainState::Closed;
                if enter {
                    self.walk(id, base, depth + 1)?;
                }
            }
            Directive::EndIf => *chain = ChainState::Closed,
            Directive::For => {
                *chain = ChainState::Closed;
                self.for_loop(id, line, argument, base, depth)?;
            }
            Directive::EndFor => {}
            Directive::Print | Directive::Warn | Directive::Error => {
                *chain = ChainState::Closed;
                self.message(line, logic.directive, argument);
            }
        }
        Ok(())
    }

    /// Evaluate one branch condition, advancing the chain state.
    fn condition(&mut self, line: usize, argument: Option<&str>, chain: &mut ChainState) -> bool {
        let Some(condition) = argument else {
            // Already reported while parsing.
            return false;
        };
        match self
            .engine
            .evaluate(condition, &self.context, &self.manifest)
        {
            Ok(true) => {
                *chain = ChainState::Entered;
                true
            }
            Ok(false) => false,
            Err(e) => {
                self.push(Diagnostic::error(
                    line,
                    DiagnosticCode::LogicFault,
                    format!("condition '{condition}' could not be evaluated: {e}"),
                ));
                false
            }
        }
    }

    fn for_loop(
        &mut self,
        id: NodeId,
        line: usize,
        argument: Option<&str>,
        base: &str,
        depth: usize,
    ) -> Result<(), DepthExceeded> {
        let Some(header) = argument else {
            return Ok(());
        };
        let Some((name, expr)) = header.split_once(" in ") else {
            self.push(Diagnostic::error(
                line,
                DiagnosticCode::Syntax,
                format!("@for needs 'name in items', got '{header}'"),
            ));
            return Ok(());
        };
        let name = name.trim();
        let items = match self.engine.iterate(expr, &self.context, &self.manifest) {
            Ok(items) => items,
            Err(e) => {
                self.push(Diagnostic::error(
                    line,
                    DiagnosticCode::LogicFault,
                    format!("@for over '{}' failed: {e}", expr.trim()),
                ));
                return Ok(());
            }
        };
        tracing::trace!("line {line}: @for {name} over {} item(s)", items.len());
        for item in items {
            let previous = self.context.bind(name, item);
            let walked = self.walk(id, base, depth + 1);
            self.context.restore(name, previous);
            walked?;
        }
        Ok(())
    }

    fn message(&mut self, line: usize, directive: Directive, argument: Option<&str>) {
        let severity = match directive {
            Directive::Print => Severity::Info,
            Directive::Warn => Severity::Warning,
            _ => Severity::Error,
        };
        let text = argument.unwrap_or_default();
        let text = self
            .engine
            .render(text, &self.context, &self.manifest)
            .unwrap_or_else(|_| text.to_string());
        self.push(Diagnostic::new(
            line,
            severity,
            DiagnosticCode::Message,
            crate::lexer::unquote(&text),
        ));
    }

    // -----------------------------------------------------------------------
    // Forms
    // -----------------------------------------------------------------------

    fn form(
        &mut self,
        id: NodeId,
        line: usize,
        template: &EntryTemplate,
        base: &str,
        depth: usize,
    ) -> Result<(), DepthExceeded> {
        let Some(segment) = self.render_path(line, &template.path) else {
            return Ok(());
        };
        let joined = if base.is_empty() {
            segment
        } else {
            format!("{base}/{segment}")
        };
        let path = match normalize_relative(&joined) {
            Ok(path) => path,
            Err(reason) => {
                self.push(Diagnostic::error(
                    line,
                    DiagnosticCode::UnsafePath,
                    format!("'{joined}' rejected: {reason}"),
                ));
                return Ok(());
            }
        };

        if template.is_dir {
            let mut entry = PlannedEntry::dir(path.clone(), line);
            entry.permissions = template.permissions;
            self.emit(entry);
            return self.walk(id, &path, depth + 1);
        }

        let content = template
            .content
            .as_deref()
            .map(|text| self.render_content(line, text));
        let seed = match template.seed.as_deref() {
            None => None,
            Some(raw) => {
                let Some(rendered) = self.render_path(line, raw) else {
                    return Ok(());
                };
                match normalize_relative(&rendered) {
                    Ok(seed) => Some(seed),
                    Err(reason) => {
                        self.push(Diagnostic::error(
                            line,
                            DiagnosticCode::UnsafePath,
                            format!("seed '{rendered}' rejected: {reason}"),
                        ));
                        return Ok(());
                    }
                }
            }
        };
        let mutation = match &template.mutation {
            MutationOp::Rewrite { replacement } => MutationOp::Rewrite {
                replacement: self.render_content(line, replacement),
            },
            other => other.clone(),
        };

        self.emit(PlannedEntry {
            path,
            is_dir: false,
            content,
            seed,
            permissions: template.permissions,
            line,
            mutation,
        });
        Ok(())
    }

    /// A path that fails to render drops its entry.
    fn render_path(&mut self, line: usize, raw: &str) -> Option<String> {
        match self.engine.render(raw, &self.context, &self.manifest) {
            Ok(rendered) => Some(rendered.trim().replace('\\', "/")),
            Err(e) => {
                self.push(Diagnostic::error(
                    line,
                    DiagnosticCode::Template,
                    format!("path '{raw}' could not be rendered: {e}"),
                ));
                None
            }
        }
    }

    /// Content that fails to render is kept raw.
    fn render_content(&mut self, line: usize, raw: &str) -> String {
        match self.engine.render(raw, &self.context, &self.manifest) {
            Ok(rendered) => rendered,
            Err(e) => {
                self.push(Diagnostic::warning(
                    line,
                    DiagnosticCode::Template,
                    format!("content kept unrendered: {e}"),
                ));
                raw.to_string()
            }
        }
    }

    /// Record an entry; a later file definition replaces an earlier one.
    fn emit(&mut self, entry: PlannedEntry) {
        if !self.manifest.register(entry.path.clone()) {
            if let Some(idx) = self.entries.iter().position(|e| e.path == entry.path) {
                if entry.is_dir && self.entries[idx].is_dir {
                    return;
                }
                let earlier = self.entries.remove(idx);
                self.push(Diagnostic::warning(
                    entry.line,
                    DiagnosticCode::Collision,
                    format!(
                        "'{}' is also defined on line {}; this later definition wins",
                        entry.path, earlier.line
                    ),
                ));
            }
        }
        self.entries.push(entry);
    }

    // -----------------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------------

    fn commands(&mut self, lines: &[usize]) {
        let parsed = self.parsed;
        for line in lines {
            let Some(def) = parsed.commands.get(line) else {
                continue;
            };
            let command = self.render_content(def.line, &def.command);
            let undo = def
                .undo
                .iter()
                .map(|u| self.render_content(def.line, u))
                .collect();
            self.commands.push(ResolvedCommand {
                line: def.line,
                command,
                undo,
            });
        }
    }

    fn push(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }
}

/// Collapse `.` and empty segments; reject absolute paths, `..` and the
/// tool's own state files.
pub fn normalize_relative(path: &str) -> Result<String, String> {
    let path = path.trim();
    if path.starts_with('/') || path.starts_with('\\') {
        return Err("absolute paths are not allowed".to_string());
    }
    if path.len() >= 2 && path.as_bytes()[1] == b':' && path.as_bytes()[0].is_ascii_alphabetic() {
        return Err("absolute paths are not allowed".to_string());
    }
    let mut segments = Vec::new();
    for segment in path.split('/') {
        match segment.trim() {
            "" | "." => {}
            ".." => return Err("'..' escapes the project root".to_string()),
            s => segments.push(s),
        }
    }
    if segments.is_empty() {
        return Err("path is empty".to_string());
    }
    let normalized = segments.join("/");
    if paths::is_internal(&normalized) {
        return Err("path is reserved for scaffold state".to_string());
    }
    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use serde_json::json;

    fn run(source: &str) -> Resolution {
        resolve(&parse(source, 4), &CompileOptions::default())
    }

    fn paths(r: &Resolution) -> Vec<&str> {
        r.entries.iter().map(|e| e.path.as_str()).collect()
    }

    #[test]
    fn normalize_rejects_escapes() {
        assert_eq!(normalize_relative("a/./b//c").unwrap(), "a/b/c");
        assert!(normalize_relative("/etc/passwd").is_err());
        assert!(normalize_relative("C:/x").is_err());
        assert!(normalize_relative("a/../../b").is_err());
        assert!(normalize_relative("scaffold.lock").is_err());
        assert!(normalize_relative(".scaffold/config.yaml").is_err());
        assert!(normalize_relative("./").is_err());
    }

    #[test]
    fn only_first_true_branch_is_taken() {
        let r = run("$$ mode = b\n@if mode == \"a\"\n    a.txt\n@elif mode == \"b\"\n    b.txt\n@elif true\n    c.txt\n@else\n    d.txt\n@endif\n");
        assert_eq!(paths(&r), vec!["b.txt"]);
    }

    #[test]
    fn faulted_condition_hides_only_its_branch() {
        let r = run("@if nope ==\n    a.txt\n@else\n    b.txt\n@endif\nafter.txt\n");
        assert_eq!(paths(&r), vec!["b.txt", "after.txt"]);
        assert_eq!(r.diagnostics.len(), 1);
        assert_eq!(r.diagnostics[0].code, DiagnosticCode::LogicFault);
    }

    #[test]
    fn faulted_condition_falls_through_to_elif() {
        let r = run("$$ mode = api\n@if nope ==\n    a.txt\n@elif mode == \"api\"\n    api.txt\n@else\n    other.txt\n@endif\n");
        assert_eq!(paths(&r), vec!["api.txt"]);
        assert_eq!(r.diagnostics[0].code, DiagnosticCode::LogicFault);
    }

    #[test]
    fn for_loop_binds_and_restores() {
        let r = run("$$ svc = outer\n$$ services = [api, worker]\n@for svc in services\n    {{ svc }}/main.py\n@endfor\n{{ svc }}.txt\n");
        assert_eq!(
            paths(&r),
            vec!["api/main.py", "worker/main.py", "outer.txt"]
        );
    }

    #[test]
    fn directory_paths_prefix_children() {
        let r = run("$$ name = demo\nsrc/\n    {{ name }}/\n        __init__.py\n");
        assert_eq!(paths(&r), vec!["src", "src/demo", "src/demo/__init__.py"]);
        assert!(r.entries[0].is_dir);
    }

    #[test]
    fn later_file_definition_wins() {
        let r = run("a.txt :: one\na.txt :: two\n");
        assert_eq!(r.entries.len(), 1);
        assert_eq!(r.entries[0].content.as_deref(), Some("two"));
        assert_eq!(r.diagnostics[0].code, DiagnosticCode::Collision);
    }

    #[test]
    fn repeated_directory_is_merged_silently() {
        let r = run("src/\n    a.py\nsrc/\n    b.py\n");
        assert_eq!(paths(&r), vec!["src", "src/a.py", "src/b.py"]);
        assert!(r.diagnostics.is_empty());
    }

    #[test]
    fn exists_sees_earlier_entries() {
        let r = run("setup.py\n@if exists(\"setup.py\")\n    pyproject.toml\n@endif\n");
        assert_eq!(paths(&r), vec!["setup.py", "pyproject.toml"]);
    }

    #[test]
    fn unsafe_path_is_dropped() {
        let r = run("../outside.txt\nok.txt\n");
        assert_eq!(paths(&r), vec!["ok.txt"]);
        assert_eq!(r.diagnostics[0].code, DiagnosticCode::UnsafePath);
    }

    #[test]
    fn broken_path_template_drops_entry_but_content_survives() {
        let r = run("{{ missing }}.txt\nkeep.txt :: {{ missing }}\n");
        assert_eq!(paths(&r), vec!["keep.txt"]);
        assert_eq!(r.entries[0].content.as_deref(), Some("{{ missing }}"));
        let severities: Vec<Severity> = r.diagnostics.iter().map(|d| d.severity).collect();
        assert_eq!(severities, vec![Severity::Error, Severity::Warning]);
    }

    #[test]
    fn typed_variables_are_coerced() {
        let r = run("$$ port: int = 8080\n$$ tags: list = a, b\n$$ bad: bool = maybe\n");
        assert_eq!(r.variables["port"], json!(8080));
        assert_eq!(r.variables["tags"], json!(["a", "b"]));
        assert_eq!(r.variables["bad"], json!("maybe"));
        assert_eq!(r.diagnostics.len(), 1);
    }

    #[test]
    fn overrides_beat_script_definitions() {
        let parsed = parse("$$ name = script\n{{ name }}.txt\n", 4);
        let mut options = CompileOptions::default();
        options.overrides.insert("name".into(), json!("cli"));
        let r = resolve(&parsed, &options);
        assert_eq!(paths(&r), vec!["cli.txt"]);
    }

    #[test]
    fn messages_become_diagnostics() {
        let r = run("$$ who = world\n@print hello {{ who }}\n@warn careful\n");
        assert_eq!(r.diagnostics[0].severity, Severity::Info);
        assert_eq!(r.diagnostics[0].message, "hello world");
        assert_eq!(r.diagnostics[1].severity, Severity::Warning);
    }

    #[test]
    fn commands_are_rendered_in_order() {
        let r = run("$$ pkg = demo\n%% post-run\n    echo {{ pkg }}\n    %% on-undo\n        rm -rf {{ pkg }}\n");
        assert_eq!(r.commands.len(), 1);
        assert_eq!(r.commands[0].command, "echo demo");
        assert_eq!(r.commands[0].undo, vec!["rm -rf demo".to_string()]);
    }

    #[test]
    fn deep_nesting_hits_recursion_limit() {
        let mut source = String::new();
        for depth in 0..=MAX_RECURSION_DEPTH + 1 {
            source.push_str(&" ".repeat(depth));
            source.push_str(&format!("d{depth}/\n"));
        }
        let r = run(&source);
        assert!(r
            .diagnostics
            .iter()
            .any(|d| d.severity == Severity::Critical && d.code == DiagnosticCode::RecursionLimit));
    }
}
