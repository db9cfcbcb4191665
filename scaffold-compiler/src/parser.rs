//! Structural compiler: drives the classifier and block stack over a whole
//! blueprint and builds the AST.
//!
//! Recoverable problems become diagnostics and the offending line is
//! skipped; compilation always runs to the end of input.

use std::collections::BTreeMap;

use scaffold_core::types::{Diagnostic, DiagnosticCode, MutationOp};

use crate::ast::{Ast, EntryTemplate, LogicNode, NodeKind};
use crate::block::{consume_delimited, consume_indented, dedent, next_content_line, to_content};
use crate::lexer::{
    classify, clean, measure_indent, structural_indent, CommandLine, ContentValue, Directive,
    FormLine, FormModifier, LineKind, LogicLine, MutationKind, VariableLine,
};
use crate::stack::{Alignment, BlockStack, FrameKind};

/// A `$$ name = value` definition, unevaluated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableDef {
    pub name: String,
    pub type_hint: Option<String>,
    pub value: String,
    pub line: usize,
}

/// One orchestration command as written, keyed by its source line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandDef {
    pub line: usize,
    pub command: String,
    pub undo: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ParsedBlueprint {
    pub ast: Ast,
    pub variables: Vec<VariableDef>,
    pub commands: BTreeMap<usize, CommandDef>,
    pub diagnostics: Vec<Diagnostic>,
}

pub fn parse(source: &str, tab_width: usize) -> ParsedBlueprint {
    Parser::new(source, tab_width).run()
}

struct Parser<'a> {
    lines: Vec<&'a str>,
    tab_width: usize,
    ast: Ast,
    stack: BlockStack,
    variables: Vec<VariableDef>,
    commands: BTreeMap<usize, CommandDef>,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> Parser<'a> {
    fn new(source: &'a str, tab_width: usize) -> Self {
        let ast = Ast::new();
        let stack = BlockStack::new(ast.root());
        Self {
            lines: source.lines().collect(),
            tab_width: tab_width.max(1),
            ast,
            stack,
            variables: Vec::new(),
            commands: BTreeMap::new(),
            diagnostics: Vec::new(),
        }
    }

    fn run(mut self) -> ParsedBlueprint {
        let mut index = 0;
        while index < self.lines.len() {
            let line = classify(self.lines[index], index + 1, self.tab_width);
            index = self.handle(line.number, line.indent, line.kind, index + 1);
        }

        let unclosed: Vec<(usize, FrameKind)> = self
            .stack
            .open_flat_frames()
            .map(|f| (f.line, f.kind))
            .collect();
        for (line, kind) in unclosed {
            let closer = if kind == FrameKind::For { "@endfor" } else { "@endif" };
            self.warn(
                line,
                DiagnosticCode::UnclosedBlock,
                format!("block is never closed; expected {closer}"),
            );
        }

        tracing::debug!(
            "parsed {} lines into {} nodes ({} diagnostics)",
            self.lines.len(),
            self.ast.len(),
            self.diagnostics.len()
        );
        ParsedBlueprint {
            ast: self.ast,
            variables: self.variables,
            commands: self.commands,
            diagnostics: self.diagnostics,
        }
    }

    /// Handle one classified line; returns the index of the next unread line.
    fn handle(&mut self, number: usize, indent: usize, kind: LineKind, next: usize) -> usize {
        match kind {
            LineKind::Blank | LineKind::Comment => next,
            LineKind::Malformed { reason } => {
                self.error(number, DiagnosticCode::Syntax, reason);
                next
            }
            LineKind::UnknownDirective {
                keyword,
                suggestion,
            } => {
                let mut message = format!("unknown directive '@{keyword}'");
                if let Some(s) = suggestion {
                    message.push_str(&format!("; did you mean '@{s}'?"));
                }
                self.error(number, DiagnosticCode::UnknownDirective, message);
                next
            }
            LineKind::Variable(var) => self.variable(number, indent, var, next),
            LineKind::Command(cmd) => self.command(number, indent, cmd, next),
            LineKind::Logic(logic) => self.logic(number, indent, logic, next),
            LineKind::Form(form) => self.form(number, indent, form, next, false),
        }
    }

    // -----------------------------------------------------------------------
    // Variables
    // -----------------------------------------------------------------------

    fn variable(&mut self, number: usize, indent: usize, var: VariableLine, next: usize) -> usize {
        let (value, next) = match var.value {
            Some(value) => (value, next),
            None => {
                let block = consume_indented(&self.lines, next, indent, self.tab_width);
                let content = to_content(&block.lines, self.tab_width);
                (content.trim_end_matches('\n').to_string(), block.next)
            }
        };
        self.variables.push(VariableDef {
            name: var.name,
            type_hint: var.type_hint,
            value,
            line: number,
        });
        next
    }

    // -----------------------------------------------------------------------
    // Orchestration commands
    // -----------------------------------------------------------------------

    fn command(&mut self, number: usize, indent: usize, cmd: CommandLine, next: usize) -> usize {
        match cmd {
            CommandLine::PostRun {
                inline: Some(command),
            } => {
                self.commands.insert(
                    number,
                    CommandDef {
                        line: number,
                        command,
                        undo: Vec::new(),
                    },
                );
                self.anchor_commands(number, indent, vec![number]);
                next
            }
            CommandLine::PostRun { inline: None } => {
                let block = consume_indented(&self.lines, next, indent, self.tab_width);
                let lines = self.command_block(number, next, &block.lines);
                if lines.is_empty() {
                    self.warn(number, DiagnosticCode::Syntax, "empty post-run block");
                } else {
                    self.anchor_commands(number, indent, lines);
                }
                block.next
            }
            CommandLine::OnUndo => {
                self.warn(
                    number,
                    DiagnosticCode::OrphanCloser,
                    "'%% on-undo' outside a post-run block",
                );
                next
            }
            CommandLine::Unknown { hook } => {
                self.error(
                    number,
                    DiagnosticCode::Syntax,
                    format!("unknown orchestration hook '%% {hook}'"),
                );
                next
            }
        }
    }

    /// Register every command in a post-run block; returns their line numbers.
    fn command_block(&mut self, header: usize, first: usize, block: &[String]) -> Vec<usize> {
        let base = block
            .iter()
            .filter(|l| !l.trim().is_empty())
            .map(|l| measure_indent(l, self.tab_width))
            .min()
            .unwrap_or(0);

        let mut registered: Vec<usize> = Vec::new();
        let mut in_undo = false;
        for (offset, raw) in block.iter().enumerate() {
            let text = raw.trim();
            if text.is_empty() {
                continue;
            }
            let number = first + offset + 1;
            let indent = measure_indent(raw, self.tab_width);
            let is_undo_marker = matches!(
                classify(text, number, self.tab_width).kind,
                LineKind::Command(CommandLine::OnUndo)
            );

            if indent == base && is_undo_marker {
                if registered.is_empty() {
                    self.warn(
                        number,
                        DiagnosticCode::OrphanCloser,
                        "'%% on-undo' before any command",
                    );
                }
                in_undo = true;
                continue;
            }
            if indent > base && in_undo {
                if let Some(def) = registered.last().and_then(|l| self.commands.get_mut(l)) {
                    def.undo.push(text.to_string());
                }
                continue;
            }
            if indent > base {
                self.warn(
                    number,
                    DiagnosticCode::Indentation,
                    "unexpected indentation in post-run block; treated as its own command",
                );
            }
            in_undo = false;
            self.commands.insert(
                number,
                CommandDef {
                    line: number,
                    command: text.to_string(),
                    undo: Vec::new(),
                },
            );
            registered.push(number);
        }
        tracing::debug!(
            "post-run block at line {header} registered {} command(s)",
            registered.len()
        );
        registered
    }

    fn anchor_commands(&mut self, number: usize, indent: usize, lines: Vec<usize>) {
        let align = self.attach(number, indent, None);
        self.ast
            .add_child(align.parent, NodeKind::Commands(lines), number, indent);
    }

    // -----------------------------------------------------------------------
    // Logic directives
    // -----------------------------------------------------------------------

    fn logic(&mut self, number: usize, indent: usize, logic: LogicLine, next: usize) -> usize {
        let LogicLine {
            directive,
            argument,
            inline_form,
        } = logic;

        if directive.requires_argument() && argument.is_none() {
            self.error(
                number,
                DiagnosticCode::MissingCondition,
                format!("@{} needs a condition", directive.keyword()),
            );
        }

        if directive.is_closer() {
            let align = self.attach(number, indent, Some(directive));
            if align.closed.is_none() {
                self.error(
                    number,
                    DiagnosticCode::OrphanCloser,
                    format!("@{} without a matching open block", directive.keyword()),
                );
                return next;
            }
            let node = self.ast.add_child(
                align.parent,
                NodeKind::Logic(LogicNode {
                    directive,
                    argument,
                }),
                number,
                indent,
            );
            if let Some(kind) = FrameKind::for_directive(directive) {
                self.stack.push(node, indent, kind, number);
            }
            return next;
        }

        let align = self.attach(number, indent, None);
        let node = self.ast.add_child(
            align.parent,
            NodeKind::Logic(LogicNode {
                directive,
                argument,
            }),
            number,
            indent,
        );

        if let Some(form_text) = inline_form {
            self.stack.push(node, indent, FrameKind::If, number);
            let child = classify(&form_text, number, self.tab_width);
            match child.kind {
                LineKind::Form(form) => {
                    self.form(number, indent + self.tab_width, form, next, true);
                }
                _ => self.error(
                    number,
                    DiagnosticCode::Syntax,
                    "inline @if needs a file or directory after '->'",
                ),
            }
            let close = self.stack.align_for(indent, Some(Directive::EndIf));
            self.ast.add_child(
                close.parent,
                NodeKind::Logic(LogicNode {
                    directive: Directive::EndIf,
                    argument: None,
                }),
                number,
                indent,
            );
            return next;
        }

        if let Some(kind) = FrameKind::for_directive(directive) {
            self.stack.push(node, indent, kind, number);
        }
        next
    }

    // -----------------------------------------------------------------------
    // Forms
    // -----------------------------------------------------------------------

    fn form(
        &mut self,
        number: usize,
        indent: usize,
        form: FormLine,
        next: usize,
        inline: bool,
    ) -> usize {
        let align = self.attach(number, indent, None);
        let looks_like_file = form.looks_like_file();
        let FormLine {
            path,
            trailing_slash,
            block_marker,
            modifier,
            permissions,
        } = form;

        let mut next = next;
        let mut template = EntryTemplate {
            path,
            is_dir: trailing_slash,
            content: None,
            seed: None,
            permissions,
            mutation: MutationOp::None,
        };

        match modifier {
            FormModifier::None => {}
            FormModifier::Content(value) => {
                template.content = Some(self.content_value(number, value, &mut next, inline));
            }
            FormModifier::Seed(seed) => template.seed = Some(seed),
            FormModifier::Mutation(kind, value) => {
                let body = self.content_value(number, value, &mut next, inline);
                let mutation = match kind {
                    MutationKind::Append => MutationOp::Append,
                    MutationKind::Prepend => MutationOp::Prepend,
                    MutationKind::Subtract => MutationOp::Subtract,
                    MutationKind::Rewrite => match body.split_once("=>") {
                        Some((pattern, replacement)) => {
                            let replacement = crate::lexer::unquote(replacement);
                            template.content = Some(crate::lexer::unquote(pattern));
                            MutationOp::Rewrite { replacement }
                        }
                        None => {
                            self.error(
                                number,
                                DiagnosticCode::Syntax,
                                "rewrite needs 'pattern => replacement'",
                            );
                            return next;
                        }
                    },
                };
                if template.content.is_none() {
                    template.content = Some(body);
                }
                template.mutation = mutation;
            }
        }

        let has_payload = template.content.is_some()
            || template.seed.is_some()
            || !template.mutation.is_none();
        if template.is_dir && has_payload {
            self.error(
                number,
                DiagnosticCode::Syntax,
                format!("directory '{}/' cannot carry content", template.path),
            );
            template.content = None;
            template.seed = None;
            template.mutation = MutationOp::None;
        }

        let deeper = !inline
            && next_content_line(&self.lines, next).is_some_and(|j| {
                structural_indent(&clean(self.lines[j]), self.tab_width) > indent
            });
        if deeper && !template.is_dir {
            if has_payload {
                let block = consume_indented(&self.lines, next, indent, self.tab_width);
                self.error(
                    number,
                    DiagnosticCode::Syntax,
                    format!(
                        "file '{}' already has content; {} indented line(s) below it are ignored",
                        template.path,
                        block.lines.iter().filter(|l| !l.trim().is_empty()).count()
                    ),
                );
                next = block.next;
            } else if block_marker || looks_like_file {
                let block = consume_indented(&self.lines, next, indent, self.tab_width);
                template.content = Some(to_content(&block.lines, self.tab_width));
                next = block.next;
            } else {
                template.is_dir = true;
            }
        } else if block_marker && template.content.is_none() && !template.is_dir {
            template.content = Some(String::new());
        }

        let is_dir = template.is_dir;
        let node = self
            .ast
            .add_child(align.parent, NodeKind::Form(template), number, indent);
        if is_dir {
            self.stack.push(node, indent, FrameKind::Dir, number);
        }
        next
    }

    fn content_value(
        &mut self,
        number: usize,
        value: ContentValue,
        next: &mut usize,
        inline: bool,
    ) -> String {
        match value {
            ContentValue::Inline(text) => text,
            ContentValue::Block { delimiter, head } => {
                if inline {
                    self.error(
                        number,
                        DiagnosticCode::Syntax,
                        "multi-line content is not allowed in an inline @if",
                    );
                    return head;
                }
                let block = consume_delimited(&self.lines, *next, delimiter);
                if !block.closed {
                    self.error(
                        number,
                        DiagnosticCode::UnclosedBlock,
                        format!("content block opened with {delimiter} is never closed"),
                    );
                }
                *next = block.next;
                let mut body = dedent(&block.lines, self.tab_width);
                if !head.trim().is_empty() {
                    body.insert(0, head.trim().to_string());
                }
                to_content(&body, self.tab_width)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn attach(&mut self, number: usize, indent: usize, closer: Option<Directive>) -> Alignment {
        let align = self.stack.align_for(indent, closer);
        if align.unaligned {
            self.warn(
                number,
                DiagnosticCode::Indentation,
                "dedent does not line up with any open block",
            );
        }
        align
    }

    fn warn(&mut self, line: usize, code: DiagnosticCode, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic::warning(line, code, message));
    }

    fn error(&mut self, line: usize, code: DiagnosticCode, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic::error(line, code, message));
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
