//! Block stack manager: decides which open node a new line belongs to.
//!
//! The root frame sits at indent `-1`, below every real line, so it is never
//! popped. On each line [`BlockStack::align_for`] pops frames until the top
//! is the line's parent.

use crate::ast::NodeId;
use crate::lexer::Directive;

const ROOT_INDENT: isize = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Root,
    Dir,
    If,
    Elif,
    Else,
    For,
}

impl FrameKind {
    pub fn for_directive(directive: Directive) -> Option<Self> {
        match directive {
            Directive::If => Some(FrameKind::If),
            Directive::Elif => Some(FrameKind::Elif),
            Directive::Else => Some(FrameKind::Else),
            Directive::For => Some(FrameKind::For),
            _ => None,
        }
    }

    fn is_logic(self) -> bool {
        !matches!(self, FrameKind::Root | FrameKind::Dir)
    }
}

/// How a logic frame's body is laid out; decided by the first body line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyMode {
    Undecided,
    /// Body is deeper than the directive; an equal-indent line ends it.
    Indented,
    /// Body sits at the directive's indent; only a closer or dedent ends it.
    Flat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    pub node: NodeId,
    pub indent: isize,
    pub kind: FrameKind,
    pub mode: BodyMode,
    pub line: usize,
}

/// Result of aligning one line against the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Alignment {
    /// Node the line attaches to.
    pub parent: NodeId,
    /// Frame closed by the line acting as a closing sibling.
    pub closed: Option<FrameKind>,
    /// The line dedented to a column no open frame uses.
    pub unaligned: bool,
}

#[derive(Debug, Clone)]
pub struct BlockStack {
    frames: Vec<Frame>,
}

/// Whether `closer` at the same indent ends a frame of kind `open`.
pub fn closes(closer: Directive, open: FrameKind) -> bool {
    match closer {
        Directive::Elif | Directive::Else => matches!(open, FrameKind::If | FrameKind::Elif),
        Directive::EndIf => matches!(open, FrameKind::If | FrameKind::Elif | FrameKind::Else),
        Directive::EndFor => open == FrameKind::For,
        _ => false,
    }
}

impl BlockStack {
    pub fn new(root: NodeId) -> Self {
        Self {
            frames: vec![Frame {
                node: root,
                indent: ROOT_INDENT,
                kind: FrameKind::Root,
                mode: BodyMode::Indented,
                line: 0,
            }],
        }
    }

    /// Node new children attach to when no alignment is needed.
    pub fn current(&self) -> NodeId {
        self.top().node
    }

    fn top(&self) -> &Frame {
        // The root frame is never popped.
        &self.frames[self.frames.len() - 1]
    }

    pub fn push(&mut self, node: NodeId, indent: usize, kind: FrameKind, line: usize) {
        let mode = if kind.is_logic() {
            BodyMode::Undecided
        } else {
            BodyMode::Indented
        };
        self.frames.push(Frame {
            node,
            indent: indent as isize,
            kind,
            mode,
            line,
        });
    }

    /// Pop frames the line at `indent` no longer belongs to.
    ///
    /// `closer` is set for `elif`/`else`/`endif`/`endfor` lines; a closer pops
    /// at most one matching frame at its own indent.
    pub fn align_for(&mut self, indent: usize, closer: Option<Directive>) -> Alignment {
        let indent = indent as isize;
        let mut closed = None;
        let mut last_popped_indent = None;

        while self.frames.len() > 1 {
            let top = *self.top();

            if top.mode == BodyMode::Undecided && closer.is_none() {
                let slot = self.frames.len() - 1;
                if indent > top.indent {
                    self.frames[slot].mode = BodyMode::Indented;
                } else if indent == top.indent {
                    self.frames[slot].mode = BodyMode::Flat;
                    break;
                }
            }

            if indent < top.indent {
                last_popped_indent = Some(top.indent);
                self.frames.pop();
                continue;
            }
            if indent == top.indent {
                if let Some(closer) = closer {
                    if closes(closer, top.kind) {
                        self.frames.pop();
                        closed = Some(top.kind);
                        break;
                    }
                }
                if self.top().mode != BodyMode::Flat {
                    last_popped_indent = Some(top.indent);
                    self.frames.pop();
                    continue;
                }
            }
            break;
        }

        let parent_indent = self.top().indent;
        let unaligned = closed.is_none()
            && last_popped_indent.is_some_and(|popped| indent > parent_indent && indent < popped);
        Alignment {
            parent: self.current(),
            closed,
            unaligned,
        }
    }

    /// Flat logic frames still open; they should have been closed explicitly.
    pub fn open_flat_frames(&self) -> impl Iterator<Item = &Frame> {
        self.frames.iter().filter(|f| f.mode == BodyMode::Flat)
    }

    pub fn depth(&self) -> usize {
        self.frames.len() - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: usize) -> NodeId {
        NodeId(n)
    }

    #[test]
    fn dedent_pops_to_matching_parent() {
        let mut stack = BlockStack::new(id(0));
        stack.push(id(1), 0, FrameKind::Dir, 1);
        assert_eq!(stack.align_for(4, None).parent, id(1));
        stack.push(id(2), 4, FrameKind::Dir, 2);
        assert_eq!(stack.align_for(8, None).parent, id(2));
        let a = stack.align_for(0, None);
        assert_eq!(a.parent, id(0));
        assert!(!a.unaligned);
    }

    #[test]
    fn dir_at_equal_indent_is_implicitly_popped() {
        let mut stack = BlockStack::new(id(0));
        stack.push(id(1), 0, FrameKind::Dir, 1);
        assert_eq!(stack.align_for(0, None).parent, id(0));
    }

    #[test]
    fn indented_if_is_closed_by_equal_indent_sibling() {
        let mut stack = BlockStack::new(id(0));
        stack.push(id(1), 0, FrameKind::If, 1);
        assert_eq!(stack.align_for(4, None).parent, id(1));
        assert_eq!(stack.align_for(0, None).parent, id(0));
    }

    #[test]
    fn flat_if_keeps_equal_indent_lines_until_closer() {
        let mut stack = BlockStack::new(id(0));
        stack.push(id(1), 0, FrameKind::If, 1);
        assert_eq!(stack.align_for(0, None).parent, id(1));
        assert_eq!(stack.align_for(0, None).parent, id(1));
        assert_eq!(stack.open_flat_frames().count(), 1);

        let a = stack.align_for(0, Some(Directive::EndIf));
        assert_eq!(a.closed, Some(FrameKind::If));
        assert_eq!(a.parent, id(0));
        assert_eq!(stack.depth(), 0);
    }

    #[test]
    fn else_closes_if_at_same_indent_only_once() {
        let mut stack = BlockStack::new(id(0));
        stack.push(id(1), 0, FrameKind::If, 1);
        stack.align_for(0, None);
        stack.push(id(2), 0, FrameKind::If, 2);
        stack.align_for(0, None);

        let inner = stack.align_for(0, Some(Directive::EndIf));
        assert_eq!(inner.closed, Some(FrameKind::If));
        assert_eq!(inner.parent, id(1), "outer flat if stays open");
    }

    #[test]
    fn closer_walks_out_of_nested_dirs() {
        let mut stack = BlockStack::new(id(0));
        stack.push(id(1), 0, FrameKind::If, 1);
        stack.align_for(4, None);
        stack.push(id(2), 4, FrameKind::Dir, 2);
        stack.align_for(8, None);

        let a = stack.align_for(0, Some(Directive::Else));
        assert_eq!(a.closed, Some(FrameKind::If));
        assert_eq!(a.parent, id(0));
    }

    #[test]
    fn orphan_closer_reports_nothing_closed() {
        let mut stack = BlockStack::new(id(0));
        let a = stack.align_for(0, Some(Directive::EndIf));
        assert_eq!(a.closed, None);
        assert_eq!(a.parent, id(0));
    }

    #[test]
    fn endfor_does_not_close_if() {
        let mut stack = BlockStack::new(id(0));
        stack.push(id(1), 0, FrameKind::If, 1);
        stack.align_for(0, None);
        let a = stack.align_for(0, Some(Directive::EndFor));
        assert_eq!(a.closed, None);
    }

    #[test]
    fn dedent_between_columns_is_unaligned() {
        let mut stack = BlockStack::new(id(0));
        stack.push(id(1), 0, FrameKind::Dir, 1);
        stack.align_for(4, None);
        stack.push(id(2), 4, FrameKind::Dir, 2);
        stack.align_for(8, None);
        let a = stack.align_for(2, None);
        assert_eq!(a.parent, id(1));
        assert!(a.unaligned);
    }
}
