//! Structured form of the generated translation unit
//!
//! Emitters build [`Fragment`] trees instead of writing text directly.
//! Nesting carries indentation, so the same fragment renders the same way
//! wherever it ends up, and tests can inspect the tree or its text.

use std::fmt::{self, Write};

const INDENT: &str = "    ";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fragment {
    /// One statement or declaration line, indented to the enclosing depth
    Line(String),
    Blank,
    /// Preprocessor directive or label, always at column 0
    Directive(String),
    /// `head` line, `body` one level deeper, `tail` line; empty head or
    /// tail lines are left out
    Block {
        head: String,
        body: Vec<Fragment>,
        tail: String,
    },
    Seq(Vec<Fragment>),
    /// Verbatim text block, every line indented to the enclosing depth
    Text(String),
}

impl Fragment {
    pub fn line(text: impl Into<String>) -> Self {
        Self::Line(text.into())
    }

    pub fn directive(text: impl Into<String>) -> Self {
        Self::Directive(text.into())
    }

    pub fn block(head: impl Into<String>, body: Vec<Fragment>, tail: impl Into<String>) -> Self {
        Self::Block {
            head: head.into(),
            body,
            tail: tail.into(),
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Seq(fragments) => fragments.iter().all(Fragment::is_empty),
            _ => false,
        }
    }

    pub fn write_to<W: Write>(&self, out: &mut W, depth: usize) -> fmt::Result {
        match self {
            Self::Line(text) => {
                indent(out, depth)?;
                writeln!(out, "{}", text)
            }
            Self::Blank => writeln!(out),
            Self::Directive(text) => writeln!(out, "{}", text),
            Self::Block { head, body, tail } => {
                if !head.is_empty() {
                    indent(out, depth)?;
                    writeln!(out, "{}", head)?;
                }
                for fragment in body {
                    fragment.write_to(out, depth + 1)?;
                }
                if !tail.is_empty() {
                    indent(out, depth)?;
                    writeln!(out, "{}", tail)?;
                }
                Ok(())
            }
            Self::Seq(fragments) => fragments.iter().try_for_each(|f| f.write_to(out, depth)),
            Self::Text(text) => {
                for line in text.lines() {
                    if line.is_empty() {
                        writeln!(out)?;
                    } else {
                        indent(out, depth)?;
                        writeln!(out, "{}", line)?;
                    }
                }
                Ok(())
            }
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        // Writing into a String cannot fail
        let _ = self.write_to(&mut out, 0);
        out
    }
}

fn indent<W: Write>(out: &mut W, depth: usize) -> fmt::Result {
    for _ in 0..depth {
        out.write_str(INDENT)?;
    }
    Ok(())
}

/// Builds a fragment list the way code is written: statements appended one
/// after another, blocks opened and closed, partial lines accumulated.
#[derive(Debug, Default)]
pub struct Builder {
    done: Vec<Fragment>,
    open: Vec<(String, Vec<Fragment>)>,
    partial: String,
}

impl Builder {
    pub fn new() -> Self {
        Self::default()
    }

    fn current(&mut self) -> &mut Vec<Fragment> {
        match self.open.last_mut() {
            Some((_, body)) => body,
            None => &mut self.done,
        }
    }

    /// Append to the line being built
    pub fn print(&mut self, text: &str) -> &mut Self {
        self.partial.push_str(text);
        self
    }

    /// Finish the line being built with `text`
    pub fn line(&mut self, text: impl AsRef<str>) -> &mut Self {
        let mut line = std::mem::take(&mut self.partial);
        line.push_str(text.as_ref());
        self.current().push(Fragment::Line(line));
        self
    }

    pub fn blank(&mut self) -> &mut Self {
        self.flush();
        self.current().push(Fragment::Blank);
        self
    }

    pub fn directive(&mut self, text: impl Into<String>) -> &mut Self {
        self.flush();
        self.current().push(Fragment::Directive(text.into()));
        self
    }

    pub fn push(&mut self, fragment: Fragment) -> &mut Self {
        self.flush();
        self.current().push(fragment);
        self
    }

    pub fn open(&mut self, head: impl AsRef<str>) -> &mut Self {
        let mut head_line = std::mem::take(&mut self.partial);
        head_line.push_str(head.as_ref());
        self.open.push((head_line, Vec::new()));
        self
    }

    pub fn close(&mut self, tail: impl Into<String>) -> &mut Self {
        self.flush();
        let Some((head, body)) = self.open.pop() else {
            self.done.push(Fragment::Line(tail.into()));
            return self;
        };
        let block = Fragment::Block {
            head,
            body,
            tail: tail.into(),
        };
        self.current().push(block);
        self
    }

    /// Close the current block and open a sibling, as in `} else {`
    pub fn reopen(&mut self, head: impl AsRef<str>) -> &mut Self {
        self.close("");
        self.open(head)
    }

    pub fn has_partial(&self) -> bool {
        !self.partial.is_empty()
    }

    fn flush(&mut self) {
        if !self.partial.is_empty() {
            let line = std::mem::take(&mut self.partial);
            self.current().push(Fragment::Line(line));
        }
    }

    pub fn finish(mut self) -> Vec<Fragment> {
        self.flush();
        while !self.open.is_empty() {
            self.close("");
        }
        self.done
    }

    pub fn into_fragment(self) -> Fragment {
        Fragment::Seq(self.finish())
    }
}

/// Destination of emitted fragments
pub trait Sink {
    fn emit(&mut self, fragment: Fragment);
}

/// Drops everything; the discovery pass runs against this
#[derive(Debug, Default, Clone, Copy)]
pub struct Discard;

impl Sink for Discard {
    fn emit(&mut self, _fragment: Fragment) {}
}

/// Keeps everything in order
#[derive(Debug, Default, Clone)]
pub struct Collect {
    fragments: Vec<Fragment>,
}

impl Collect {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fragments(&self) -> &[Fragment] {
        &self.fragments
    }

    pub fn into_fragment(self) -> Fragment {
        Fragment::Seq(self.fragments)
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for fragment in &self.fragments {
            let _ = fragment.write_to(&mut out, 0);
        }
        out
    }
}

impl Sink for Collect {
    fn emit(&mut self, fragment: Fragment) {
        self.fragments.push(fragment);
    }
}
