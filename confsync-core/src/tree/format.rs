//! Text serialization of the configuration tree
//!
//! The format is line-oriented and deterministic:
//!
//! ```text
//! #comment attached to the entry below
//! #@@-alice@prod - /DC=org/CN=alice
//! Section
//! {
//!   Option = value
//! }
//! ```
//!
//! Sections open with their name on one line and `{` on the next, options
//! are `name = value`, comments are `#`-prefixed lines attached to the
//! entry that follows them, and nesting indents by two spaces. The dump of
//! any tree parses back to an equal tree and re-dumps byte-identically;
//! backups and audit diffs rely on that.

use super::node::{CfgEntry, CfgNode, CfgTree, TreeError, COMMITTER_TAG};

impl CfgTree {
    /// Deterministic text dump of the whole tree.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        dump_tree(self, 0, &mut out);
        out
    }

    /// Parse a text dump produced by [`CfgTree::to_text`] (or written by
    /// hand; indentation is cosmetic, structure comes from the braces).
    pub fn from_text(text: &str) -> Result<CfgTree, TreeError> {
        let mut parser = Parser {
            lines: text.lines().collect(),
            pos: 0,
        };
        let mut root = CfgTree::new();
        parse_block(&mut parser, &mut root, true)?;
        Ok(root)
    }
}

fn dump_tree(tree: &CfgTree, depth: usize, out: &mut String) {
    let indent = "  ".repeat(depth);
    for (name, node) in tree.entries() {
        if !node.comment.is_empty() {
            for line in node.comment.lines() {
                out.push_str(&indent);
                out.push('#');
                out.push_str(line);
                out.push('\n');
            }
        }
        if let Some(committer) = &node.last_committer {
            out.push_str(&indent);
            out.push('#');
            out.push_str(COMMITTER_TAG);
            out.push_str(committer);
            out.push('\n');
        }
        match &node.entry {
            CfgEntry::Option(value) => {
                out.push_str(&indent);
                out.push_str(name);
                if value.is_empty() {
                    out.push_str(" =\n");
                } else {
                    out.push_str(" = ");
                    out.push_str(value);
                    out.push('\n');
                }
            }
            CfgEntry::Section(sub) => {
                out.push_str(&indent);
                out.push_str(name);
                out.push('\n');
                out.push_str(&indent);
                out.push_str("{\n");
                dump_tree(sub, depth + 1, out);
                out.push_str(&indent);
                out.push_str("}\n");
            }
        }
    }
}

struct Parser<'a> {
    lines: Vec<&'a str>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn next(&mut self) -> Option<(usize, &'a str)> {
        while self.pos < self.lines.len() {
            let line_no = self.pos + 1;
            let raw = self.lines[self.pos];
            self.pos += 1;
            let line = raw.trim_start();
            if !line.trim_end().is_empty() {
                return Some((line_no, line));
            }
        }
        None
    }
}

fn parse_block(parser: &mut Parser<'_>, tree: &mut CfgTree, top: bool) -> Result<(), TreeError> {
    let mut comment_lines: Vec<String> = Vec::new();
    let mut committer: Option<String> = None;

    while let Some((line_no, line)) = parser.next() {
        if line.trim_end() == "}" {
            if top {
                return Err(TreeError::Parse {
                    line: line_no,
                    message: "unbalanced closing brace".to_string(),
                });
            }
            return Ok(());
        }

        if let Some(rest) = line.strip_prefix('#') {
            if let Some(id) = rest.strip_prefix(COMMITTER_TAG) {
                committer = Some(id.to_string());
            } else {
                comment_lines.push(rest.to_string());
            }
            continue;
        }

        let comment = std::mem::take(&mut comment_lines).join("\n");
        let last_committer = committer.take();

        if let Some(eq) = line.find('=') {
            let name = line[..eq].trim_end();
            let raw_value = &line[eq + 1..];
            let value = raw_value.strip_prefix(' ').unwrap_or(raw_value);
            let node = CfgNode {
                comment,
                last_committer,
                entry: CfgEntry::Option(value.to_string()),
            };
            tree.insert_node(name, node).map_err(|e| TreeError::Parse {
                line: line_no,
                message: e.to_string(),
            })?;
        } else {
            let name = line.trim_end().to_string();
            match parser.next() {
                Some((_, brace)) if brace.trim_end() == "{" => {}
                other => {
                    return Err(TreeError::Parse {
                        line: other.map(|(n, _)| n).unwrap_or(line_no),
                        message: format!("expected '{{' after section {name:?}"),
                    });
                }
            }
            let mut sub = CfgTree::new();
            parse_block(parser, &mut sub, false)?;
            let node = CfgNode {
                comment,
                last_committer,
                entry: CfgEntry::Section(sub),
            };
            tree.insert_node(&name, node).map_err(|e| TreeError::Parse {
                line: line_no,
                message: e.to_string(),
            })?;
        }
    }

    if top {
        Ok(())
    } else {
        Err(TreeError::Parse {
            line: parser.lines.len(),
            message: "unexpected end of input inside section".to_string(),
        })
    }
}
