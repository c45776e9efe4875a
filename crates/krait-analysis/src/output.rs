//! Diagnostic output of analysis results.

use std::fmt::Write;

use krait_core::{ControlFlowGraph, Document};

use crate::Analyzer;

/// Escapes text for use inside a quoted DOT label. Quotes, backslashes
/// and record delimiters are backslash-escaped; newlines become the
/// left-aligned `\l` break.
fn escape_label(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '"' | '\\' | '<' | '>' | '{' | '}' | '|' => {
                out.push('\\');
                out.push(c);
            }
            '\n' => out.push_str("\\l"),
            _ => out.push(c),
        }
    }
    out
}

impl Analyzer {
    /// Renders a control flow graph as a Graphviz digraph, one node per
    /// basic block listing its formatted instructions, edges labeled with
    /// their branch sense.
    ///
    /// The output is a diagnostic; its exact shape is not a stability
    /// contract.
    pub fn dump_control_flow_graph(
        &self,
        doc: &Document,
        cfg: &ControlFlowGraph,
        name: &str,
    ) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "digraph \"{}\" {{", escape_label(name));
        let _ = writeln!(out, "    node [shape=box, fontname=\"monospace\"];");

        for block in cfg.blocks() {
            let mut lines = String::new();
            for addr in &block.addresses {
                let text = self
                    .format_cell(doc, *addr)
                    .map(|line| line.text)
                    .unwrap_or_else(|_| "??".to_string());
                let _ = write!(lines, "{}: {}\\l", addr, escape_label(&text));
            }
            let _ = writeln!(out, "    {} [label=\"{}\"];", block.id, lines);
        }
        for block in cfg.blocks() {
            for edge in cfg.successors(block.id) {
                let _ = writeln!(
                    out,
                    "    {} -> {} [label=\"{}\"];",
                    block.id, edge.to, edge.kind
                );
            }
        }

        out.push_str("}\n");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_label_passes_plain_lines() {
        assert_eq!(escape_label("jmp 0000:00003000"), "jmp 0000:00003000");
        assert_eq!(escape_label("fcn_0000_00001000"), "fcn_0000_00001000");
    }

    #[test]
    fn test_escape_label_quotes_and_delimiters() {
        assert_eq!(escape_label("\"Hi\""), "\\\"Hi\\\"");
        assert_eq!(escape_label("a\\b"), "a\\\\b");
        assert_eq!(escape_label("{x|y}"), "\\{x\\|y\\}");
        assert_eq!(escape_label("<head>"), "\\<head\\>");
    }

    #[test]
    fn test_escape_label_breaks_lines() {
        assert_eq!(escape_label("one\ntwo"), "one\\ltwo");
    }
}
