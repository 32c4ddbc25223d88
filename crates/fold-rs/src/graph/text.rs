use std::fmt;

use super::arena::Graph;
use super::node::AttrValue;

impl fmt::Display for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "graph {{")?;
        for node in self.op_nodes() {
            let mut inputs: Vec<String> = self
                .data_inputs(node.id())
                .into_iter()
                .map(|(src, out)| {
                    let name = self.node(src).map(|n| n.name()).unwrap_or("?");
                    format!("{name}:{out}")
                })
                .collect();
            for edge in self.in_edges(node.id()).filter(|e| e.is_control()) {
                if let Some(src) = self.node(edge.src()).filter(|n| !n.is_sentinel()) {
                    inputs.push(format!("^{}", src.name()));
                }
            }
            write!(f, "  {} = {}({})", node.name(), node.op(), inputs.join(", "))?;
            let attrs: Vec<String> = node
                .def()
                .attrs
                .iter()
                .map(|(key, value)| format!("{key}={}", format_attr(value)))
                .collect();
            if !attrs.is_empty() {
                write!(f, " {{{}}}", attrs.join(", "))?;
            }
            writeln!(f)?;
        }
        write!(f, "}}")
    }
}

fn format_attr(value: &AttrValue) -> String {
    match value {
        AttrValue::Tensor(t) => t.to_string(),
        AttrValue::Type(t) => t.to_string(),
        AttrValue::Shape(s) => s.to_string(),
        AttrValue::Str(s) => format!("{s:?}"),
        AttrValue::Int(v) => v.to_string(),
        AttrValue::Float(v) => v.to_string(),
        AttrValue::Bool(v) => v.to_string(),
    }
}
