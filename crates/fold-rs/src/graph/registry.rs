//! Operation definitions shared between a graph and every isolated copy of it.
//!
//! The registry answers the questions graph construction and constant folding
//! need about an op: its input arity, how output types are derived, and
//! whether it has side effects.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

use crate::tensor::DType;

use super::node::AttrValue;
use super::GraphError;

/// Number of data inputs an op accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Fixed(usize),
    /// At least the given number of inputs.
    Variadic(usize),
}

impl Arity {
    pub fn accepts(self, count: usize) -> bool {
        match self {
            Arity::Fixed(n) => count == n,
            Arity::Variadic(min) => count >= min,
        }
    }
}

/// Rule used to derive a node's output types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputTypes {
    /// No outputs.
    None,
    /// `count` outputs, all typed like the first data input.
    SameAsInput(usize),
    /// One output typed by the named `Type` attribute.
    FromAttr(&'static str),
    /// Outputs typed like the first data input, followed by fixed extras.
    InputThen(Vec<DType>),
}

#[derive(Debug, Clone)]
pub struct OpDef {
    pub name: String,
    pub inputs: Arity,
    pub outputs: OutputTypes,
    /// Side-effecting or time-varying ops are never folded.
    pub is_stateful: bool,
    pub required_attrs: Vec<&'static str>,
}

impl OpDef {
    pub fn new(name: impl Into<String>, inputs: Arity, outputs: OutputTypes) -> Self {
        Self {
            name: name.into(),
            inputs,
            outputs,
            is_stateful: false,
            required_attrs: Vec::new(),
        }
    }

    pub fn stateful(mut self) -> Self {
        self.is_stateful = true;
        self
    }

    pub fn require_attr(mut self, key: &'static str) -> Self {
        self.required_attrs.push(key);
        self
    }

    /// Resolves output types for a node with the given input types and attributes.
    pub fn output_types(
        &self,
        node: &str,
        input_types: &[DType],
        attrs: &BTreeMap<String, AttrValue>,
    ) -> Result<Vec<DType>, GraphError> {
        let first_input = || {
            input_types
                .first()
                .copied()
                .ok_or_else(|| GraphError::InvalidNode {
                    node: node.to_string(),
                    reason: format!("{} requires a data input to infer its type", self.name),
                })
        };
        match &self.outputs {
            OutputTypes::None => Ok(Vec::new()),
            OutputTypes::SameAsInput(count) => Ok(vec![first_input()?; *count]),
            OutputTypes::FromAttr(key) => {
                let dtype = attrs
                    .get(*key)
                    .and_then(AttrValue::as_type)
                    .ok_or_else(|| GraphError::MissingAttr {
                        node: node.to_string(),
                        attr: key.to_string(),
                    })?;
                Ok(vec![dtype])
            }
            OutputTypes::InputThen(extra) => {
                let mut types = vec![first_input()?];
                types.extend(extra.iter().copied());
                Ok(types)
            }
        }
    }
}

/// Thread-safe table of op definitions keyed by op name.
#[derive(Debug, Default)]
pub struct OpRegistry {
    ops: RwLock<HashMap<String, Arc<OpDef>>>,
}

impl OpRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with the ops the graph layer and the folder rely on.
    pub fn standard() -> Arc<Self> {
        let registry = Self::new();
        for def in standard_ops() {
            registry.register(def);
        }
        Arc::new(registry)
    }

    pub fn register(&self, def: OpDef) {
        let mut ops = self.ops.write().unwrap_or_else(PoisonError::into_inner);
        ops.insert(def.name.clone(), Arc::new(def));
    }

    pub fn lookup(&self, op: &str) -> Option<Arc<OpDef>> {
        self.ops
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(op)
            .cloned()
    }

    pub fn contains(&self, op: &str) -> bool {
        self.ops
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(op)
    }
}

fn standard_ops() -> Vec<OpDef> {
    let unary = |name: &str| OpDef::new(name, Arity::Fixed(1), OutputTypes::SameAsInput(1));
    let binary = |name: &str| OpDef::new(name, Arity::Fixed(2), OutputTypes::SameAsInput(1));

    let mut ops = vec![
        OpDef::new("Const", Arity::Fixed(0), OutputTypes::FromAttr("dtype"))
            .require_attr("value"),
        OpDef::new("Placeholder", Arity::Fixed(0), OutputTypes::FromAttr("dtype")),
        OpDef::new("Variable", Arity::Fixed(0), OutputTypes::FromAttr("dtype")).stateful(),
        OpDef::new("Assign", Arity::Fixed(2), OutputTypes::SameAsInput(1)).stateful(),
        OpDef::new(
            "RandomUniform",
            Arity::Fixed(1),
            OutputTypes::FromAttr("dtype"),
        )
        .stateful(),
        OpDef::new("NoOp", Arity::Fixed(0), OutputTypes::None),
        OpDef::new("Switch", Arity::Fixed(2), OutputTypes::SameAsInput(2)),
        OpDef::new(
            "Merge",
            Arity::Variadic(1),
            OutputTypes::InputThen(vec![DType::Si32]),
        ),
        OpDef::new("_Send", Arity::Fixed(1), OutputTypes::None)
            .require_attr("tensor_name")
            .require_attr("send_device")
            .require_attr("recv_device"),
        OpDef::new("_Recv", Arity::Fixed(0), OutputTypes::FromAttr("tensor_type"))
            .require_attr("tensor_name"),
    ];
    for name in ["Identity", "Neg", "Abs", "Square", "Exp"] {
        ops.push(unary(name));
    }
    for name in ["Enter", "Exit", "NextIteration"] {
        ops.push(unary(name));
    }
    for name in ["Add", "Sub", "Mul", "Div", "Maximum", "Minimum"] {
        ops.push(binary(name));
    }
    ops
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_registry_flags_stateful_ops() {
        let registry = OpRegistry::standard();
        assert!(registry.lookup("RandomUniform").unwrap().is_stateful);
        assert!(registry.lookup("Assign").unwrap().is_stateful);
        assert!(!registry.lookup("Add").unwrap().is_stateful);
        assert!(registry.lookup("NotAnOp").is_none());
    }

    #[test]
    fn merge_outputs_value_and_index() {
        let registry = OpRegistry::standard();
        let merge = registry.lookup("Merge").unwrap();
        let types = merge
            .output_types("m", &[DType::F32, DType::F32], &BTreeMap::new())
            .unwrap();
        assert_eq!(types, vec![DType::F32, DType::Si32]);
    }
}
