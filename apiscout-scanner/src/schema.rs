//! Structural schema inference for captured JSON bodies.
//!
//! The walk is iterative with an explicit depth counter, so a hostile payload
//! cannot drive it into deep native recursion. Anything at or past `max_depth`
//! becomes [`SchemaNode::Truncated`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

pub const DEFAULT_SCHEMA_DEPTH: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SchemaNode {
    Object {
        properties: BTreeMap<String, SchemaNode>,
    },
    /// Describes only the first element; heterogeneous arrays are not unioned.
    Array {
        items: Box<SchemaNode>,
        length: usize,
    },
    String,
    Integer,
    Number,
    Boolean,
    Null,
    Truncated,
    Unknown,
}

impl SchemaNode {
    pub fn type_name(&self) -> &'static str {
        match self {
            SchemaNode::Object { .. } => "object",
            SchemaNode::Array { .. } => "array",
            SchemaNode::String => "string",
            SchemaNode::Integer => "integer",
            SchemaNode::Number => "number",
            SchemaNode::Boolean => "boolean",
            SchemaNode::Null => "null",
            SchemaNode::Truncated => "truncated",
            SchemaNode::Unknown => "unknown",
        }
    }
}

enum Frame<'a> {
    Visit(&'a Value, usize),
    Object(Vec<&'a String>),
    Array(usize),
}

#[derive(Debug, Clone, Copy)]
pub struct SchemaInferencer {
    max_depth: usize,
}

impl Default for SchemaInferencer {
    fn default() -> Self {
        Self::new(DEFAULT_SCHEMA_DEPTH)
    }
}

impl SchemaInferencer {
    pub fn new(max_depth: usize) -> Self {
        Self { max_depth }
    }

    pub fn infer(&self, value: &Value) -> SchemaNode {
        self.infer_at(value, 0)
    }

    /// Infer `value` as if it sat `depth` levels below the root.
    pub fn infer_at(&self, value: &Value, depth: usize) -> SchemaNode {
        let mut stack = vec![Frame::Visit(value, depth)];
        let mut built: Vec<SchemaNode> = Vec::new();

        while let Some(frame) = stack.pop() {
            match frame {
                Frame::Visit(_, depth) if depth >= self.max_depth => {
                    built.push(SchemaNode::Truncated);
                }
                Frame::Visit(Value::Object(map), depth) => {
                    stack.push(Frame::Object(map.keys().collect()));
                    // Reversed so children finish in key order.
                    for child in map.values().rev() {
                        stack.push(Frame::Visit(child, depth + 1));
                    }
                }
                Frame::Visit(Value::Array(items), depth) => match items.first() {
                    None => built.push(SchemaNode::Array {
                        items: Box::new(SchemaNode::Unknown),
                        length: 0,
                    }),
                    Some(first) => {
                        stack.push(Frame::Array(items.len()));
                        stack.push(Frame::Visit(first, depth + 1));
                    }
                },
                Frame::Visit(scalar, _) => built.push(scalar_schema(scalar)),
                Frame::Object(keys) => {
                    let children = built.split_off(built.len() - keys.len());
                    let properties = keys.into_iter().cloned().zip(children).collect();
                    built.push(SchemaNode::Object { properties });
                }
                Frame::Array(length) => {
                    let items = built.pop().unwrap_or(SchemaNode::Unknown);
                    built.push(SchemaNode::Array {
                        items: Box::new(items),
                        length,
                    });
                }
            }
        }

        built.pop().unwrap_or(SchemaNode::Unknown)
    }
}

fn scalar_schema(value: &Value) -> SchemaNode {
    match value {
        Value::String(_) => SchemaNode::String,
        Value::Number(n) if n.is_i64() || n.is_u64() => SchemaNode::Integer,
        Value::Number(_) => SchemaNode::Number,
        Value::Bool(_) => SchemaNode::Boolean,
        Value::Null => SchemaNode::Null,
        _ => SchemaNode::Unknown,
    }
}

/// [`SchemaInferencer::infer`] with the default depth bound.
pub fn infer_schema(value: &Value) -> SchemaNode {
    SchemaInferencer::default().infer(value)
}
