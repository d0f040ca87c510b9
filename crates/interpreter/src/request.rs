//! # Request Interpreter
//!
//! Walks a function's `in` AST in tree order against a caller-supplied
//! parameter hash, producing an outgoing [`Packet`]. The whole input hash is
//! available up front, so unlike the response side this walk is a plain
//! recursive descent — there's nothing to suspend.

use tracing::warn;
use urfa_common::{UrfaError, Value};
use urfa_hash::ParamHash;
use urfa_packet::Packet;
use urfa_schema::{Ast, IfCondition, NodeId, NodeKind};

/// Signals a `BREAK` unwinding up to its enclosing `FOR`.
enum Flow {
    Normal,
    Break,
}

/// Builds the outgoing attribute packet for `ast` against `input`. Does not
/// append the trailing terminator attribute — the caller does that once the
/// walk succeeds, right before transmission.
pub fn build_request(ast: &Ast, input: &ParamHash) -> Result<Packet, UrfaError> {
    let mut packet = Packet::new();
    let mut working = input.clone();
    walk_children(ast, ast.root(), &mut working, &mut packet)?;
    Ok(packet)
}

fn walk_children(ast: &Ast, parent: NodeId, hash: &mut ParamHash, packet: &mut Packet) -> Result<Flow, UrfaError> {
    for child in ast.children(parent) {
        match walk_node(ast, child, hash, packet)? {
            Flow::Normal => {}
            Flow::Break => return Ok(Flow::Break),
        }
    }
    Ok(Flow::Normal)
}

fn walk_node(ast: &Ast, id: NodeId, hash: &mut ParamHash, packet: &mut Packet) -> Result<Flow, UrfaError> {
    let node = ast.node(id);
    let data = &node.data;

    if node.kind.is_leaf_param() {
        let name = data.name.as_deref().unwrap_or_default();
        let index = eval_index(hash, data.array_index.as_deref());
        let value = match hash.get(name, index) {
            Some(v) => v.clone(),
            None => match &data.defval {
                Some(defval) => coerce_literal(node.kind, defval)?,
                None => {
                    warn!(name, index, "missing required input parameter with no default");
                    return Err(UrfaError::other(format!(
                        "missing required input parameter '{name}[{index}]' with no default"
                    )));
                }
            },
        };
        packet.push_value(&value);
        return Ok(Flow::Normal);
    }

    match node.kind {
        NodeKind::If => {
            if eval_condition(hash, data.variable.as_deref().unwrap_or_default(), data.condition, data.value.as_deref().unwrap_or_default()) {
                return walk_children(ast, id, hash, packet);
            }
            Ok(Flow::Normal)
        }
        NodeKind::For => {
            let name = data.name.as_deref().unwrap_or_default();
            let from = eval_int_expr(hash, data.from.as_deref().unwrap_or("0")).unwrap_or(0);
            let count = eval_int_expr(hash, data.count.as_deref().unwrap_or("0")).unwrap_or(0);
            let prior = hash.get(name, 0).cloned();

            for i in 0..count {
                hash.set(name, 0, Value::Long(from + i));
                match walk_children(ast, id, hash, packet)? {
                    Flow::Normal => {}
                    Flow::Break => break,
                }
            }
            match prior {
                Some(p) => {
                    hash.set(name, 0, p);
                }
                None => {
                    hash.remove(name, 0);
                }
            }
            Ok(Flow::Normal)
        }
        NodeKind::Set => {
            let dst_index = eval_index(hash, data.dst_index.as_deref());
            let value = if let Some(src) = &data.src {
                let src_index = eval_index(hash, data.src_index.as_deref());
                hash.get(src, src_index).cloned().unwrap_or(Value::Int(0))
            } else {
                Value::Str(data.value.clone().unwrap_or_default())
            };
            if let Some(dst) = &data.dst {
                hash.set(dst, dst_index, value);
            }
            Ok(Flow::Normal)
        }
        NodeKind::Break => Ok(Flow::Break),
        NodeKind::Error => {
            let code = data.code.unwrap_or(0);
            let mut comment = data.comment.clone().unwrap_or_default();
            if let Some(var) = &data.variable {
                if let Some(v) = hash.get(var, 0) {
                    comment = comment.replacen("%s", &v.as_text(), 1);
                }
            }
            warn!(code, comment = %comment, "request walk aborted by schema ERROR node");
            Err(UrfaError::other(format!("function aborted: error {code}: {comment}")))
        }
        other => {
            warn!(kind = %other, "unexpected node kind in input AST");
            Err(UrfaError::other(format!("unexpected node kind {other} in input AST")))
        }
    }
}

fn eval_index(hash: &ParamHash, expr: Option<&str>) -> i64 {
    match expr {
        Some(e) => eval_int_expr(hash, e).unwrap_or(0),
        None => 0,
    }
}

fn eval_int_expr(hash: &ParamHash, expr: &str) -> Option<i64> {
    if let Ok(literal) = expr.trim().parse::<i64>() {
        return Some(literal);
    }
    hash.get(expr, 0).and_then(Value::as_int)
}

fn eval_condition(hash: &ParamHash, variable: &str, condition: Option<IfCondition>, literal: &str) -> bool {
    let actual = hash.get(variable, 0).map(Value::as_text).unwrap_or_default();
    let equal = actual == literal;
    match condition {
        Some(IfCondition::Eq) | None => equal,
        Some(IfCondition::Ne) => !equal,
    }
}

fn coerce_literal(kind: NodeKind, literal: &str) -> Result<Value, UrfaError> {
    match kind {
        NodeKind::Integer => literal
            .trim()
            .parse::<i32>()
            .map(Value::Int)
            .map_err(|_| UrfaError::other(format!("default '{literal}' is not a valid integer"))),
        NodeKind::Long => literal
            .trim()
            .parse::<i64>()
            .map(Value::Long)
            .map_err(|_| UrfaError::other(format!("default '{literal}' is not a valid long"))),
        NodeKind::Double => literal
            .trim()
            .parse::<f64>()
            .map(Value::Double)
            .map_err(|_| UrfaError::other(format!("default '{literal}' is not a valid double"))),
        NodeKind::String => Ok(Value::Str(literal.to_string())),
        NodeKind::IpAddress => literal
            .trim()
            .parse()
            .map(Value::Ip)
            .map_err(|_| UrfaError::other(format!("default '{literal}' is not a valid IPv4 address"))),
        other => Err(UrfaError::other(format!("'{other}' is not a leaf parameter kind"))),
    }
}
