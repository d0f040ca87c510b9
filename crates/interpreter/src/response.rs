//! # Response Interpreter
//!
//! A stateful, resumable walk over a function's `out` AST, fed one inbound
//! [`Packet`] at a time. A real exchange spreads the response across several
//! network packets, so the walk needs to suspend mid-tree when a packet runs
//! out of attributes and resume exactly there when the next one arrives.
//!
//! That's modeled as an explicit control stack (`Vec<Frame>`) instead of
//! Rust call-stack recursion: each `Frame` remembers which AST node a FOR (or
//! the walk root) is currently inside, plus the loop's remaining iteration
//! count. `feed` pops/pushes frames and advances a cursor into the current
//! packet's attribute list; when the cursor runs out, it stashes state and
//! returns `NeedMore` rather than discarding progress.

use tracing::{debug, warn};
use urfa_common::{UrfaError, Value};
use urfa_hash::ParamHash;
use urfa_packet::{AttrKind, Packet};
use urfa_schema::{Ast, Function, IfCondition, NodeId, NodeKind};

/// Result of feeding one packet to a [`ResponseInterpreter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedOutcome {
    /// The walk needs more attributes than this packet contained.
    NeedMore,
    /// The walk reached the end of the AST.
    Done,
}

/// One entry in the interpreter's explicit control stack: "I am iterating
/// the children of `node`, and (if this is a FOR body) have `remaining` more
/// iterations left, with the loop counter's next value being `next_value`."
struct Frame {
    node: NodeId,
    /// Children of `node` still left to visit in this pass, in order.
    pending: Vec<NodeId>,
    /// Set for a FOR frame: (loop var name, remaining iterations, next counter value).
    for_state: Option<ForState>,
}

struct ForState {
    name: String,
    remaining: i64,
    next_value: i64,
    body: Vec<NodeId>,
}

/// A stateful walk over one function's `out` AST.
pub struct ResponseInterpreter {
    ast: Ast,
    stack: Vec<Frame>,
    result: ParamHash,
    finished: bool,
    /// Set when an ERROR node aborted the walk; returned by `end()`.
    error: Option<UrfaError>,
}

impl ResponseInterpreter {
    /// Starts a new interpreter for `function_name` in `schema`.
    pub fn start(schema: &urfa_schema::FunctionTable, function_name: &str) -> Result<Self, UrfaError> {
        let function: &Function = schema
            .get(function_name)
            .ok_or_else(|| UrfaError::other(format!("unknown function '{function_name}'")))?;
        let ast = function.output.clone();
        let root = ast.root();
        let pending = ast.children(root).collect();
        Ok(Self {
            ast,
            stack: vec![Frame {
                node: root,
                pending,
                for_state: None,
            }],
            result: ParamHash::new(),
            finished: false,
            error: None,
        })
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Consumes attributes from `packet` against the AST, advancing the
    /// control stack. Returns `NeedMore` if `packet`'s attributes run out
    /// before the walk does.
    pub fn feed(&mut self, packet: &Packet) -> Result<FeedOutcome, UrfaError> {
        let mut cursor = packet.attrs().iter();

        loop {
            if self.finished {
                return Ok(FeedOutcome::Done);
            }

            let Some(frame) = self.stack.last_mut() else {
                self.finished = true;
                return Ok(FeedOutcome::Done);
            };

            if let Some(next_id) = frame.pending.pop() {
                match self.step_node(next_id, &mut cursor)? {
                    StepResult::Consumed => continue,
                    StepResult::NeedMore => {
                        debug!(node = next_id.0, "packet exhausted mid-walk, awaiting next packet");
                        self.stack.last_mut().unwrap().pending.push(next_id);
                        return Ok(FeedOutcome::NeedMore);
                    }
                    StepResult::Break => {
                        self.unwind_to_enclosing_for();
                        continue;
                    }
                }
            }

            // This frame's children are exhausted. If it's a FOR with more
            // iterations, reload its body; otherwise pop back to the parent.
            let is_for_with_more = matches!(&frame.for_state, Some(fs) if fs.remaining > 0);
            if is_for_with_more {
                let fs = frame.for_state.as_mut().unwrap();
                self.result.set(fs.name.clone(), 0, Value::Long(fs.next_value));
                fs.next_value += 1;
                fs.remaining -= 1;
                frame.pending = fs.body.clone();
            } else {
                self.stack.pop();
            }
        }
    }

    fn unwind_to_enclosing_for(&mut self) {
        while let Some(frame) = self.stack.last() {
            if frame.for_state.is_some() {
                self.stack.pop();
                break;
            }
            self.stack.pop();
        }
    }

    /// Advances past a single AST node, pulling attributes from `cursor` as
    /// needed. `pending` lists are stored in reverse (so `pop` yields
    /// tree-order), which is why children are pushed reversed below.
    fn step_node(
        &mut self,
        id: NodeId,
        cursor: &mut std::slice::Iter<'_, urfa_packet::Attribute>,
    ) -> Result<StepResult, UrfaError> {
        let node = self.ast.node(id).clone();
        let data = &node.data;

        if node.kind.is_leaf_param() {
            let Some(attr) = cursor.next() else {
                return Ok(StepResult::NeedMore);
            };
            let expected = leaf_attr_kind(node.kind);
            if attr.kind != expected {
                let name = data.name.as_deref().unwrap_or("?");
                warn!(name, expected = ?expected, got = ?attr.kind, "attribute type mismatch in response");
                return Err(UrfaError::other(format!(
                    "type mismatch reading '{name}': expected {expected:?}, got {:?}",
                    attr.kind
                )));
            }
            let value = attr.as_value()?;
            let name = data.name.clone().unwrap_or_default();
            let index = eval_index(&self.result, data.array_index.as_deref());
            self.result.set(name, index, value);
            return Ok(StepResult::Consumed);
        }

        match node.kind {
            NodeKind::If => {
                let holds = eval_condition(
                    &self.result,
                    data.variable.as_deref().unwrap_or_default(),
                    data.condition,
                    data.value.as_deref().unwrap_or_default(),
                );
                if holds {
                    let children: Vec<NodeId> = self.ast.children(id).collect();
                    self.stack.push(Frame {
                        node: id,
                        pending: children.into_iter().rev().collect(),
                        for_state: None,
                    });
                }
                Ok(StepResult::Consumed)
            }
            NodeKind::For => {
                let name = data.name.clone().unwrap_or_default();
                let from = eval_int_expr(&self.result, data.from.as_deref().unwrap_or("0")).unwrap_or(0);
                let count = eval_int_expr(&self.result, data.count.as_deref().unwrap_or("0")).unwrap_or(0);
                let body: Vec<NodeId> = self.ast.children(id).collect();

                if count <= 0 {
                    return Ok(StepResult::Consumed);
                }

                self.result.set(name.clone(), 0, Value::Long(from));
                self.stack.push(Frame {
                    node: id,
                    pending: body.clone().into_iter().rev().collect(),
                    for_state: Some(ForState {
                        name,
                        remaining: count - 1,
                        next_value: from + 1,
                        body,
                    }),
                });
                Ok(StepResult::Consumed)
            }
            NodeKind::Set => {
                let dst_index = eval_index(&self.result, data.dst_index.as_deref());
                let value = if let Some(src) = &data.src {
                    let src_index = eval_index(&self.result, data.src_index.as_deref());
                    self.result.get(src, src_index).cloned().unwrap_or(Value::Int(0))
                } else {
                    Value::Str(data.value.clone().unwrap_or_default())
                };
                if let Some(dst) = &data.dst {
                    self.result.set(dst.clone(), dst_index, value);
                }
                Ok(StepResult::Consumed)
            }
            NodeKind::Break => Ok(StepResult::Break),
            NodeKind::Error => {
                let code = data.code.unwrap_or(0);
                let mut comment = data.comment.clone().unwrap_or_default();
                if let Some(var) = &data.variable {
                    if let Some(v) = self.result.get(var, 0) {
                        comment = comment.replacen("%s", &v.as_text(), 1);
                    }
                }
                warn!(code, comment = %comment, "response walk aborted by schema ERROR node");
                let err = UrfaError::other(format!("response aborted: error {code}: {comment}"));
                self.error = Some(err.clone());
                self.finished = true;
                Err(err)
            }
            other => {
                warn!(kind = %other, "unexpected node kind in output AST");
                Err(UrfaError::other(format!("unexpected node kind {other} in output AST")))
            }
        }
    }

    /// Finalizes the walk, returning the accumulated result hash. If the
    /// walk was still mid-tree when the terminator arrived, that is reported
    /// by the caller (the call orchestrator), not here: this method only
    /// reports a hard error if an `ERROR` node was actually reached.
    pub fn end(mut self) -> Result<ParamHash, UrfaError> {
        if let Some(err) = self.error.take() {
            return Err(err);
        }
        Ok(self.result)
    }
}

enum StepResult {
    Consumed,
    NeedMore,
    Break,
}

fn leaf_attr_kind(kind: NodeKind) -> AttrKind {
    match kind {
        NodeKind::Integer => AttrKind::Integer,
        NodeKind::Long => AttrKind::Long,
        NodeKind::Double => AttrKind::Double,
        NodeKind::String => AttrKind::String,
        NodeKind::IpAddress => AttrKind::IpAddress,
        _ => unreachable!("leaf_attr_kind called on non-leaf kind"),
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

#[cfg(test)]
mod tests {
    use super::*;
    use urfa_common::NullSink;
    use urfa_schema::load_str;

    fn schema(xml: &str) -> urfa_schema::FunctionTable {
        load_str(xml, &NullSink).unwrap()
    }

    #[test]
    fn empty_output_finishes_immediately() {
        let s = schema(r#"<urfa><function name="ping" id="1"/></urfa>"#);
        let mut interp = ResponseInterpreter::start(&s, "ping").unwrap();
        let mut pkt = Packet::new();
        pkt.push_termination();
        assert_eq!(interp.feed(&pkt).unwrap(), FeedOutcome::Done);
        assert!(interp.end().unwrap().is_empty());
    }

    #[test]
    fn for_loop_accumulates_array_values_across_one_packet() {
        let s = schema(
            r#"<urfa><function name="f" id="1"><output>
                <integer name="cnt"/>
                <for name="i" from="0" count="cnt"><integer name="v" array_index="i"/></for>
            </output></function></urfa>"#,
        );
        let mut interp = ResponseInterpreter::start(&s, "f").unwrap();
        let mut pkt = Packet::new();
        pkt.push_int(3);
        pkt.push_int(10);
        pkt.push_int(20);
        pkt.push_int(30);
        assert_eq!(interp.feed(&pkt).unwrap(), FeedOutcome::Done);

        let result = interp.end().unwrap();
        assert_eq!(result.get("cnt", 0), Some(&Value::Long(3)));
        assert_eq!(result.get("v", 0), Some(&Value::Int(10)));
        assert_eq!(result.get("v", 1), Some(&Value::Int(20)));
        assert_eq!(result.get("v", 2), Some(&Value::Int(30)));
    }

    #[test]
    fn needs_more_when_packet_runs_out_mid_walk() {
        let s = schema(
            r#"<urfa><function name="f" id="1"><output>
                <integer name="a"/>
                <integer name="b"/>
            </output></function></urfa>"#,
        );
        let mut interp = ResponseInterpreter::start(&s, "f").unwrap();
        let mut first = Packet::new();
        first.push_int(1);
        assert_eq!(interp.feed(&first).unwrap(), FeedOutcome::NeedMore);

        let mut second = Packet::new();
        second.push_int(2);
        assert_eq!(interp.feed(&second).unwrap(), FeedOutcome::Done);

        let result = interp.end().unwrap();
        assert_eq!(result.get("a", 0), Some(&Value::Int(1)));
        assert_eq!(result.get("b", 0), Some(&Value::Int(2)));
    }

    #[test]
    fn break_after_two_iterations_stops_consuming_for_body() {
        let s = schema(
            r#"<urfa><function name="f" id="1"><output>
                <for name="i" from="0" count="5">
                    <integer name="v" array_index="i"/>
                    <if variable="i" value="1" condition="eq"><break/></if>
                </for>
            </output></function></urfa>"#,
        );
        let mut interp = ResponseInterpreter::start(&s, "f").unwrap();
        let mut pkt = Packet::new();
        pkt.push_int(0);
        pkt.push_int(1);
        assert_eq!(interp.feed(&pkt).unwrap(), FeedOutcome::Done);

        let result = interp.end().unwrap();
        assert_eq!(result.get("v", 0), Some(&Value::Int(0)));
        assert_eq!(result.get("v", 1), Some(&Value::Int(1)));
    }

    #[test]
    fn error_node_aborts_with_message() {
        let s = schema(
            r#"<urfa><function name="f" id="1"><output>
                <error code="5" comment="boom"/>
            </output></function></urfa>"#,
        );
        let mut interp = ResponseInterpreter::start(&s, "f").unwrap();
        let pkt = Packet::new();
        assert!(interp.feed(&pkt).is_err());
    }
}
