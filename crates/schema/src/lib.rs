//! # Schema AST & Loader
//!
//! Parses an API XML document into a [`FunctionTable`](loader::FunctionTable)
//! of [`Function`](loader::Function)s, each carrying an `in`/`out`
//! [`Ast`](ast::Ast) that both interpreters in `urfa-interpreter` walk.

pub mod ast;
pub mod loader;

pub use ast::{Ast, AstNode, IfCondition, NodeData, NodeId, NodeKind};
pub use loader::{load_file, load_str, Function, FunctionTable, DEFAULT_API_XML_PATH};
