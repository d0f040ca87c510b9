//! # Schema Loader
//!
//! Parses an API XML document into a [`FunctionTable`]. Parsing happens in
//! two passes: first `quick_xml`'s event reader materializes the document
//! into a small generic element tree (we don't need streaming here — schema
//! files are small and loaded once), then that tree is walked recursively to
//! build each function's `in`/`out` [`Ast`](crate::ast::Ast).

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use quick_xml::events::Event;
use quick_xml::Reader;
use tracing::warn;
use urfa_common::{ErrorKind, ErrorSink, UrfaError};

use crate::ast::{Ast, IfCondition, NodeData, NodeId, NodeKind};

/// The default schema path used when no override is configured, matching the
/// upstream deployment's fixed installation location.
pub const DEFAULT_API_XML_PATH: &str = "/netup/utm5/xml/api.xml";

/// One RPC function: its wire id and its request/response ASTs.
#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub id: i32,
    pub input: Ast,
    pub output: Ast,
}

/// Name -> [`Function`] mapping built by the loader. Lookup is case-insensitive.
#[derive(Debug, Clone, Default)]
pub struct FunctionTable {
    functions: HashMap<String, Function>,
}

impl FunctionTable {
    pub fn new() -> Self {
        Self {
            functions: HashMap::new(),
        }
    }

    /// Looks up a function by name, case-insensitively.
    pub fn get(&self, name: &str) -> Option<&Function> {
        self.functions.get(&name.to_ascii_lowercase())
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.functions.values().map(|f| f.name.as_str())
    }

    /// All loaded functions, for listing UIs such as `urfa functions`.
    pub fn functions(&self) -> impl Iterator<Item = &Function> {
        self.functions.values()
    }

    fn insert(&mut self, f: Function) {
        self.functions.insert(f.name.to_ascii_lowercase(), f);
    }

    /// Writes a textual dump of this table, in the same `<urfa>` shape the
    /// loader accepts, so it can be fed back through [`load_str`] (§8.7).
    pub fn dump(&self, out: &mut impl std::io::Write) -> std::io::Result<()> {
        writeln!(out, "<urfa>")?;
        let mut names: Vec<_> = self.functions.values().collect();
        names.sort_by(|a, b| a.name.cmp(&b.name));
        for f in names {
            writeln!(out, "  <function name=\"{}\" id=\"{}\">", f.name, f.id)?;
            dump_body(out, &f.input, f.input.root(), "input", 2)?;
            dump_body(out, &f.output, f.output.root(), "output", 2)?;
            writeln!(out, "  </function>")?;
        }
        writeln!(out, "</urfa>")?;
        Ok(())
    }
}

fn dump_body(
    out: &mut impl std::io::Write,
    ast: &Ast,
    root: NodeId,
    tag: &str,
    indent: usize,
) -> std::io::Result<()> {
    let pad = "  ".repeat(indent);
    if !ast.has_children(root) {
        return Ok(());
    }
    writeln!(out, "{pad}<{tag}>")?;
    for child in ast.children(root) {
        dump_node(out, ast, child, indent + 1)?;
    }
    writeln!(out, "{pad}</{tag}>")?;
    Ok(())
}

fn dump_node(out: &mut impl std::io::Write, ast: &Ast, id: NodeId, indent: usize) -> std::io::Result<()> {
    let pad = "  ".repeat(indent);
    let node = ast.node(id);
    let tag = node.kind.canonical_name().to_ascii_lowercase();
    let mut attrs = Vec::new();
    let d = &node.data;
    if let Some(v) = &d.name {
        attrs.push(format!("name=\"{v}\""));
    }
    if let Some(v) = &d.array_index {
        attrs.push(format!("array_index=\"{v}\""));
    }
    if let Some(v) = &d.defval {
        attrs.push(format!("default=\"{v}\""));
    }
    if let Some(v) = &d.variable {
        attrs.push(format!("variable=\"{v}\""));
    }
    if let Some(v) = d.condition {
        let s = match v {
            IfCondition::Eq => "eq",
            IfCondition::Ne => "ne",
        };
        attrs.push(format!("condition=\"{s}\""));
    }
    if let Some(v) = &d.value {
        attrs.push(format!("value=\"{v}\""));
    }
    if let Some(v) = &d.from {
        attrs.push(format!("from=\"{v}\""));
    }
    if let Some(v) = &d.count {
        attrs.push(format!("count=\"{v}\""));
    }
    if let Some(v) = &d.src {
        attrs.push(format!("src=\"{v}\""));
    }
    if let Some(v) = &d.src_index {
        attrs.push(format!("src_index=\"{v}\""));
    }
    if let Some(v) = &d.dst {
        attrs.push(format!("dst=\"{v}\""));
    }
    if let Some(v) = &d.dst_index {
        attrs.push(format!("dst_index=\"{v}\""));
    }
    if let Some(v) = d.code {
        attrs.push(format!("code=\"{v}\""));
    }
    if let Some(v) = &d.comment {
        attrs.push(format!("comment=\"{v}\""));
    }
    let attr_str = if attrs.is_empty() {
        String::new()
    } else {
        format!(" {}", attrs.join(" "))
    };

    if ast.has_children(id) {
        writeln!(out, "{pad}<{tag}{attr_str}>")?;
        for child in ast.children(id) {
            dump_node(out, ast, child, indent + 1)?;
        }
        writeln!(out, "{pad}</{tag}>")?;
    } else {
        writeln!(out, "{pad}<{tag}{attr_str}/>")?;
    }
    Ok(())
}

/// A generic, attribute-bearing XML element tree, materialized from
/// `quick_xml` events. The loader walks this rather than reacting to events
/// directly, since a function body's structure needs lookahead (children,
/// next sibling) that an event stream doesn't give for free.
struct XmlElement {
    name: String,
    attrs: HashMap<String, String>,
    children: Vec<XmlElement>,
}

/// Parses `xml` into a generic element tree. `source` names the file it came
/// from (if any) so parse errors can be formatted with it, matching the way
/// the original library's diagnostics name the offending file.
fn parse_xml_tree(xml: &str, source: Option<&str>) -> Result<XmlElement, UrfaError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<XmlElement> = Vec::new();
    let mut root: Option<XmlElement> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                let attrs = read_attrs(&e, source)?;
                stack.push(XmlElement {
                    name,
                    attrs,
                    children: Vec::new(),
                });
            }
            Ok(Event::Empty(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                let attrs = read_attrs(&e, source)?;
                let elem = XmlElement {
                    name,
                    attrs,
                    children: Vec::new(),
                };
                attach(&mut stack, &mut root, elem);
            }
            Ok(Event::End(_)) => {
                let elem = stack
                    .pop()
                    .ok_or_else(|| UrfaError::other("unbalanced closing tag in schema xml"))?;
                attach(&mut stack, &mut root, elem);
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(UrfaError::other(format!(
                    "{}xml parse error at byte {}: {e}",
                    source_prefix(source),
                    reader.buffer_position()
                )))
            }
        }
        buf.clear();
    }

    root.ok_or_else(|| UrfaError::other("schema xml has no root element"))
}

/// `"path: "` when `source` is known, else empty — prefixed onto parse error
/// messages so they name the offending file when one exists.
fn source_prefix(source: Option<&str>) -> String {
    source.map(|s| format!("{s}: ")).unwrap_or_default()
}

fn read_attrs(
    e: &quick_xml::events::BytesStart<'_>,
    source: Option<&str>,
) -> Result<HashMap<String, String>, UrfaError> {
    let mut map = HashMap::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|e| {
            UrfaError::other(format!("{}malformed attribute: {e}", source_prefix(source)))
        })?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|e| {
                UrfaError::other(format!(
                    "{}malformed attribute value: {e}",
                    source_prefix(source)
                ))
            })?
            .into_owned();
        map.insert(key, value);
    }
    Ok(map)
}

fn attach(stack: &mut [XmlElement], root: &mut Option<XmlElement>, elem: XmlElement) {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(elem);
    } else {
        *root = Some(elem);
    }
}

/// Loads a schema document from its already-read text content.
pub fn load_str(xml: &str, sink: &dyn ErrorSink) -> Result<FunctionTable, UrfaError> {
    load_str_from(xml, sink, None)
}

/// Same as [`load_str`], but `source` (a file path or other origin label) is
/// folded into parse-error messages and reported through `sink`, matching
/// the quick-xml-errors-go-through-the-sink requirement `load_file` relies
/// on.
fn load_str_from(xml: &str, sink: &dyn ErrorSink, source: Option<&str>) -> Result<FunctionTable, UrfaError> {
    let root = parse_xml_tree(xml, source).map_err(|e| report(sink, e))?;
    if !root.name.eq_ignore_ascii_case("urfa") {
        return Err(report(
            sink,
            UrfaError::other(format!("unexpected root element <{}>, expected <urfa>", root.name)),
        ));
    }

    let mut table = FunctionTable::new();
    for child in &root.children {
        if !child.name.eq_ignore_ascii_case("function") {
            continue;
        }
        match build_function(child) {
            Ok(f) => table.insert(f),
            Err(e) => {
                report(sink, e);
            }
        }
    }
    Ok(table)
}

/// Loads a schema document from a file path, or [`DEFAULT_API_XML_PATH`] if
/// `path` is `None`.
pub fn load_file(path: Option<&Path>, sink: &dyn ErrorSink) -> Result<FunctionTable, UrfaError> {
    let path_buf;
    let path = match path {
        Some(p) => p,
        None => {
            path_buf = std::path::PathBuf::from(DEFAULT_API_XML_PATH);
            &path_buf
        }
    };
    let contents = fs::read_to_string(path).map_err(|e| {
        report(
            sink,
            UrfaError {
                kind: ErrorKind::System,
                message: format!("failed to read schema file {}: {e}", path.display()),
            },
        )
    })?;
    load_str_from(&contents, sink, Some(&path.display().to_string()))
}

fn report(sink: &dyn ErrorSink, err: UrfaError) -> UrfaError {
    warn!(kind = %err.kind, message = %err.message, "schema load problem");
    let kind = sink.report(err.kind, &err.message);
    UrfaError {
        kind,
        message: err.message,
    }
}

fn build_function(elem: &XmlElement) -> Result<Function, UrfaError> {
    let name = elem
        .attrs
        .get("name")
        .filter(|s| !s.is_empty())
        .ok_or_else(|| UrfaError::other("function missing non-empty name attribute"))?
        .clone();
    let id_str = elem
        .attrs
        .get("id")
        .ok_or_else(|| UrfaError::other(format!("function '{name}' missing id attribute")))?;
    let id = parse_c_style_int(id_str)
        .ok_or_else(|| UrfaError::other(format!("function '{name}' has unparseable id '{id_str}'")))?;

    let mut input = Ast::empty();
    let mut output = Ast::empty();

    for child in &elem.children {
        if child.name.eq_ignore_ascii_case("input") {
            build_body(&mut input, input.root(), &child.children)?;
        } else if child.name.eq_ignore_ascii_case("output") {
            build_body(&mut output, output.root(), &child.children)?;
        } else {
            warn!(function = %name, element = %child.name, "unrecognized element inside <function>, ignoring");
        }
    }

    Ok(Function {
        name,
        id,
        input,
        output,
    })
}

/// Parses a signed integer the way C's `strtol(s, NULL, 0)` would: a
/// `0x`/`0X` prefix selects base 16, otherwise base 10; any trailing
/// non-whitespace byte after the digits is an error.
fn parse_c_style_int(s: &str) -> Option<i32> {
    let trimmed = s.trim();
    let (negative, rest) = match trimmed.strip_prefix('-') {
        Some(r) => (true, r),
        None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };
    let (radix, digits) = if let Some(hex) = rest.strip_prefix("0x").or_else(|| rest.strip_prefix("0X")) {
        (16, hex)
    } else {
        (10, rest)
    };
    if digits.is_empty() {
        return None;
    }
    let value = i64::from_str_radix(digits, radix).ok()?;
    let value = if negative { -value } else { value };
    i32::try_from(value).ok()
}

fn build_body(ast: &mut Ast, parent: NodeId, elements: &[XmlElement]) -> Result<(), UrfaError> {
    for elem in elements {
        let kind = NodeKind::node_kind_from_name(&elem.name);
        if kind == NodeKind::Unknown {
            return Err(UrfaError::other(format!("unrecognized element <{}> in function body", elem.name)));
        }
        if matches!(
            kind,
            NodeKind::Call | NodeKind::Parameter | NodeKind::Message | NodeKind::Shift | NodeKind::Remove
        ) {
            return Err(UrfaError::other(format!(
                "element <{}> has no defined loader semantics and is rejected",
                elem.name
            )));
        }
        if kind == NodeKind::Root {
            return Err(UrfaError::other("<root> may not appear inside a function body"));
        }

        let array_name = if kind == NodeKind::For {
            Some(format!("array-{}", ast.count_preceding_for_siblings(parent) + 1))
        } else {
            None
        };

        let node_id = ast.push_child(parent, kind);
        let data = build_node_data(kind, elem, array_name)?;
        if kind == NodeKind::Break && !ast.has_enclosing_for(node_id) {
            return Err(UrfaError::other("<break> must be nested inside a <for>"));
        }
        ast.set_data(node_id, data);

        if matches!(kind, NodeKind::For | NodeKind::If) && !elem.children.is_empty() {
            build_body(ast, node_id, &elem.children)?;
        }
    }
    Ok(())
}

fn build_node_data(kind: NodeKind, elem: &XmlElement, array_name: Option<String>) -> Result<NodeData, UrfaError> {
    let attr = |key: &str| elem.attrs.get(key).cloned();
    let require = |key: &str| {
        attr(key).ok_or_else(|| UrfaError::other(format!("<{}> missing required attribute '{key}'", elem.name)))
    };

    let mut data = NodeData::default();

    match kind {
        NodeKind::Integer | NodeKind::Long | NodeKind::Double | NodeKind::String | NodeKind::IpAddress => {
            data.name = Some(require("name")?);
            data.array_index = attr("array_index");
            data.defval = attr("default");
        }
        NodeKind::If => {
            data.variable = Some(require("variable")?);
            data.value = Some(require("value")?);
            let cond_str = require("condition")?;
            data.condition = Some(
                IfCondition::parse(&cond_str)
                    .ok_or_else(|| UrfaError::other(format!("<if> condition must be eq or ne, got '{cond_str}'")))?,
            );
        }
        NodeKind::For => {
            data.name = Some(require("name")?);
            data.from = Some(require("from")?);
            data.count = Some(require("count")?);
            data.array_name = array_name;
        }
        NodeKind::Set => {
            let src = attr("src");
            let value = attr("value");
            let dst = attr("dst");
            if src.is_some() && value.is_some() {
                return Err(UrfaError::other("<set> cannot have both 'src' and 'value'"));
            }
            if src.is_none() && dst.is_none() {
                return Err(UrfaError::other("<set> must have at least one of 'src' or 'dst'"));
            }
            data.src = src;
            data.src_index = attr("src_index");
            data.dst = dst;
            data.dst_index = attr("dst_index");
            data.value = value;
        }
        NodeKind::Error => {
            let code_str = require("code")?;
            data.code = Some(
                code_str
                    .trim()
                    .parse::<i64>()
                    .map_err(|_| UrfaError::other(format!("<error> code must be a decimal integer, got '{code_str}'")))?,
            );
            data.comment = attr("comment");
            data.variable = attr("variable");
        }
        NodeKind::Break => {}
        NodeKind::Root | NodeKind::Call | NodeKind::Parameter | NodeKind::Message | NodeKind::Shift | NodeKind::Remove => {
            unreachable!("rejected before data construction")
        }
    }

    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use urfa_common::NullSink;

    #[test]
    fn loads_simple_function_with_no_body() {
        let xml = r#"<urfa><function name="ping" id="1"/></urfa>"#;
        let table = load_str(xml, &NullSink).unwrap();
        let f = table.get("ping").unwrap();
        assert_eq!(f.id, 1);
        assert!(!f.input.has_children(f.input.root()));
        assert!(!f.output.has_children(f.output.root()));
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let xml = r#"<urfa><function name="Ping" id="1"/></urfa>"#;
        let table = load_str(xml, &NullSink).unwrap();
        assert!(table.get("PING").is_some());
        assert!(table.get("ping").is_some());
    }

    #[test]
    fn parses_hex_and_decimal_ids() {
        let xml = r#"<urfa><function name="a" id="0x10"/><function name="b" id="16"/></urfa>"#;
        let table = load_str(xml, &NullSink).unwrap();
        assert_eq!(table.get("a").unwrap().id, 16);
        assert_eq!(table.get("b").unwrap().id, 16);
    }

    #[test]
    fn skips_function_with_bad_id() {
        let xml = r#"<urfa><function name="a" id="not-a-number"/><function name="b" id="2"/></urfa>"#;
        let table = load_str(xml, &NullSink).unwrap();
        assert!(table.get("a").is_none());
        assert!(table.get("b").is_some());
    }

    #[test]
    fn duplicate_names_last_one_wins() {
        let xml = r#"<urfa><function name="dup" id="1"/><function name="dup" id="2"/></urfa>"#;
        let table = load_str(xml, &NullSink).unwrap();
        assert_eq!(table.get("dup").unwrap().id, 2);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn for_array_name_follows_sibling_rank() {
        let xml = r#"<urfa><function name="f" id="1">
            <output>
                <for name="i" from="0" count="1"><integer name="a"/></for>
                <for name="j" from="0" count="1"><integer name="b"/></for>
            </output>
        </function></urfa>"#;
        let table = load_str(xml, &NullSink).unwrap();
        let f = table.get("f").unwrap();
        let fors: Vec<_> = f.output.children(f.output.root()).collect();
        assert_eq!(f.output.node(fors[0]).data.array_name.as_deref(), Some("array-1"));
        assert_eq!(f.output.node(fors[1]).data.array_name.as_deref(), Some("array-2"));
    }

    #[test]
    fn set_with_both_src_and_value_fails_function() {
        let xml = r#"<urfa><function name="bad" id="1">
            <input><set src="a" value="1" dst="b"/></input>
        </function></urfa>"#;
        let table = load_str(xml, &NullSink).unwrap();
        assert!(table.get("bad").is_none());
    }

    #[test]
    fn break_outside_for_fails_function() {
        let xml = r#"<urfa><function name="bad" id="1">
            <input><break/></input>
        </function></urfa>"#;
        let table = load_str(xml, &NullSink).unwrap();
        assert!(table.get("bad").is_none());
    }

    #[test]
    fn reserved_node_kinds_are_rejected() {
        let xml = r#"<urfa><function name="bad" id="1">
            <input><call/></input>
        </function></urfa>"#;
        let table = load_str(xml, &NullSink).unwrap();
        assert!(table.get("bad").is_none());
    }

    #[test]
    fn dump_then_reload_preserves_function_count_and_ids() {
        let xml = r#"<urfa>
            <function name="alpha" id="1">
                <input><integer name="x" default="7"/></input>
                <output><for name="i" from="0" count="cnt"><integer name="v" array_index="i"/></for></output>
            </function>
            <function name="beta" id="2"/>
        </urfa>"#;
        let table = load_str(xml, &NullSink).unwrap();

        let mut buf = Vec::new();
        table.dump(&mut buf).unwrap();
        let dumped = String::from_utf8(buf).unwrap();

        let reloaded = load_str(&dumped, &NullSink).unwrap();
        assert_eq!(reloaded.len(), table.len());
        assert_eq!(reloaded.get("alpha").unwrap().id, table.get("alpha").unwrap().id);
        assert_eq!(reloaded.get("beta").unwrap().id, table.get("beta").unwrap().id);
        assert!(reloaded.get("alpha").unwrap().output.has_children(reloaded.get("alpha").unwrap().output.root()));
    }

    struct RecordingSink {
        reports: std::cell::RefCell<Vec<(ErrorKind, String)>>,
    }

    impl RecordingSink {
        fn new() -> Self {
            Self {
                reports: std::cell::RefCell::new(Vec::new()),
            }
        }
    }

    impl ErrorSink for RecordingSink {
        fn report(&self, kind: ErrorKind, message: &str) -> ErrorKind {
            self.reports.borrow_mut().push((kind, message.to_string()));
            kind
        }
    }

    #[test]
    fn malformed_xml_is_reported_through_the_sink() {
        let xml = r#"<urfa><function name="a" id="1""#;
        let sink = RecordingSink::new();
        let err = load_str(xml, &sink).unwrap_err();
        assert!(err.message.contains("xml parse error"));
        let reports = sink.reports.borrow();
        assert_eq!(reports.len(), 1);
        assert!(reports[0].1.contains("xml parse error"));
    }

    #[test]
    fn load_file_parse_error_names_the_file() {
        let path = std::env::temp_dir().join(format!("urfa-schema-test-{}.xml", std::process::id()));
        std::fs::write(&path, r#"<urfa><function name="a" id="1""#).unwrap();
        let err = load_file(Some(&path), &NullSink).unwrap_err();
        std::fs::remove_file(&path).ok();
        assert!(err.message.contains(&path.display().to_string()));
    }
}
