//! Renders pickled script syntax trees back into script source.
//!
//! Nodes are dispatched on their module into one of three families (core
//! statements, screen language, ATL) and then on their class name through a
//! static table of render functions. Every render function returns a text
//! fragment; statements end with their own newline and nested blocks are
//! indented line-wise by [`indent`].

mod ast;
mod atl;
mod sl2;

use std::collections::{HashMap, VecDeque};
use std::fmt::Write;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{EnumString, IntoStaticStr};

use crate::error::{Error, Result};
use crate::format::pickle::{self, Dict, Instance, Value};
use crate::format::script::{ScriptContainer, Slot};

/// The only script header version these render tables understand.
pub const SCRIPT_VERSION: i64 = 5_003_000;

pub const INDENT: &str = "    ";

/// Deepest node nesting a run will follow. Memo back-references can make a
/// tree cyclic.
pub const MAX_NESTING: usize = 100;

pub type RenderFn = fn(&mut Decompiler, &Instance) -> Result<String>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecompileOptions {
    /// Strip trailing whitespace and collapse long runs of blank lines.
    pub clean_output: bool,
    /// How many recently visited nodes a render error reports.
    pub trail_len: usize,
    /// Stamped into the preamble when set.
    pub decompiled_at: Option<DateTime<Utc>>,
}

impl Default for DecompileOptions {
    fn default() -> Self {
        Self {
            clean_output: true,
            trail_len: 100,
            decompiled_at: None,
        }
    }
}

#[derive(EnumString, IntoStaticStr, Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ModuleFamily {
    #[strum(serialize = "renpy.ast")]
    Ast,
    #[strum(serialize = "renpy.sl2.slast")]
    Sl2,
    #[strum(serialize = "renpy.atl")]
    Atl,
}

impl ModuleFamily {
    fn renderers(self) -> &'static HashMap<&'static str, RenderFn> {
        match self {
            ModuleFamily::Ast => &ast::RENDERERS,
            ModuleFamily::Sl2 => &sl2::RENDERERS,
            ModuleFamily::Atl => &atl::RENDERERS,
        }
    }
}

/// Decompiles the pre-transform chunk of a script container.
///
/// Falls back to the legacy chunk, with a warning, when there is no
/// pre-transform chunk.
pub fn decompile_script(container: &ScriptContainer, options: &DecompileOptions) -> Result<String> {
    let chunk = match container.chunk(Slot::BeforeStaticTransforms) {
        Some(chunk) => chunk,
        None => {
            let chunk = container
                .chunk(Slot::Legacy)
                .ok_or(Error::MissingScriptChunk)?;
            log::warn!("decompiling a legacy script chunk, output is best-effort");
            chunk
        }
    };

    let root = pickle::load(chunk.data.clone())?;
    let parts = root
        .to_vec()
        .filter(|parts| parts.len() == 2)
        .ok_or_else(|| Error::unexpected("(header, statements) pair", &root))?;
    let header = parts[0]
        .as_dict()
        .ok_or_else(|| Error::unexpected("script header dict", &parts[0]))?
        .borrow();

    match header.get("version") {
        Some(v) if v.as_i64() == Some(SCRIPT_VERSION) => {}
        other => {
            return Err(Error::UnsupportedScriptVersion {
                found: other.map_or_else(|| "none".to_string(), |v| v.to_string()),
                expected: SCRIPT_VERSION,
            })
        }
    }

    let mut out = preamble(&header, options);

    let mut statements = parts[1]
        .to_vec()
        .ok_or_else(|| Error::unexpected("statement list", &parts[1]))?;
    if statements.last().is_some_and(is_implicit_return) {
        statements.pop();
    }

    let mut decompiler = Decompiler::new(options.trail_len);
    let mut code = String::new();
    for statement in &statements {
        let rendered = decompiler
            .render_value(statement)
            .map_err(|e| decompiler.wrap_error(e))?;
        code.push_str(&rendered);
        code.push('\n');
    }

    if options.clean_output {
        code = clean_output(&code);
    }
    out.push_str(&code);
    Ok(out)
}

fn preamble(header: &Dict, options: &DecompileOptions) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Ren'Py decompiled script.");
    let _ = writeln!(out, "# Decompiled with renpak");
    if let Some(at) = options.decompiled_at {
        let _ = writeln!(out, "# Decompiled on {}", at.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    let _ = writeln!(out, "# Script header:");
    for (key, value) in header.iter() {
        match value.as_text() {
            Some(text) => {
                let _ = writeln!(out, "#     {key}: {text}");
            }
            None => {
                let _ = writeln!(out, "#     {key}: {value}");
            }
        }
    }
    out.push_str("\n\n\n");
    out
}

fn is_implicit_return(statement: &Value) -> bool {
    let Some(node) = statement.as_instance() else {
        return false;
    };
    node.module() == "renpy.ast"
        && node.name() == "Return"
        && NodeState::of(node).is_ok_and(|st| st.opt("expression").is_none())
}

/// Strips trailing whitespace and turns runs of three or more blank lines into one.
pub fn clean_output(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0usize;
    for line in text.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            blank_run += 1;
            continue;
        }
        let keep = if blank_run >= 3 { 1 } else { blank_run };
        out.extend(std::iter::repeat('\n').take(keep));
        blank_run = 0;
        out.push_str(line);
        out.push('\n');
    }
    out
}

/// Prefixes every non-empty line with one indentation unit.
pub fn indent(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + INDENT.len() * 8);
    for line in text.split_inclusive('\n') {
        if !line.trim().is_empty() {
            out.push_str(INDENT);
        }
        out.push_str(line);
    }
    out
}

/// Double-quotes a string literal.
pub(crate) fn quote(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Everything after the last `.` of a store name, dropped for the default store.
pub(crate) fn store_prefix(store: &str) -> String {
    match store.rsplit('.').next() {
        Some(last) if !last.is_empty() && last != "store" => format!("{last}."),
        _ => String::new(),
    }
}

/// A branch guard of `None` or `True` is an unconditional `else`.
pub(crate) fn is_else_guard(guard: &Value, rendered: &str) -> bool {
    guard.is_none() || rendered == "True"
}

/// Attribute access over a node's pickled state.
///
/// State arrives as a plain dict (`__dict__` objects), as `(None, slots)` for
/// slotted nodes, or as `(dict, slots)`; the two halves are merged.
#[derive(Debug, Clone)]
pub struct NodeState {
    class: String,
    fields: Dict,
}

impl NodeState {
    pub fn of(node: &Instance) -> Result<Self> {
        let mut fields = Dict::new();
        match node.state() {
            None | Some(Value::None) => {}
            Some(Value::Dict(d)) => fields = d.borrow().clone(),
            Some(Value::Tuple(halves)) if halves.len() == 2 => {
                for half in halves.iter() {
                    match half {
                        Value::None => {}
                        Value::Dict(d) => {
                            for (k, v) in d.borrow().iter() {
                                fields.insert(k, v.clone());
                            }
                        }
                        other => return Err(Error::unexpected("state dict", other)),
                    }
                }
            }
            Some(other) => return Err(Error::unexpected("node state", other)),
        }
        Ok(Self {
            class: node.class().to_string(),
            fields,
        })
    }

    pub fn get(&self, field: &'static str) -> Result<&Value> {
        self.fields.get(field).ok_or_else(|| Error::MissingField {
            class: self.class.clone(),
            field,
        })
    }

    /// `None` for an absent field or a Python `None`.
    pub fn opt(&self, field: &str) -> Option<&Value> {
        self.fields.get(field).filter(|v| !v.is_none())
    }

    pub fn text(&self, field: &'static str) -> Result<&str> {
        let v = self.get(field)?;
        v.as_text().ok_or_else(|| Error::unexpected("str", v))
    }

    pub fn opt_text(&self, field: &'static str) -> Result<Option<&str>> {
        match self.opt(field) {
            None => Ok(None),
            Some(v) => v
                .as_text()
                .map(Some)
                .ok_or_else(|| Error::unexpected("str", v)),
        }
    }

    /// A required sequence field. A Python `None` reads as empty.
    pub fn list(&self, field: &'static str) -> Result<Vec<Value>> {
        match self.get(field)? {
            Value::None => Ok(Vec::new()),
            v => v.to_vec().ok_or_else(|| Error::unexpected("list", v)),
        }
    }

    /// An optional sequence field; absent reads as empty.
    pub fn opt_list(&self, field: &'static str) -> Result<Vec<Value>> {
        match self.opt(field) {
            None => Ok(Vec::new()),
            Some(v) => v.to_vec().ok_or_else(|| Error::unexpected("list", v)),
        }
    }

    pub fn bool(&self, field: &str) -> bool {
        match self.opt(field) {
            Some(Value::Bool(b)) => *b,
            Some(v) => v.as_i64().is_some_and(|n| n != 0),
            None => false,
        }
    }
}

fn describe(node: &Instance) -> String {
    let line = NodeState::of(node).ok().and_then(|st| {
        st.opt("linenumber").and_then(Value::as_i64).or_else(|| {
            ["loc", "location"]
                .iter()
                .find_map(|f| st.opt(f).and_then(Value::to_vec))
                .and_then(|loc| loc.get(1).and_then(Value::as_i64))
        })
    });
    match line {
        Some(line) => format!("{} (line {})", node.class(), line),
        None => node.class().to_string(),
    }
}

/// One decompilation run. Owns the trail of recently visited nodes.
pub struct Decompiler {
    trail: VecDeque<String>,
    trail_len: usize,
    depth: usize,
}

impl Default for Decompiler {
    fn default() -> Self {
        Self::new(DecompileOptions::default().trail_len)
    }
}

impl Decompiler {
    pub fn new(trail_len: usize) -> Self {
        Self {
            trail: VecDeque::with_capacity(trail_len),
            trail_len,
            depth: 0,
        }
    }

    fn visit(&mut self, node: &Instance) {
        if self.trail_len == 0 {
            return;
        }
        if self.trail.len() == self.trail_len {
            self.trail.pop_front();
        }
        self.trail.push_back(describe(node));
    }

    pub fn trail(&self) -> impl Iterator<Item = &str> {
        self.trail.iter().map(String::as_str)
    }

    fn wrap_error(&mut self, source: Error) -> Error {
        Error::Render {
            source: Box::new(source),
            trail: self.trail.drain(..).collect(),
        }
    }

    pub fn render(&mut self, node: &Instance) -> Result<String> {
        self.visit(node);
        if self.depth >= MAX_NESTING {
            return Err(Error::NestingTooDeep { limit: MAX_NESTING });
        }
        self.depth += 1;
        let rendered = self.dispatch(node);
        self.depth -= 1;
        rendered
    }

    fn dispatch(&mut self, node: &Instance) -> Result<String> {
        let family = ModuleFamily::from_str(node.module())
            .map_err(|_| Error::UnknownModule(node.module().to_string()))?;
        let render = family
            .renderers()
            .get(node.name())
            .ok_or_else(|| Error::UnknownClass {
                module: node.module().to_string(),
                name: node.name().to_string(),
            })?;
        render(self, node)
    }

    pub fn render_value(&mut self, value: &Value) -> Result<String> {
        match value {
            Value::Instance(node) => self.render(node),
            other => Err(Error::unexpected("syntax node", other)),
        }
    }

    /// Renders a statement list by concatenation. `None` is an empty block.
    pub fn render_block(&mut self, block: &Value) -> Result<String> {
        if block.is_none() {
            return Ok(String::new());
        }
        let statements = block
            .to_vec()
            .ok_or_else(|| Error::unexpected("statement list", block))?;
        let mut out = String::new();
        for statement in &statements {
            out.push_str(&self.render_value(statement)?);
        }
        Ok(out)
    }

    /// Renders an expression: source text verbatim, wrapped expressions
    /// through their node, and plain Python literals.
    pub fn expr(&mut self, value: &Value) -> Result<String> {
        match value {
            Value::Text(s) => Ok(s.to_string()),
            Value::Instance(node) => self.render(node),
            Value::None | Value::Bool(_) | Value::Int(_) | Value::Long(_) | Value::Float(_) => {
                Ok(value.to_string())
            }
            other => Err(Error::unexpected("expression", other)),
        }
    }

    /// `name value` pairs from a list of `(name, expression)` tuples.
    pub fn keywords(&mut self, pairs: &[Value]) -> Result<Vec<String>> {
        pairs
            .iter()
            .map(|pair| {
                let items = pair
                    .to_vec()
                    .filter(|items| items.len() == 2)
                    .ok_or_else(|| Error::unexpected("(name, value) pair", pair))?;
                let name = items[0]
                    .as_text()
                    .ok_or_else(|| Error::unexpected("keyword name", &items[0]))?;
                Ok(format!("{} {}", name, self.expr(&items[1])?))
            })
            .collect()
    }
}
