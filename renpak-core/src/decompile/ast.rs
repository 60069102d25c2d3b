//! Core statements (`renpy.ast`).

use std::collections::HashMap;

use once_cell::sync::Lazy;

use super::{indent, is_else_guard, quote, store_prefix, Decompiler, NodeState, RenderFn};
use crate::error::{Error, Result};
use crate::format::pickle::{Instance, Value};

pub(super) static RENDERERS: Lazy<HashMap<&'static str, RenderFn>> = Lazy::new(|| {
    HashMap::from([
        ("Init", init as RenderFn),
        ("Define", define),
        ("PyCode", py_code),
        ("PyExpr", py_expr),
        ("Default", default),
        ("Python", python),
        ("Return", return_),
        ("Label", label),
        ("Screen", screen),
        ("ParameterInfo", parameter_info),
        ("ArgumentInfo", argument_info),
        ("Image", image),
        ("Style", style),
        ("Transform", transform),
        ("Jump", jump),
        ("UserStatement", user_statement),
        ("Say", say),
        ("Show", show),
        ("Scene", scene),
        ("Hide", hide),
        ("With", with),
        ("If", if_),
        ("Menu", menu),
        ("While", while_),
        ("Pass", pass),
        ("Call", call),
    ])
});

fn exprs(d: &mut Decompiler, list: &Value) -> Result<Vec<String>> {
    list.to_vec()
        .ok_or_else(|| Error::unexpected("expression list", list))?
        .iter()
        .map(|v| d.expr(v))
        .collect()
}

fn names(list: &Value) -> Result<String> {
    let parts = list
        .to_vec()
        .ok_or_else(|| Error::unexpected("name list", list))?;
    let parts = parts
        .iter()
        .map(|p| p.as_text().ok_or_else(|| Error::unexpected("str", p)))
        .collect::<Result<Vec<_>>>()?;
    Ok(parts.join(" "))
}

fn block(d: &mut Decompiler, block: &Value) -> Result<String> {
    let body = d.render_block(block)?;
    if body.trim().is_empty() {
        return Ok(indent("pass\n"));
    }
    Ok(indent(&body))
}

fn atl_block(d: &mut Decompiler, atl: &Value) -> Result<String> {
    let mut body = d.render_value(atl)?;
    if !body.ends_with('\n') {
        body.push('\n');
    }
    Ok(indent(&body))
}

fn init(d: &mut Decompiler, node: &Instance) -> Result<String> {
    let st = NodeState::of(node)?;
    d.render_block(st.get("block")?)
}

fn define(d: &mut Decompiler, node: &Instance) -> Result<String> {
    let st = NodeState::of(node)?;
    let store = store_prefix(st.opt_text("store")?.unwrap_or("store"));
    let index = match st.opt("index") {
        Some(index) => format!("[{}]", d.expr(index)?),
        None => String::new(),
    };
    let operator = st.opt_text("operator")?.unwrap_or("=");
    Ok(format!(
        "define {}{}{} {} {}\n",
        store,
        st.text("varname")?,
        index,
        operator,
        d.expr(st.get("code")?)?
    ))
}

fn default(d: &mut Decompiler, node: &Instance) -> Result<String> {
    let st = NodeState::of(node)?;
    let store = store_prefix(st.opt_text("store")?.unwrap_or("store"));
    Ok(format!(
        "default {}{} = {}\n",
        store,
        st.text("varname")?,
        d.expr(st.get("code")?)?
    ))
}

/// Compiled Python. The state is `(version, source, location, mode, ...)`;
/// older layouts are searched for the first source-like value.
fn py_code(d: &mut Decompiler, node: &Instance) -> Result<String> {
    let state = node.state().ok_or_else(|| Error::MissingField {
        class: node.class().to_string(),
        field: "source",
    })?;

    if let Some(items) = state.to_vec() {
        if items.first().and_then(Value::as_i64).is_some() {
            if let Some(source) = items.get(1) {
                return d.expr(source);
            }
        }
        let source = items.iter().find(|v| match v {
            Value::Text(_) => true,
            Value::Instance(i) => i.name() == "PyExpr",
            _ => false,
        });
        if let Some(source) = source {
            return d.expr(source);
        }
    }

    let st = NodeState::of(node)?;
    d.expr(st.get("source")?)
}

/// Expression text is the 4th constructor argument when it is a string,
/// else the 1st.
fn py_expr(_d: &mut Decompiler, node: &Instance) -> Result<String> {
    let args = node.args();
    args.get(3)
        .and_then(Value::as_text)
        .or_else(|| args.first().and_then(Value::as_text))
        .map(str::to_string)
        .ok_or_else(|| {
            Error::unexpected(
                "expression text argument",
                format!("{} arguments", args.len()),
            )
        })
}

fn python(d: &mut Decompiler, node: &Instance) -> Result<String> {
    let st = NodeState::of(node)?;
    let code = d.render_value(st.get("code")?)?;
    let code = code.trim_matches('\n');
    if code.contains('\n') {
        Ok(format!("init python:\n{}\n", indent(code)))
    } else {
        Ok(format!("$ {code}\n"))
    }
}

fn return_(d: &mut Decompiler, node: &Instance) -> Result<String> {
    let st = NodeState::of(node)?;
    match st.opt("expression") {
        Some(expr) => Ok(format!("return {}\n", d.expr(expr)?)),
        None => Ok("return\n".to_string()),
    }
}

fn label(d: &mut Decompiler, node: &Instance) -> Result<String> {
    let st = NodeState::of(node)?;
    let params = match st.opt("parameters") {
        Some(p) => format!("({})", d.render_value(p)?),
        None => String::new(),
    };
    Ok(format!(
        "label {}{}:\n{}",
        st.text("name")?,
        params,
        block(d, st.get("block")?)?
    ))
}

fn screen(d: &mut Decompiler, node: &Instance) -> Result<String> {
    let st = NodeState::of(node)?;
    d.render_value(st.get("screen")?)
}

fn parameter_info(d: &mut Decompiler, node: &Instance) -> Result<String> {
    let st = NodeState::of(node)?;
    let mut out = Vec::new();
    for param in st.list("parameters")? {
        let pair = param
            .to_vec()
            .filter(|p| p.len() == 2)
            .ok_or_else(|| Error::unexpected("(name, default) pair", &param))?;
        let name = pair[0]
            .as_text()
            .ok_or_else(|| Error::unexpected("parameter name", &pair[0]))?;
        if pair[1].is_none() {
            out.push(name.to_string());
        } else {
            out.push(format!("{}={}", name, d.expr(&pair[1])?));
        }
    }
    if let Some(extra) = st.opt_text("extrapos")? {
        out.push(format!("*{extra}"));
    }
    if let Some(extra) = st.opt_text("extrakw")? {
        out.push(format!("**{extra}"));
    }
    Ok(out.join(", "))
}

fn argument_info(d: &mut Decompiler, node: &Instance) -> Result<String> {
    let st = NodeState::of(node)?;
    let starred = st.opt_list("starred_indexes")?;
    let double_starred = st.opt_list("doublestarred_indexes")?;
    let marked = |set: &[Value], i: usize| set.iter().any(|v| v.as_i64() == Some(i as i64));

    let mut out = Vec::new();
    for (i, arg) in st.list("arguments")?.iter().enumerate() {
        let pair = arg
            .to_vec()
            .filter(|p| p.len() == 2)
            .ok_or_else(|| Error::unexpected("(keyword, value) pair", arg))?;
        let value = d.expr(&pair[1])?;
        let rendered = match pair[0].as_text() {
            Some(keyword) => format!("{keyword}={value}"),
            None if marked(&starred, i) => format!("*{value}"),
            None if marked(&double_starred, i) => format!("**{value}"),
            None => value,
        };
        out.push(rendered);
    }
    if let Some(extra) = st.opt("extrapos") {
        out.push(format!("*{}", d.expr(extra)?));
    }
    if let Some(extra) = st.opt("extrakw") {
        out.push(format!("**{}", d.expr(extra)?));
    }
    Ok(format!("({})", out.join(", ")))
}

fn image(d: &mut Decompiler, node: &Instance) -> Result<String> {
    let st = NodeState::of(node)?;
    let name = names(st.get("imgname")?)?;
    if let Some(code) = st.opt("code") {
        return Ok(format!("image {} = {}\n", name, d.expr(code)?));
    }
    if let Some(atl) = st.opt("atl") {
        return Ok(format!("image {}:\n{}", name, atl_block(d, atl)?));
    }
    Err(Error::unexpected("image with code or ATL", &name))
}

fn style(d: &mut Decompiler, node: &Instance) -> Result<String> {
    let st = NodeState::of(node)?;
    let mut head = format!("style {}", st.text("style_name")?);
    if let Some(parent) = st.opt("parent") {
        head.push_str(&format!(" is {}", d.expr(parent)?));
    }

    let mut body = String::new();
    if st.bool("clear") {
        body.push_str("clear\n");
    }
    if let Some(take) = st.opt("take") {
        body.push_str(&format!("take {}\n", d.expr(take)?));
    }
    for attr in st.opt_list("delattr")? {
        body.push_str(&format!("del {}\n", d.expr(&attr)?));
    }
    if let Some(variant) = st.opt("variant") {
        body.push_str(&format!("variant {}\n", d.expr(variant)?));
    }
    if let Some(props) = st.opt("properties") {
        let props = props
            .as_dict()
            .ok_or_else(|| Error::unexpected("property dict", props))?
            .borrow()
            .clone();
        for (name, value) in props.iter() {
            body.push_str(&format!("{} {}\n", name, d.expr(value)?));
        }
    }

    if body.is_empty() {
        Ok(format!("{head}\n"))
    } else {
        Ok(format!("{head}:\n{}", indent(&body)))
    }
}

fn transform(d: &mut Decompiler, node: &Instance) -> Result<String> {
    let st = NodeState::of(node)?;
    let params = match st.opt("parameters") {
        Some(p) => format!("({})", d.render_value(p)?),
        None => String::new(),
    };
    Ok(format!(
        "transform {}{}:\n{}",
        st.text("varname")?,
        params,
        atl_block(d, st.get("atl")?)?
    ))
}

fn jump(d: &mut Decompiler, node: &Instance) -> Result<String> {
    let st = NodeState::of(node)?;
    let target = d.expr(st.get("target")?)?;
    if st.bool("expression") {
        Ok(format!("jump expression {target}\n"))
    } else {
        Ok(format!("jump {target}\n"))
    }
}

/// Raw lexer lines: `(filename, linenumber, text, subblock)` tuples.
fn lexer_block(lines: &[Value]) -> Result<String> {
    let mut out = String::new();
    for line in lines {
        let fields = line
            .to_vec()
            .filter(|f| f.len() >= 4)
            .ok_or_else(|| Error::unexpected("lexer line", line))?;
        let text = fields[2]
            .as_text()
            .ok_or_else(|| Error::unexpected("str", &fields[2]))?;
        out.push_str(text);
        out.push('\n');
        if let Some(sub) = fields[3].to_vec().filter(|s| !s.is_empty()) {
            out.push_str(&indent(&lexer_block(&sub)?));
        }
    }
    Ok(out)
}

fn user_statement(d: &mut Decompiler, node: &Instance) -> Result<String> {
    let st = NodeState::of(node)?;
    let mut out = format!("{}\n", st.text("line")?);
    let code_block = st.opt_list("code_block")?;
    if !code_block.is_empty() {
        let mut body = String::new();
        for statement in &code_block {
            body.push_str(&d.render_value(statement)?);
        }
        out.push_str(&indent(&body));
    } else {
        let lines = st.opt_list("block")?;
        if !lines.is_empty() {
            out.push_str(&indent(&lexer_block(&lines)?));
        }
    }
    Ok(out)
}

fn say(d: &mut Decompiler, node: &Instance) -> Result<String> {
    let st = NodeState::of(node)?;
    let mut out = String::new();
    if let Some(who) = st.opt("who") {
        out.push_str(&d.expr(who)?);
        out.push(' ');
    }
    if let Some(attrs) = st.opt("attributes") {
        let attrs = names(attrs)?;
        if !attrs.is_empty() {
            out.push_str(&attrs);
            out.push(' ');
        }
    }
    if let Some(attrs) = st.opt("temporary_attributes") {
        let attrs = names(attrs)?;
        if !attrs.is_empty() {
            out.push_str(&format!("@ {attrs} "));
        }
    }
    out.push_str(&quote(st.text("what")?));
    if let Some(args) = st.opt("arguments") {
        out.push_str(&d.render_value(args)?);
    }
    if let Some(with) = st.opt("with_") {
        out.push_str(&format!(" with {}", d.expr(with)?));
    }
    out.push('\n');
    Ok(out)
}

/// `name [as tag] [at ...] [onlayer ...] [zorder ...] [behind ...]`.
///
/// Handles both the 3-field `(name, at_list, layer)` and the 7-field
/// `(name, expression, tag, at_list, layer, zorder, behind)` layouts.
fn imspec(d: &mut Decompiler, spec: &Value) -> Result<String> {
    let parts = spec
        .to_vec()
        .filter(|p| p.len() == 3 || p.len() >= 6)
        .ok_or_else(|| Error::unexpected("image specifier", spec))?;
    let field = |i: usize| parts.get(i).filter(|v| !v.is_none());
    let (expression, tag, at_list, layer, zorder, behind) = if parts.len() == 3 {
        (None, None, field(1), field(2), None, None)
    } else {
        (field(1), field(2), field(3), field(4), field(5), field(6))
    };

    let mut out = match expression {
        Some(expr) => format!("expression {}", d.expr(expr)?),
        None => names(&parts[0])?,
    };
    if let Some(tag) = tag {
        out.push_str(&format!(" as {}", d.expr(tag)?));
    }
    if let Some(at_list) = at_list {
        let at = exprs(d, at_list)?;
        if !at.is_empty() {
            out.push_str(&format!(" at {}", at.join(", ")));
        }
    }
    if let Some(layer) = layer {
        out.push_str(&format!(" onlayer {}", d.expr(layer)?));
    }
    if let Some(zorder) = zorder {
        out.push_str(&format!(" zorder {}", d.expr(zorder)?));
    }
    if let Some(behind) = behind {
        let behind = exprs(d, behind)?;
        if !behind.is_empty() {
            out.push_str(&format!(" behind {}", behind.join(", ")));
        }
    }
    Ok(out)
}

fn with_atl(d: &mut Decompiler, st: &NodeState, head: String) -> Result<String> {
    match st.opt("atl") {
        Some(atl) => Ok(format!("{head}:\n{}", atl_block(d, atl)?)),
        None => Ok(format!("{head}\n")),
    }
}

fn show(d: &mut Decompiler, node: &Instance) -> Result<String> {
    let st = NodeState::of(node)?;
    let head = format!("show {}", imspec(d, st.get("imspec")?)?);
    with_atl(d, &st, head)
}

fn scene(d: &mut Decompiler, node: &Instance) -> Result<String> {
    let st = NodeState::of(node)?;
    let head = match st.opt("imspec") {
        Some(spec) => format!("scene {}", imspec(d, spec)?),
        None => match st.opt("layer") {
            Some(layer) => format!("scene onlayer {}", d.expr(layer)?),
            None => "scene".to_string(),
        },
    };
    with_atl(d, &st, head)
}

fn hide(d: &mut Decompiler, node: &Instance) -> Result<String> {
    let st = NodeState::of(node)?;
    Ok(format!("hide {}\n", imspec(d, st.get("imspec")?)?))
}

fn with(d: &mut Decompiler, node: &Instance) -> Result<String> {
    let st = NodeState::of(node)?;
    let expr = d.expr(st.get("expr")?)?;
    match st.opt("paired") {
        Some(paired) if expr == "None" => Ok(format!("with {}\n", d.expr(paired)?)),
        _ => Ok(format!("with {expr}\n")),
    }
}

fn if_(d: &mut Decompiler, node: &Instance) -> Result<String> {
    let st = NodeState::of(node)?;
    let mut out = String::new();
    for (i, entry) in st.list("entries")?.iter().enumerate() {
        let pair = entry
            .to_vec()
            .filter(|p| p.len() == 2)
            .ok_or_else(|| Error::unexpected("(condition, block) entry", entry))?;
        let cond = d.expr(&pair[0])?;
        if i == 0 {
            out.push_str(&format!("if {cond}:\n"));
        } else if is_else_guard(&pair[0], &cond) {
            out.push_str("else:\n");
        } else {
            out.push_str(&format!("elif {cond}:\n"));
        }
        out.push_str(&block(d, &pair[1])?);
    }
    Ok(out)
}

fn menu(d: &mut Decompiler, node: &Instance) -> Result<String> {
    let st = NodeState::of(node)?;
    let mut out = match st.opt("arguments") {
        Some(args) => format!("menu{}:\n", d.render_value(args)?),
        None => "menu:\n".to_string(),
    };

    let mut body = String::new();
    if let Some(set) = st.opt("set") {
        body.push_str(&format!("set {}\n", d.expr(set)?));
    }
    let item_arguments = st.opt_list("item_arguments")?;
    for (i, item) in st.list("items")?.iter().enumerate() {
        let fields = item
            .to_vec()
            .filter(|f| f.len() == 3)
            .ok_or_else(|| Error::unexpected("(label, condition, block) item", item))?;
        let caption = fields[0]
            .as_text()
            .ok_or_else(|| Error::unexpected("menu label", &fields[0]))?;
        let mut line = quote(caption);

        if fields[2].is_none() {
            body.push_str(&line);
            body.push('\n');
            continue;
        }

        if let Some(args) = item_arguments.get(i).filter(|a| !a.is_none()) {
            line.push_str(&d.render_value(args)?);
        }
        let cond = d.expr(&fields[1])?;
        if !is_else_guard(&fields[1], &cond) {
            line.push_str(&format!(" if {cond}"));
        }
        body.push_str(&format!("{line}:\n"));
        body.push_str(&block(d, &fields[2])?);
    }
    out.push_str(&indent(&body));
    Ok(out)
}

fn while_(d: &mut Decompiler, node: &Instance) -> Result<String> {
    let st = NodeState::of(node)?;
    Ok(format!(
        "while {}:\n{}",
        d.expr(st.get("condition")?)?,
        block(d, st.get("block")?)?
    ))
}

fn pass(_d: &mut Decompiler, _node: &Instance) -> Result<String> {
    Ok("pass\n".to_string())
}

fn call(d: &mut Decompiler, node: &Instance) -> Result<String> {
    let st = NodeState::of(node)?;
    let mut out = String::from("call ");
    if st.bool("expression") {
        out.push_str("expression ");
    }
    out.push_str(&d.expr(st.get("label")?)?);
    if let Some(args) = st.opt("arguments") {
        out.push_str(&d.render_value(args)?);
    }
    out.push('\n');
    Ok(out)
}
