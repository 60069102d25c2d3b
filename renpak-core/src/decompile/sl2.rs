//! Screen language statements (`renpy.sl2.slast`).

use std::collections::HashMap;

use once_cell::sync::Lazy;

use super::{indent, is_else_guard, Decompiler, NodeState, RenderFn};
use crate::error::{Error, Result};
use crate::format::pickle::{Instance, Value};

pub(super) static RENDERERS: Lazy<HashMap<&'static str, RenderFn>> = Lazy::new(|| {
    HashMap::from([
        ("SLScreen", screen as RenderFn),
        ("SLDisplayable", displayable),
        ("SLPython", python),
        ("SLIf", if_),
        ("SLBlock", block),
        ("SLFor", for_),
        ("SLUse", use_),
        ("SLTransclude", transclude),
        ("SLDefault", default),
    ])
});

/// The statement keyword of a displayable.
#[derive(Debug, Clone, Copy)]
enum Keyword {
    Fixed(&'static str),
    /// Boxes: `vbox`, `hbox` or `fixed`, named by their `style` field.
    FromStyle(&'static str),
    /// Windows: `window` or `frame`, named by their `name` field.
    FromName(&'static str),
}

/// Displayable factories keyed by `module:name`.
static DISPLAYABLES: Lazy<HashMap<&'static str, Keyword>> = Lazy::new(|| {
    use Keyword::*;
    HashMap::from([
        ("renpy.sl2.sldisplayables:sl2add", Fixed("add")),
        ("renpy.display.layout:Grid", Fixed("grid")),
        ("renpy.ui:_textbutton", Fixed("textbutton")),
        ("renpy.display.layout:Null", Fixed("null")),
        ("renpy.display.layout:MultiBox", FromStyle("fixed")),
        ("renpy.text.text:Text", Fixed("text")),
        ("renpy.ui:_imagemap", Fixed("imagemap")),
        ("renpy.ui:_hotspot", Fixed("hotspot")),
        ("renpy.ui:_imagebutton", Fixed("imagebutton")),
        ("renpy.display.layout:Window", FromName("window")),
        ("renpy.display.behavior:Input", Fixed("input")),
        ("renpy.sl2.sldisplayables:sl2viewport", Fixed("viewport")),
        ("renpy.sl2.sldisplayables:sl2vpgrid", Fixed("vpgrid")),
        ("renpy.ui:_label", Fixed("label")),
        ("renpy.ui:_key", Fixed("key")),
        ("renpy.display.behavior:Timer", Fixed("timer")),
        ("renpy.sl2.sldisplayables:sl2bar", Fixed("bar")),
        ("renpy.sl2.sldisplayables:sl2vbar", Fixed("vbar")),
        ("renpy.display.behavior:Button", Fixed("button")),
        ("renpy.display.behavior:OnEvent", Fixed("on")),
        ("renpy.display.layout:Side", Fixed("side")),
        ("renpy.display.behavior:MouseArea", Fixed("mousearea")),
        ("renpy.display.dragdrop:Drag", Fixed("drag")),
        ("renpy.display.dragdrop:DragGroup", Fixed("draggroup")),
    ])
});

fn children(d: &mut Decompiler, st: &NodeState) -> Result<String> {
    let mut out = String::new();
    for child in st.opt_list("children")? {
        out.push_str(&d.render_value(&child)?);
    }
    Ok(out)
}

fn keyword_lines(d: &mut Decompiler, st: &NodeState) -> Result<String> {
    let mut out = String::new();
    for line in d.keywords(&st.opt_list("keyword")?)? {
        out.push_str(&line);
        out.push('\n');
    }
    Ok(out)
}

fn body_or_pass(body: String) -> String {
    if body.trim().is_empty() {
        indent("pass\n")
    } else {
        indent(&body)
    }
}

/// Renders a screen setting unless it holds its default source text.
fn setting(
    d: &mut Decompiler,
    st: &NodeState,
    field: &'static str,
    default: &str,
) -> Result<Option<String>> {
    match st.opt(field) {
        None => Ok(None),
        Some(v) => {
            let rendered = d.expr(v)?;
            Ok((rendered != default).then_some(rendered))
        }
    }
}

fn screen(d: &mut Decompiler, node: &Instance) -> Result<String> {
    let st = NodeState::of(node)?;
    let mut out = format!("screen {}", st.text("name")?);
    if let Some(params) = st.opt("parameters") {
        out.push_str(&format!("({})", d.render_value(params)?));
    }
    out.push_str(":\n");

    let mut body = String::new();
    if let Some(tag) = st.opt("tag") {
        body.push_str(&format!("tag {}\n", d.expr(tag)?));
    }
    for (field, default) in [
        ("modal", "False"),
        ("zorder", "0"),
        ("variant", "None"),
        ("layer", "'screens'"),
    ] {
        if let Some(value) = setting(d, &st, field, default)? {
            body.push_str(&format!("{field} {value}\n"));
        }
    }
    body.push_str(&keyword_lines(d, &st)?);
    body.push_str(&children(d, &st)?);
    out.push_str(&body_or_pass(body));
    Ok(out)
}

fn displayable_keyword(st: &NodeState) -> Result<String> {
    let factory = match st.get("displayable")? {
        Value::Class(class) => class.clone(),
        Value::Instance(inst) => inst.class().clone(),
        other => return Err(Error::unexpected("displayable factory", other)),
    };
    let key = format!("{}:{}", factory.module, factory.name);
    let keyword = DISPLAYABLES
        .get(key.as_str())
        .ok_or_else(|| Error::UnknownClass {
            module: factory.module.clone(),
            name: factory.name.clone(),
        })?;
    Ok(match *keyword {
        Keyword::Fixed(name) => name.to_string(),
        Keyword::FromStyle(fallback) => st.opt_text("style")?.unwrap_or(fallback).to_string(),
        Keyword::FromName(fallback) => st.opt_text("name")?.unwrap_or(fallback).to_string(),
    })
}

fn displayable(d: &mut Decompiler, node: &Instance) -> Result<String> {
    let st = NodeState::of(node)?;
    let mut head = displayable_keyword(&st)?;
    for positional in st.opt_list("positional")? {
        head.push(' ');
        head.push_str(&d.expr(&positional)?);
    }
    if let Some(variable) = st.opt("variable") {
        head.push_str(&format!(" as {}", d.expr(variable)?));
    }

    let keywords = d.keywords(&st.opt_list("keyword")?)?;
    let children = children(d, &st)?;
    if children.is_empty() {
        for keyword in keywords {
            head.push(' ');
            head.push_str(&keyword);
        }
        head.push('\n');
        return Ok(head);
    }

    let mut body = String::new();
    for keyword in keywords {
        body.push_str(&keyword);
        body.push('\n');
    }
    body.push_str(&children);
    Ok(format!("{head}:\n{}", indent(&body)))
}

fn python(d: &mut Decompiler, node: &Instance) -> Result<String> {
    let st = NodeState::of(node)?;
    let code = d.render_value(st.get("code")?)?;
    let code = code.trim_matches('\n');
    if code.contains('\n') {
        Ok(format!("python:\n{}\n", indent(code)))
    } else {
        Ok(format!("$ {code}\n"))
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
        out.push_str(&indent(&d.render_value(&pair[1])?));
    }
    Ok(out)
}

fn block(d: &mut Decompiler, node: &Instance) -> Result<String> {
    let st = NodeState::of(node)?;
    let mut out = keyword_lines(d, &st)?;
    out.push_str(&children(d, &st)?);
    if out.is_empty() {
        out.push_str("pass\n");
    }
    Ok(out)
}

fn for_(d: &mut Decompiler, node: &Instance) -> Result<String> {
    let st = NodeState::of(node)?;
    let mut out = format!("for {} ", st.text("variable")?);
    if let Some(index) = st.opt("index_expression") {
        out.push_str(&format!("index {} ", d.expr(index)?));
    }
    out.push_str(&format!("in {}:\n", d.expr(st.get("expression")?)?));

    let mut body = keyword_lines(d, &st)?;
    body.push_str(&children(d, &st)?);
    out.push_str(&body_or_pass(body));
    Ok(out)
}

fn use_(d: &mut Decompiler, node: &Instance) -> Result<String> {
    let st = NodeState::of(node)?;
    let mut out = format!("use {}", d.expr(st.get("target")?)?);
    if let Some(args) = st.opt("args") {
        out.push_str(&d.render_value(args)?);
    }
    if let Some(id) = st.opt("id") {
        out.push_str(&format!(" id {}", d.expr(id)?));
    }
    match st.opt("block") {
        Some(block) => {
            out.push_str(":\n");
            out.push_str(&indent(&d.render_value(block)?));
        }
        None => out.push('\n'),
    }
    Ok(out)
}

fn transclude(_d: &mut Decompiler, _node: &Instance) -> Result<String> {
    Ok("transclude\n".to_string())
}

fn default(d: &mut Decompiler, node: &Instance) -> Result<String> {
    let st = NodeState::of(node)?;
    Ok(format!(
        "default {} = {}\n",
        st.text("variable")?,
        d.expr(st.get("expression")?)?
    ))
}
