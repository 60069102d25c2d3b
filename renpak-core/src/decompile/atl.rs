//! ATL transform statements (`renpy.atl`).

use std::collections::HashMap;

use once_cell::sync::Lazy;

use super::{indent, Decompiler, NodeState, RenderFn};
use crate::error::{Error, Result};
use crate::format::pickle::{Instance, Value};

pub(super) static RENDERERS: Lazy<HashMap<&'static str, RenderFn>> = Lazy::new(|| {
    HashMap::from([
        ("RawBlock", block as RenderFn),
        ("RawMultipurpose", multipurpose),
        ("RawRepeat", repeat),
        ("RawOn", on),
        ("RawParallel", parallel),
        ("RawChoice", choice),
        ("RawTime", time),
        ("RawEvent", event),
        ("RawFunction", function),
        ("RawContainsExpr", contains_expr),
        ("RawChild", child),
    ])
});

fn nested(d: &mut Decompiler, block: &Value) -> Result<String> {
    let body = d.render_value(block)?;
    if body.trim().is_empty() {
        Ok(indent("pass\n"))
    } else {
        Ok(indent(&body))
    }
}

fn pair(value: &Value, expected: &'static str) -> Result<Vec<Value>> {
    value
        .to_vec()
        .filter(|items| items.len() == 2)
        .ok_or_else(|| Error::unexpected(expected, value))
}

fn block(d: &mut Decompiler, node: &Instance) -> Result<String> {
    let st = NodeState::of(node)?;
    let mut out = String::new();
    if st.bool("animation") {
        out.push_str("animation\n");
    }
    for statement in st.list("statements")? {
        out.push_str(&d.render_value(&statement)?);
    }
    Ok(out)
}

/// One interpolation line: timing, motion, then property targets.
fn multipurpose(d: &mut Decompiler, node: &Instance) -> Result<String> {
    let st = NodeState::of(node)?;
    let mut words = Vec::new();

    let duration = match st.opt("duration") {
        Some(v) => d.expr(v)?,
        None => "0".to_string(),
    };
    if let Some(warper) = st.opt_text("warper")? {
        words.push(format!("{warper} {duration}"));
    } else if let Some(warp) = st.opt("warp_function") {
        words.push(format!("warp {} {}", d.expr(warp)?, duration));
    } else if duration != "0" {
        words.push(duration);
    }

    if let Some(revolution) = st.opt_text("revolution")? {
        words.push(revolution.to_string());
    }
    if let Some(circles) = st.opt("circles") {
        let circles = d.expr(circles)?;
        if circles != "0" {
            words.push(format!("circles {circles}"));
        }
    }

    for spline in st.opt_list("splines")? {
        let fields = pair(&spline, "(property, knots) spline")?;
        let name = fields[0]
            .as_text()
            .ok_or_else(|| Error::unexpected("property name", &fields[0]))?;
        let exprs = fields[1]
            .to_vec()
            .ok_or_else(|| Error::unexpected("knot list", &fields[1]))?;
        let Some((end, knots)) = exprs.split_last() else {
            continue;
        };
        let mut line = format!("{} {}", name, d.expr(end)?);
        for knot in knots {
            line.push_str(&format!(" knot {}", d.expr(knot)?));
        }
        words.push(line);
    }

    for property in st.opt_list("properties")? {
        let fields = pair(&property, "(property, value) pair")?;
        let name = fields[0]
            .as_text()
            .ok_or_else(|| Error::unexpected("property name", &fields[0]))?;
        words.push(format!("{} {}", name, d.expr(&fields[1])?));
    }

    for expression in st.opt_list("expressions")? {
        let fields = pair(&expression, "(expression, with) pair")?;
        let mut word = d.expr(&fields[0])?;
        if !fields[1].is_none() {
            word.push_str(&format!(" with {}", d.expr(&fields[1])?));
        }
        words.push(word);
    }

    if words.is_empty() {
        return Ok("pass\n".to_string());
    }
    Ok(format!("{}\n", words.join(" ")))
}

fn repeat(d: &mut Decompiler, node: &Instance) -> Result<String> {
    let st = NodeState::of(node)?;
    match st.opt("repeats") {
        Some(n) => Ok(format!("repeat {}\n", d.expr(n)?)),
        None => Ok("repeat\n".to_string()),
    }
}

fn on(d: &mut Decompiler, node: &Instance) -> Result<String> {
    let st = NodeState::of(node)?;
    let handlers = st.get("handlers")?;
    let handlers = handlers
        .as_dict()
        .ok_or_else(|| Error::unexpected("handler dict", handlers))?
        .borrow()
        .clone();
    let mut out = String::new();
    for (event, handler) in handlers.iter() {
        out.push_str(&format!("on {event}:\n"));
        out.push_str(&nested(d, handler)?);
    }
    Ok(out)
}

fn parallel(d: &mut Decompiler, node: &Instance) -> Result<String> {
    let st = NodeState::of(node)?;
    let mut out = String::new();
    for block in st.list("blocks")? {
        out.push_str("parallel:\n");
        out.push_str(&nested(d, &block)?);
    }
    Ok(out)
}

fn choice(d: &mut Decompiler, node: &Instance) -> Result<String> {
    let st = NodeState::of(node)?;
    let mut out = String::new();
    for entry in st.list("choices")? {
        let fields = pair(&entry, "(chance, block) choice")?;
        let chance = d.expr(&fields[0])?;
        if chance == "1.0" {
            out.push_str("choice:\n");
        } else {
            out.push_str(&format!("choice {chance}:\n"));
        }
        out.push_str(&nested(d, &fields[1])?);
    }
    Ok(out)
}

fn time(d: &mut Decompiler, node: &Instance) -> Result<String> {
    let st = NodeState::of(node)?;
    Ok(format!("time {}\n", d.expr(st.get("time")?)?))
}

fn event(_d: &mut Decompiler, node: &Instance) -> Result<String> {
    let st = NodeState::of(node)?;
    Ok(format!("event {}\n", st.text("name")?))
}

fn function(d: &mut Decompiler, node: &Instance) -> Result<String> {
    let st = NodeState::of(node)?;
    Ok(format!("function {}\n", d.expr(st.get("expr")?)?))
}

fn contains_expr(d: &mut Decompiler, node: &Instance) -> Result<String> {
    let st = NodeState::of(node)?;
    Ok(format!("contains {}\n", d.expr(st.get("expression")?)?))
}

fn child(d: &mut Decompiler, node: &Instance) -> Result<String> {
    let st = NodeState::of(node)?;
    let mut out = String::new();
    for block in st.list("children")? {
        out.push_str("contains:\n");
        out.push_str(&nested(d, &block)?);
    }
    Ok(out)
}
