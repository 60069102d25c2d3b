//! Fixture builders: a small pickle encoder and writers for both containers.

use std::collections::HashMap;
use std::io::Write;
use std::rc::Rc;

use flate2::write::ZlibEncoder;
use flate2::Compression;
use num_bigint::BigInt;

use super::pickle::{ClassRef, Instance, Value};

/// A Python object tree to encode.
#[derive(Debug, Clone)]
pub enum Py {
    None,
    Bool(bool),
    Int(i64),
    /// Little-endian two's complement payload for LONG1.
    Long(Vec<u8>),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<Py>),
    Tuple(Vec<Py>),
    Dict(Vec<(String, Py)>),
    Object {
        module: String,
        name: String,
        args: Vec<Py>,
        state: Option<Box<Py>>,
    },
    /// A bare class reference.
    Global(String, String),
    /// Stores the inner value in the memo under the given index.
    Shared(u32, Box<Py>),
    /// Reads a memo entry written by an earlier `Shared`.
    Ref(u32),
}

impl Py {
    pub fn str(s: &str) -> Py {
        Py::Str(s.to_string())
    }

    pub fn dict(entries: Vec<(&str, Py)>) -> Py {
        Py::Dict(entries.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
    }

    pub fn obj(module: &str, name: &str, state: Py) -> Py {
        Py::Object {
            module: module.to_string(),
            name: name.to_string(),
            args: vec![],
            state: Some(Box::new(state)),
        }
    }

    /// The value the VM is expected to produce for this tree.
    pub fn to_value(&self) -> Value {
        self.to_value_with(&mut HashMap::new())
    }

    fn to_value_with(&self, memo: &mut HashMap<u32, Value>) -> Value {
        match self {
            Py::None => Value::None,
            Py::Bool(b) => Value::Bool(*b),
            Py::Int(n) => Value::Int(*n),
            Py::Long(raw) => Value::from_bigint(BigInt::from_signed_bytes_le(raw)),
            Py::Float(x) => Value::Float(*x),
            Py::Str(s) => Value::text(s),
            Py::Bytes(b) => Value::bytes(b),
            Py::List(items) => Value::list(items.iter().map(|i| i.to_value_with(memo)).collect()),
            Py::Tuple(items) => {
                Value::tuple(items.iter().map(|i| i.to_value_with(memo)).collect())
            }
            Py::Dict(entries) => Value::dict(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_value_with(memo)))
                    .collect::<Vec<_>>(),
            ),
            Py::Object {
                module,
                name,
                args,
                state,
            } => {
                let class = Rc::new(ClassRef::new(module.as_str(), name.as_str()));
                let args = args.iter().map(|a| a.to_value_with(memo)).collect();
                let inst = match state {
                    Some(state) => Instance::with_state(class, args, state.to_value_with(memo)),
                    None => Instance::new(class, args),
                };
                Value::instance(inst)
            }
            Py::Global(module, name) => Value::class(module, name),
            Py::Shared(index, inner) => {
                let value = inner.to_value_with(memo);
                memo.insert(*index, value.clone());
                value
            }
            Py::Ref(index) => memo.get(index).cloned().unwrap_or(Value::None),
        }
    }
}

/// Encodes `tree` as a protocol 2 pickle.
pub fn pickle(tree: &Py) -> Vec<u8> {
    let mut out = vec![0x80, 2];
    encode(tree, &mut out);
    out.push(b'.');
    out
}

fn encode(tree: &Py, out: &mut Vec<u8>) {
    match tree {
        Py::None => out.push(0x4E),
        Py::Bool(true) => out.push(0x88),
        Py::Bool(false) => out.push(0x89),
        Py::Int(n) => match *n {
            0..=0xFF => out.extend([0x4B, *n as u8]),
            0x100..=0xFFFF => {
                out.push(0x4D);
                out.extend((*n as u16).to_le_bytes());
            }
            n if i32::try_from(n).is_ok() => {
                out.push(0x4A);
                out.extend((n as i32).to_le_bytes());
            }
            n => {
                out.extend([0x8A, 8]);
                out.extend(n.to_le_bytes());
            }
        },
        Py::Long(raw) => {
            out.extend([0x8A, raw.len() as u8]);
            out.extend(raw);
        }
        Py::Float(x) => {
            out.push(0x47);
            out.extend(x.to_be_bytes());
        }
        Py::Str(s) if s.len() < 256 => {
            out.extend([0x8C, s.len() as u8]);
            out.extend(s.as_bytes());
        }
        Py::Str(s) => {
            out.push(0x58);
            out.extend((s.len() as u32).to_le_bytes());
            out.extend(s.as_bytes());
        }
        Py::Bytes(b) if b.len() < 256 => {
            out.extend([0x43, b.len() as u8]);
            out.extend(b);
        }
        Py::Bytes(b) => {
            out.push(0x42);
            out.extend((b.len() as u32).to_le_bytes());
            out.extend(b);
        }
        Py::List(items) => {
            out.push(0x5D);
            if !items.is_empty() {
                out.push(0x28);
                items.iter().for_each(|i| encode(i, out));
                out.push(0x65);
            }
        }
        Py::Tuple(items) => match items.len() {
            0 => out.push(0x29),
            n @ 1..=3 => {
                items.iter().for_each(|i| encode(i, out));
                out.push(0x84 + n as u8);
            }
            _ => {
                out.push(0x28);
                items.iter().for_each(|i| encode(i, out));
                out.push(0x74);
            }
        },
        Py::Dict(entries) => {
            out.push(0x7D);
            if !entries.is_empty() {
                out.push(0x28);
                for (k, v) in entries {
                    encode(&Py::Str(k.clone()), out);
                    encode(v, out);
                }
                out.push(0x75);
            }
        }
        Py::Object {
            module,
            name,
            args,
            state,
        } => {
            out.push(0x63);
            out.extend(format!("{module}\n{name}\n").as_bytes());
            encode(&Py::Tuple(args.clone()), out);
            out.push(0x81);
            if let Some(state) = state {
                encode(state, out);
                out.push(0x62);
            }
        }
        Py::Global(module, name) => {
            out.push(0x63);
            out.extend(format!("{module}\n{name}\n").as_bytes());
        }
        Py::Shared(index, inner) => {
            encode(inner, out);
            match u8::try_from(*index) {
                Ok(i) => out.extend([0x71, i]),
                Err(_) => {
                    out.push(0x72);
                    out.extend(index.to_le_bytes());
                }
            }
        }
        Py::Ref(index) => match u8::try_from(*index) {
            Ok(i) => out.extend([0x68, i]),
            Err(_) => {
                out.push(0x6A);
                out.extend(index.to_le_bytes());
            }
        },
    }
}

pub fn zlib(data: &[u8]) -> Vec<u8> {
    let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
    enc.write_all(data).unwrap();
    enc.finish().unwrap()
}

pub const RPA_PADDING: &[u8] = b"Made with Ren'Py.";

/// Builds an RPA-3.0 archive the way the engine's archiver lays it out:
/// header, padded file bodies, compressed index.
pub fn rpa(files: &[(&str, &[u8])], key: u32) -> Vec<u8> {
    let mut body = Vec::new();
    let mut index = Vec::new();
    for (path, data) in files {
        body.extend_from_slice(RPA_PADDING);
        let offset = 34 + body.len() as u64;
        body.extend_from_slice(data);
        index.push((path.to_string(), vec![(offset, data.len() as u64)]));
    }
    rpa_with_index(&body, &index, key)
}

/// Builds an archive around a raw body with an explicit index.
/// Offsets in `index` are absolute, so the body starts at 34.
pub fn rpa_with_index(body: &[u8], index: &[(String, Vec<(u64, u64)>)], key: u32) -> Vec<u8> {
    let key64 = u64::from(key);
    let tree = Py::Dict(
        index
            .iter()
            .map(|(path, parts)| {
                let parts = parts
                    .iter()
                    .map(|&(offset, len)| {
                        Py::Tuple(vec![
                            Py::Int((offset ^ key64) as i64),
                            Py::Int((len ^ key64) as i64),
                            Py::Bytes(vec![]),
                        ])
                    })
                    .collect();
                (path.clone(), Py::List(parts))
            })
            .collect(),
    );
    let index_offset = 34 + body.len();
    let mut out = format!("RPA-3.0 {:016x} {:08x}\n", index_offset, key).into_bytes();
    assert_eq!(out.len(), 34);
    out.extend_from_slice(body);
    out.extend(zlib(&pickle(&tree)));
    out
}

/// Builds an RPYC2 container. Each chunk is a slot id and its raw pickle.
pub fn rpyc(chunks: &[(u32, Vec<u8>)], digest: [u8; 16]) -> Vec<u8> {
    let mut out = b"RENPY RPC2".to_vec();
    let table_len = 12 * (chunks.len() + 1);
    let mut offset = out.len() + table_len;
    let compressed: Vec<Vec<u8>> = chunks.iter().map(|(_, data)| zlib(data)).collect();
    for ((slot, _), data) in chunks.iter().zip(&compressed) {
        out.extend(slot.to_le_bytes());
        out.extend((offset as u32).to_le_bytes());
        out.extend((data.len() as u32).to_le_bytes());
        offset += data.len();
    }
    out.extend([0u8; 12]);
    for data in compressed {
        out.extend(data);
    }
    out.extend(digest);
    out
}
