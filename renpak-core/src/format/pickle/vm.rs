use std::collections::HashMap;
use std::rc::Rc;
use std::time::{Duration, Instant};

use byteorder::{BigEndian, ByteOrder};
use bytes::Bytes;
use num_traits::FromPrimitive;

use super::opcode::Opcode;
use super::value::{Dict, Instance, Value};
use crate::error::{Error, Result};
use crate::format::cursor::{ByteCursor, TextEncoding};

/// Turns a GLOBAL / STACK_GLOBAL reference into a stack value.
pub trait ClassResolver {
    fn find_class(&self, module: &str, name: &str) -> Result<Value>;
}

/// Resolves every reference to a plain [`Value::Class`].
#[derive(Debug, Default, Clone, Copy)]
pub struct GenericClasses;

impl ClassResolver for GenericClasses {
    fn find_class(&self, module: &str, name: &str) -> Result<Value> {
        Ok(Value::class(module, name))
    }
}

impl<F> ClassResolver for F
where
    F: Fn(&str, &str) -> Result<Value>,
{
    fn find_class(&self, module: &str, name: &str) -> Result<Value> {
        self(module, name)
    }
}

enum StackItem {
    Mark,
    Value(Value),
}

impl StackItem {
    fn into_value(self) -> Option<Value> {
        match self {
            StackItem::Mark => None,
            StackItem::Value(v) => Some(v),
        }
    }
}

#[derive(Default, Clone, Copy)]
struct OpStat {
    count: u64,
    elapsed: Duration,
}

pub struct PickleVm<'r> {
    cursor: ByteCursor,
    stack: Vec<StackItem>,
    memo: HashMap<u32, Value>,
    resolver: &'r dyn ClassResolver,
    protocol: Option<u8>,
    /// Offset of the opcode being executed.
    op_offset: usize,
    stats: HashMap<Opcode, OpStat>,
}

impl<'r> PickleVm<'r> {
    pub fn new(data: impl Into<Bytes>, resolver: &'r dyn ClassResolver) -> Self {
        Self {
            cursor: ByteCursor::new(data),
            stack: Vec::new(),
            memo: HashMap::new(),
            resolver,
            protocol: None,
            op_offset: 0,
            stats: HashMap::new(),
        }
    }

    pub fn protocol(&self) -> Option<u8> {
        self.protocol
    }

    /// Executes opcodes until STOP and returns the residual stack.
    pub fn run(mut self) -> Result<Vec<Value>> {
        let timed = log::log_enabled!(log::Level::Trace);
        loop {
            let start = timed.then(Instant::now);
            let op = self.step()?;
            if let Some(start) = start {
                let stat = self.stats.entry(op).or_default();
                stat.count += 1;
                stat.elapsed += start.elapsed();
            }
            if op == Opcode::STOP {
                break;
            }
        }
        if timed {
            self.log_stats();
        }

        let offset = self.op_offset;
        self.stack
            .into_iter()
            .map(|item| {
                item.into_value().ok_or(Error::StackTypeMismatch {
                    expected: "value",
                    actual: "mark".into(),
                    offset,
                })
            })
            .collect()
    }

    fn log_stats(&self) {
        let mut stats: Vec<_> = self.stats.iter().collect();
        stats.sort_by(|a, b| b.1.elapsed.cmp(&a.1.elapsed));
        log::trace!(
            "depickled {} bytes, protocol {:?}, {} memo entries",
            self.cursor.len(),
            self.protocol,
            self.memo.len()
        );
        for (op, stat) in stats {
            log::trace!(
                "{:<16} x{:<8} {:?}",
                op.name(),
                stat.count,
                stat.elapsed
            );
        }
    }

    fn step(&mut self) -> Result<Opcode> {
        if self.cursor.is_eof() {
            return Err(Error::UnexpectedEof);
        }
        self.op_offset = self.cursor.position();
        let byte = self.cursor.read_u8()?;
        let op = Opcode::from_u8(byte).ok_or(Error::UnknownOpcode {
            opcode: byte,
            offset: self.op_offset,
        })?;

        match op {
            Opcode::STOP => {}
            Opcode::PROTO => {
                let version = self.cursor.read_u8()?;
                if !(2..=5).contains(&version) {
                    return Err(Error::UnsupportedProtocol(version));
                }
                self.protocol = Some(version);
            }
            Opcode::FRAME => {
                // the whole stream is already in memory
                self.cursor.read_u64()?;
            }

            Opcode::MARK => self.stack.push(StackItem::Mark),
            Opcode::POP => {
                self.stack.pop().ok_or(self.underflow())?;
            }
            Opcode::POP_MARK => {
                self.pop_mark()?;
            }
            Opcode::DUP => {
                let top = self.top()?.clone();
                self.push(top);
            }

            Opcode::NONE => self.push(Value::None),
            Opcode::NEWTRUE => self.push(Value::Bool(true)),
            Opcode::NEWFALSE => self.push(Value::Bool(false)),
            Opcode::BININT => {
                let n = self.cursor.read_i32()?;
                self.push(Value::Int(n.into()));
            }
            Opcode::BININT1 => {
                let n = self.cursor.read_u8()?;
                self.push(Value::Int(n.into()));
            }
            Opcode::BININT2 => {
                let n = self.cursor.read_u16()?;
                self.push(Value::Int(n.into()));
            }
            Opcode::LONG1 => {
                let len = self.cursor.read_u8()? as usize;
                let n = self.cursor.read_int_n(len, true)?;
                self.push(Value::from_bigint(n));
            }
            Opcode::LONG4 => {
                let len = self.read_len32()?;
                let n = self.cursor.read_int_n(len, true)?;
                self.push(Value::from_bigint(n));
            }
            Opcode::BINFLOAT => {
                let raw = self.cursor.read_bytes(8)?;
                self.push(Value::Float(BigEndian::read_f64(&raw)));
            }

            Opcode::SHORT_BINUNICODE | Opcode::SHORT_BINSTRING => {
                let len = self.cursor.read_u8()? as usize;
                self.push_text(len)?;
            }
            Opcode::BINUNICODE | Opcode::BINSTRING => {
                let len = self.read_len32()?;
                self.push_text(len)?;
            }
            Opcode::BINUNICODE8 => {
                let len = self.read_len64()?;
                self.push_text(len)?;
            }
            Opcode::SHORT_BINBYTES => {
                let len = self.cursor.read_u8()? as usize;
                self.push_bytes(len)?;
            }
            Opcode::BINBYTES => {
                let len = self.read_len32()?;
                self.push_bytes(len)?;
            }
            Opcode::BINBYTES8 | Opcode::BYTEARRAY8 => {
                let len = self.read_len64()?;
                self.push_bytes(len)?;
            }

            Opcode::EMPTY_DICT => self.push(Value::dict(Vec::<(String, Value)>::new())),
            Opcode::EMPTY_LIST | Opcode::EMPTY_SET => self.push(Value::list(Vec::new())),
            Opcode::EMPTY_TUPLE => self.push(Value::tuple(Vec::new())),
            Opcode::LIST | Opcode::FROZENSET => {
                let items = self.pop_mark()?;
                self.push(Value::list(items));
            }
            Opcode::TUPLE => {
                let items = self.pop_mark()?;
                self.push(Value::tuple(items));
            }
            Opcode::TUPLE1 => {
                let a = self.pop()?;
                self.push(Value::tuple(vec![a]));
            }
            Opcode::TUPLE2 => {
                let b = self.pop()?;
                let a = self.pop()?;
                self.push(Value::tuple(vec![a, b]));
            }
            Opcode::TUPLE3 => {
                let c = self.pop()?;
                let b = self.pop()?;
                let a = self.pop()?;
                self.push(Value::tuple(vec![a, b, c]));
            }
            Opcode::DICT => {
                let items = self.pop_mark()?;
                let mut dict = Dict::new();
                self.insert_pairs(&mut dict, items)?;
                self.push(Value::Dict(Rc::new(dict.into())));
            }

            Opcode::APPEND => {
                let value = self.pop()?;
                self.extend_top(vec![value])?;
            }
            Opcode::APPENDS | Opcode::ADDITEMS => {
                let items = self.pop_mark()?;
                self.extend_top(items)?;
            }
            Opcode::SETITEM => {
                let value = self.pop()?;
                let key = self.pop()?;
                self.set_items_on_top(vec![key, value])?;
            }
            Opcode::SETITEMS => {
                let items = self.pop_mark()?;
                self.set_items_on_top(items)?;
            }

            Opcode::MEMOIZE => {
                let index = self.memo.len() as u32;
                self.memo_put(index)?;
            }
            Opcode::BINPUT => {
                let index = self.cursor.read_u8()?;
                self.memo_put(index.into())?;
            }
            Opcode::LONG_BINPUT => {
                let index = self.cursor.read_u32()?;
                self.memo_put(index)?;
            }
            Opcode::BINGET => {
                let index = self.cursor.read_u8()?;
                self.memo_get(index.into())?;
            }
            Opcode::LONG_BINGET => {
                let index = self.cursor.read_u32()?;
                self.memo_get(index)?;
            }

            Opcode::GLOBAL => {
                let module = self.cursor.read_line()?;
                let name = self.cursor.read_line()?;
                let class = self.resolver.find_class(&module, &name)?;
                self.push(class);
            }
            Opcode::STACK_GLOBAL => {
                let name = self.pop_text()?;
                let module = self.pop_text()?;
                let class = self.resolver.find_class(&module, &name)?;
                self.push(class);
            }
            Opcode::NEWOBJ | Opcode::REDUCE => {
                let args = self.pop()?;
                let callable = self.pop()?;
                let instance = self.instantiate(callable, args)?;
                self.push(instance);
            }
            Opcode::BUILD => {
                let state = self.pop()?;
                let offset = self.op_offset;
                match self.top()? {
                    Value::Instance(inst) => inst
                        .set_state(state)
                        .map_err(|_| Error::StateAlreadySet { offset })?,
                    other => return Err(self.type_mismatch("instance", other)),
                }
            }

            _ => {
                return Err(Error::UnsupportedOpcode {
                    name: op.name(),
                    opcode: byte,
                    offset: self.op_offset,
                })
            }
        }
        Ok(op)
    }

    fn underflow(&self) -> Error {
        Error::StackUnderflow {
            offset: self.op_offset,
        }
    }

    fn type_mismatch(&self, expected: &'static str, actual: &Value) -> Error {
        Error::StackTypeMismatch {
            expected,
            actual: actual.kind().into(),
            offset: self.op_offset,
        }
    }

    fn push(&mut self, value: Value) {
        self.stack.push(StackItem::Value(value));
    }

    fn pop(&mut self) -> Result<Value> {
        match self.stack.pop() {
            Some(StackItem::Value(v)) => Ok(v),
            Some(StackItem::Mark) => Err(Error::StackTypeMismatch {
                expected: "value",
                actual: "mark".into(),
                offset: self.op_offset,
            }),
            None => Err(self.underflow()),
        }
    }

    fn top(&self) -> Result<&Value> {
        match self.stack.last() {
            Some(StackItem::Value(v)) => Ok(v),
            Some(StackItem::Mark) => Err(Error::StackTypeMismatch {
                expected: "value",
                actual: "mark".into(),
                offset: self.op_offset,
            }),
            None => Err(self.underflow()),
        }
    }

    /// Removes everything above the nearest mark, and the mark itself.
    fn pop_mark(&mut self) -> Result<Vec<Value>> {
        let mark = self
            .stack
            .iter()
            .rposition(|item| matches!(item, StackItem::Mark))
            .ok_or(self.underflow())?;
        let items = self.stack.split_off(mark + 1);
        self.stack.truncate(mark);
        Ok(items.into_iter().filter_map(StackItem::into_value).collect())
    }

    fn pop_text(&mut self) -> Result<String> {
        match self.pop()? {
            Value::Text(s) => Ok(s.to_string()),
            other => Err(self.type_mismatch("str", &other)),
        }
    }

    fn read_len32(&mut self) -> Result<usize> {
        Ok(self.cursor.read_u32()? as usize)
    }

    fn read_len64(&mut self) -> Result<usize> {
        let len = self.cursor.read_u64()?;
        usize::try_from(len).map_err(|_| Error::BufferUnderrun {
            offset: self.cursor.position(),
            wanted: usize::MAX,
            len: self.cursor.len(),
        })
    }

    fn push_text(&mut self, len: usize) -> Result<()> {
        let s = self.cursor.read_text(len, TextEncoding::Utf8)?;
        self.push(Value::text(&s));
        Ok(())
    }

    fn push_bytes(&mut self, len: usize) -> Result<()> {
        let raw = self.cursor.read_bytes(len)?;
        self.push(Value::bytes(&raw));
        Ok(())
    }

    fn extend_top(&mut self, items: Vec<Value>) -> Result<()> {
        match self.top()? {
            Value::List(list) => {
                list.borrow_mut().extend(items);
                Ok(())
            }
            other => Err(self.type_mismatch("list", other)),
        }
    }

    fn set_items_on_top(&mut self, items: Vec<Value>) -> Result<()> {
        let dict = match self.top()? {
            Value::Dict(dict) => dict.clone(),
            other => return Err(self.type_mismatch("dict", other)),
        };
        let mut dict = dict.borrow_mut();
        self.insert_pairs(&mut dict, items)
    }

    fn insert_pairs(&self, dict: &mut Dict, items: Vec<Value>) -> Result<()> {
        if items.len() % 2 != 0 {
            return Err(Error::StackTypeMismatch {
                expected: "key/value pairs",
                actual: format!("{} items", items.len()),
                offset: self.op_offset,
            });
        }
        let mut items = items.into_iter();
        while let (Some(key), Some(value)) = (items.next(), items.next()) {
            let key = match key {
                Value::Text(s) => s.to_string(),
                Value::Bytes(b) => String::from_utf8_lossy(&b).into_owned(),
                other => return Err(self.type_mismatch("str key", &other)),
            };
            dict.insert(key, value);
        }
        Ok(())
    }

    fn memo_put(&mut self, index: u32) -> Result<()> {
        let top = self.top()?.clone();
        self.memo.insert(index, top);
        Ok(())
    }

    fn memo_get(&mut self, index: u32) -> Result<()> {
        let value = self
            .memo
            .get(&index)
            .cloned()
            .ok_or(Error::MemoMiss { index })?;
        self.push(value);
        Ok(())
    }

    fn instantiate(&self, callable: Value, args: Value) -> Result<Value> {
        let class = match callable {
            Value::Class(class) => class,
            other => return Err(self.type_mismatch("class", &other)),
        };
        let args = args
            .to_vec()
            .ok_or_else(|| self.type_mismatch("argument tuple", &args))?;
        Ok(Value::instance(Instance::new(class, args)))
    }
}

#[cfg(test)]
mod tests {
    use super::super::{depickle, depickle_with, load};
    use super::*;
    use crate::format::test_util::{pickle, Py};

    #[test]
    fn scalars() {
        let v = load(pickle(&Py::List(vec![
            Py::None,
            Py::Bool(true),
            Py::Int(7),
            Py::Int(300),
            Py::Int(-2),
            Py::Int(1 << 40),
            Py::Float(1.5),
            Py::Str("héllo".into()),
            Py::Bytes(vec![1, 2, 3]),
        ])))
        .unwrap();
        assert_eq!(
            v,
            Value::list(vec![
                Value::None,
                Value::Bool(true),
                Value::Int(7),
                Value::Int(300),
                Value::Int(-2),
                Value::Int(1 << 40),
                Value::Float(1.5),
                Value::text("héllo"),
                Value::bytes(&[1, 2, 3]),
            ])
        );
    }

    #[test]
    fn nested_containers_keep_order() {
        let tree = Py::Dict(vec![
            ("b".into(), Py::Tuple(vec![Py::Int(1), Py::Int(2)])),
            (
                "a".into(),
                Py::Tuple(vec![Py::Int(1), Py::Int(2), Py::Int(3), Py::Int(4)]),
            ),
            ("c".into(), Py::Tuple(vec![Py::Str("x".into())])),
        ]);
        let v = load(pickle(&tree)).unwrap();
        assert_eq!(v, tree.to_value());
        let dict = v.as_dict().unwrap().borrow();
        let keys: Vec<_> = dict.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, ["b", "a", "c"]);
    }

    #[test]
    fn three_tuple_order() {
        // PROTO 2, BININT1 1, BININT1 2, BININT1 3, TUPLE3, STOP
        let v = load(vec![0x80, 2, 0x4B, 1, 0x4B, 2, 0x4B, 3, 0x87, 0x2E]).unwrap();
        assert_eq!(
            v,
            Value::tuple(vec![Value::Int(1), Value::Int(2), Value::Int(3)])
        );
    }

    #[test]
    fn memo_preserves_identity() {
        // PROTO 2, EMPTY_LIST, BINPUT 3, POP, MARK, BINGET 3, BINGET 3, TUPLE, STOP
        let data = vec![
            0x80, 2, 0x5D, 0x71, 3, 0x30, 0x28, 0x68, 3, 0x68, 3, 0x74, 0x2E,
        ];
        let v = load(data).unwrap();
        let items = v.to_vec().unwrap();
        assert_eq!(items.len(), 2);
        assert!(items[0].ptr_eq(&items[1]));

        let shared = Py::List(vec![Py::Int(1)]);
        let v = load(pickle(&Py::Tuple(vec![
            Py::Shared(0, Box::new(shared)),
            Py::Ref(0),
        ])))
        .unwrap();
        let items = v.to_vec().unwrap();
        assert!(items[0].ptr_eq(&items[1]));
    }

    #[test]
    fn memo_read_before_write() {
        let err = load(vec![0x80, 2, 0x6A, 9, 0, 0, 0, 0x2E]).unwrap_err();
        assert!(matches!(err, Error::MemoMiss { index: 9 }));
    }

    #[test]
    fn instances_get_state_once() {
        let tree = Py::Object {
            module: "renpy.ast".into(),
            name: "Say".into(),
            args: vec![],
            state: Some(Box::new(Py::Dict(vec![
                ("who".into(), Py::None),
                ("what".into(), Py::Str("Hello".into())),
            ]))),
        };
        let v = load(pickle(&tree)).unwrap();
        let inst = v.as_instance().unwrap();
        assert_eq!(inst.module(), "renpy.ast");
        assert_eq!(inst.name(), "Say");
        let state = inst.state().unwrap().as_dict().unwrap().borrow();
        assert_eq!(state.get("what"), Some(&Value::text("Hello")));

        // NEWOBJ then BUILD twice
        let mut data = vec![0x80, 2, 0x63];
        data.extend_from_slice(b"m\nC\n");
        data.extend_from_slice(&[0x29, 0x81, 0x4E, 0x62, 0x4E, 0x62, 0x2E]);
        assert!(matches!(
            load(data).unwrap_err(),
            Error::StateAlreadySet { .. }
        ));
    }

    #[test]
    fn stack_global_pops_name_then_module() {
        let mut data = vec![0x80, 4, 0x8C, 9];
        data.extend_from_slice(b"renpy.ast");
        data.extend_from_slice(&[0x94, 0x8C, 3]);
        data.extend_from_slice(b"Say");
        data.extend_from_slice(&[0x94, 0x93, 0x2E]);
        assert_eq!(load(data).unwrap(), Value::class("renpy.ast", "Say"));
    }

    #[test]
    fn reduce_with_class_builds_instance() {
        let mut data = vec![0x80, 2, 0x63];
        data.extend_from_slice(b"renpy.ast\nPyExpr\n");
        data.extend_from_slice(&[0x8C, 1, b'x', 0x85, 0x52, 0x2E]);
        let v = load(data).unwrap();
        let inst = v.as_instance().unwrap();
        assert_eq!(inst.name(), "PyExpr");
        assert_eq!(inst.args(), &[Value::text("x")]);
        assert!(inst.state().is_none());
    }

    #[test]
    fn large_longs() {
        let v = load(pickle(&Py::Long(vec![0, 0, 0, 0, 0, 0, 0, 0, 1]))).unwrap();
        assert_eq!(v.as_bigint().unwrap().to_string(), "18446744073709551616");
        assert!(matches!(v, Value::Long(_)));
    }

    #[test]
    fn protocol_errors() {
        assert!(matches!(
            load(vec![0x80, 1, 0x2E]).unwrap_err(),
            Error::UnsupportedProtocol(1)
        ));
        assert!(matches!(
            load(vec![0x80, 2, 0x4E]).unwrap_err(),
            Error::UnexpectedEof
        ));
        assert!(matches!(
            load(vec![0x80, 2, 0x00]).unwrap_err(),
            Error::UnknownOpcode {
                opcode: 0x00,
                offset: 2
            }
        ));
        assert!(matches!(
            load(vec![0x80, 2, 0x50]).unwrap_err(),
            Error::UnsupportedOpcode {
                name: "PERSID",
                ..
            }
        ));
        assert!(matches!(
            load(vec![0x80, 2, 0x61, 0x2E]).unwrap_err(),
            Error::StackUnderflow { offset: 2 }
        ));
    }

    #[test]
    fn residual_stack_is_returned() {
        let values = depickle(vec![0x80, 2, 0x4B, 1, 0x4B, 2, 0x2E]).unwrap();
        assert_eq!(values, vec![Value::Int(1), Value::Int(2)]);
        assert!(matches!(
            load(vec![0x80, 2, 0x4B, 1, 0x4B, 2, 0x2E]).unwrap_err(),
            Error::UnexpectedValue { .. }
        ));
    }

    #[test]
    fn custom_resolver() {
        let resolver = |module: &str, name: &str| -> Result<Value> {
            Ok(Value::text(&format!("{module}:{name}")))
        };
        let mut data = vec![0x80, 2, 0x63];
        data.extend_from_slice(b"a\nb\n.");
        let values = depickle_with(data, &resolver).unwrap();
        assert_eq!(values, vec![Value::text("a:b")]);
    }

    #[test]
    fn framed_protocol_4_stream() {
        // MARK, LONG4 -1, BINUNICODE8 "ab", MARK, BININT1 1, TUPLE,
        // EMPTY_LIST, BININT1 1, APPEND, DUP, LIST, STOP
        let mut body = vec![0x28, 0x8B, 2, 0, 0, 0, 0xFF, 0xFF, 0x8D];
        body.extend_from_slice(&2u64.to_le_bytes());
        body.extend_from_slice(b"ab");
        body.extend_from_slice(&[0x28, 0x4B, 1, 0x74, 0x5D, 0x4B, 1, 0x61, 0x32, 0x6C, 0x2E]);

        let mut data = vec![0x80, 4, 0x95];
        data.extend_from_slice(&(body.len() as u64).to_le_bytes());
        data.extend(body);

        let items = load(data).unwrap().to_vec().unwrap();
        assert_eq!(
            items,
            vec![
                Value::Int(-1),
                Value::text("ab"),
                Value::tuple(vec![Value::Int(1)]),
                Value::list(vec![Value::Int(1)]),
                Value::list(vec![Value::Int(1)]),
            ]
        );
        assert!(items[3].ptr_eq(&items[4]));
    }

    #[test]
    fn long4_is_twos_complement() {
        let v = load(vec![0x80, 2, 0x8B, 4, 0, 0, 0, 0, 0, 0, 0, 0x80, 0x2E]).unwrap();
        assert_eq!(v, Value::Int(-2_147_483_648));

        let mut data = vec![0x80, 2, 0x8B, 9, 0, 0, 0];
        data.extend_from_slice(&[0, 0, 0, 0, 0, 0, 0, 0, 0xFF]);
        data.push(0x2E);
        let v = load(data).unwrap();
        assert!(matches!(v, Value::Long(_)));
        assert_eq!(v.as_bigint().unwrap().to_string(), "-18446744073709551616");

        let v = load(vec![0x80, 2, 0x8B, 2, 0, 0, 0, 0x34, 0x12, 0x2E]).unwrap();
        assert_eq!(v, Value::Int(0x1234));
    }

    #[test]
    fn eight_byte_length_bytes() {
        // BINBYTES8 [1, 2, 3], BYTEARRAY8 [9], TUPLE2, STOP
        let mut data = vec![0x80, 5, 0x8E];
        data.extend_from_slice(&3u64.to_le_bytes());
        data.extend_from_slice(&[1, 2, 3, 0x96]);
        data.extend_from_slice(&1u64.to_le_bytes());
        data.extend_from_slice(&[9, 0x86, 0x2E]);
        assert_eq!(
            load(data).unwrap(),
            Value::tuple(vec![Value::bytes(&[1, 2, 3]), Value::bytes(&[9])])
        );

        let mut short = vec![0x80, 4, 0x8D];
        short.extend_from_slice(&5u64.to_le_bytes());
        short.extend_from_slice(b"ab");
        assert!(matches!(
            load(short).unwrap_err(),
            Error::BufferUnderrun { .. }
        ));
    }

    #[test]
    fn pop_mark_discards_down_to_the_mark() {
        // BININT1 7, MARK, BININT1 1, MARK, BININT1 2, POP_MARK, BININT1 3, POP_MARK, STOP
        let data = vec![
            0x80, 2, 0x4B, 7, 0x28, 0x4B, 1, 0x28, 0x4B, 2, 0x31, 0x4B, 3, 0x31, 0x2E,
        ];
        assert_eq!(depickle(data).unwrap(), vec![Value::Int(7)]);

        assert!(matches!(
            load(vec![0x80, 2, 0x4B, 1, 0x31, 0x2E]).unwrap_err(),
            Error::StackUnderflow { offset: 4 }
        ));
    }

    #[test]
    fn dup_without_a_value() {
        assert!(matches!(
            load(vec![0x80, 2, 0x32, 0x2E]).unwrap_err(),
            Error::StackUnderflow { offset: 2 }
        ));
        assert!(matches!(
            load(vec![0x80, 2, 0x28, 0x32, 0x2E]).unwrap_err(),
            Error::StackTypeMismatch { .. }
        ));
    }

    #[test]
    fn dict_and_list_from_mark() {
        // MARK, "k", BININT1 5, "j", NONE, DICT, STOP
        let data = vec![
            0x80, 2, 0x28, 0x8C, 1, b'k', 0x4B, 5, 0x8C, 1, b'j', 0x4E, 0x64, 0x2E,
        ];
        let v = load(data).unwrap();
        let dict = v.as_dict().unwrap().borrow();
        let entries: Vec<_> = dict.iter().map(|(k, v)| (k, v.clone())).collect();
        assert_eq!(entries, vec![("k", Value::Int(5)), ("j", Value::None)]);

        // MARK, BININT1 1, BININT1 2, LIST, STOP
        let v = load(vec![0x80, 2, 0x28, 0x4B, 1, 0x4B, 2, 0x6C, 0x2E]).unwrap();
        assert_eq!(v, Value::list(vec![Value::Int(1), Value::Int(2)]));

        assert!(matches!(
            load(vec![0x80, 2, 0x28, 0x8C, 1, b'k', 0x64, 0x2E]).unwrap_err(),
            Error::StackTypeMismatch { .. }
        ));
    }

    #[test]
    fn sets_become_lists() {
        // EMPTY_SET, MARK, BININT1 1, BININT1 2, ADDITEMS,
        // MARK, BININT1 3, FROZENSET, TUPLE2, STOP
        let data = vec![
            0x80, 4, 0x8F, 0x28, 0x4B, 1, 0x4B, 2, 0x90, 0x28, 0x4B, 3, 0x91, 0x86, 0x2E,
        ];
        assert_eq!(
            load(data).unwrap(),
            Value::tuple(vec![
                Value::list(vec![Value::Int(1), Value::Int(2)]),
                Value::list(vec![Value::Int(3)]),
            ])
        );
    }
}
