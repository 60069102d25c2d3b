use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use num_bigint::BigInt;
use num_traits::ToPrimitive;
use once_cell::unsync::OnceCell;

/// A decoded pickle value.
///
/// Containers are reference counted so that memo back-references share one
/// allocation. Use [`Value::ptr_eq`] to compare identity and `==` to compare
/// structure. Value graphs may contain cycles through mutable containers, so
/// `==` and `Debug` are only safe on acyclic data.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Long(BigInt),
    Float(f64),
    Text(Rc<str>),
    Bytes(Rc<[u8]>),
    Tuple(Rc<[Value]>),
    List(Rc<RefCell<Vec<Value>>>),
    Dict(Rc<RefCell<Dict>>),
    Class(Rc<ClassRef>),
    Instance(Rc<Instance>),
}

/// String-keyed mapping that keeps insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dict {
    entries: Vec<(String, Value)>,
}

impl Dict {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces `key`. A replaced key keeps its original position.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => *slot = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for Dict {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        let mut dict = Dict::new();
        for (k, v) in iter {
            dict.insert(k, v);
        }
        dict
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClassRef {
    pub module: String,
    pub name: String,
}

impl ClassRef {
    pub fn new(module: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ClassRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.module, self.name)
    }
}

/// An object built by NEWOBJ or REDUCE.
///
/// State is attached afterwards by BUILD and can be set exactly once.
#[derive(Debug, PartialEq)]
pub struct Instance {
    class: Rc<ClassRef>,
    args: Vec<Value>,
    state: OnceCell<Value>,
}

impl Instance {
    pub fn new(class: Rc<ClassRef>, args: Vec<Value>) -> Self {
        Self {
            class,
            args,
            state: OnceCell::new(),
        }
    }

    pub fn with_state(class: Rc<ClassRef>, args: Vec<Value>, state: Value) -> Self {
        Self {
            class,
            args,
            state: OnceCell::with_value(state),
        }
    }

    pub fn class(&self) -> &Rc<ClassRef> {
        &self.class
    }

    pub fn module(&self) -> &str {
        &self.class.module
    }

    pub fn name(&self) -> &str {
        &self.class.name
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    pub fn state(&self) -> Option<&Value> {
        self.state.get()
    }

    /// Attaches state, handing it back if state was already attached.
    pub fn set_state(&self, state: Value) -> Result<(), Value> {
        self.state.set(state)
    }
}

impl Value {
    pub fn text(s: &str) -> Self {
        Value::Text(Rc::from(s))
    }

    pub fn bytes(b: &[u8]) -> Self {
        Value::Bytes(Rc::from(b))
    }

    pub fn tuple(items: Vec<Value>) -> Self {
        Value::Tuple(Rc::from(items))
    }

    pub fn list(items: Vec<Value>) -> Self {
        Value::List(Rc::new(RefCell::new(items)))
    }

    pub fn dict<K: Into<String>>(entries: impl IntoIterator<Item = (K, Value)>) -> Self {
        Value::Dict(Rc::new(RefCell::new(entries.into_iter().collect())))
    }

    pub fn class(module: &str, name: &str) -> Self {
        Value::Class(Rc::new(ClassRef::new(module, name)))
    }

    pub fn instance(instance: Instance) -> Self {
        Value::Instance(Rc::new(instance))
    }

    /// Normalises big integers that fit a machine word.
    pub fn from_bigint(n: BigInt) -> Self {
        match n.to_i64() {
            Some(small) => Value::Int(small),
            None => Value::Long(n),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Value::None => "None",
            Value::Bool(_) => "bool",
            Value::Int(_) | Value::Long(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "str",
            Value::Bytes(_) => "bytes",
            Value::Tuple(_) => "tuple",
            Value::List(_) => "list",
            Value::Dict(_) => "dict",
            Value::Class(_) => "class",
            Value::Instance(_) => "instance",
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s.as_ref()),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            Value::Long(n) => n.to_i64(),
            _ => None,
        }
    }

    /// Integers of any width, for fields that may exceed a machine word.
    pub fn as_bigint(&self) -> Option<BigInt> {
        match self {
            Value::Int(n) => Some(BigInt::from(*n)),
            Value::Long(n) => Some(n.clone()),
            _ => None,
        }
    }

    pub fn as_instance(&self) -> Option<&Rc<Instance>> {
        match self {
            Value::Instance(inst) => Some(inst),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&Rc<RefCell<Dict>>> {
        match self {
            Value::Dict(d) => Some(d),
            _ => None,
        }
    }

    /// Items of a tuple or list. Cloning only bumps reference counts.
    pub fn to_vec(&self) -> Option<Vec<Value>> {
        match self {
            Value::Tuple(items) => Some(items.to_vec()),
            Value::List(items) => Some(items.borrow().clone()),
            _ => None,
        }
    }

    /// Identity comparison for reference-counted variants.
    pub fn ptr_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Text(a), Value::Text(b)) => Rc::ptr_eq(a, b),
            (Value::Bytes(a), Value::Bytes(b)) => Rc::ptr_eq(a, b),
            (Value::Tuple(a), Value::Tuple(b)) => Rc::ptr_eq(a, b),
            (Value::List(a), Value::List(b)) => Rc::ptr_eq(a, b),
            (Value::Dict(a), Value::Dict(b)) => Rc::ptr_eq(a, b),
            (Value::Class(a), Value::Class(b)) => Rc::ptr_eq(a, b),
            (Value::Instance(a), Value::Instance(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// Shallow rendering for diagnostics; never descends into containers.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => f.write_str("None"),
            Value::Bool(true) => f.write_str("True"),
            Value::Bool(false) => f.write_str("False"),
            Value::Int(n) => write!(f, "{n}"),
            Value::Long(n) => write!(f, "{n}"),
            Value::Float(x) if x.is_finite() && x.fract() == 0.0 => write!(f, "{x:.1}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Text(s) if s.chars().count() > 40 => {
                let head: String = s.chars().take(40).collect();
                write!(f, "{head:?}...")
            }
            Value::Text(s) => write!(f, "{:?}", &**s),
            Value::Bytes(b) => write!(f, "bytes[{}]", b.len()),
            Value::Tuple(items) => write!(f, "tuple[{}]", items.len()),
            Value::List(items) => write!(f, "list[{}]", items.borrow().len()),
            Value::Dict(d) => write!(f, "dict[{}]", d.borrow().len()),
            Value::Class(c) => write!(f, "<class {c}>"),
            Value::Instance(i) => write!(f, "<{} instance>", i.class()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dict_keeps_first_position_on_replace() {
        let mut d = Dict::new();
        d.insert("a", Value::Int(1));
        d.insert("b", Value::Int(2));
        d.insert("a", Value::Int(3));
        let keys: Vec<_> = d.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, ["a", "b"]);
        assert_eq!(d.get("a"), Some(&Value::Int(3)));
    }

    #[test]
    fn instance_state_is_set_once() {
        let inst = Instance::new(Rc::new(ClassRef::new("renpy.ast", "Pass")), vec![]);
        assert!(inst.state().is_none());
        inst.set_state(Value::dict([("linenumber", Value::Int(1))]))
            .unwrap();
        assert!(inst.set_state(Value::None).is_err());
        assert!(inst.state().is_some_and(|s| !s.is_none()));
    }

    #[test]
    fn identity_vs_equality() {
        let a = Value::list(vec![Value::Int(1)]);
        let b = Value::list(vec![Value::Int(1)]);
        assert_eq!(a, b);
        assert!(!a.ptr_eq(&b));
        assert!(a.ptr_eq(&a.clone()));
    }

    #[test]
    fn bigint_normalisation() {
        assert_eq!(Value::from_bigint(BigInt::from(-5)), Value::Int(-5));
        let big = BigInt::from(u64::MAX);
        assert_eq!(Value::from_bigint(big.clone()), Value::Long(big));
    }

    #[test]
    fn display_is_shallow() {
        let v = Value::list(vec![Value::text("x"), Value::None]);
        assert_eq!(v.to_string(), "list[2]");
        assert_eq!(Value::text("hi").to_string(), "\"hi\"");
        assert_eq!(Value::class("renpy.ast", "Say").to_string(), "<class renpy.ast.Say>");
        assert_eq!(Value::Float(1.0).to_string(), "1.0");
        assert_eq!(Value::Float(0.25).to_string(), "0.25");
    }
}
