//! A read-only pickle machine for protocols 2 to 5.
//!
//! Classes are never imported. GLOBAL references become [`Value::Class`] (or
//! whatever a custom [`ClassResolver`] returns), and NEWOBJ/REDUCE/BUILD on a
//! class produce plain [`Instance`] data.

mod opcode;
mod value;
mod vm;

use bytes::Bytes;

pub use opcode::Opcode;
pub use value::{ClassRef, Dict, Instance, Value};
pub use vm::{ClassResolver, GenericClasses, PickleVm};

use crate::error::{Error, Result};

/// Runs a pickle stream and returns the residual stack.
pub fn depickle(data: impl Into<Bytes>) -> Result<Vec<Value>> {
    depickle_with(data, &GenericClasses)
}

pub fn depickle_with(data: impl Into<Bytes>, resolver: &dyn ClassResolver) -> Result<Vec<Value>> {
    PickleVm::new(data, resolver).run()
}

/// Runs a pickle stream that must leave exactly one value behind.
pub fn load(data: impl Into<Bytes>) -> Result<Value> {
    let mut values = depickle(data)?;
    match values.len() {
        1 => values.pop().ok_or(Error::UnexpectedEof),
        n => Err(Error::unexpected(
            "a single pickled root",
            format!("{n} values on the stack"),
        )),
    }
}
