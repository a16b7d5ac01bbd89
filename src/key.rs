//! Order-preserving byte keys.
//!
//! For a fixed spec, `encode(a) < encode(b)` exactly when
//! `compare(a, b) == Less`, and the keys are equal exactly when the values
//! compare equal. Every key is prefix-free, so keys of nested values can be
//! concatenated without losing order.
//!
//! Layout: a type tag byte (`type_rank << 4`) followed by a type-specific
//! body. Strings are escaped (`00` becomes `00 FF`) and end with `00 01`.
//! Documents and arrays end with a single `00`, which sorts below every
//! field marker (`02`) and type tag. A document field is written as the
//! marker, the value's type tag, the escaped name, then the value body.

use std::fmt;

use serde_json::Value as JsonValue;

use crate::compare::ordered_fields;
use crate::spec::CollationSpec;
use crate::value::{CanonicalNumber, Value};
use crate::weights;

const END: u8 = 0x00;
const FIELD: u8 = 0x02;
const NUMBER_NAN: u8 = 0x01;
const NUMBER_ORDERED: u8 = 0x02;

/// An encoded comparison key. Keys are only comparable with keys produced
/// under the same collation and locale-table version.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SortKey(Vec<u8>);

impl SortKey {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        SortKey(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// Smallest key of any value with the given type rank.
    pub fn type_floor(type_rank: u8) -> Self {
        SortKey(vec![type_tag(type_rank)])
    }

    /// Strict upper bound of every key with the given type rank.
    pub fn type_ceiling(type_rank: u8) -> Self {
        SortKey(vec![type_tag(type_rank) + 1])
    }
}

impl fmt::Debug for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SortKey({})", self.to_hex())
    }
}

fn type_tag(type_rank: u8) -> u8 {
    type_rank << 4
}

pub fn encode(value: &Value, spec: &CollationSpec) -> SortKey {
    let mut buf = Vec::new();
    write_value(value, spec, &mut buf);
    SortKey(buf)
}

pub fn encode_json(value: &JsonValue, spec: &CollationSpec) -> SortKey {
    encode(&Value::from_json(value), spec)
}

fn write_value(value: &Value, spec: &CollationSpec, buf: &mut Vec<u8>) {
    buf.push(type_tag(value.type_rank()));
    write_body(value, spec, buf);
}

fn write_body(value: &Value, spec: &CollationSpec, buf: &mut Vec<u8>) {
    match value {
        Value::Null => {}
        Value::Number(n) => match n.canonical() {
            CanonicalNumber::NaN => buf.push(NUMBER_NAN),
            CanonicalNumber::Ordered { approx, remainder } => {
                buf.push(NUMBER_ORDERED);
                buf.extend_from_slice(&ordered_f64(approx));
                buf.extend_from_slice(&ordered_i64(remainder));
            }
        },
        Value::String(s) => {
            if spec.is_simple() {
                write_escaped(s.as_bytes(), buf);
            } else {
                write_escaped(&weights::weight_bytes(s, spec), buf);
            }
        }
        Value::Document(fields) => {
            for (name, v) in ordered_fields(fields, spec).iter() {
                buf.push(FIELD);
                buf.push(type_tag(v.type_rank()));
                write_escaped(name.as_bytes(), buf);
                write_body(v, spec, buf);
            }
            buf.push(END);
        }
        Value::Array(items) => {
            for item in items {
                write_value(item, spec, buf);
            }
            buf.push(END);
        }
        Value::Binary(bytes) => {
            buf.extend_from_slice(&(bytes.len() as u64).to_be_bytes());
            buf.extend_from_slice(bytes);
        }
        Value::Boolean(b) => buf.push(u8::from(*b)),
        Value::DateTime(ms) => buf.extend_from_slice(&ordered_i64(*ms)),
    }
}

/// Escape `00` as `00 FF` and terminate with `00 01`.
fn write_escaped(bytes: &[u8], buf: &mut Vec<u8>) {
    for &b in bytes {
        buf.push(b);
        if b == 0 {
            buf.push(0xFF);
        }
    }
    buf.extend_from_slice(&[0x00, 0x01]);
}

fn ordered_i64(v: i64) -> [u8; 8] {
    ((v as u64) ^ (1 << 63)).to_be_bytes()
}

/// Big-endian bytes whose unsigned order matches `f64::total_cmp`.
fn ordered_f64(v: f64) -> [u8; 8] {
    let bits = v.to_bits();
    let flipped = if bits >> 63 == 1 { !bits } else { bits ^ (1 << 63) };
    flipped.to_be_bytes()
}
