// Copyright 2023 The Arbors Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Little-endian binary encoding of trees and schemas for the `.arbors`
//! file. The store treats each batch as an opaque byte run; this codec is
//! the only code that knows the layout.

use indexmap::IndexMap;
use thiserror::Error;

use crate::schema::{Kind, Schema};
use crate::tree::{OwnedTree, TreeValue};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("Unexpected end of encoded data")]
    UnexpectedEof,
    #[error("Unknown value tag {0}")]
    BadTag(u8),
    #[error("Encoded string is not valid UTF-8")]
    BadUtf8,
}

const TAG_NULL: u8 = 0;
const TAG_FALSE: u8 = 1;
const TAG_TRUE: u8 = 2;
const TAG_INT: u8 = 3;
const TAG_FLOAT: u8 = 4;
const TAG_STRING: u8 = 5;
const TAG_ARRAY: u8 = 6;
const TAG_OBJECT: u8 = 7;

pub fn encode_u32(buf: &mut Vec<u8>, value: u32) {
    buf.extend(value.to_le_bytes());
}

pub fn decode_u32(data: &mut &[u8]) -> Result<u32, CodecError> {
    let (bytes, rest) = data
        .split_first_chunk::<4>()
        .ok_or(CodecError::UnexpectedEof)?;
    *data = rest;
    Ok(u32::from_le_bytes(*bytes))
}

pub fn encode_str(buf: &mut Vec<u8>, value: &str) {
    encode_u32(buf, value.len() as u32);
    buf.extend_from_slice(value.as_bytes());
}

pub fn decode_str(data: &mut &[u8]) -> Result<String, CodecError> {
    let len = decode_u32(data)? as usize;
    if data.len() < len {
        return Err(CodecError::UnexpectedEof);
    }
    let (bytes, rest) = data.split_at(len);
    let text = std::str::from_utf8(bytes).map_err(|_| CodecError::BadUtf8)?;
    *data = rest;
    Ok(text.to_owned())
}

pub fn encode_value(buf: &mut Vec<u8>, value: &TreeValue) {
    match value {
        TreeValue::Null => buf.push(TAG_NULL),
        TreeValue::Bool(false) => buf.push(TAG_FALSE),
        TreeValue::Bool(true) => buf.push(TAG_TRUE),
        TreeValue::Int(v) => {
            buf.push(TAG_INT);
            buf.extend(v.to_le_bytes());
        }
        TreeValue::Float(v) => {
            buf.push(TAG_FLOAT);
            buf.extend(v.to_le_bytes());
        }
        TreeValue::String(v) => {
            buf.push(TAG_STRING);
            encode_str(buf, v);
        }
        TreeValue::Array(items) => {
            buf.push(TAG_ARRAY);
            encode_u32(buf, items.len() as u32);
            for item in items {
                encode_value(buf, item);
            }
        }
        TreeValue::Object(fields) => {
            buf.push(TAG_OBJECT);
            encode_u32(buf, fields.len() as u32);
            for (name, value) in fields {
                encode_str(buf, name);
                encode_value(buf, value);
            }
        }
    }
}

pub fn decode_value(data: &mut &[u8]) -> Result<TreeValue, CodecError> {
    let (&tag, rest) = data.split_first().ok_or(CodecError::UnexpectedEof)?;
    *data = rest;
    match tag {
        TAG_NULL => Ok(TreeValue::Null),
        TAG_FALSE => Ok(TreeValue::Bool(false)),
        TAG_TRUE => Ok(TreeValue::Bool(true)),
        TAG_INT => {
            let (bytes, rest) = data
                .split_first_chunk::<8>()
                .ok_or(CodecError::UnexpectedEof)?;
            *data = rest;
            Ok(TreeValue::Int(i64::from_le_bytes(*bytes)))
        }
        TAG_FLOAT => {
            let (bytes, rest) = data
                .split_first_chunk::<8>()
                .ok_or(CodecError::UnexpectedEof)?;
            *data = rest;
            Ok(TreeValue::Float(f64::from_le_bytes(*bytes)))
        }
        TAG_STRING => Ok(TreeValue::String(decode_str(data)?)),
        TAG_ARRAY => {
            let count = decode_u32(data)? as usize;
            let mut items = Vec::with_capacity(count.min(4096));
            for _ in 0..count {
                items.push(decode_value(data)?);
            }
            Ok(TreeValue::Array(items))
        }
        TAG_OBJECT => {
            let count = decode_u32(data)? as usize;
            let mut fields = IndexMap::with_capacity(count.min(4096));
            for _ in 0..count {
                let name = decode_str(data)?;
                fields.insert(name, decode_value(data)?);
            }
            Ok(TreeValue::Object(fields))
        }
        _ => Err(CodecError::BadTag(tag)),
    }
}

pub fn encode_tree(buf: &mut Vec<u8>, tree: &OwnedTree) {
    encode_value(buf, tree.root());
}

pub fn decode_tree(data: &mut &[u8]) -> Result<OwnedTree, CodecError> {
    Ok(OwnedTree::new(decode_value(data)?))
}

fn kind_tag(kind: Kind) -> u8 {
    match kind {
        Kind::Null => 0,
        Kind::Bool => 1,
        Kind::Int => 2,
        Kind::Float => 3,
        Kind::String => 4,
        Kind::Array => 5,
        Kind::Object => 6,
        Kind::Any => 7,
    }
}

fn kind_from_tag(tag: u8) -> Result<Kind, CodecError> {
    match tag {
        0 => Ok(Kind::Null),
        1 => Ok(Kind::Bool),
        2 => Ok(Kind::Int),
        3 => Ok(Kind::Float),
        4 => Ok(Kind::String),
        5 => Ok(Kind::Array),
        6 => Ok(Kind::Object),
        7 => Ok(Kind::Any),
        _ => Err(CodecError::BadTag(tag)),
    }
}

pub fn encode_schema(buf: &mut Vec<u8>, schema: &Schema) {
    encode_u32(buf, schema.len() as u32);
    for (name, kind) in schema.fields() {
        encode_str(buf, name);
        buf.push(kind_tag(kind));
    }
}

pub fn decode_schema(data: &mut &[u8]) -> Result<Schema, CodecError> {
    let count = decode_u32(data)? as usize;
    let mut fields = IndexMap::with_capacity(count.min(4096));
    for _ in 0..count {
        let name = decode_str(data)?;
        let (&tag, rest) = data.split_first().ok_or(CodecError::UnexpectedEof)?;
        *data = rest;
        fields.insert(name, kind_from_tag(tag)?);
    }
    Ok(Schema::new(fields))
}
