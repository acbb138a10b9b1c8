//! Schema-driven encoding and decoding.
//!
//! Every message version is described by a [`Schema`]: an ordered list of
//! named, typed fields. Encoding walks the schema in order and writes each
//! value big-endian; decoding is the exact inverse and produces a [`Struct`]
//! whose typed accessors the message modules use to build their own types.
//!
//! ```text
//! Schema { brokers: [Struct { node_id: Int32, host: String, port: Int32 }], ... }
//!          │
//!          ├─ encode: Struct ──► i32 len, (i32, i16 len + utf8, i32)*, ...
//!          └─ decode: bytes  ──► Struct (rejects truncation, bad lengths, trailing bytes)
//! ```
//!
//! Fields in a schema's optional tail may be missing entirely from a decoded
//! buffer. This is how a newer response version still decodes a reply from a
//! broker that stopped after the older version's fields (for example a
//! missing trailing `throttle_time_ms`): those fields decode as
//! [`Value::Null`] instead of failing.

use bytes::{BufMut, Bytes, BytesMut};
use nom::{
    IResult, InputLength,
    number::complete::{be_i8, be_i16, be_i32, be_i64},
};
use nombytes::NomBytes;

use crate::constants::MAX_PROTOCOL_ARRAY_SIZE;
use crate::encode::{ToByte, encode_as_array};
use crate::error::{Error, Result};
use crate::parser::{
    parse_array_len, parse_bytes, parse_nullable_bytes, parse_nullable_string, parse_string,
};

/// Wire type of a single field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Boolean,
    Int8,
    Int16,
    Int32,
    Int64,
    String,
    NullableString,
    Bytes,
    NullableBytes,
    Array(&'static FieldType),
    NullableArray(&'static FieldType),
    Struct(&'static Schema),
}

/// A named field inside a [`Schema`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub name: &'static str,
    pub ty: FieldType,
}

/// Ordered field layout of one message version (or of a nested struct).
#[derive(Debug, PartialEq, Eq)]
pub struct Schema {
    pub fields: &'static [Field],
    /// Number of trailing fields that may be absent from a decoded buffer.
    pub optional_tail: usize,
}

impl Schema {
    /// Mark the last `n` fields as optional when decoding.
    pub const fn with_optional_tail(self, n: usize) -> Self {
        Schema {
            fields: self.fields,
            optional_tail: n,
        }
    }

    /// Position of a field by name.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Whether this schema has a field with the given name.
    pub fn has_field(&self, name: &str) -> bool {
        self.index_of(name).is_some()
    }

    fn first_optional(&self) -> usize {
        self.fields.len().saturating_sub(self.optional_tail)
    }
}

/// Declare a [`Schema`] as a `const`.
///
/// ```ignore
/// const BROKER: Schema = schema! {
///     "node_id" => FieldType::Int32,
///     "host" => FieldType::String,
/// };
/// ```
macro_rules! schema {
    ($($name:literal => $ty:expr),* $(,)?) => {
        $crate::protocol::schema::Schema {
            fields: &[$($crate::protocol::schema::Field { name: $name, ty: $ty }),*],
            optional_tail: 0,
        }
    };
}
pub(crate) use schema;

/// A decoded (or to-be-encoded) field value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Null marker for nullable types, or a field absent from an optional tail.
    Null,
    Bool(bool),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    String(String),
    Bytes(Bytes),
    Array(Vec<Value>),
    Struct(Struct),
}

impl Value {
    fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Int8(_) => "int8",
            Value::Int16(_) => "int16",
            Value::Int32(_) => "int32",
            Value::Int64(_) => "int64",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Array(_) => "array",
            Value::Struct(_) => "struct",
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i8> for Value {
    fn from(v: i8) -> Self {
        Value::Int8(v)
    }
}

impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Value::Int16(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<Bytes> for Value {
    fn from(v: Bytes) -> Self {
        Value::Bytes(v)
    }
}

impl From<Vec<i32>> for Value {
    fn from(v: Vec<i32>) -> Self {
        Value::Array(v.into_iter().map(Value::Int32).collect())
    }
}

impl From<Vec<i64>> for Value {
    fn from(v: Vec<i64>) -> Self {
        Value::Array(v.into_iter().map(Value::Int64).collect())
    }
}

impl From<Vec<String>> for Value {
    fn from(v: Vec<String>) -> Self {
        Value::Array(v.into_iter().map(Value::String).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Values laid out according to a [`Schema`].
#[derive(Debug, Clone, PartialEq)]
pub struct Struct {
    schema: &'static Schema,
    values: Vec<Value>,
}

impl Struct {
    /// An empty struct: every field starts out as [`Value::Null`].
    pub fn new(schema: &'static Schema) -> Self {
        Self {
            schema,
            values: vec![Value::Null; schema.fields.len()],
        }
    }

    pub fn schema(&self) -> &'static Schema {
        self.schema
    }

    /// Set a field by name.
    ///
    /// Fields that do not exist in this schema version are ignored, so one
    /// builder can populate every version of a message.
    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        if let Some(idx) = self.schema.index_of(name) {
            self.values[idx] = value.into();
        }
        self
    }

    /// Set an array-of-struct field, building each element with `f`.
    ///
    /// Ignored when the field does not exist in this schema version.
    pub fn with_structs<I, F>(self, name: &str, items: I, mut f: F) -> Self
    where
        I: IntoIterator,
        F: FnMut(Struct, I::Item) -> Struct,
    {
        let Some(element) = self.element_schema(name) else {
            return self;
        };
        let values = items
            .into_iter()
            .map(|item| Value::Struct(f(Struct::new(element), item)))
            .collect::<Vec<_>>();
        self.with(name, Value::Array(values))
    }

    /// Schema of the struct elements of an array field (or of a struct field).
    pub fn element_schema(&self, name: &str) -> Option<&'static Schema> {
        let field = self.field(name)?;
        match field.ty {
            FieldType::Struct(schema) => Some(schema),
            FieldType::Array(&FieldType::Struct(schema))
            | FieldType::NullableArray(&FieldType::Struct(schema)) => Some(schema),
            _ => None,
        }
    }

    fn field(&self, name: &str) -> Option<&'static Field> {
        let schema: &'static Schema = self.schema;
        schema.fields.iter().find(|f| f.name == name)
    }

    /// Raw value of a field, or `None` when the field is not part of this schema.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.schema.index_of(name).map(|idx| &self.values[idx])
    }

    fn require(&self, name: &str) -> Result<&Value> {
        self.get(name)
            .ok_or_else(|| Error::ProtocolDecode(format!("no field '{}' in schema", name)))
    }

    fn mismatch(name: &str, expected: &str, found: &Value) -> Error {
        Error::ProtocolDecode(format!(
            "field '{}' expected {}, found {}",
            name,
            expected,
            found.kind()
        ))
    }

    pub fn boolean(&self, name: &str) -> Result<bool> {
        match self.require(name)? {
            Value::Bool(v) => Ok(*v),
            other => Err(Self::mismatch(name, "boolean", other)),
        }
    }

    pub fn int8(&self, name: &str) -> Result<i8> {
        match self.require(name)? {
            Value::Int8(v) => Ok(*v),
            other => Err(Self::mismatch(name, "int8", other)),
        }
    }

    pub fn int16(&self, name: &str) -> Result<i16> {
        match self.require(name)? {
            Value::Int16(v) => Ok(*v),
            other => Err(Self::mismatch(name, "int16", other)),
        }
    }

    pub fn int32(&self, name: &str) -> Result<i32> {
        match self.require(name)? {
            Value::Int32(v) => Ok(*v),
            other => Err(Self::mismatch(name, "int32", other)),
        }
    }

    pub fn int64(&self, name: &str) -> Result<i64> {
        match self.require(name)? {
            Value::Int64(v) => Ok(*v),
            other => Err(Self::mismatch(name, "int64", other)),
        }
    }

    /// A field that only some versions carry (or an absent optional tail field).
    pub fn opt_boolean(&self, name: &str) -> Result<Option<bool>> {
        match self.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(_) => self.boolean(name).map(Some),
        }
    }

    pub fn opt_int16(&self, name: &str) -> Result<Option<i16>> {
        match self.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(_) => self.int16(name).map(Some),
        }
    }

    pub fn opt_int32(&self, name: &str) -> Result<Option<i32>> {
        match self.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(_) => self.int32(name).map(Some),
        }
    }

    pub fn opt_int64(&self, name: &str) -> Result<Option<i64>> {
        match self.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(_) => self.int64(name).map(Some),
        }
    }

    pub fn string(&self, name: &str) -> Result<String> {
        match self.require(name)? {
            Value::String(v) => Ok(v.clone()),
            other => Err(Self::mismatch(name, "string", other)),
        }
    }

    /// A nullable string; also `None` when the field is not in this version.
    pub fn nullable_string(&self, name: &str) -> Result<Option<String>> {
        match self.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(v)) => Ok(Some(v.clone())),
            Some(other) => Err(Self::mismatch(name, "string", other)),
        }
    }

    pub fn bytes(&self, name: &str) -> Result<Bytes> {
        match self.require(name)? {
            Value::Bytes(v) => Ok(v.clone()),
            other => Err(Self::mismatch(name, "bytes", other)),
        }
    }

    pub fn nullable_bytes(&self, name: &str) -> Result<Option<Bytes>> {
        match self.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Bytes(v)) => Ok(Some(v.clone())),
            Some(other) => Err(Self::mismatch(name, "bytes", other)),
        }
    }

    fn array(&self, name: &str) -> Result<Option<&[Value]>> {
        match self.require(name)? {
            Value::Null => Ok(None),
            Value::Array(items) => Ok(Some(items)),
            other => Err(Self::mismatch(name, "array", other)),
        }
    }

    /// Struct elements of an array field. A null array yields no elements.
    pub fn structs(&self, name: &str) -> Result<Vec<&Struct>> {
        Ok(self.opt_structs(name)?.unwrap_or_default())
    }

    /// Struct elements of a nullable array field.
    pub fn opt_structs(&self, name: &str) -> Result<Option<Vec<&Struct>>> {
        let Some(items) = self.array(name)? else {
            return Ok(None);
        };
        items
            .iter()
            .map(|item| match item {
                Value::Struct(s) => Ok(s),
                other => Err(Self::mismatch(name, "struct", other)),
            })
            .collect::<Result<Vec<_>>>()
            .map(Some)
    }

    pub fn int32_array(&self, name: &str) -> Result<Vec<i32>> {
        self.array(name)?
            .unwrap_or_default()
            .iter()
            .map(|item| match item {
                Value::Int32(v) => Ok(*v),
                other => Err(Self::mismatch(name, "int32", other)),
            })
            .collect()
    }

    pub fn int64_array(&self, name: &str) -> Result<Vec<i64>> {
        self.array(name)?
            .unwrap_or_default()
            .iter()
            .map(|item| match item {
                Value::Int64(v) => Ok(*v),
                other => Err(Self::mismatch(name, "int64", other)),
            })
            .collect()
    }

    /// Strings of a nullable array; `None` for a null array or a field not in this version.
    pub fn opt_string_array(&self, name: &str) -> Result<Option<Vec<String>>> {
        if self.get(name).is_none() {
            return Ok(None);
        }
        let Some(items) = self.array(name)? else {
            return Ok(None);
        };
        items
            .iter()
            .map(|item| match item {
                Value::String(v) => Ok(v.clone()),
                other => Err(Self::mismatch(name, "string", other)),
            })
            .collect::<Result<Vec<_>>>()
            .map(Some)
    }

    pub fn string_array(&self, name: &str) -> Result<Vec<String>> {
        Ok(self.opt_string_array(name)?.unwrap_or_default())
    }

    /// Encode into a fresh buffer.
    pub fn to_bytes(&self) -> Result<Bytes> {
        let mut buffer = BytesMut::with_capacity(128);
        self.encode(&mut buffer)?;
        Ok(buffer.freeze())
    }
}

impl ToByte for Struct {
    fn encode<W: BufMut>(&self, buffer: &mut W) -> Result<()> {
        let first_optional = self.schema.first_optional();
        for (idx, (field, value)) in self.schema.fields.iter().zip(&self.values).enumerate() {
            // An unset optional tail field ends the message, the way an older broker writes it.
            if idx >= first_optional && *value == Value::Null && !is_nullable(&field.ty) {
                break;
            }
            encode_value(field.name, &field.ty, value, buffer)?;
        }
        Ok(())
    }
}

fn is_nullable(ty: &FieldType) -> bool {
    matches!(
        ty,
        FieldType::NullableString | FieldType::NullableBytes | FieldType::NullableArray(_)
    )
}

fn encode_value<W: BufMut>(name: &str, ty: &FieldType, value: &Value, buffer: &mut W) -> Result<()> {
    match (ty, value) {
        (FieldType::Boolean, Value::Bool(v)) => v.encode(buffer),
        (FieldType::Int8, Value::Int8(v)) => v.encode(buffer),
        (FieldType::Int16, Value::Int16(v)) => v.encode(buffer),
        (FieldType::Int32, Value::Int32(v)) => v.encode(buffer),
        (FieldType::Int64, Value::Int64(v)) => v.encode(buffer),
        (FieldType::String | FieldType::NullableString, Value::String(v)) => v.encode(buffer),
        (FieldType::NullableString, Value::Null) => None::<&str>.encode(buffer),
        (FieldType::Bytes | FieldType::NullableBytes, Value::Bytes(v)) => v.encode(buffer),
        (FieldType::NullableBytes, Value::Null) => None::<Bytes>.encode(buffer),
        (FieldType::Array(element) | FieldType::NullableArray(element), Value::Array(items)) => {
            encode_as_array(buffer, items, |buffer, item| {
                encode_value(name, element, item, buffer)
            })
        }
        (FieldType::NullableArray(_), Value::Null) => (-1i32).encode(buffer),
        (FieldType::Struct(schema), Value::Struct(s)) => {
            if !std::ptr::eq(*schema, s.schema) && *schema != s.schema {
                return Err(Error::ProtocolEncode(format!(
                    "field '{}' built with a foreign schema",
                    name
                )));
            }
            s.encode(buffer)
        }
        (ty, value) => Err(Error::ProtocolEncode(format!(
            "field '{}' expects {:?}, got {}",
            name,
            ty,
            value.kind()
        ))),
    }
}

fn decode_value(ty: &'static FieldType, s: NomBytes) -> IResult<NomBytes, Value> {
    match *ty {
        FieldType::Boolean => {
            let (s, v) = be_i8(s)?;
            Ok((s, Value::Bool(v != 0)))
        }
        FieldType::Int8 => {
            let (s, v) = be_i8(s)?;
            Ok((s, Value::Int8(v)))
        }
        FieldType::Int16 => {
            let (s, v) = be_i16(s)?;
            Ok((s, Value::Int16(v)))
        }
        FieldType::Int32 => {
            let (s, v) = be_i32(s)?;
            Ok((s, Value::Int32(v)))
        }
        FieldType::Int64 => {
            let (s, v) = be_i64(s)?;
            Ok((s, Value::Int64(v)))
        }
        FieldType::String => {
            let (s, v) = parse_string(s)?;
            Ok((s, Value::String(v)))
        }
        FieldType::NullableString => {
            let (s, v) = parse_nullable_string(s)?;
            Ok((s, v.map(Value::String).unwrap_or(Value::Null)))
        }
        FieldType::Bytes => {
            let (s, v) = parse_bytes(s)?;
            Ok((s, Value::Bytes(v)))
        }
        FieldType::NullableBytes => {
            let (s, v) = parse_nullable_bytes(s)?;
            Ok((s, v.map(Value::Bytes).unwrap_or(Value::Null)))
        }
        FieldType::Array(element) => {
            let (s, len) = parse_array_len(s, MAX_PROTOCOL_ARRAY_SIZE)?;
            // Brokers occasionally send -1 for an empty non-nullable array.
            let (s, items) = decode_elements(element, s, len.unwrap_or(0))?;
            Ok((s, Value::Array(items)))
        }
        FieldType::NullableArray(element) => {
            let (s, len) = parse_array_len(s, MAX_PROTOCOL_ARRAY_SIZE)?;
            match len {
                None => Ok((s, Value::Null)),
                Some(len) => {
                    let (s, items) = decode_elements(element, s, len)?;
                    Ok((s, Value::Array(items)))
                }
            }
        }
        FieldType::Struct(schema) => {
            let (s, v) = decode_struct(schema, s)?;
            Ok((s, Value::Struct(v)))
        }
    }
}

fn decode_elements(
    element: &'static FieldType,
    mut s: NomBytes,
    len: usize,
) -> IResult<NomBytes, Vec<Value>> {
    // Cap the pre-allocation: the length prefix is untrusted until the elements parse.
    let mut items = Vec::with_capacity(len.min(1024));
    for _ in 0..len {
        let (rest, item) = decode_value(element, s)?;
        items.push(item);
        s = rest;
    }
    Ok((s, items))
}

fn decode_struct(schema: &'static Schema, mut s: NomBytes) -> IResult<NomBytes, Struct> {
    let first_optional = schema.first_optional();
    let mut values = Vec::with_capacity(schema.fields.len());
    for (idx, field) in schema.fields.iter().enumerate() {
        if idx >= first_optional && s.input_len() == 0 {
            values.push(Value::Null);
            continue;
        }
        let (rest, value) = decode_value(&field.ty, s)?;
        values.push(value);
        s = rest;
    }
    Ok((s, Struct { schema, values }))
}

/// Decode a complete message body. Leftover bytes are a schema/version mismatch.
pub fn decode(schema: &'static Schema, bytes: Bytes) -> Result<Struct> {
    let total = bytes.len();
    let (rest, decoded) = decode_struct(schema, NomBytes::new(bytes)).map_err(|e| {
        let reason = match e {
            nom::Err::Incomplete(_) => "truncated buffer".to_string(),
            nom::Err::Error(e) | nom::Err::Failure(e) => match e.code {
                nom::error::ErrorKind::Eof => "truncated buffer".to_string(),
                code => format!("{:?}", code),
            },
        };
        Error::ProtocolDecode(format!("{} ({} bytes)", reason, total))
    })?;
    let leftover = rest.input_len();
    if leftover > 0 {
        return Err(Error::ProtocolDecode(format!(
            "{} trailing bytes after message ({} bytes)",
            leftover, total
        )));
    }
    Ok(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    const POINT: Schema = schema! {
        "x" => FieldType::Int32,
        "label" => FieldType::NullableString,
    };

    const SHAPE: Schema = schema! {
        "flag" => FieldType::Boolean,
        "points" => FieldType::Array(&FieldType::Struct(&POINT)),
        "tags" => FieldType::NullableArray(&FieldType::String),
        "blob" => FieldType::Bytes,
        "extra" => FieldType::Int32,
    }
    .with_optional_tail(1);

    fn shape() -> Struct {
        Struct::new(&SHAPE)
            .with("flag", true)
            .with_structs("points", [(1, Some("a")), (2, None)], |s, (x, label)| {
                s.with("x", x).with("label", label)
            })
            .with("tags", Some(vec!["t1".to_string()]))
            .with("blob", Bytes::from_static(b"\x01\x02"))
            .with("extra", 9)
    }

    #[test]
    fn test_encode_decode_nested() {
        let bytes = shape().to_bytes().unwrap();
        let decoded = decode(&SHAPE, bytes).unwrap();

        assert!(decoded.boolean("flag").unwrap());
        let points = decoded.structs("points").unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].int32("x").unwrap(), 1);
        assert_eq!(points[0].nullable_string("label").unwrap(), Some("a".into()));
        assert_eq!(points[1].nullable_string("label").unwrap(), None);
        assert_eq!(decoded.string_array("tags").unwrap(), vec!["t1".to_string()]);
        assert_eq!(decoded.bytes("blob").unwrap(), Bytes::from_static(b"\x01\x02"));
        assert_eq!(decoded.opt_int32("extra").unwrap(), Some(9));
    }

    #[test]
    fn test_optional_tail_absent() {
        let bytes = shape().with("extra", Value::Null).to_bytes().unwrap();
        let decoded = decode(&SHAPE, bytes).unwrap();
        assert_eq!(decoded.opt_int32("extra").unwrap(), None);
    }

    #[test]
    fn test_null_array() {
        let bytes = shape().with("tags", Value::Null).to_bytes().unwrap();
        let decoded = decode(&SHAPE, bytes).unwrap();
        assert_eq!(decoded.opt_string_array("tags").unwrap(), None);
    }

    #[test]
    fn test_truncated_buffer_rejected() {
        let bytes = shape().to_bytes().unwrap();
        for cut in 1..bytes.len() - 4 {
            let result = decode(&SHAPE, bytes.slice(..cut));
            assert!(
                matches!(result, Err(Error::ProtocolDecode(_))),
                "cut at {} should fail",
                cut
            );
        }
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut bytes = BytesMut::from(&shape().to_bytes().unwrap()[..]);
        bytes.put_u8(0);
        let err = decode(&SHAPE, bytes.freeze()).unwrap_err();
        assert!(err.to_string().contains("trailing bytes"));
    }

    #[test]
    fn test_type_mismatch_on_encode() {
        let bad = Struct::new(&POINT).with("x", "not a number");
        assert!(matches!(bad.to_bytes(), Err(Error::ProtocolEncode(_))));
    }

    #[test]
    fn test_missing_required_field_on_encode() {
        let bad = Struct::new(&POINT);
        assert!(bad.to_bytes().is_err());
    }

    #[test]
    fn test_unknown_field_ignored_by_builder() {
        let s = Struct::new(&POINT).with("x", 1).with("not_in_this_version", 5);
        assert_eq!(s.get("not_in_this_version"), None);
        assert!(s.to_bytes().is_ok());
    }

    #[test]
    fn test_accessor_type_errors() {
        let s = Struct::new(&POINT).with("x", 1);
        assert!(s.int64("x").is_err());
        assert!(s.int32("missing").is_err());
        assert_eq!(s.opt_int64("missing").unwrap(), None);
    }

    #[test]
    fn test_oversized_array_rejected() {
        let mut buf = BytesMut::new();
        buf.put_i8(1);
        buf.put_i32(MAX_PROTOCOL_ARRAY_SIZE + 1);
        assert!(decode(&SHAPE, buf.freeze()).is_err());
    }
}
