//! Fixed-width record encoding.
//!
//! A record type describes itself once through [`Record::schema`], an ordered
//! list of fields with a fixed encoded width each. The schema fixes the size of
//! every encoded record, which in turn fixes the size of every node slot.
//!
//! Layout rules:
//! - integers are big-endian, signed values in two's complement
//! - floats are stored as their IEEE-754 bit pattern, big-endian
//! - booleans take one byte, `1` for true
//! - strings are right-padded with spaces to their maximum length and
//!   trimmed of trailing whitespace when read back

use std::collections::HashSet;
use std::marker::PhantomData;
use std::mem;

use bytes::{Buf, BufMut, BytesMut};

use crate::config::DEFAULT_STRING_MAX_LENGTH;
use crate::{Result, StorageError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FieldKind {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    Bool,
    /// Fixed-maximum-length string; `max_len` is counted in bytes.
    Str { max_len: usize },
}

impl FieldKind {
    /// Number of bytes the field occupies in an encoded record.
    pub fn width(&self) -> usize {
        match self {
            FieldKind::I8 | FieldKind::U8 | FieldKind::Bool => 1,
            FieldKind::I16 | FieldKind::U16 => 2,
            FieldKind::I32 | FieldKind::U32 | FieldKind::F32 => 4,
            FieldKind::I64 | FieldKind::U64 | FieldKind::F64 => 8,
            FieldKind::Str { max_len } => *max_len,
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            FieldKind::I8 => "i8",
            FieldKind::I16 => "i16",
            FieldKind::I32 => "i32",
            FieldKind::I64 => "i64",
            FieldKind::U8 => "u8",
            FieldKind::U16 => "u16",
            FieldKind::U32 => "u32",
            FieldKind::U64 => "u64",
            FieldKind::F32 => "f32",
            FieldKind::F64 => "f64",
            FieldKind::Bool => "bool",
            FieldKind::Str { .. } => "string",
        }
    }

    fn same_kind(&self, other: &FieldKind) -> bool {
        mem::discriminant(self) == mem::discriminant(other)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Field {
    pub name: &'static str,
    pub kind: FieldKind,
}

impl Field {
    pub const fn new(name: &'static str, kind: FieldKind) -> Self {
        Self { name, kind }
    }

    /// A string field with the default maximum length.
    pub const fn string(name: &'static str) -> Self {
        Self::string_with_max(name, DEFAULT_STRING_MAX_LENGTH)
    }

    pub const fn string_with_max(name: &'static str, max_len: usize) -> Self {
        Self::new(name, FieldKind::Str { max_len })
    }
}

/// Ordered field list of a record type.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Schema {
    fields: Vec<Field>,
}

impl Schema {
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn encoded_size(&self) -> usize {
        self.fields.iter().map(|field| field.kind.width()).sum()
    }

    /// Checked once when a tree is opened.
    pub fn validate(&self) -> Result<()> {
        if self.fields.is_empty() {
            return Err(StorageError::InvalidArgument(
                "record schema has no fields".to_string(),
            ));
        }

        let mut names = HashSet::with_capacity(self.fields.len());
        for field in &self.fields {
            if !names.insert(field.name) {
                return Err(StorageError::InvalidArgument(format!(
                    "field '{}' is declared more than once",
                    field.name
                )));
            }
            if let FieldKind::Str { max_len: 0 } = field.kind {
                return Err(StorageError::InvalidArgument(format!(
                    "maxLength of field '{}' should be greater than 0",
                    field.name
                )));
            }
        }

        Ok(())
    }
}

impl FromIterator<Field> for Schema {
    fn from_iter<I: IntoIterator<Item = Field>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

/// A value that can be stored in the tree.
///
/// `encode` and `decode` must visit the fields in the order `schema` lists
/// them; the writer and reader reject any other order.
pub trait Record: Sized {
    fn schema() -> Schema;

    fn key(&self) -> i64;

    fn encode(&self, writer: &mut RecordWriter<'_>) -> Result<()>;

    fn decode(reader: &mut RecordReader<'_>) -> Result<Self>;
}

fn field_mismatch(position: usize, field: Option<&Field>, wanted: &FieldKind) -> StorageError {
    match field {
        Some(field) => StorageError::InvalidArgument(format!(
            "field #{} '{}' is declared as {}, not {}",
            position,
            field.name,
            field.kind.type_name(),
            wanted.type_name()
        )),
        None => StorageError::InvalidArgument(format!(
            "record has no field #{} ({} requested)",
            position,
            wanted.type_name()
        )),
    }
}

macro_rules! put_scalar {
    ($(#[$meta:meta])* $name:ident, $ty:ty, $kind:ident, $put:ident) => {
        $(#[$meta])*
        pub fn $name(&mut self, value: $ty) -> Result<()> {
            self.advance(FieldKind::$kind)?;
            self.buf.$put(value);
            Ok(())
        }
    };
}

macro_rules! get_scalar {
    ($name:ident, $ty:ty, $kind:ident, $get:ident) => {
        pub fn $name(&mut self) -> Result<$ty> {
            self.advance(FieldKind::$kind)?;
            Ok(self.buf.$get())
        }
    };
}

/// Writes one record's fields in schema order.
pub struct RecordWriter<'a> {
    schema: &'a Schema,
    buf: BytesMut,
    next: usize,
}

impl<'a> RecordWriter<'a> {
    pub(crate) fn new(schema: &'a Schema) -> Self {
        Self {
            schema,
            buf: BytesMut::with_capacity(schema.encoded_size()),
            next: 0,
        }
    }

    fn advance(&mut self, wanted: FieldKind) -> Result<Field> {
        let field = self.schema.fields().get(self.next);
        match field {
            Some(field) if field.kind.same_kind(&wanted) => {
                self.next += 1;
                Ok(*field)
            }
            _ => Err(field_mismatch(self.next, field, &wanted)),
        }
    }

    put_scalar!(put_i8, i8, I8, put_i8);
    put_scalar!(put_i16, i16, I16, put_i16);
    put_scalar!(put_i32, i32, I32, put_i32);
    put_scalar!(put_i64, i64, I64, put_i64);
    put_scalar!(put_u8, u8, U8, put_u8);
    put_scalar!(put_u16, u16, U16, put_u16);
    put_scalar!(put_u32, u32, U32, put_u32);
    put_scalar!(put_u64, u64, U64, put_u64);
    put_scalar!(
        /// Stored as the IEEE-754 bit pattern.
        put_f32, f32, F32, put_f32
    );
    put_scalar!(put_f64, f64, F64, put_f64);

    pub fn put_bool(&mut self, value: bool) -> Result<()> {
        self.advance(FieldKind::Bool)?;
        self.buf.put_u8(u8::from(value));
        Ok(())
    }

    /// Fails when `value` is longer than the field's maximum length.
    pub fn put_str(&mut self, value: &str) -> Result<()> {
        let field = self.advance(FieldKind::Str { max_len: 0 })?;
        let max_len = field.kind.width();
        if value.len() > max_len {
            return Err(StorageError::InvalidArgument(format!(
                "length of string field '{}' should be at most {}, got {}",
                field.name,
                max_len,
                value.len()
            )));
        }

        self.buf.put_slice(value.as_bytes());
        self.buf.put_bytes(b' ', max_len - value.len());
        Ok(())
    }

    pub(crate) fn finish(self) -> Result<Vec<u8>> {
        let declared = self.schema.fields().len();
        if self.next != declared {
            return Err(StorageError::InvalidArgument(format!(
                "record wrote {} of {} declared fields",
                self.next, declared
            )));
        }
        Ok(self.buf.to_vec())
    }
}

/// Reads one record's fields in schema order.
pub struct RecordReader<'a> {
    schema: &'a Schema,
    buf: &'a [u8],
    next: usize,
}

impl<'a> RecordReader<'a> {
    /// `buf` must be exactly `schema.encoded_size()` bytes long.
    pub(crate) fn new(schema: &'a Schema, buf: &'a [u8]) -> Self {
        Self {
            schema,
            buf,
            next: 0,
        }
    }

    fn advance(&mut self, wanted: FieldKind) -> Result<Field> {
        let field = self.schema.fields().get(self.next);
        match field {
            Some(field) if field.kind.same_kind(&wanted) => {
                self.next += 1;
                Ok(*field)
            }
            _ => Err(field_mismatch(self.next, field, &wanted)),
        }
    }

    get_scalar!(get_i8, i8, I8, get_i8);
    get_scalar!(get_i16, i16, I16, get_i16);
    get_scalar!(get_i32, i32, I32, get_i32);
    get_scalar!(get_i64, i64, I64, get_i64);
    get_scalar!(get_u8, u8, U8, get_u8);
    get_scalar!(get_u16, u16, U16, get_u16);
    get_scalar!(get_u32, u32, U32, get_u32);
    get_scalar!(get_u64, u64, U64, get_u64);
    get_scalar!(get_f32, f32, F32, get_f32);
    get_scalar!(get_f64, f64, F64, get_f64);

    pub fn get_bool(&mut self) -> Result<bool> {
        self.advance(FieldKind::Bool)?;
        Ok(self.buf.get_u8() == 1)
    }

    pub fn get_str(&mut self) -> Result<String> {
        let field = self.advance(FieldKind::Str { max_len: 0 })?;
        let width = field.kind.width();
        let (raw, rest) = self.buf.split_at(width);
        self.buf = rest;

        let value = std::str::from_utf8(raw).map_err(|e| {
            StorageError::invalid_data(format!(
                "string field '{}' is not valid UTF-8: {}",
                field.name, e
            ))
        })?;
        Ok(value.trim_end().to_string())
    }

    pub(crate) fn finish(self) -> Result<()> {
        let declared = self.schema.fields().len();
        if self.next != declared {
            return Err(StorageError::InvalidArgument(format!(
                "record read {} of {} declared fields",
                self.next, declared
            )));
        }
        Ok(())
    }
}

/// Encodes and decodes records of type `R` against its validated schema.
#[derive(Debug, Clone)]
pub struct RecordCodec<R> {
    schema: Schema,
    encoded_size: usize,
    _record: PhantomData<fn() -> R>,
}

impl<R: Record> RecordCodec<R> {
    pub fn new() -> Result<Self> {
        let schema = R::schema();
        schema.validate()?;
        let encoded_size = schema.encoded_size();

        Ok(Self {
            schema,
            encoded_size,
            _record: PhantomData,
        })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn encoded_size(&self) -> usize {
        self.encoded_size
    }

    pub fn key(&self, record: &R) -> i64 {
        record.key()
    }

    pub fn encode(&self, record: &R) -> Result<Vec<u8>> {
        let mut writer = RecordWriter::new(&self.schema);
        record.encode(&mut writer)?;
        writer.finish()
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<R> {
        if bytes.len() != self.encoded_size {
            return Err(StorageError::InvalidArgument(format!(
                "encoded record should be {} bytes, got {}",
                self.encoded_size,
                bytes.len()
            )));
        }

        let mut reader = RecordReader::new(&self.schema, bytes);
        let record = R::decode(&mut reader)?;
        reader.finish()?;
        Ok(record)
    }
}
