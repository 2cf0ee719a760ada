use byteorder::{BigEndian, ByteOrder, ReadBytesExt};
use std::fmt;
use std::io::{self, Read, Write};

/// Maximum number of bytes stored for a string field.
pub const STRING_LEN: usize = 128;

/// Column types supported by heap pages. Every type has a fixed width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    Int,
    String,
}

impl FieldType {
    /// Number of bytes a value of this type occupies in a tuple slot.
    pub fn size(&self) -> usize {
        match self {
            FieldType::Int => 4,
            FieldType::String => STRING_LEN + 4,
        }
    }

    /// Decode one value of this type from `reader`.
    pub fn parse<R: Read>(&self, reader: &mut R) -> io::Result<Field> {
        match self {
            FieldType::Int => Ok(Field::Int(reader.read_i32::<BigEndian>()?)),
            FieldType::String => {
                let len = reader.read_u32::<BigEndian>()? as usize;
                if len > STRING_LEN {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("string length {} exceeds {}", len, STRING_LEN),
                    ));
                }
                let mut buf = [0u8; STRING_LEN];
                reader.read_exact(&mut buf)?;
                let s = std::str::from_utf8(&buf[..len])
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                Ok(Field::String(s.to_string()))
            }
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Int => write!(f, "INT"),
            FieldType::String => write!(f, "STRING"),
        }
    }
}

/// A single column value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Field {
    Int(i32),
    String(String),
}

impl Field {
    pub fn field_type(&self) -> FieldType {
        match self {
            Field::Int(_) => FieldType::Int,
            Field::String(_) => FieldType::String,
        }
    }

    /// Append the value in its fixed-width on-page form to `buf`.
    ///
    /// Strings longer than [`STRING_LEN`] bytes are cut at the last char
    /// boundary that fits.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        let mut prefix = [0u8; 4];
        match self {
            Field::Int(v) => {
                BigEndian::write_i32(&mut prefix, *v);
                buf.extend_from_slice(&prefix);
            }
            Field::String(s) => {
                let bytes = truncated(s).as_bytes();
                BigEndian::write_u32(&mut prefix, bytes.len() as u32);
                buf.extend_from_slice(&prefix);
                buf.extend_from_slice(bytes);
                buf.resize(buf.len() + STRING_LEN - bytes.len(), 0);
            }
        }
    }

    /// Write the on-page form of the value to `writer`.
    pub fn serialize<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        let mut buf = Vec::with_capacity(self.field_type().size());
        self.encode_into(&mut buf);
        writer.write_all(&buf)
    }
}

fn truncated(s: &str) -> &str {
    if s.len() <= STRING_LEN {
        return s;
    }
    let mut end = STRING_LEN;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::Int(v) => write!(f, "{}", v),
            Field::String(s) => write!(f, "{}", s),
        }
    }
}
