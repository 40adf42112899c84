use crate::amf::amf0::{Amf0Value, markers};
use crate::{Error, Result};
use std::collections::HashMap;

/// Serializes AMF0 values into a growing byte vector. Encoding only fails
/// on values the format cannot carry (strings and keys past the u16
/// length field).
pub struct Amf0Encoder {
    buffer: Vec<u8>,
}

impl Amf0Encoder {
    pub fn new() -> Self {
        Amf0Encoder {
            buffer: Vec::with_capacity(1024),
        }
    }

    pub fn encode(&mut self, value: &Amf0Value) -> Result<()> {
        match value {
            Amf0Value::Number(n) => {
                self.buffer.push(markers::NUMBER);
                self.buffer.extend_from_slice(&n.to_be_bytes());
            }
            Amf0Value::Boolean(b) => {
                self.buffer.push(markers::BOOLEAN);
                self.buffer.push(if *b { 1 } else { 0 });
            }
            Amf0Value::String(s) => {
                self.buffer.push(markers::STRING);
                self.push_utf8(s)?;
            }
            Amf0Value::Object(obj) => {
                self.buffer.push(markers::OBJECT);
                self.encode_properties(obj)?;
            }
            Amf0Value::Null => self.buffer.push(markers::NULL),
            Amf0Value::Undefined => self.buffer.push(markers::UNDEFINED),
            Amf0Value::EcmaArray(obj) => {
                self.buffer.push(markers::ECMA_ARRAY);
                self.buffer.extend_from_slice(&(obj.len() as u32).to_be_bytes());
                self.encode_properties(obj)?;
            }
            Amf0Value::StrictArray(arr) => {
                self.buffer.push(markers::STRICT_ARRAY);
                self.buffer.extend_from_slice(&(arr.len() as u32).to_be_bytes());
                for value in arr {
                    self.encode(value)?;
                }
            }
        }
        Ok(())
    }

    fn encode_properties(&mut self, obj: &HashMap<String, Amf0Value>) -> Result<()> {
        for (key, value) in obj {
            self.push_utf8(key)?;
            self.encode(value)?;
        }
        // Terminator: empty key followed by the end marker
        self.buffer.extend_from_slice(&[0, 0, markers::OBJECT_END]);
        Ok(())
    }

    /// u16-length-prefixed UTF-8, the form both values and object keys use
    fn push_utf8(&mut self, value: &str) -> Result<()> {
        let bytes = value.as_bytes();
        if bytes.len() > u16::MAX as usize {
            return Err(Error::amf_encode(format!(
                "String of {} bytes exceeds the AMF0 length field",
                bytes.len()
            )));
        }
        self.buffer
            .extend_from_slice(&(bytes.len() as u16).to_be_bytes());
        self.buffer.extend_from_slice(bytes);
        Ok(())
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }
}

impl Default for Amf0Encoder {
    fn default() -> Self {
        Amf0Encoder::new()
    }
}
