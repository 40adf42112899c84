use crate::Result;
use crate::amf::amf0::{Amf0Value, markers};
use crate::Error;
use byteorder::{BigEndian, ReadBytesExt};
use std::collections::HashMap;
use std::io::Cursor;

fn short_input<E>(_: E) -> Error {
    Error::amf_decode("Unexpected end of AMF0 data")
}

/// Cursor over one AMF0-encoded buffer. Borrows the payload; string and
/// key bytes are only copied once they survive UTF-8 validation.
struct ByteReader<'a> {
    cursor: Cursor<&'a [u8]>,
}

impl<'a> ByteReader<'a> {
    fn remaining(&self) -> usize {
        (self.cursor.get_ref().len() as u64).saturating_sub(self.cursor.position()) as usize
    }

    fn read_u8(&mut self) -> Result<u8> {
        self.cursor.read_u8().map_err(short_input)
    }

    fn read_u16_be(&mut self) -> Result<u16> {
        self.cursor.read_u16::<BigEndian>().map_err(short_input)
    }

    fn read_u32_be(&mut self) -> Result<u32> {
        self.cursor.read_u32::<BigEndian>().map_err(short_input)
    }

    fn read_f64_be(&mut self) -> Result<f64> {
        self.cursor.read_f64::<BigEndian>().map_err(short_input)
    }

    fn read_utf8(&mut self, len: usize) -> Result<String> {
        if self.remaining() < len {
            return Err(Error::amf_decode("Unexpected end of AMF0 data"));
        }
        let pos = self.cursor.position() as usize;
        let bytes = &self.cursor.get_ref()[pos..pos + len];
        let string = String::from_utf8(bytes.to_vec())
            .map_err(|e| Error::amf_decode(format!("Invalid UTF-8 in string: {}", e)))?;
        self.cursor.set_position((pos + len) as u64);
        Ok(string)
    }
}

pub struct Amf0Decoder<'a> {
    reader: ByteReader<'a>,
}

impl<'a> Amf0Decoder<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Amf0Decoder {
            reader: ByteReader {
                cursor: Cursor::new(data),
            },
        }
    }

    /// Check if decoder has remaining data to decode
    pub fn has_remaining(&self) -> bool {
        self.reader.remaining() > 0
    }

    pub fn decode(&mut self) -> Result<Amf0Value> {
        let marker = self.reader.read_u8()?;
        match marker {
            markers::NUMBER => Ok(Amf0Value::Number(self.reader.read_f64_be()?)),
            markers::BOOLEAN => Ok(Amf0Value::Boolean(self.reader.read_u8()? != 0)),
            markers::STRING => self.decode_string(),
            markers::OBJECT => self.decode_object().map(Amf0Value::Object),
            markers::NULL => Ok(Amf0Value::Null),
            markers::UNDEFINED => Ok(Amf0Value::Undefined),
            markers::ECMA_ARRAY => self.decode_ecma_array(),
            markers::STRICT_ARRAY => self.decode_strict_array(),
            _ => Err(Error::amf_decode(format!(
                "Unknown AMF0 marker: 0x{:02x}",
                marker
            ))),
        }
    }

    fn decode_string(&mut self) -> Result<Amf0Value> {
        let len = self.reader.read_u16_be()? as usize;
        Ok(Amf0Value::String(self.reader.read_utf8(len)?))
    }

    fn decode_object(&mut self) -> Result<HashMap<String, Amf0Value>> {
        let mut object = HashMap::new();
        loop {
            let name_len = self.reader.read_u16_be()? as usize;
            if name_len == 0 {
                let end = self.reader.read_u8()?;
                if end != markers::OBJECT_END {
                    return Err(Error::amf_decode(format!(
                        "Expected object end marker, got 0x{:02x}",
                        end
                    )));
                }
                break;
            }
            let name = self.reader.read_utf8(name_len)?;
            let value = self.decode()?;
            object.insert(name, value);
        }
        Ok(object)
    }

    fn decode_ecma_array(&mut self) -> Result<Amf0Value> {
        let _count = self.reader.read_u32_be()?; // advisory, layout is key/value pairs
        self.decode_object().map(Amf0Value::EcmaArray)
    }

    fn decode_strict_array(&mut self) -> Result<Amf0Value> {
        let count = self.reader.read_u32_be()? as usize;
        let mut array = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            array.push(self.decode()?);
        }
        Ok(Amf0Value::StrictArray(array))
    }
}
