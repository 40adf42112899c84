use crate::amf::{Amf0Decoder, Amf0Encoder, Amf0Value};
use crate::{Error, Result};
use std::collections::HashMap;

/// AMF0 script data message (`@setDataFrame` / `onMetaData`)
#[derive(Debug, Clone)]
pub struct RtmpData {
    pub data_type: String,
    pub values: Vec<Amf0Value>,
}

impl RtmpData {
    /// Create new data message
    pub fn new(data_type: String) -> Self {
        RtmpData {
            data_type,
            values: Vec::new(),
        }
    }

    /// Create the `@setDataFrame onMetaData` message publishers send
    pub fn set_data_frame(metadata: HashMap<String, Amf0Value>) -> Self {
        let mut data = RtmpData::new("@setDataFrame".to_string());
        data.values.push(Amf0Value::String("onMetaData".to_string()));
        data.values.push(Amf0Value::EcmaArray(metadata));
        data
    }

    /// Encode data message to bytes
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut encoder = Amf0Encoder::new();

        encoder.encode(&Amf0Value::String(self.data_type.clone()))?;
        for value in &self.values {
            encoder.encode(value)?;
        }

        Ok(encoder.into_bytes())
    }

    /// Decode data message from bytes
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut decoder = Amf0Decoder::new(data);

        let type_val = decoder.decode()?;
        let data_type = type_val
            .as_string()
            .ok_or_else(|| Error::amf_decode("Data type must be string"))?
            .to_string();

        let mut values = Vec::new();
        while decoder.has_remaining() {
            values.push(decoder.decode()?);
        }

        Ok(RtmpData { data_type, values })
    }

    /// Get the metadata object carried by this message, if any
    pub fn metadata(&self) -> Option<&HashMap<String, Amf0Value>> {
        self.values.iter().find_map(|v| v.as_object())
    }
}
