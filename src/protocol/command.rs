use crate::amf::{Amf0Decoder, Amf0Encoder, Amf0Value};
use crate::{Error, Result};
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct RtmpCommand {
    pub name: String,
    pub transaction_id: f64,
    pub command_object: Option<Amf0Value>,
    pub arguments: Vec<Amf0Value>,
}

impl RtmpCommand {
    /// Create new command
    pub fn new(name: String, transaction_id: f64) -> Self {
        RtmpCommand {
            name,
            transaction_id,
            command_object: None,
            arguments: Vec::new(),
        }
    }

    /// Create the connect command for a publish session
    pub fn connect(app: &str, tc_url: &str, flash_ver: &str) -> Self {
        let mut cmd = RtmpCommand::new("connect".to_string(), 1.0);

        let mut obj = HashMap::new();
        obj.insert("app".to_string(), Amf0Value::String(app.to_string()));
        obj.insert("type".to_string(), Amf0Value::String("nonprivate".to_string()));
        obj.insert("flashVer".to_string(), Amf0Value::String(flash_ver.to_string()));
        obj.insert("swfUrl".to_string(), Amf0Value::String(tc_url.to_string()));
        obj.insert("tcUrl".to_string(), Amf0Value::String(tc_url.to_string()));
        obj.insert("fpad".to_string(), Amf0Value::Boolean(false));
        obj.insert("capabilities".to_string(), Amf0Value::Number(239.0));
        obj.insert("audioCodecs".to_string(), Amf0Value::Number(3191.0));
        obj.insert("videoCodecs".to_string(), Amf0Value::Number(252.0));
        obj.insert("videoFunction".to_string(), Amf0Value::Number(1.0));
        obj.insert("objectEncoding".to_string(), Amf0Value::Number(0.0));

        cmd.command_object = Some(Amf0Value::Object(obj));
        cmd
    }

    /// Create createStream command
    pub fn create_stream(transaction_id: f64) -> Self {
        let mut cmd = RtmpCommand::new("createStream".to_string(), transaction_id);
        cmd.command_object = Some(Amf0Value::Null);
        cmd
    }

    /// Create publish command
    pub fn publish(transaction_id: f64, stream_key: &str) -> Self {
        let mut cmd = RtmpCommand::new("publish".to_string(), transaction_id);
        cmd.command_object = Some(Amf0Value::Null);
        cmd.arguments.push(Amf0Value::String(stream_key.to_string()));
        cmd.arguments.push(Amf0Value::String("live".to_string()));
        cmd
    }

    /// True for a _result response
    pub fn is_result(&self) -> bool {
        self.name == "_result"
    }

    /// True for an _error response
    pub fn is_error(&self) -> bool {
        self.name == "_error"
    }

    /// True for an onStatus notification
    pub fn is_status(&self) -> bool {
        self.name == "onStatus"
    }

    /// First argument that carries an information object
    fn info_object(&self) -> Option<&HashMap<String, Amf0Value>> {
        self.arguments
            .iter()
            .find_map(|v| v.as_object())
            .or_else(|| self.command_object.as_ref().and_then(|v| v.as_object()))
    }

    /// The `code` field of a status/_error information object
    pub fn status_code(&self) -> Option<&str> {
        self.info_object()
            .and_then(|obj| obj.get("code"))
            .and_then(|v| v.as_string())
    }

    /// The `description` field of a status/_error information object
    pub fn status_description(&self) -> Option<&str> {
        self.info_object()
            .and_then(|obj| obj.get("description"))
            .and_then(|v| v.as_string())
    }

    /// Stream id returned by a createStream _result
    pub fn result_stream_id(&self) -> Option<u32> {
        self.arguments
            .iter()
            .find_map(|v| v.as_number())
            .map(|n| n as u32)
    }

    /// Encode command to bytes
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut encoder = Amf0Encoder::new();

        encoder.encode(&Amf0Value::String(self.name.clone()))?;
        encoder.encode(&Amf0Value::Number(self.transaction_id))?;

        if let Some(ref obj) = self.command_object {
            encoder.encode(obj)?;
        } else {
            encoder.encode(&Amf0Value::Null)?;
        }

        for arg in &self.arguments {
            encoder.encode(arg)?;
        }

        Ok(encoder.into_bytes())
    }

    /// Decode command from bytes
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut decoder = Amf0Decoder::new(data);

        let name_val = decoder.decode()?;
        let name = name_val
            .as_string()
            .ok_or_else(|| Error::amf_decode("Command name must be string"))?
            .to_string();

        let tid_val = decoder.decode()?;
        let transaction_id = tid_val
            .as_number()
            .ok_or_else(|| Error::amf_decode("Transaction ID must be number"))?;

        let command_object = if decoder.has_remaining() {
            Some(decoder.decode()?)
        } else {
            None
        };

        let mut arguments = Vec::new();
        while decoder.has_remaining() {
            arguments.push(decoder.decode()?);
        }

        Ok(RtmpCommand {
            name,
            transaction_id,
            command_object,
            arguments,
        })
    }
}
