use crate::Result;
use crate::amf::Amf0Value;
use crate::encoder::StreamProfile;
use crate::protocol::RtmpData;
use std::collections::HashMap;

/// Identifies the publisher build in the stream metadata
pub const ENCODER_TAG: &str = "livecast/0.1";

/// Build the `@setDataFrame onMetaData` script payload ingest servers
/// expect before the first media tag
pub fn metadata_payload(profile: &StreamProfile) -> Result<Vec<u8>> {
    let mut meta = HashMap::new();
    meta.insert("width".to_string(), Amf0Value::Number(profile.width as f64));
    meta.insert(
        "height".to_string(),
        Amf0Value::Number(profile.height as f64),
    );
    meta.insert(
        "framerate".to_string(),
        Amf0Value::Number(profile.fps as f64),
    );
    meta.insert("videocodecid".to_string(), Amf0Value::Number(7.0));
    meta.insert(
        "videodatarate".to_string(),
        Amf0Value::Number(profile.video_bitrate_kbps as f64),
    );
    meta.insert("audiocodecid".to_string(), Amf0Value::Number(10.0));
    meta.insert(
        "audiodatarate".to_string(),
        Amf0Value::Number(profile.audio_bitrate_kbps as f64),
    );
    meta.insert(
        "audiosamplerate".to_string(),
        Amf0Value::Number(profile.audio_sample_rate as f64),
    );
    meta.insert("audiosamplesize".to_string(), Amf0Value::Number(16.0));
    meta.insert(
        "stereo".to_string(),
        Amf0Value::Boolean(profile.stereo()),
    );
    meta.insert("duration".to_string(), Amf0Value::Number(0.0));
    meta.insert(
        "encoder".to_string(),
        Amf0Value::String(ENCODER_TAG.to_string()),
    );

    RtmpData::set_data_frame(meta).encode()
}
