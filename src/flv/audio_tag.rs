const SOUND_FORMAT_AAC: u8 = 10;
// For AAC the rate field is always 3 (44 kHz marker); the real sample rate
// travels in the AudioSpecificConfig
const SOUND_RATE_AAC: u8 = 3;
const SOUND_SIZE_16BIT: u8 = 1;

const AAC_PACKET_SEQUENCE_HEADER: u8 = 0x00;
const AAC_PACKET_RAW: u8 = 0x01;

fn aac_header_byte(stereo: bool) -> u8 {
    (SOUND_FORMAT_AAC << 4)
        | (SOUND_RATE_AAC << 2)
        | (SOUND_SIZE_16BIT << 1)
        | if stereo { 1 } else { 0 }
}

/// Build the one-time audio sequence-header tag payload carrying the
/// AudioSpecificConfig
pub fn audio_sequence_header(asc: &[u8], stereo: bool) -> Vec<u8> {
    audio_tag(AAC_PACKET_SEQUENCE_HEADER, asc, stereo)
}

/// Build an audio tag payload for one raw AAC access unit
pub fn audio_frame(access_unit: &[u8], stereo: bool) -> Vec<u8> {
    audio_tag(AAC_PACKET_RAW, access_unit, stereo)
}

fn audio_tag(packet_type: u8, body: &[u8], stereo: bool) -> Vec<u8> {
    let mut out = Vec::with_capacity(2 + body.len());
    out.push(aac_header_byte(stereo));
    out.push(packet_type);
    out.extend_from_slice(body);
    out
}

/// Build the 2-byte AudioSpecificConfig for AAC-LC
pub fn audio_specific_config(sample_rate: u32, channels: u8) -> Vec<u8> {
    let object_type: u8 = 2; // AAC-LC
    let sampling_index: u8 = match sample_rate {
        96000 => 0,
        88200 => 1,
        64000 => 2,
        48000 => 3,
        44100 => 4,
        32000 => 5,
        24000 => 6,
        22050 => 7,
        16000 => 8,
        12000 => 9,
        11025 => 10,
        8000 => 11,
        _ => 3,
    };
    vec![
        (object_type << 3) | (sampling_index >> 1),
        ((sampling_index & 1) << 7) | ((channels & 0x0F) << 3),
    ]
}
