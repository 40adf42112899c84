use crate::{Error, Result};

/// H.264 NAL unit types carried in sequence headers
pub const NAL_TYPE_SPS: u8 = 7;
pub const NAL_TYPE_PPS: u8 = 8;

const FRAME_TYPE_KEYFRAME: u8 = 1;
const FRAME_TYPE_INTERFRAME: u8 = 2;
const CODEC_ID_AVC: u8 = 7;

const AVC_PACKET_SEQUENCE_HEADER: u8 = 0x00;
const AVC_PACKET_NALU: u8 = 0x01;

/// Split an Annex-B byte stream into NAL units (start codes stripped)
pub fn split_annexb(data: &[u8]) -> Vec<&[u8]> {
    let mut units = Vec::new();
    let mut start = None;
    let mut i = 0;

    while i + 2 < data.len() {
        if data[i] == 0 && data[i + 1] == 0 {
            let code_len = if data[i + 2] == 1 {
                Some(3)
            } else if i + 3 < data.len() && data[i + 2] == 0 && data[i + 3] == 1 {
                Some(4)
            } else {
                None
            };
            if let Some(len) = code_len {
                if let Some(s) = start {
                    units.push(&data[s..i]);
                }
                start = Some(i + len);
                i += len;
                continue;
            }
        }
        i += 1;
    }

    if let Some(s) = start {
        if s <= data.len() {
            units.push(&data[s..]);
        }
    }

    units.retain(|u| !u.is_empty());
    units
}

/// Pull SPS and PPS out of an Annex-B codec-config buffer
pub fn extract_sps_pps(annexb: &[u8]) -> Result<(Vec<u8>, Vec<u8>)> {
    let mut sps = None;
    let mut pps = None;

    for unit in split_annexb(annexb) {
        match unit[0] & 0x1F {
            NAL_TYPE_SPS => sps = Some(unit.to_vec()),
            NAL_TYPE_PPS => pps = Some(unit.to_vec()),
            _ => {}
        }
    }

    match (sps, pps) {
        (Some(sps), Some(pps)) => Ok((sps, pps)),
        _ => Err(Error::encoder("Codec config without SPS and PPS")),
    }
}

/// Convert an Annex-B stream to the length-prefixed (AVCC) form FLV carries:
/// each NAL unit preceded by its 4-byte big-endian length
pub fn annexb_to_avcc(annexb: &[u8]) -> Vec<u8> {
    let units = split_annexb(annexb);
    let total: usize = units.iter().map(|u| u.len() + 4).sum();
    let mut out = Vec::with_capacity(total);
    for unit in units {
        out.extend_from_slice(&(unit.len() as u32).to_be_bytes());
        out.extend_from_slice(unit);
    }
    out
}

/// Build the AVCDecoderConfigurationRecord for one SPS and one PPS
pub fn avc_decoder_configuration_record(sps: &[u8], pps: &[u8]) -> Result<Vec<u8>> {
    if sps.len() < 4 {
        return Err(Error::encoder("SPS too short for configuration record"));
    }

    let mut out = Vec::with_capacity(11 + sps.len() + pps.len());
    out.push(0x01); // configurationVersion
    out.push(sps[1]); // AVCProfileIndication
    out.push(sps[2]); // profile_compatibility
    out.push(sps[3]); // AVCLevelIndication
    out.push(0xFF); // lengthSizeMinusOne = 3
    out.push(0xE1); // one SPS
    out.extend_from_slice(&(sps.len() as u16).to_be_bytes());
    out.extend_from_slice(sps);
    out.push(0x01); // one PPS
    out.extend_from_slice(&(pps.len() as u16).to_be_bytes());
    out.extend_from_slice(pps);
    Ok(out)
}

/// Build the one-time video sequence-header tag payload from SPS/PPS
pub fn video_sequence_header(sps: &[u8], pps: &[u8]) -> Result<Vec<u8>> {
    let record = avc_decoder_configuration_record(sps, pps)?;
    Ok(video_tag(FRAME_TYPE_KEYFRAME, AVC_PACKET_SEQUENCE_HEADER, &record))
}

/// Build a video tag payload for one encoded frame. `annexb` is the
/// encoder's byte stream; the wire carries the length-prefixed form.
pub fn video_frame(annexb: &[u8], is_keyframe: bool) -> Vec<u8> {
    let frame_type = if is_keyframe {
        FRAME_TYPE_KEYFRAME
    } else {
        FRAME_TYPE_INTERFRAME
    };
    video_tag(frame_type, AVC_PACKET_NALU, &annexb_to_avcc(annexb))
}

fn video_tag(frame_type: u8, packet_type: u8, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(5 + body.len());
    out.push((frame_type << 4) | CODEC_ID_AVC);
    out.push(packet_type);
    // Composition time offset, signed 24-bit, zero for low-latency publish
    out.extend_from_slice(&[0, 0, 0]);
    out.extend_from_slice(body);
    out
}
