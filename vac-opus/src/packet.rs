//! Opus packet framing (RFC 6716 section 3.2 and appendix B).

use vac_core::{Result, VacError};

/// Largest size a single frame length field can describe.
pub const MAX_FRAME_LEN: usize = 1275;

fn malformed(reason: &str) -> VacError {
    VacError::Encode(format!("malformed Opus packet: {}", reason))
}

/// Appends the one- or two-byte frame length code.
pub fn push_frame_len(out: &mut Vec<u8>, len: usize) {
    if len < 252 {
        out.push(len as u8);
    } else {
        let first = 252 + (len & 3);
        out.push(first as u8);
        out.push(((len - first) >> 2) as u8);
    }
}

/// Reads a frame length code, returning `(length, bytes used)`.
pub fn read_frame_len(data: &[u8]) -> Result<(usize, usize)> {
    match data {
        [] => Err(malformed("missing frame length")),
        [first, ..] if *first < 252 => Ok((*first as usize, 1)),
        [first, second, ..] => Ok((*second as usize * 4 + *first as usize, 2)),
        [_] => Err(malformed("truncated frame length")),
    }
}

/// Rewrites an undelimited packet into self-delimiting form so it can precede
/// another stream's packet inside a multistream packet.
pub fn self_delimit(packet: &[u8]) -> Result<Vec<u8>> {
    let (&toc, body) = packet
        .split_first()
        .ok_or_else(|| malformed("empty packet"))?;
    let mut out = Vec::with_capacity(packet.len() + 2);
    out.push(toc);

    match toc & 0x3 {
        0 => {
            push_frame_len(&mut out, body.len());
            out.extend_from_slice(body);
        }
        1 => {
            if body.len() % 2 != 0 {
                return Err(malformed("code 1 packet with odd payload"));
            }
            push_frame_len(&mut out, body.len() / 2);
            out.extend_from_slice(body);
        }
        2 => {
            let (first_len, used) = read_frame_len(body)?;
            let second_len = body
                .len()
                .checked_sub(used + first_len)
                .ok_or_else(|| malformed("code 2 first frame overruns packet"))?;
            out.extend_from_slice(&body[..used]);
            push_frame_len(&mut out, second_len);
            out.extend_from_slice(&body[used..]);
        }
        _ => {
            let (&count_byte, rest) = body
                .split_first()
                .ok_or_else(|| malformed("code 3 packet without frame count"))?;
            let vbr = count_byte & 0x80 != 0;
            let has_padding = count_byte & 0x40 != 0;
            let frames = (count_byte & 0x3F) as usize;
            if frames == 0 {
                return Err(malformed("code 3 packet with zero frames"));
            }

            let mut pos = 0;
            let mut padding = 0usize;
            if has_padding {
                loop {
                    let byte = *rest
                        .get(pos)
                        .ok_or_else(|| malformed("truncated padding length"))?;
                    pos += 1;
                    if byte == 255 {
                        padding += 254;
                    } else {
                        padding += byte as usize;
                        break;
                    }
                }
            }

            let mut sizes_len = 0;
            let mut explicit = 0usize;
            if vbr {
                for _ in 0..frames - 1 {
                    let (len, used) = read_frame_len(&rest[pos + sizes_len..])?;
                    sizes_len += used;
                    explicit += len;
                }
            }

            let payload = rest
                .len()
                .checked_sub(pos + sizes_len + padding)
                .ok_or_else(|| malformed("code 3 header overruns packet"))?;
            let delimited_len = if vbr {
                payload
                    .checked_sub(explicit)
                    .ok_or_else(|| malformed("code 3 frame sizes overrun packet"))?
            } else {
                if payload % frames != 0 {
                    return Err(malformed("code 3 CBR payload not divisible by frame count"));
                }
                payload / frames
            };

            out.push(count_byte);
            out.extend_from_slice(&rest[..pos + sizes_len]);
            push_frame_len(&mut out, delimited_len);
            out.extend_from_slice(&rest[pos + sizes_len..]);
        }
    }
    Ok(out)
}

/// Concatenates per-stream packets into one multistream packet: every stream
/// but the last is self-delimited.
pub fn join_streams(packets: &[Vec<u8>]) -> Result<Vec<u8>> {
    let Some((last, leading)) = packets.split_last() else {
        return Err(malformed("no streams"));
    };
    let mut out = Vec::with_capacity(packets.iter().map(|p| p.len() + 2).sum());
    for packet in leading {
        out.extend_from_slice(&self_delimit(packet)?);
    }
    out.extend_from_slice(last);
    Ok(out)
}
