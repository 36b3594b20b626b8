//! Decoding of `GET /tasks/{id}/logs` bodies.
//!
//! Non-TTY containers deliver a multiplexed stream: every frame starts with
//! an 8-byte header `[stream, 0, 0, 0, len_be_u32]` followed by `len` bytes
//! of payload. TTY containers deliver plain bytes.

const HEADER_LEN: usize = 8;

/// Turn a raw log body into text, stripping multiplexing headers if present.
pub fn decode_log_stream(raw: &[u8]) -> String {
    if !looks_multiplexed(raw) {
        return String::from_utf8_lossy(raw).into_owned();
    }

    let mut out = Vec::with_capacity(raw.len());
    let mut rest = raw;
    while rest.len() >= HEADER_LEN {
        let len = u32::from_be_bytes([rest[4], rest[5], rest[6], rest[7]]) as usize;
        let end = (HEADER_LEN + len).min(rest.len());
        out.extend_from_slice(&rest[HEADER_LEN..end]);
        rest = &rest[end..];
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn looks_multiplexed(raw: &[u8]) -> bool {
    raw.len() >= HEADER_LEN && raw[0] <= 2 && raw[1..4] == [0, 0, 0]
}
