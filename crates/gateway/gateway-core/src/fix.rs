//! FIX tag=value parsing and per-session frame assembly.
//!
//! The TCP layer delivers raw segments: a single read may contain a fragment
//! of a frame or several frames glued together. [`FrameAssembler`] buffers
//! per-session bytes and emits only complete frames, using the
//! SOH-terminated `10=` checksum trailer as the frame boundary. Parsing
//! proper is a plain split on SOH with a retained-tag whitelist.

use tracing::warn;

/// Start-Of-Header byte, the FIX field separator.
pub const SOH: u8 = 0x01;

/// Upper bound on buffered bytes for one session. A peer that streams data
/// with no trailer would otherwise grow the buffer without limit.
const MAX_BUFFERED: usize = 64 * 1024;

/// Parsed view of one FIX frame. Absent tags keep their defaults; the frame
/// is valid iff tag 35 (MsgType) is present and non-empty.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct FixFields {
    /// Tag 35.
    pub msg_type: String,
    /// Tag 55.
    pub symbol: String,
    /// Tag 54: "1" = buy, "2" = sell.
    pub side: String,
    /// Tag 44.
    pub price: f64,
    /// Tag 38.
    pub quantity: i64,
    pub valid: bool,
}

/// Split `raw` on SOH and retain the tags the gateway cares about. Unknown
/// tags and malformed segments (no `=`) are ignored; unparsable numeric
/// values fall back to their defaults.
pub fn parse_fix(raw: &str) -> FixFields {
    let mut msg = FixFields::default();

    for segment in raw.split(SOH as char) {
        let Some((tag, value)) = segment.split_once('=') else {
            continue;
        };
        match tag {
            "35" => msg.msg_type = value.to_string(),
            "55" => msg.symbol = value.to_string(),
            "54" => msg.side = value.to_string(),
            "44" => msg.price = value.parse().unwrap_or_default(),
            "38" => msg.quantity = value.parse().unwrap_or_default(),
            _ => {}
        }
    }

    msg.valid = !msg.msg_type.is_empty();
    msg
}

/// Reassembles complete FIX frames from arbitrary TCP segment boundaries.
///
/// One assembler per client session. Frames are delimited by the checksum
/// trailer: a `10=` tag at a field boundary, terminated by SOH. Leading
/// bytes that cannot begin a frame (`8=`) are discarded during resync, so
/// line noise ahead of a valid frame does not poison it.
#[derive(Default)]
pub struct FrameAssembler {
    buf: Vec<u8>,
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `bytes` and return every frame completed by them, in order.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        self.buf.extend_from_slice(bytes);

        let mut frames = Vec::new();
        loop {
            self.resync();
            match self.frame_end() {
                Some(end) => frames.push(self.buf.drain(..end).collect()),
                None => break,
            }
        }

        if self.buf.len() > MAX_BUFFERED {
            warn!(
                buffered = self.buf.len(),
                "discarding trailer-less session buffer"
            );
            self.buf.clear();
        }

        frames
    }

    /// Bytes currently buffered for this session.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Drop anything ahead of the first possible frame start. A lone
    /// trailing `8` is kept: it may be the first byte of `8=` split across
    /// reads.
    fn resync(&mut self) {
        if self.buf.starts_with(b"8=") {
            return;
        }
        if let Some(pos) = find(&self.buf, b"8=") {
            self.buf.drain(..pos);
        } else if self.buf.last() == Some(&b'8') {
            let keep_from = self.buf.len() - 1;
            self.buf.drain(..keep_from);
        } else {
            self.buf.clear();
        }
    }

    /// Offset one past the SOH that terminates the `10=` trailer, if a
    /// complete frame is buffered.
    fn frame_end(&self) -> Option<usize> {
        let mut from = 0;
        while let Some(rel) = find(&self.buf[from..], b"10=") {
            let pos = from + rel;
            // The trailer tag must sit at a field boundary; "110=..." and
            // values containing "10" must not terminate the frame.
            if pos == 0 || self.buf[pos - 1] == SOH {
                return self.buf[pos..]
                    .iter()
                    .position(|&b| b == SOH)
                    .map(|soh| pos + soh + 1);
            }
            from = pos + 1;
        }
        None
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORDER: &[u8] =
        b"8=FIX.4.2\x0135=D\x0155=AAPL\x0154=1\x0138=100\x0144=150.50\x0110=042\x01";

    #[test]
    fn parses_new_order_tags() {
        let raw = String::from_utf8_lossy(ORDER).into_owned();
        let fix = parse_fix(&raw);
        assert!(fix.valid);
        assert_eq!(fix.msg_type, "D");
        assert_eq!(fix.symbol, "AAPL");
        assert_eq!(fix.side, "1");
        assert_eq!(fix.quantity, 100);
        assert!((fix.price - 150.50).abs() < f64::EPSILON);
    }

    #[test]
    fn missing_msg_type_is_invalid() {
        let fix = parse_fix("55=AAPL\x0154=1\x01");
        assert!(!fix.valid);
        assert_eq!(fix.symbol, "AAPL");
    }

    #[test]
    fn garbage_is_invalid_but_harmless() {
        let fix = parse_fix("THIS_IS_NOT_FIX_DATA_12345");
        assert!(!fix.valid);
    }

    #[test]
    fn whole_frame_in_one_push() {
        let mut asm = FrameAssembler::new();
        let frames = asm.push(ORDER);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0], ORDER);
        assert_eq!(asm.buffered(), 0);
    }

    #[test]
    fn fragmented_frame_is_reassembled() {
        let mut asm = FrameAssembler::new();
        let (a, rest) = ORDER.split_at(7);
        let (b, c) = rest.split_at(13);
        assert!(asm.push(a).is_empty());
        assert!(asm.push(b).is_empty());
        let frames = asm.push(c);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0], ORDER);
    }

    #[test]
    fn coalesced_frames_are_split() {
        let mut asm = FrameAssembler::new();
        let mut both = ORDER.to_vec();
        both.extend_from_slice(ORDER);
        let frames = asm.push(&both);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], ORDER);
        assert_eq!(frames[1], ORDER);
    }

    #[test]
    fn leading_noise_is_discarded() {
        let mut asm = FrameAssembler::new();
        assert!(asm.push(b"THIS_IS_NOT_FIX_DATA_12345").is_empty());
        assert_eq!(asm.buffered(), 0, "noise without a frame start is dropped");
        let frames = asm.push(ORDER);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0], ORDER);
    }

    #[test]
    fn split_frame_start_survives_resync() {
        let mut asm = FrameAssembler::new();
        // The '8' might be the first byte of "8=": it must be kept.
        assert!(asm.push(b"noise8").is_empty());
        let frames = asm.push(b"=FIX.4.2\x0135=D\x0110=000\x01");
        assert_eq!(frames.len(), 1);
        assert!(frames[0].starts_with(b"8=FIX.4.2"));
    }

    #[test]
    fn trailer_inside_longer_tag_is_not_a_boundary() {
        let mut asm = FrameAssembler::new();
        // Tag 110 contains "10=" but not at a field boundary.
        let frame = b"8=FIX.4.2\x01110=5\x0135=D\x0110=007\x01";
        let frames = asm.push(frame);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0], frame);
    }

    #[test]
    fn oversized_trailerless_buffer_is_dropped() {
        let mut asm = FrameAssembler::new();
        let junk = vec![b'A'; MAX_BUFFERED];
        // Keep a frame-start prefix so resync cannot discard it.
        let mut data = b"8=".to_vec();
        data.extend_from_slice(&junk);
        assert!(asm.push(&data).is_empty());
        assert_eq!(asm.buffered(), 0);
    }
}
