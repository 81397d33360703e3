use tracing::trace;

/// MPEG-TS packet size.
const TS_PACKET_LEN: usize = 188;
const TS_SYNC_BYTE: u8 = 0x47;
/// PES timestamps tick at 90kHz.
const PTS_HZ: f64 = 90_000.0;

/// Forward-only timing deltas recovered from one PES header. All deltas
/// are clamped to zero, never negative.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TimingUpdate {
    pub pts_delta: f64,
    pub dts_delta: f64,
    /// Instantaneous video frame rate, when derivable.
    pub fps: Option<f64>,
}

/// Incremental parser over the repaired transport stream. Packet headers
/// are the authority for timing; the engine's self-reported properties are
/// never consulted. Input may arrive split at arbitrary boundaries.
#[derive(Debug, Default)]
pub struct TsTimingParser {
    carry: Vec<u8>,
    last_pts: Option<u64>,
    last_dts: Option<u64>,
    last_video_pts: Option<u64>,
}

impl TsTimingParser {
    pub fn new() -> Self {
        TsTimingParser::default()
    }

    /// Feed raw bytes; returns one update per PES header encountered.
    pub fn push(&mut self, data: &[u8]) -> Vec<TimingUpdate> {
        self.carry.extend_from_slice(data);
        let mut updates = Vec::new();

        while self.carry.len() >= TS_PACKET_LEN {
            if self.carry[0] != TS_SYNC_BYTE {
                // Resync on the next sync byte.
                match self.carry.iter().position(|&b| b == TS_SYNC_BYTE) {
                    Some(pos) => {
                        trace!(skipped = pos, "resynced transport stream");
                        self.carry.drain(..pos);
                        continue;
                    }
                    None => {
                        self.carry.clear();
                        break;
                    }
                }
            }
            let packet: Vec<u8> = self.carry.drain(..TS_PACKET_LEN).collect();
            if let Some(update) = self.parse_packet(&packet) {
                updates.push(update);
            }
        }
        updates
    }

    fn parse_packet(&mut self, packet: &[u8]) -> Option<TimingUpdate> {
        let transport_error = packet[1] & 0x80 != 0;
        let payload_start = packet[1] & 0x40 != 0;
        if transport_error || !payload_start {
            return None;
        }

        let adaptation_control = (packet[3] >> 4) & 0x3;
        let mut offset = 4;
        if adaptation_control == 0x2 {
            return None; // adaptation field only, no payload
        }
        if adaptation_control == 0x3 {
            let adaptation_len = packet[4] as usize;
            offset += 1 + adaptation_len;
        }
        if offset + 14 > packet.len() {
            return None;
        }

        let payload = &packet[offset..];
        if payload[0] != 0x00 || payload[1] != 0x00 || payload[2] != 0x01 {
            return None; // not a PES header (PAT/PMT/PSI)
        }
        let stream_id = payload[3];
        let is_video = (0xE0..=0xEF).contains(&stream_id);
        let is_audio = (0xC0..=0xDF).contains(&stream_id);
        if !is_video && !is_audio {
            return None;
        }

        let pts_dts_flags = payload[7] >> 6;
        if pts_dts_flags & 0x2 == 0 {
            return None;
        }
        let pts = decode_timestamp(&payload[9..14])?;
        let dts = if pts_dts_flags == 0x3 && payload.len() >= 19 {
            decode_timestamp(&payload[14..19]).unwrap_or(pts)
        } else {
            pts
        };

        let pts_delta = clamped_delta(&mut self.last_pts, pts);
        let dts_delta = clamped_delta(&mut self.last_dts, dts);

        let fps = if is_video {
            let frame_ticks = self
                .last_video_pts
                .map(|last| pts.saturating_sub(last))
                .filter(|&d| d > 0 && d < 90_000);
            self.last_video_pts = Some(self.last_video_pts.map_or(pts, |last| last.max(pts)));
            frame_ticks.map(|ticks| PTS_HZ / ticks as f64)
        } else {
            None
        };

        Some(TimingUpdate {
            pts_delta,
            dts_delta,
            fps,
        })
    }
}

/// Advance a running 90kHz position, returning the forward-only delta in
/// seconds. Backward or repeated samples clamp to zero.
fn clamped_delta(last: &mut Option<u64>, sample: u64) -> f64 {
    let delta = match *last {
        Some(prev) if sample > prev => (sample - prev) as f64 / PTS_HZ,
        Some(_) => 0.0,
        None => 0.0,
    };
    *last = Some(last.map_or(sample, |prev| prev.max(sample)));
    delta
}

/// 33-bit timestamp packed into 5 bytes per the PES header layout.
fn decode_timestamp(bytes: &[u8]) -> Option<u64> {
    if bytes.len() < 5 {
        return None;
    }
    let ts = (((bytes[0] as u64) >> 1) & 0x7) << 30
        | (bytes[1] as u64) << 22
        | (((bytes[2] as u64) >> 1) & 0x7F) << 15
        | (bytes[3] as u64) << 7
        | (bytes[4] as u64) >> 1;
    Some(ts)
}
