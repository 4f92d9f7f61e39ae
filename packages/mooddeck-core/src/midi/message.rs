//! Canonical control messages and the raw-frame decoder.
//!
//! Host bridges deliver control-surface input as raw status/data byte
//! frames. [`decode_frame`] is the single normalization point: every
//! producer (hardware surface, virtual port, keyboard fallback) funnels
//! through it so the rest of the pipeline only ever sees one shape.

use serde::Serialize;

/// The message kind, selected by the top nibble of the status byte.
///
/// Aftertouch, channel pressure, and system messages carry no mappable
/// control number here and collapse into [`ControlKind::Other`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ControlKind {
    /// Note pressed (status 0x9n).
    NoteOn,
    /// Note released (status 0x8n).
    NoteOff,
    /// Continuous controller moved (status 0xBn).
    ControlChange,
    /// Program/patch selected (status 0xCn).
    ProgramChange,
    /// Pitch wheel moved (status 0xEn).
    PitchBend,
    /// Anything else (aftertouch, channel pressure, system messages).
    Other,
}

/// One decoded control-surface message.
///
/// Immutable; produced once per decoded protocol frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlMessage {
    /// The decoded message kind.
    pub kind: ControlKind,
    /// Channel 0-15 from the bottom nibble of the status byte.
    pub channel: u8,
    /// First data byte: controller number, note number, or program number.
    pub control_number: u8,
    /// Second data byte: controller value or velocity. 0 when absent.
    pub value: u8,
    /// Arrival time, Unix milliseconds.
    #[serde(rename = "timestampMs")]
    pub timestamp_ms: u64,
}

/// Decodes a raw status/data frame into a [`ControlMessage`].
///
/// The status byte's top nibble selects the kind and its bottom nibble is
/// the channel. `data1` becomes the control number and `data2` the value;
/// two-byte messages (program change) default the value to 0. Data bytes
/// are masked to 7 bits.
///
/// Frames shorter than two bytes are dropped with a logged warning and
/// never surface an error to callers.
pub fn decode_frame(bytes: &[u8], timestamp_ms: u64) -> Option<ControlMessage> {
    if bytes.len() < 2 {
        log::warn!("[MidiDecoder] Dropping short frame ({} bytes)", bytes.len());
        return None;
    }

    let status = bytes[0];
    let kind = match status & 0xF0 {
        0x80 => ControlKind::NoteOff,
        0x90 => ControlKind::NoteOn,
        0xB0 => ControlKind::ControlChange,
        0xC0 => ControlKind::ProgramChange,
        0xE0 => ControlKind::PitchBend,
        // 0xA0 aftertouch, 0xD0 channel pressure, 0xF0 system, and
        // anything without a status bit set
        _ => ControlKind::Other,
    };

    Some(ControlMessage {
        kind,
        channel: status & 0x0F,
        control_number: bytes[1] & 0x7F,
        value: bytes.get(2).copied().unwrap_or(0) & 0x7F,
        timestamp_ms,
    })
}
