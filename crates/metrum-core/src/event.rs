//! Fixed-size event record carried by every outbound ring channel.

use crate::error::{Error, Result};

/// Lowest valid channel number.
pub const MIN_CHANNEL: u8 = 1;
/// Highest valid channel number.
pub const MAX_CHANNEL: u8 = 16;
/// Highest valid note or controller number.
pub const MAX_INDEX: u8 = 127;
/// Number of channels tracked by shadow state.
pub const NUM_CHANNELS: usize = MAX_CHANNEL as usize;

/// What a [`BridgeEvent`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum EventKind {
    #[default]
    NoteOn = 0,
    NoteOff = 1,
    ControlChange = 2,
    /// Silence every sounding note on `channel`.
    AllNotesOff = 3,
    /// Transport position changed discontinuously (seek, loop wrap).
    PositionJump = 4,
}

/// Which subsystem produced a [`BridgeEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum EventSource {
    #[default]
    Sequencer = 0,
    FilePlayback = 1,
    Scheduler = 2,
    Transport = 3,
    Ui = 4,
    Network = 5,
    Hardware = 6,
}

/// Universal event record.
///
/// `Copy`, no heap members, so it moves through ring buffers by value.
/// Constructors clamp channel and index into range; use [`BridgeEvent::try_new`]
/// to reject out-of-range input at a boundary instead.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BridgeEvent {
    pub kind: EventKind,
    pub source: EventSource,
    /// 1..=16
    pub channel: u8,
    /// Note or controller number, 0..=127.
    pub index: u8,
    /// Velocity (0..1) for notes, normalized value (0..1) for controls,
    /// target beat for [`EventKind::PositionJump`].
    pub value: f32,
}

impl BridgeEvent {
    #[inline]
    pub fn new(kind: EventKind, source: EventSource, channel: u8, index: u8, value: f32) -> Self {
        Self {
            kind,
            source,
            channel: clamp_channel(channel),
            index: index.min(MAX_INDEX),
            value,
        }
    }

    /// Validating constructor for untrusted input.
    pub fn try_new(
        kind: EventKind,
        source: EventSource,
        channel: u8,
        index: u8,
        value: f32,
    ) -> Result<Self> {
        let event = Self {
            kind,
            source,
            channel,
            index,
            value,
        };
        if !event.is_valid() {
            return Err(Error::InvalidEvent { channel, index });
        }
        Ok(event)
    }

    /// Channel and index are in range. Records built field by field may not
    /// be.
    #[inline]
    pub fn is_valid(&self) -> bool {
        (MIN_CHANNEL..=MAX_CHANNEL).contains(&self.channel) && self.index <= MAX_INDEX
    }

    #[inline]
    pub fn note_on(source: EventSource, channel: u8, note: u8, velocity: f32) -> Self {
        Self::new(
            EventKind::NoteOn,
            source,
            channel,
            note,
            velocity.clamp(0.0, 1.0),
        )
    }

    #[inline]
    pub fn note_off(source: EventSource, channel: u8, note: u8) -> Self {
        Self::new(EventKind::NoteOff, source, channel, note, 0.0)
    }

    #[inline]
    pub fn control_change(source: EventSource, channel: u8, control: u8, value: f32) -> Self {
        Self::new(
            EventKind::ControlChange,
            source,
            channel,
            control,
            value.clamp(0.0, 1.0),
        )
    }

    #[inline]
    pub fn all_notes_off(source: EventSource, channel: u8) -> Self {
        Self::new(EventKind::AllNotesOff, source, channel, 0, 0.0)
    }

    #[inline]
    pub fn position_jump(beat: f64) -> Self {
        Self::new(
            EventKind::PositionJump,
            EventSource::Transport,
            MIN_CHANNEL,
            0,
            beat as f32,
        )
    }

    #[inline]
    pub fn is_note_on(&self) -> bool {
        self.kind == EventKind::NoteOn && self.value > 0.0
    }

    /// Note-off, or note-on with zero velocity.
    #[inline]
    pub fn is_note_off(&self) -> bool {
        self.kind == EventKind::NoteOff || (self.kind == EventKind::NoteOn && self.value <= 0.0)
    }

    /// Zero-based channel for array indexing. Out-of-range channels from
    /// hand-built records are clamped.
    #[inline]
    pub fn channel_index(&self) -> usize {
        (clamp_channel(self.channel) - MIN_CHANNEL) as usize
    }

    /// Same event with the note number shifted by `semitones`, clamped to 0..=127.
    /// Non-note events are returned unchanged.
    #[inline]
    pub fn transposed(mut self, semitones: i32) -> Self {
        if matches!(self.kind, EventKind::NoteOn | EventKind::NoteOff) && semitones != 0 {
            self.index = (self.index as i32 + semitones).clamp(0, MAX_INDEX as i32) as u8;
        }
        self
    }
}

#[inline]
fn clamp_channel(channel: u8) -> u8 {
    channel.clamp(MIN_CHANNEL, MAX_CHANNEL)
}

/// Destination for emitted events.
///
/// Implemented by the ring-channel producers so the audio thread can write
/// straight into a queue. Returns `false` when the event was dropped.
pub trait EventSink {
    fn emit(&mut self, event: BridgeEvent) -> bool;
}

/// Collects into a `Vec`. Allocates; use for offline rendering and tests only.
impl EventSink for Vec<BridgeEvent> {
    fn emit(&mut self, event: BridgeEvent) -> bool {
        self.push(event);
        true
    }
}
