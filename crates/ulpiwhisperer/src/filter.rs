//! The RxCmd filter: collapses the raw capture stream into packet data
//! bytes and timestamped boundary events for the packet parser downstream.

use anyhow::{Error, bail};

use crate::ulpi::{LineState, RawSample, RxCmd, RxCmdMagic};

/// Classification of a single raw sample. Derived combinationally from the
/// byte value; carries no state.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct RxCmdFlags {
    pub is_sop: bool,
    pub is_eop: bool,
    pub is_ovf: bool,
    pub is_nop: bool,
    pub is_active: bool,
    pub is_nactive: bool,
    pub is_error: bool,
}

/// Decode one raw sample against a marker set. Total over the byte value
/// space: an unrecognized RxCmd byte decodes to no flags at all, which the
/// state machine treats as noise.
pub fn classify(sample: RawSample, magic: &RxCmdMagic) -> RxCmdFlags {
    if !sample.rxcmd {
        return RxCmdFlags::default();
    }
    let cmd = RxCmd(sample.data);
    let line_state = |state| !cmd.magic() && cmd.line_state() == state;
    RxCmdFlags {
        is_sop: sample.data == magic.sop,
        is_eop: sample.data == magic.eop,
        is_ovf: sample.data == magic.ovf,
        is_nop: sample.data == magic.nop,
        is_active: line_state(LineState::Active),
        is_nactive: line_state(LineState::Idle),
        is_error: line_state(LineState::Error),
    }
}

/// Packet boundary carried by an emitted event.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EventType {
    Start,
    End,
    Error,
    Overflow,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// One item of the filtered stream: a packet data byte (no flags set) or a
/// boundary event (exactly one flag set), stamped with the capture-time
/// counter value at which its sample was accepted.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PacketEvent {
    pub timestamp: u64,
    pub data: u8,
    pub is_start: bool,
    pub is_end: bool,
    pub is_err: bool,
    pub is_ovf: bool,
}

impl PacketEvent {
    pub fn new(timestamp: u64, data: u8, kind: Option<EventType>) -> PacketEvent {
        PacketEvent {
            timestamp,
            data,
            is_start: kind == Some(EventType::Start),
            is_end: kind == Some(EventType::End),
            is_err: kind == Some(EventType::Error),
            is_ovf: kind == Some(EventType::Overflow),
        }
    }

    /// The boundary this event marks, or None for a plain data byte.
    pub fn kind(&self) -> Option<EventType> {
        if self.is_start {
            Some(EventType::Start)
        } else if self.is_end {
            Some(EventType::End)
        } else if self.is_err {
            Some(EventType::Error)
        } else if self.is_ovf {
            Some(EventType::Overflow)
        } else {
            None
        }
    }
}

/// Packet framing state. The filter starts outside a packet and lives for
/// the whole capture.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FilterState {
    NoPacket,
    Packet,
}

/// Construction-time configuration: the marker set and the width in bits of
/// the timestamp counter.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FilterConfig {
    pub magic: RxCmdMagic,
    pub ts_bits: u32,
}

impl Default for FilterConfig {
    fn default() -> FilterConfig {
        FilterConfig {
            magic: RxCmdMagic::default(),
            ts_bits: 64,
        }
    }
}

/// Merges and drops unnecessary RxCmd bytes so the packet parser only sees
/// packet data and meaningful boundaries.
///
/// The timestamp counter is owned here exclusively. It advances once per
/// accepted sample whether or not anything is emitted, so consecutive
/// emitted events need not carry consecutive timestamps.
pub struct RxCmdFilter {
    magic: RxCmdMagic,
    state: FilterState,
    ts: u64,
    ts_mask: u64,
}

impl RxCmdFilter {
    pub fn new(config: FilterConfig) -> Result<RxCmdFilter, Error> {
        config.magic.validate()?;
        if config.ts_bits == 0 || config.ts_bits > 64 {
            bail!(
                "Timestamp width must be between 1 and 64 bits, got {}",
                config.ts_bits
            );
        }
        let ts_mask = if config.ts_bits == 64 {
            u64::MAX
        } else {
            (1u64 << config.ts_bits) - 1
        };
        Ok(RxCmdFilter {
            magic: config.magic,
            state: FilterState::NoPacket,
            ts: 0,
            ts_mask,
        })
    }

    /// Process one accepted sample: forward it, open or close the packet, or
    /// drop it. The event timestamp is the counter value at acceptance; the
    /// counter then advances regardless of the outcome, wrapping at the
    /// configured width.
    pub fn process(&mut self, sample: RawSample) -> Option<PacketEvent> {
        use EventType::*;
        use FilterState::*;

        let flags = classify(sample, &self.magic);
        let ts = self.ts;
        self.ts = self.ts.wrapping_add(1) & self.ts_mask;

        // Packet data passes through untouched in either state.
        if !sample.rxcmd {
            return Some(PacketEvent::new(ts, sample.data, None));
        }

        // NOP markers are pure front-end padding.
        if flags.is_nop {
            return None;
        }

        match self.state {
            NoPacket => {
                if flags.is_sop || flags.is_active {
                    self.state = Packet;
                    Some(PacketEvent::new(ts, sample.data, Some(Start)))
                } else {
                    // Terminal markers and line-state chatter with no packet
                    // open carry nothing the parser needs.
                    None
                }
            }
            Packet => {
                if flags.is_eop || flags.is_nactive {
                    self.state = NoPacket;
                    Some(PacketEvent::new(ts, sample.data, Some(End)))
                } else if flags.is_error {
                    self.state = NoPacket;
                    Some(PacketEvent::new(ts, sample.data, Some(Error)))
                } else if flags.is_ovf {
                    self.state = NoPacket;
                    Some(PacketEvent::new(ts, sample.data, Some(Overflow)))
                } else {
                    // Includes a repeated SOP or "active" report mid-packet.
                    None
                }
            }
        }
    }
}
