//! Types describing the ULPI transceiver bus as seen by the capture front-end.

use anyhow::{Error, bail};
use num_enum::{FromPrimitive, IntoPrimitive};

/// Default marker values injected by the capture front-end. All four have
/// bit 6 set, which no decodable line-state byte does.
pub const RXCMD_MAGIC_SOP: u8 = 0x40;
pub const RXCMD_MAGIC_EOP: u8 = 0x41;
pub const RXCMD_MAGIC_OVF: u8 = 0x42;
pub const RXCMD_MAGIC_NOP: u8 = 0x43;

/// One bus cycle worth of captured data: either a packet data byte or an
/// RxCmd status byte, as tagged by the front-end.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RawSample {
    pub rxcmd: bool,
    pub data: u8,
}

impl RawSample {
    pub fn data(data: u8) -> RawSample {
        RawSample { rxcmd: false, data }
    }

    pub fn cmd(data: u8) -> RawSample {
        RawSample { rxcmd: true, data }
    }
}

/// The 2-bit line-state code carried in a genuine RxCmd byte.
#[derive(Copy, Clone, Debug, Default, IntoPrimitive, FromPrimitive, PartialEq, Eq)]
#[repr(u8)]
pub enum LineState {
    #[default]
    Idle = 0,
    Active = 1,
    Reserved = 2,
    Error = 3,
}

bitfield! {
    /// Bit layout of an RxCmd status byte. A byte decodes to a line state
    /// only while the magic bit is clear; the front-end's markers all live
    /// in the magic half of the value space.
    #[derive(Copy, Clone)]
    pub struct RxCmd(u8);
    pub u8, from into LineState, line_state, set_line_state: 5, 4;
    pub bool, magic, set_magic: 6;
}

/// The four marker values the capture front-end substitutes for genuine
/// PHY status, chosen at construction time.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RxCmdMagic {
    pub sop: u8,
    pub eop: u8,
    pub ovf: u8,
    pub nop: u8,
}

impl Default for RxCmdMagic {
    fn default() -> RxCmdMagic {
        RxCmdMagic {
            sop: RXCMD_MAGIC_SOP,
            eop: RXCMD_MAGIC_EOP,
            ovf: RXCMD_MAGIC_OVF,
            nop: RXCMD_MAGIC_NOP,
        }
    }
}

impl RxCmdMagic {
    /// Check the marker set once at startup: every marker must sit in the
    /// magic half of the value space, and no two may share a value.
    pub fn validate(&self) -> Result<(), Error> {
        let markers = [
            ("SOP", self.sop),
            ("EOP", self.eop),
            ("OVF", self.ovf),
            ("NOP", self.nop),
        ];
        for (name, value) in markers {
            if !RxCmd(value).magic() {
                bail!(
                    "{name} marker {value:#04x} is decodable as a line state \
                     and would be ambiguous"
                );
            }
        }
        for i in 0..markers.len() {
            for (name, value) in &markers[(i + 1)..] {
                if *value == markers[i].1 {
                    bail!(
                        "{} and {name} markers share the value {value:#04x}",
                        markers[i].0
                    );
                }
            }
        }
        Ok(())
    }
}
