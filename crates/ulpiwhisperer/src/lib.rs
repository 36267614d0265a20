//! Filtering stage of a ULPI bus-capture pipeline.
//!
//! The capture front-end tags every bus sample as packet data or RxCmd
//! status. This crate passes the data bytes through untouched and collapses
//! the RxCmd chatter into timestamped packet boundary events (start, end,
//! error, overflow) for the packet parser downstream. A sibling module
//! exposes the capture subsystem's configuration peripheral.

#[macro_use]
extern crate bitfield;

pub mod cfg;
pub mod filter;
pub mod stream;
pub mod ulpi;
pub mod util;

use std::sync::mpsc::SyncSender;

use anyhow::Error;

pub type Result<T> = std::result::Result<T, Error>;

pub use crate::filter::{EventType, FilterConfig, PacketEvent, RxCmdFilter, classify};
pub use crate::stream::{EventPoll, FilterStage, FilterStream};
pub use crate::ulpi::{LineState, RawSample, RxCmd, RxCmdMagic};

/// Build a filtering stage on its own worker thread, returning the
/// producer-facing input port alongside the stage.
pub fn spawn_filter(config: FilterConfig) -> Result<(SyncSender<RawSample>, FilterStage)> {
    let filter = RxCmdFilter::new(config)?;
    Ok(FilterStage::spawn(filter))
}
