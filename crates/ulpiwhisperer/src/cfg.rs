//! Client for the configuration peripheral that sits beside the capture
//! path: PHY reset control, the debounced clock-activity status bit, and
//! the register-access handshake for the transceiver's internal registers.
//!
//! The filtering stage never touches any of this; it is the configuration
//! plane of the same capture subsystem.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Error, bail};
use async_lock::Mutex;
use async_trait::async_trait;
use num_enum::IntoPrimitive;
use portable_async_sleep::async_sleep;

/// Highest addressable transceiver register.
pub const PHY_REG_ADDR_MAX: u8 = 0x3F;

/// Consecutive quiet sampling windows after which the PHY clock is reported
/// inactive.
pub const CLOCK_QUIET_LIMIT: u8 = 0xFF;

const GO_POLL_ATTEMPTS: u32 = 100;
const GO_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Addresses of the peripheral's own registers.
#[derive(Copy, Clone, Debug, IntoPrimitive, PartialEq, Eq)]
#[repr(u8)]
pub enum CfgRegister {
    Rst = 0,
    Stat = 1,
    Wdata = 2,
    Wcmd = 3,
    Rdata = 4,
    Rcmd = 5,
    Capture = 6,
}

bitfield! {
    /// Reset control. Resetting the capture domain without resetting the
    /// PHY can leave a cached transceiver speed mismatch; callers are
    /// expected to reconfigure the speed afterwards.
    #[derive(Copy, Clone)]
    pub struct ResetControl(u8);
    pub bool, phy_reset, set_phy_reset: 0;
    pub bool, bus_reset, set_bus_reset: 1;
    pub bool, stp_override, set_stp_override: 2;
}

bitfield! {
    #[derive(Copy, Clone)]
    pub struct Status(u8);
    pub bool, clock_active, set_clock_active: 0;
}

bitfield! {
    /// Command register for a transceiver register access. GO is written 1
    /// to start the transaction, stays 1 while it is in progress and clears
    /// on completion.
    #[derive(Copy, Clone)]
    pub struct RegCommand(u8);
    pub u8, addr, set_addr: 5, 0;
    pub bool, go, set_go: 7;
}

bitfield! {
    #[derive(Copy, Clone)]
    pub struct CaptureMode(u8);
    pub bool, fs_pre, set_fs_pre: 0;
}

/// Transport carrying the peripheral's register file, typically a bridge on
/// the capture device's control interface.
#[async_trait(?Send)]
pub trait ConfigPort {
    async fn read_reg(&mut self, reg: CfgRegister) -> Result<u8, Error>;
    async fn write_reg(&mut self, reg: CfgRegister, value: u8) -> Result<(), Error>;
}

/// A handle to the configuration peripheral.
pub struct UlpiCfg<P: ConfigPort> {
    inner: Arc<Mutex<P>>,
}

impl<P: ConfigPort> Clone for UlpiCfg<P> {
    fn clone(&self) -> UlpiCfg<P> {
        UlpiCfg {
            inner: self.inner.clone(),
        }
    }
}

impl<P: ConfigPort> UlpiCfg<P> {
    pub fn new(port: P) -> UlpiCfg<P> {
        UlpiCfg {
            inner: Arc::new(Mutex::new(port)),
        }
    }

    pub async fn set_reset(&self, reset: ResetControl) -> Result<(), Error> {
        let mut port = self.inner.lock().await;
        port.write_reg(CfgRegister::Rst, reset.0)
            .await
            .context("Failed to write reset control")
    }

    /// Whether the PHY is still providing its clock.
    pub async fn clock_active(&self) -> Result<bool, Error> {
        let mut port = self.inner.lock().await;
        let stat = port
            .read_reg(CfgRegister::Stat)
            .await
            .context("Failed to read clock status")?;
        Ok(Status(stat).clock_active())
    }

    pub async fn set_capture_mode(&self, mode: CaptureMode) -> Result<(), Error> {
        let mut port = self.inner.lock().await;
        port.write_reg(CfgRegister::Capture, mode.0)
            .await
            .context("Failed to write capture mode")
    }

    /// Write a transceiver register: load the data register, start the
    /// transaction, then poll until the peripheral acknowledges completion.
    pub async fn write_phy_register(&self, addr: u8, value: u8) -> Result<(), Error> {
        check_phy_addr(addr)?;
        let mut port = self.inner.lock().await;
        port.write_reg(CfgRegister::Wdata, value)
            .await
            .context("Failed to load write data")?;
        start_transaction(&mut *port, CfgRegister::Wcmd, addr).await?;
        wait_go_clear(&mut *port, CfgRegister::Wcmd).await
    }

    /// Read a transceiver register via the mirrored read-side handshake.
    pub async fn read_phy_register(&self, addr: u8) -> Result<u8, Error> {
        check_phy_addr(addr)?;
        let mut port = self.inner.lock().await;
        start_transaction(&mut *port, CfgRegister::Rcmd, addr).await?;
        wait_go_clear(&mut *port, CfgRegister::Rcmd).await?;
        port.read_reg(CfgRegister::Rdata)
            .await
            .context("Failed to read returned data")
    }
}

fn check_phy_addr(addr: u8) -> Result<(), Error> {
    if addr > PHY_REG_ADDR_MAX {
        bail!("Transceiver register address {addr:#04x} exceeds {PHY_REG_ADDR_MAX:#04x}");
    }
    Ok(())
}

async fn start_transaction<P: ConfigPort>(
    port: &mut P,
    cmd_reg: CfgRegister,
    addr: u8,
) -> Result<(), Error> {
    let mut cmd = RegCommand(0);
    cmd.set_addr(addr);
    cmd.set_go(true);
    port.write_reg(cmd_reg, cmd.0)
        .await
        .context("Failed to start register transaction")
}

async fn wait_go_clear<P: ConfigPort>(port: &mut P, cmd_reg: CfgRegister) -> Result<(), Error> {
    for _ in 0..GO_POLL_ATTEMPTS {
        let cmd = RegCommand(
            port.read_reg(cmd_reg)
                .await
                .context("Failed to poll register transaction")?,
        );
        if !cmd.go() {
            return Ok(());
        }
        async_sleep(GO_POLL_INTERVAL).await;
    }
    bail!("Transceiver register transaction did not complete");
}

/// Debounce model behind the clock-activity status bit: any observed edge
/// resets a saturating window counter, and the clock is reported inactive
/// once the counter saturates.
pub struct ClockMonitor {
    last_level: bool,
    quiet_windows: u8,
}

impl ClockMonitor {
    pub fn new() -> ClockMonitor {
        ClockMonitor {
            last_level: false,
            quiet_windows: 0,
        }
    }

    /// Feed one sampled clock level; returns the updated activity status.
    pub fn sample(&mut self, level: bool) -> bool {
        if level != self.last_level {
            self.last_level = level;
            self.quiet_windows = 0;
        } else if self.quiet_windows < CLOCK_QUIET_LIMIT {
            self.quiet_windows += 1;
        }
        self.active()
    }

    pub fn active(&self) -> bool {
        self.quiet_windows != CLOCK_QUIET_LIMIT
    }
}

impl Default for ClockMonitor {
    fn default() -> ClockMonitor {
        ClockMonitor::new()
    }
}
