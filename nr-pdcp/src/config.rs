//! PDCP entity configuration.

use std::time::Duration;

use thiserror::Error;

use crate::pdu::SnSize;
use nr_security::SecurityDirection;

/// Signalling or data radio bearer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RbType {
    Srb,
    Drb,
}

/// Mode of the underlying RLC entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RlcMode {
    Am,
    Um,
}

/// discardTimer (TS 38.331). `Infinity` keeps SDUs until acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardTimer {
    Infinity,
    Finite(Duration),
}

/// t-Reordering (TS 38.331). `Ms0` delivers out-of-window holes immediately,
/// `Infinity` never gives up on missing COUNTs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TReordering {
    Ms0,
    Infinity,
    Finite(Duration),
}

/// COUNT thresholds guarding key reuse (TS 38.331 Sec. 5.3.1.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaxCount {
    /// First COUNT at which the upper layer is asked to refresh keys.
    pub notify: u32,
    /// COUNT at which the entity refuses further traffic.
    pub hard: u32,
}

impl Default for MaxCount {
    fn default() -> Self {
        Self {
            notify: 0xc000_0000,
            hard: 0xffff_ff00,
        }
    }
}

/// Implementation knobs outside the 3GPP configuration surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PdcpCustomConfig {
    pub max_count: MaxCount,
    /// Synthesize transmit notifications on PDU hand-off.
    pub test_mode: bool,
    /// Log drops at warning instead of info level.
    pub warn_on_drop: bool,
    /// How long the TX side waits for out-of-order crypto completions before
    /// skipping the hole.
    pub crypto_reordering_timeout: Duration,
}

impl Default for PdcpCustomConfig {
    fn default() -> Self {
        Self {
            max_count: MaxCount::default(),
            test_mode: false,
            warn_on_drop: false,
            crypto_reordering_timeout: Duration::from_millis(1000),
        }
    }
}

/// TX entity configuration.
#[derive(Debug, Clone)]
pub struct PdcpTxConfig {
    pub rb_type: RbType,
    pub rlc_mode: RlcMode,
    pub sn_size: SnSize,
    pub direction: SecurityDirection,
    /// Required for DRBs; absent or infinite for SRBs.
    pub discard_timer: Option<DiscardTimer>,
    pub status_report_required: bool,
    pub custom: PdcpCustomConfig,
}

/// RX entity configuration.
#[derive(Debug, Clone)]
pub struct PdcpRxConfig {
    pub rb_type: RbType,
    pub rlc_mode: RlcMode,
    pub sn_size: SnSize,
    pub direction: SecurityDirection,
    pub t_reordering: TReordering,
    pub custom: PdcpCustomConfig,
}

/// Rejected entity configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PdcpConfigError {
    #[error("SRB requires a 12-bit SN")]
    SrbInvalidSnSize,
    #[error("SRB cannot be used with RLC UM")]
    SrbWithUm,
    #[error("SRB discard timer must be absent or infinite")]
    SrbFiniteDiscardTimer,
    #[error("DRB requires a configured discard timer")]
    DrbMissingDiscardTimer,
    #[error("bearer id out of range")]
    InvalidBearerId,
}

pub(crate) fn validate_common(
    rb_type: RbType,
    rlc_mode: RlcMode,
    sn_size: SnSize,
    bearer_id: u8,
) -> Result<(), PdcpConfigError> {
    if bearer_id > 31 {
        return Err(PdcpConfigError::InvalidBearerId);
    }
    if rb_type == RbType::Srb && sn_size != SnSize::Size12 {
        return Err(PdcpConfigError::SrbInvalidSnSize);
    }
    if rb_type == RbType::Srb && rlc_mode == RlcMode::Um {
        return Err(PdcpConfigError::SrbWithUm);
    }
    Ok(())
}
