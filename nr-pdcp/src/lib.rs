//! # NR PDCP
//!
//! A 5G NR PDCP layer: transmitting and receiving entities with
//! sliding-window reordering, per-PDU ciphering and integrity protection on
//! a parallel crypto worker pool, discard and reordering timers, and status
//! reporting.
//!
//! ## Architecture
//!
//! - **Executors**: per-UE serial executors own all window and state-variable
//!   mutation; a shared crypto worker pool applies security with per-worker
//!   engines selected by a thread-local worker index.
//! - **Ordering**: crypto may complete out of order; `TX_TRANS_CRYPTO` on the
//!   TX side and `RX_DELIV` on the RX side restore in-order hand-off.
//! - **Lifetimes**: buffers are moved across executor boundaries; a crypto
//!   token manager tracks in-flight tasks so teardown can await drain.

pub mod config;
pub mod exec;
pub mod interfaces;
pub mod pdu;
pub mod rx;
pub mod timer;
pub mod token;
pub mod tx;
pub mod window;

pub use config::{
    DiscardTimer, MaxCount, PdcpConfigError, PdcpCustomConfig, PdcpRxConfig, PdcpTxConfig, RbType,
    RlcMode, TReordering,
};
pub use exec::{current_worker_index, CryptoWorkerPool, ManualExecutor, SingleWorkerExecutor, TaskExecutor};
pub use interfaces::{
    PdcpRxUpperControlNotifier, PdcpRxUpperDataNotifier, PdcpStatusHandler, PdcpStatusProvider,
    PdcpTxLowerNotifier, PdcpTxUpperControlNotifier,
};
pub use pdu::SnSize;
pub use rx::{PdcpRx, PdcpRxMetrics, PdcpRxState};
pub use timer::{TimerFactory, TimerService, UniqueTimer};
pub use token::{CryptoToken, CryptoTokenManager, EventFlag};
pub use tx::{PdcpTx, PdcpTxMetrics, PdcpTxState};
pub use window::SnWindow;
