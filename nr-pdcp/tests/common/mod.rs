#![allow(dead_code)]
//! Shared doubles and fixtures for the PDCP entity tests.
//!
//! Entities run against [`ManualExecutor`]s so tests control exactly when and
//! in which order crypto and reordering tasks execute.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use nr_bytes::ByteBuffer;
use nr_pdcp::{
    DiscardTimer, ManualExecutor, PdcpCustomConfig, PdcpRx, PdcpRxConfig,
    PdcpRxUpperControlNotifier, PdcpRxUpperDataNotifier, PdcpTx, PdcpTxConfig,
    PdcpTxLowerNotifier, PdcpTxUpperControlNotifier, RbType, RlcMode, SnSize, TReordering,
    TimerFactory, TimerService,
};
use nr_security::{CipheringAlgorithm, IntegrityAlgorithm, Sec128AsConfig, Sec128Key, SecDomain, SecurityDirection};
use parking_lot::Mutex;

pub const KEY_INT: Sec128Key = [
    0x2b, 0xd6, 0x45, 0x9f, 0x82, 0xc5, 0xb3, 0x00, 0x95, 0x2c, 0x49, 0x10, 0x48, 0x81, 0xff, 0x48,
];
pub const KEY_ENC: Sec128Key = [
    0xd3, 0xc5, 0xd5, 0x92, 0x32, 0x7f, 0xb1, 0x1c, 0x40, 0x35, 0xc6, 0x68, 0x0a, 0xf8, 0xc6, 0xd1,
];

#[derive(Default)]
pub struct TestTxLower {
    pub pdus: Mutex<Vec<(Vec<u8>, bool)>>,
    pub discards: Mutex<Vec<u32>>,
}

impl PdcpTxLowerNotifier for TestTxLower {
    fn on_new_pdu(&self, pdu: ByteBuffer, is_retx: bool) {
        self.pdus.lock().push((pdu.to_vec(), is_retx));
    }

    fn on_discard_pdu(&self, sn: u32) {
        self.discards.lock().push(sn);
    }
}

#[derive(Default)]
pub struct TestTxUpper {
    pub max_count_reached: AtomicU32,
    pub protocol_failures: AtomicU32,
}

impl PdcpTxUpperControlNotifier for TestTxUpper {
    fn on_max_count_reached(&self) {
        self.max_count_reached.fetch_add(1, Ordering::SeqCst);
    }

    fn on_protocol_failure(&self) {
        self.protocol_failures.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct TestRxUpper {
    pub sdus: Mutex<Vec<Vec<u8>>>,
    pub max_count_reached: AtomicU32,
    pub protocol_failures: AtomicU32,
    pub integrity_failures: AtomicU32,
}

impl PdcpRxUpperDataNotifier for TestRxUpper {
    fn on_new_sdu(&self, sdu: ByteBuffer) {
        self.sdus.lock().push(sdu.to_vec());
    }
}

impl PdcpRxUpperControlNotifier for TestRxUpper {
    fn on_max_count_reached(&self) {
        self.max_count_reached.fetch_add(1, Ordering::SeqCst);
    }

    fn on_protocol_failure(&self) {
        self.protocol_failures.fetch_add(1, Ordering::SeqCst);
    }

    fn on_integrity_failure(&self) {
        self.integrity_failures.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct TxFixture {
    pub tx: PdcpTx,
    pub lower: Arc<TestTxLower>,
    pub upper: Arc<TestTxUpper>,
    pub ue_dl: Arc<ManualExecutor>,
    pub crypto: Arc<ManualExecutor>,
}

impl TxFixture {
    /// Drains the crypto queue, then the UE-DL queue.
    pub fn run_all(&self) {
        self.crypto.run_all();
        self.ue_dl.run_all();
    }

    pub fn pdus(&self) -> Vec<(Vec<u8>, bool)> {
        self.lower.pdus.lock().clone()
    }
}

pub fn default_tx_config(rb_type: RbType, rlc_mode: RlcMode) -> PdcpTxConfig {
    PdcpTxConfig {
        rb_type,
        rlc_mode,
        sn_size: SnSize::Size12,
        direction: SecurityDirection::Downlink,
        discard_timer: Some(DiscardTimer::Infinity),
        status_report_required: false,
        custom: PdcpCustomConfig::default(),
    }
}

pub fn build_tx(cfg: PdcpTxConfig) -> TxFixture {
    let lower = Arc::new(TestTxLower::default());
    let upper = Arc::new(TestTxUpper::default());
    let ue_dl = Arc::new(ManualExecutor::new());
    let crypto = Arc::new(ManualExecutor::new());
    let service = TimerService::new();
    let factory = TimerFactory::new(service, ue_dl.clone());
    let tx = PdcpTx::new(
        cfg,
        1,
        lower.clone(),
        upper.clone(),
        factory,
        ue_dl.clone(),
        crypto.clone(),
        4,
    )
    .unwrap();
    // The RLC advertises buffer space before any traffic flows.
    tx.handle_desired_buffer_size_notification(1 << 20);
    TxFixture {
        tx,
        lower,
        upper,
        ue_dl,
        crypto,
    }
}

pub struct RxFixture {
    pub rx: PdcpRx,
    pub upper: Arc<TestRxUpper>,
    pub ue_ul: Arc<ManualExecutor>,
    pub crypto: Arc<ManualExecutor>,
}

impl RxFixture {
    pub fn run_all(&self) {
        self.crypto.run_all();
        self.ue_ul.run_all();
    }

    pub fn sdus(&self) -> Vec<Vec<u8>> {
        self.upper.sdus.lock().clone()
    }
}

pub fn default_rx_config(rb_type: RbType, rlc_mode: RlcMode) -> PdcpRxConfig {
    PdcpRxConfig {
        rb_type,
        rlc_mode,
        sn_size: SnSize::Size12,
        direction: SecurityDirection::Downlink,
        t_reordering: TReordering::Finite(Duration::from_millis(50)),
        custom: PdcpCustomConfig::default(),
    }
}

pub fn build_rx(cfg: PdcpRxConfig) -> RxFixture {
    let upper = Arc::new(TestRxUpper::default());
    let ue_ul = Arc::new(ManualExecutor::new());
    let crypto = Arc::new(ManualExecutor::new());
    let service = TimerService::new();
    let factory = TimerFactory::new(service, ue_ul.clone());
    let rx = PdcpRx::new(
        cfg,
        1,
        upper.clone(),
        upper.clone(),
        factory,
        ue_ul.clone(),
        crypto.clone(),
        4,
    )
    .unwrap();
    RxFixture {
        rx,
        upper,
        ue_ul,
        crypto,
    }
}

/// AS security configuration with everything off (NEA0, no integrity).
pub fn null_security(domain: SecDomain) -> Sec128AsConfig {
    Sec128AsConfig {
        domain,
        k_128_int: None,
        k_128_enc: KEY_ENC,
        integ_algo: None,
        cipher_algo: CipheringAlgorithm::Nea0,
    }
}

/// AS security configuration with real algorithms.
pub fn full_security(
    domain: SecDomain,
    cipher_algo: CipheringAlgorithm,
    integ_algo: IntegrityAlgorithm,
) -> Sec128AsConfig {
    Sec128AsConfig {
        domain,
        k_128_int: Some(KEY_INT),
        k_128_enc: KEY_ENC,
        integ_algo: Some(integ_algo),
        cipher_algo,
    }
}

/// Builds an SRB data PDU (no D/C bit) with a trailing zero MAC-I, as the
/// unconfigured-security TX path would produce it.
pub fn srb_pdu(sn: u32, payload: &[u8]) -> ByteBuffer {
    let mut bytes = vec![((sn >> 8) & 0x0f) as u8, (sn & 0xff) as u8];
    bytes.extend_from_slice(payload);
    bytes.extend_from_slice(&[0, 0, 0, 0]);
    ByteBuffer::from_vec(bytes)
}
