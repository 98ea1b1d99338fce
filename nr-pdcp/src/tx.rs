//! PDCP transmitting entity (TS 38.323 Sec. 5.2.1).
//!
//! SDUs are numbered with TX_NEXT on the UE-DL executor, security is applied
//! on the crypto worker pool, and completed PDUs re-enter the UE-DL executor
//! where `apply_reordering` restores in-order hand-off to the lower layer.
//! A discard timer bounds SDU retention, a crypto-reordering timer bounds
//! how long an out-of-order crypto completion can stall the bearer, and a
//! retransmission generation invalidates in-flight PDUs after a
//! re-establishment.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use nr_bytes::ByteBuffer;
use nr_security::{Sec128AsConfig, SecDomain, SecurityEngine, SecurityError, SEC_MAC_LEN};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::config::{
    validate_common, DiscardTimer, PdcpConfigError, PdcpTxConfig, RbType, RlcMode,
};
use crate::exec::current_worker_index;
use crate::exec::TaskExecutor;
use crate::interfaces::{PdcpStatusHandler, PdcpStatusProvider, PdcpTxLowerNotifier, PdcpTxUpperControlNotifier};
use crate::pdu;
use crate::timer::{TimerFactory, UniqueTimer};
use crate::token::{CryptoToken, CryptoTokenManager, EventFlag};
use crate::window::SnWindow;

/// TX state variables (TS 38.323 Sec. 7.1 plus the crypto-reordering pair).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PdcpTxState {
    /// COUNT of the next SDU to process.
    pub tx_next: u32,
    /// Oldest COUNT still held in the TX window.
    pub tx_next_ack: u32,
    /// One past the highest COUNT reported transmitted by the lower layer.
    pub tx_trans: u32,
    /// One past the highest COUNT handed to the lower layer after crypto.
    pub tx_trans_crypto: u32,
    /// Snapshot of TX_NEXT when the crypto-reordering timer was armed.
    pub tx_reord_crypto: u32,
}

/// TX-side counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PdcpTxMetrics {
    pub num_sdus: u64,
    pub num_sdu_bytes: u64,
    pub num_pdus: u64,
    pub num_pdu_bytes: u64,
    pub num_lost_sdus: u64,
    pub num_discard_timeouts: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EarlyDropReason {
    ZeroDbs,
    FullRlcQueue,
    FullWindow,
}

struct TxWindowEntry {
    /// SDU copy kept for retransmission; only stored on AM bearers.
    sdu: Option<ByteBuffer>,
    sdu_len: usize,
    time_of_arrival: Instant,
    /// Tick point used for discard-timer arithmetic; only set for finite
    /// discard timers.
    tick_point_of_arrival: Option<Instant>,
    /// Protected PDU, filled in once crypto completes.
    pdu: Option<ByteBuffer>,
}

struct TxWindow {
    win: SnWindow<TxWindowEntry>,
    sdu_bytes: usize,
}

impl TxWindow {
    fn new(capacity: usize) -> Self {
        Self {
            win: SnWindow::new(capacity),
            sdu_bytes: 0,
        }
    }

    fn add_sdu(&mut self, count: u32, entry: TxWindowEntry) {
        self.sdu_bytes += entry.sdu_len;
        self.win.add_sn(count, entry);
    }

    fn remove_sdu(&mut self, count: u32) -> Option<TxWindowEntry> {
        let entry = self.win.remove_sn(count);
        if let Some(entry) = &entry {
            self.sdu_bytes -= entry.sdu_len;
        }
        entry
    }

    fn has_sn(&self, count: u32) -> bool {
        self.win.has_sn(count)
    }

    fn get(&self, count: u32) -> Option<&TxWindowEntry> {
        self.win.get(count)
    }

    fn get_mut(&mut self, count: u32) -> Option<&mut TxWindowEntry> {
        self.win.get_mut(count)
    }

    fn len(&self) -> usize {
        self.win.len()
    }

    fn clear(&mut self) {
        self.win.clear();
        self.sdu_bytes = 0;
    }

    /// Bytes the stored SDUs would occupy in the RLC queue as protected PDUs.
    fn pdu_bytes(&self, hdr_len: usize, integrity_enabled: bool) -> usize {
        let per_pdu = hdr_len + if integrity_enabled { SEC_MAC_LEN } else { 0 };
        self.sdu_bytes + self.win.len() * per_pdu
    }
}

struct TxBufferInfo {
    is_retx: bool,
    retx_id: u32,
    count: u32,
    buf: ByteBuffer,
    #[allow(dead_code)]
    token: CryptoToken,
}

struct TxCore {
    st: PdcpTxState,
    window: TxWindow,
    retransmit_id: u32,
    desired_buffer_size: u32,
    integrity_enabled: bool,
    ciphering_enabled: bool,
    max_count_notified: bool,
    max_count_overflow: bool,
    warn_on_drop_count: u32,
    metrics: PdcpTxMetrics,
}

struct PdcpTxInner {
    self_weak: Weak<PdcpTxInner>,
    cfg: PdcpTxConfig,
    bearer_id: u8,
    hdr_len: usize,
    sn_bits: u32,
    window_size: u32,
    lower: Arc<dyn PdcpTxLowerNotifier>,
    upper: Arc<dyn PdcpTxUpperControlNotifier>,
    ue_dl_executor: Arc<dyn TaskExecutor>,
    crypto_executor: Arc<dyn TaskExecutor>,
    max_nof_crypto_workers: usize,
    engines: RwLock<Vec<Option<SecurityEngine>>>,
    token_mngr: CryptoTokenManager,
    state: Mutex<TxCore>,
    stopped: AtomicBool,
    discard_timer: UniqueTimer,
    crypto_reordering_timer: UniqueTimer,
    status_provider: Mutex<Option<Arc<dyn PdcpStatusProvider>>>,
}

/// Handle to a PDCP TX entity. Clones share the entity.
#[derive(Clone)]
pub struct PdcpTx {
    inner: Arc<PdcpTxInner>,
}

impl PdcpTx {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cfg: PdcpTxConfig,
        bearer_id: u8,
        lower: Arc<dyn PdcpTxLowerNotifier>,
        upper: Arc<dyn PdcpTxUpperControlNotifier>,
        ue_ctrl_timer_factory: TimerFactory,
        ue_dl_executor: Arc<dyn TaskExecutor>,
        crypto_executor: Arc<dyn TaskExecutor>,
        max_nof_crypto_workers: usize,
    ) -> Result<Self, PdcpConfigError> {
        validate_common(cfg.rb_type, cfg.rlc_mode, cfg.sn_size, bearer_id)?;
        if cfg.rb_type == RbType::Srb && matches!(cfg.discard_timer, Some(DiscardTimer::Finite(_)))
        {
            return Err(PdcpConfigError::SrbFiniteDiscardTimer);
        }
        if cfg.rb_type == RbType::Drb && cfg.discard_timer.is_none() {
            return Err(PdcpConfigError::DrbMissingDiscardTimer);
        }

        let mut engines = Vec::with_capacity(max_nof_crypto_workers);
        engines.resize_with(max_nof_crypto_workers, || None);

        let crypto_reordering_timeout = cfg.custom.crypto_reordering_timeout;
        let hdr_len = cfg.sn_size.header_len();
        let sn_bits = cfg.sn_size.bits();
        let window_size = cfg.sn_size.window_size();
        let window_capacity = window_size as usize;

        let inner = Arc::new_cyclic(|self_weak| PdcpTxInner {
            self_weak: self_weak.clone(),
            cfg,
            bearer_id,
            hdr_len,
            sn_bits,
            window_size,
            lower,
            upper,
            ue_dl_executor,
            crypto_executor,
            max_nof_crypto_workers,
            engines: RwLock::new(engines),
            token_mngr: CryptoTokenManager::new(),
            state: Mutex::new(TxCore {
                st: PdcpTxState::default(),
                window: TxWindow::new(window_capacity),
                retransmit_id: 0,
                desired_buffer_size: 0,
                integrity_enabled: false,
                ciphering_enabled: false,
                max_count_notified: false,
                max_count_overflow: false,
                warn_on_drop_count: 0,
                metrics: PdcpTxMetrics::default(),
            }),
            stopped: AtomicBool::new(false),
            discard_timer: ue_ctrl_timer_factory.create_timer(),
            crypto_reordering_timer: ue_ctrl_timer_factory.create_timer(),
            status_provider: Mutex::new(None),
        });

        let weak = inner.self_weak.clone();
        inner
            .crypto_reordering_timer
            .set(crypto_reordering_timeout, move || {
                if let Some(inner) = weak.upgrade() {
                    inner.on_crypto_reordering_expired();
                }
            });
        let weak = inner.self_weak.clone();
        // The discard duration is reprogrammed on every arm; the placeholder
        // here only installs the callback.
        inner
            .discard_timer
            .set(crypto_reordering_timeout, move || {
                if let Some(inner) = weak.upgrade() {
                    inner.on_discard_timer_expired();
                }
            });

        info!(bearer_id, "PDCP TX entity configured");
        Ok(Self { inner })
    }

    /// Enqueues one SDU from the upper layer.
    pub fn handle_sdu(&self, buf: ByteBuffer) {
        self.inner.handle_sdu(buf);
    }

    /// Re-establishes the entity per TS 38.323 Sec. 5.1.2.
    pub fn reestablish(&self, sec_cfg: Sec128AsConfig) {
        self.inner.reestablish(sec_cfg);
    }

    /// Stops the entity: clears the window, stops timers and token issuance.
    pub fn stop(&self) {
        self.inner.stop();
    }

    /// Pauses new crypto dispatches without tearing down state.
    pub fn notify_pdu_processing_stopped(&self) {
        if !self.inner.stopped.load(Ordering::SeqCst) {
            self.inner.token_mngr.stop();
            debug!("stopped PDCP TX PDU processing");
        }
    }

    /// Resumes crypto dispatches after a pause.
    pub fn restart_pdu_processing(&self) {
        if !self.inner.stopped.load(Ordering::SeqCst) {
            self.inner.token_mngr.start();
            debug!("restarted PDCP TX PDU processing");
        }
    }

    /// Flag that sets once all outstanding crypto tasks have drained.
    pub fn crypto_awaitable(&self) -> EventFlag {
        self.inner.token_mngr.awaitable()
    }

    pub fn configure_security(
        &self,
        sec_cfg: Sec128AsConfig,
        integrity_enabled: bool,
        ciphering_enabled: bool,
    ) {
        let mut core = self.inner.state.lock();
        self.inner
            .configure_security_locked(&mut core, sec_cfg, integrity_enabled, ciphering_enabled);
    }

    pub fn set_status_provider(&self, provider: Arc<dyn PdcpStatusProvider>) {
        *self.inner.status_provider.lock() = Some(provider);
    }

    pub fn handle_transmit_notification(&self, notif_sn: u32) {
        if self.inner.stopped.load(Ordering::SeqCst) {
            debug!("dropping transmit notification, entity is stopped");
            return;
        }
        let mut core = self.inner.state.lock();
        self.inner
            .handle_transmit_notification_locked(&mut core, notif_sn, false);
    }

    pub fn handle_retransmit_notification(&self, notif_sn: u32) {
        if self.inner.stopped.load(Ordering::SeqCst) {
            debug!("dropping retransmit notification, entity is stopped");
            return;
        }
        if self.inner.is_srb() {
            error!(notif_sn, "ignored unexpected PDU retransmit notification on SRB");
            return;
        }
        if self.inner.is_um() {
            error!(notif_sn, "ignored unexpected PDU retransmit notification on UM bearer");
            return;
        }
        let mut core = self.inner.state.lock();
        self.inner
            .handle_transmit_notification_locked(&mut core, notif_sn, true);
    }

    pub fn handle_delivery_notification(&self, notif_sn: u32) {
        if self.inner.stopped.load(Ordering::SeqCst) {
            debug!("dropping delivery notification, entity is stopped");
            return;
        }
        let mut core = self.inner.state.lock();
        self.inner
            .handle_delivery_notification_locked(&mut core, notif_sn, false);
    }

    pub fn handle_delivery_retransmitted_notification(&self, notif_sn: u32) {
        if self.inner.stopped.load(Ordering::SeqCst) {
            debug!("dropping delivery retransmitted notification, entity is stopped");
            return;
        }
        if self.inner.is_srb() {
            error!(notif_sn, "ignored unexpected delivery retransmitted notification on SRB");
            return;
        }
        if self.inner.is_um() {
            error!(notif_sn, "ignored unexpected delivery retransmitted notification on UM bearer");
            return;
        }
        let mut core = self.inner.state.lock();
        self.inner
            .handle_delivery_notification_locked(&mut core, notif_sn, true);
    }

    pub fn handle_desired_buffer_size_notification(&self, desired_bs: u32) {
        if self.inner.stopped.load(Ordering::SeqCst) {
            debug!("dropping desired buffer size notification, entity is stopped");
            return;
        }
        self.inner.state.lock().desired_buffer_size = desired_bs;
    }

    /// Consumes a status report received by the RX side: SDUs below FMC and
    /// SDUs flagged as received in the bitmap are discarded.
    pub fn handle_status_report(&self, report: ByteBuffer) {
        let Some(parsed) = pdu::parse_status_report(&report) else {
            return;
        };
        info!(fmc = parsed.fmc, "status report");
        let mut core = self.inner.state.lock();
        let mut count = core.st.tx_next_ack;
        while count < parsed.fmc {
            self.inner.discard_pdu_locked(&mut core, count);
            count = count.wrapping_add(1);
        }
        let mut fmc = parsed.fmc;
        for bit in parsed.bitmap {
            fmc = fmc.wrapping_add(1);
            if bit {
                self.inner.discard_pdu_locked(&mut core, fmc);
            }
        }
    }

    /// AM-only recovery: optionally emits a status report, then retransmits
    /// every stored SDU (TS 38.323 Sec. 5.4.1).
    pub fn data_recovery(&self) {
        if !(self.inner.is_drb() && self.inner.is_am()) {
            error!("data recovery requested on invalid bearer type");
            return;
        }
        info!("data recovery requested");
        if self.inner.cfg.status_report_required {
            self.send_status_report();
        }
        let mut core = self.inner.state.lock();
        self.inner.retransmit_all_pdus_locked(&mut core);
    }

    /// Asks the RX side for a status report and forwards it downstream.
    pub fn send_status_report(&self) {
        if !self.inner.cfg.status_report_required {
            warn!("status report triggered but not configured");
            return;
        }
        let provider = self.inner.status_provider.lock().clone();
        let Some(provider) = provider else {
            warn!("status report triggered but no provider registered");
            return;
        };
        info!("status report triggered");
        let report = provider.compile_status_report();
        self.inner.write_control_pdu_to_lower(report);
    }

    /// Snapshot of the state variables.
    pub fn state(&self) -> PdcpTxState {
        self.inner.state.lock().st
    }

    /// Snapshot of the TX counters.
    pub fn metrics(&self) -> PdcpTxMetrics {
        self.inner.state.lock().metrics
    }

    /// Number of SDUs currently held in the TX window.
    pub fn window_len(&self) -> usize {
        self.inner.state.lock().window.len()
    }
}

impl PdcpStatusHandler for PdcpTx {
    fn on_status_report(&self, report: ByteBuffer) {
        self.handle_status_report(report);
    }
}

impl PdcpTxInner {
    fn is_srb(&self) -> bool {
        self.cfg.rb_type == RbType::Srb
    }

    fn is_drb(&self) -> bool {
        self.cfg.rb_type == RbType::Drb
    }

    fn is_am(&self) -> bool {
        self.cfg.rlc_mode == RlcMode::Am
    }

    fn is_um(&self) -> bool {
        self.cfg.rlc_mode == RlcMode::Um
    }

    fn sn(&self, count: u32) -> u32 {
        count & (self.cfg.sn_size.cardinality() - 1)
    }

    fn hfn(&self, count: u32) -> u32 {
        count >> self.sn_bits
    }

    fn self_arc(&self) -> Arc<PdcpTxInner> {
        self.self_weak.upgrade().expect("entity alive")
    }

    fn handle_sdu(&self, buf: ByteBuffer) {
        let mut buf = buf;
        let mut core = self.state.lock();
        core.metrics.num_sdus += 1;
        core.metrics.num_sdu_bytes += buf.len() as u64;
        debug!(sdu_len = buf.len(), "TX SDU");

        if self.stopped.load(Ordering::SeqCst) {
            if self.cfg.custom.warn_on_drop {
                warn!("dropping SDU, entity is stopped");
            } else {
                info!("dropping SDU, entity is stopped");
            }
            core.metrics.num_lost_sdus += 1;
            return;
        }

        let time_of_arrival = Instant::now();

        if self.is_drb() {
            if let Some(reason) = self.check_early_drop(&core, &buf) {
                if core.warn_on_drop_count == 0 {
                    // Log only at the start of a drop burst.
                    if self.cfg.custom.warn_on_drop {
                        warn!(?reason, "dropping SDU");
                    } else {
                        info!(?reason, "dropping SDU");
                    }
                }
                core.warn_on_drop_count += 1;
                core.metrics.num_lost_sdus += 1;
                return;
            }
            if core.warn_on_drop_count != 0 {
                if self.cfg.custom.warn_on_drop {
                    warn!(nof_sdus = core.warn_on_drop_count, "drop burst finished");
                } else {
                    info!(nof_sdus = core.warn_on_drop_count, "drop burst finished");
                }
                core.warn_on_drop_count = 0;
            }
        }

        // COUNT values must not repeat under one key. The upper layer is
        // notified once when the soft limit is crossed; at the hard limit the
        // entity refuses further SDUs.
        if core.st.tx_next >= self.cfg.custom.max_count.hard {
            if !core.max_count_overflow {
                error!(count = core.st.tx_next, "reached maximum count, refusing further TX");
                core.metrics.num_lost_sdus += 1;
                self.upper.on_protocol_failure();
                core.max_count_overflow = true;
            }
            return;
        }
        if core.st.tx_next >= self.cfg.custom.max_count.notify && !core.max_count_notified {
            warn!(count = core.st.tx_next, "approaching count wrap-around, notifying upper layer");
            self.upper.on_max_count_reached();
            core.max_count_notified = true;
        }

        let Some(token) = self.token_mngr.try_issue() else {
            debug!("dropping SDU, PDU processing is stopped");
            core.metrics.num_lost_sdus += 1;
            return;
        };

        let mut entry = TxWindowEntry {
            sdu: None,
            sdu_len: buf.len(),
            time_of_arrival,
            tick_point_of_arrival: None,
            pdu: None,
        };

        if let Some(discard) = self.cfg.discard_timer {
            if let DiscardTimer::Finite(duration) = discard {
                entry.tick_point_of_arrival = Some(self.discard_timer.now());
                if !self.discard_timer.is_running() {
                    self.discard_timer.set_duration(duration);
                    self.discard_timer.run();
                }
            }

            // AM bearers keep an SDU copy for data recovery.
            if self.is_am() {
                match buf.deep_copy() {
                    Ok(copy) => entry.sdu = Some(copy),
                    Err(_) => {
                        error!("unable to deep copy SDU");
                        core.metrics.num_lost_sdus += 1;
                        self.upper.on_protocol_failure();
                        return;
                    }
                }
            }
        }

        let count = core.st.tx_next;
        core.window.add_sdu(count, entry);
        debug!(count, "added to tx window");

        if pdu::write_data_pdu_header(&mut buf, self.sn(count), self.cfg.sn_size, self.is_drb())
            .is_err()
        {
            error!(count, "could not prepend PDU header, dropping SDU");
            core.window.remove_sdu(count);
            core.metrics.num_lost_sdus += 1;
            self.upper.on_protocol_failure();
            return;
        }

        let buf_info = TxBufferInfo {
            is_retx: false,
            retx_id: core.retransmit_id,
            count,
            buf,
            token,
        };

        // TX_NEXT advances before the crypto dispatch so the reordering step
        // sees the updated state.
        core.st.tx_next += 1;
        drop(core);

        let this = self.self_arc();
        if !self
            .crypto_executor
            .execute(Box::new(move || this.apply_security(buf_info)))
        {
            warn!("dropped PDU, crypto executor queue is full");
            self.state.lock().metrics.num_lost_sdus += 1;
        }
    }

    fn check_early_drop(&self, core: &TxCore, buf: &ByteBuffer) -> Option<EarlyDropReason> {
        if core.desired_buffer_size == 0 {
            return Some(EarlyDropReason::ZeroDbs);
        }
        let pdu_size = self.pdu_size(core, buf);
        let queued = core.window.pdu_bytes(self.hdr_len, core.integrity_enabled);
        if queued + pdu_size > core.desired_buffer_size as usize {
            return Some(EarlyDropReason::FullRlcQueue);
        }
        if core.st.tx_next.wrapping_sub(core.st.tx_next_ack) >= self.window_size - 1 {
            return Some(EarlyDropReason::FullWindow);
        }
        None
    }

    fn pdu_size(&self, core: &TxCore, sdu: &ByteBuffer) -> usize {
        self.hdr_len + sdu.len() + if core.integrity_enabled { SEC_MAC_LEN } else { 0 }
    }

    /// Runs on a crypto worker: applies security with the worker's engine and
    /// schedules the reordering step back on the UE-DL executor.
    fn apply_security(&self, buf_info: TxBufferInfo) {
        let TxBufferInfo {
            is_retx,
            retx_id,
            count,
            buf,
            token,
        } = buf_info;

        let result = self.apply_ciphering_and_integrity_protection(buf, count);

        match result {
            Err(sec_err) => {
                let upper = Arc::clone(&self.upper);
                let handle_failure = Box::new(move || {
                    match sec_err {
                        SecurityError::IntegrityFailure => {
                            warn!(count, "applying integrity failed, dropping PDU");
                        }
                        SecurityError::CipheringFailure => {
                            warn!(count, "applying ciphering failed, dropping PDU");
                        }
                        SecurityError::BufferFailure => {
                            error!(count, "buffer error while protecting PDU, dropping PDU");
                        }
                        SecurityError::EngineFailure => {
                            error!(count, "engine error while protecting PDU, dropping PDU");
                        }
                    }
                    upper.on_protocol_failure();
                });
                if !self.ue_dl_executor.execute(handle_failure) {
                    warn!(count, "dropped PDU with security error, UE executor queue is full");
                }
            }
            Ok(buf) => {
                debug!(count, "security applied");
                let pdu_info = TxBufferInfo {
                    is_retx,
                    retx_id,
                    count,
                    buf,
                    token,
                };
                let this = self.self_arc();
                if !self
                    .ue_dl_executor
                    .execute(Box::new(move || this.apply_reordering(pdu_info)))
                {
                    if self.cfg.custom.warn_on_drop {
                        warn!(count, "dropped PDU, UE executor queue is full");
                    } else {
                        debug!(count, "dropped PDU, UE executor queue is full");
                    }
                }
            }
        }
    }

    fn apply_ciphering_and_integrity_protection(
        &self,
        buf: ByteBuffer,
        count: u32,
    ) -> Result<ByteBuffer, SecurityError> {
        let worker_idx = current_worker_index();
        if worker_idx >= self.max_nof_crypto_workers {
            error!(
                worker_idx,
                max_nof_crypto_workers = self.max_nof_crypto_workers,
                "worker index exceeds number of crypto workers"
            );
            return Err(SecurityError::EngineFailure);
        }
        debug!(worker_idx, count, pdu_len = buf.len(), "using sec engine");

        let engines = self.engines.read();
        match &engines[worker_idx] {
            None => {
                // Security not configured yet: zero MAC-I on SRBs, error on
                // DRBs.
                if self.is_srb() {
                    let mut buf = buf;
                    buf.append_slice(&[0u8; SEC_MAC_LEN])
                        .map_err(|_| SecurityError::BufferFailure)?;
                    Ok(buf)
                } else {
                    error!(count, "empty engine for DRB bearer");
                    Err(SecurityError::EngineFailure)
                }
            }
            Some(engine) => engine.encrypt_and_protect_integrity(buf, self.hdr_len, count),
        }
    }

    /// Runs on the UE-DL executor: stores the protected PDU and releases all
    /// in-order PDUs to the lower layer.
    fn apply_reordering(&self, pdu_info: TxBufferInfo) {
        if self.stopped.load(Ordering::SeqCst) {
            debug!("dropping protected PDU, entity is stopped");
            return;
        }
        let mut core = self.state.lock();

        // Stale PDU from before a retransmission rolled the generation.
        if pdu_info.retx_id != core.retransmit_id {
            debug!(
                count = pdu_info.count,
                old_retx_id = pdu_info.retx_id,
                new_retx_id = core.retransmit_id,
                "dropping PDU, out of date due to retransmissions"
            );
            return;
        }
        if pdu_info.count < core.st.tx_next_ack {
            warn!(count = pdu_info.count, "dropping PDU, COUNT no longer inside TX window");
            return;
        }
        if pdu_info.count < core.st.tx_trans {
            error!(
                count = pdu_info.count,
                "dropping PDU, transmission already notified for this COUNT"
            );
            return;
        }
        let Some(entry) = core.window.get_mut(pdu_info.count) else {
            error!(count = pdu_info.count, "dropping PDU, SDU does not exist in TX window");
            return;
        };
        entry.pdu = Some(pdu_info.buf);
        if pdu_info.count != core.st.tx_trans_crypto {
            debug!(count = pdu_info.count, "buffered PDU, awaiting crypto reordering");
        }

        self.deliver_consecutive_pdus(&mut core, pdu_info.is_retx);

        if self.crypto_reordering_timer.is_running()
            && core.st.tx_trans_crypto >= core.st.tx_reord_crypto
        {
            self.crypto_reordering_timer.stop();
            debug!("stopped crypto reordering timer");
        }
        if !self.crypto_reordering_timer.is_running() && core.st.tx_trans_crypto < core.st.tx_next
        {
            core.st.tx_reord_crypto = core.st.tx_next;
            self.crypto_reordering_timer.run();
            debug!("started crypto reordering timer");
        }
    }

    /// Releases PDUs in ascending COUNT starting at TX_TRANS_CRYPTO until the
    /// first missing protected PDU.
    fn deliver_consecutive_pdus(&self, core: &mut TxCore, is_retx: bool) {
        let mut count = core.st.tx_trans_crypto;
        while count < core.st.tx_next {
            let Some((pdu, _toa)) = core
                .window
                .get_mut(count)
                .and_then(|e| e.pdu.take().map(|p| (p, e.time_of_arrival)))
            else {
                break;
            };
            self.write_data_pdu_to_lower_layers(core, pdu, count, is_retx);
            core.st.tx_trans_crypto = count + 1;
            // Test mode synthesizes the transmit notification inline.
            if self.cfg.custom.test_mode {
                let sn = self.sn(count);
                self.handle_transmit_notification_locked(core, sn, false);
            }
            count += 1;
        }
    }

    fn write_data_pdu_to_lower_layers(
        &self,
        core: &mut TxCore,
        pdu: ByteBuffer,
        count: u32,
        is_retx: bool,
    ) {
        info!(
            pdu_len = pdu.len(),
            sn = self.sn(count),
            count,
            is_retx,
            "TX PDU type=data"
        );
        core.metrics.num_pdus += 1;
        core.metrics.num_pdu_bytes += pdu.len() as u64;
        self.lower.on_new_pdu(pdu, is_retx);
    }

    fn write_control_pdu_to_lower(&self, buf: ByteBuffer) {
        info!(pdu_len = buf.len(), "TX PDU type=ctrl");
        {
            let mut core = self.state.lock();
            core.metrics.num_pdus += 1;
            core.metrics.num_pdu_bytes += buf.len() as u64;
        }
        self.lower.on_new_pdu(buf, false);
    }

    fn reestablish(&self, sec_cfg: Sec128AsConfig) {
        let mut core = self.state.lock();
        debug!(st = ?core.st, "reestablishing PDCP TX");
        // SRBs and UM DRBs restart from a clean state; UM PDUs cannot be
        // retransmitted and RLC has already discarded them.
        if self.is_srb() || self.is_um() {
            self.reset_locked(&mut core);
        }
        let integrity_enabled = core.integrity_enabled;
        let ciphering_enabled = core.ciphering_enabled;
        self.configure_security_locked(&mut core, sec_cfg, integrity_enabled, ciphering_enabled);
        if self.is_am() {
            self.retransmit_all_pdus_locked(&mut core);
        }
        info!(st = ?core.st, "reestablished PDCP TX");
    }

    fn reset_locked(&self, core: &mut TxCore) {
        core.st = PdcpTxState::default();
        core.window.clear();
        debug!("entity was reset");
    }

    fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            let mut core = self.state.lock();
            core.window.clear();
            if self.cfg.discard_timer.is_some() {
                self.discard_timer.stop();
            }
            self.crypto_reordering_timer.stop();
            self.token_mngr.stop();
            debug!("stopped PDCP TX entity");
        }
    }

    fn configure_security_locked(
        &self,
        core: &mut TxCore,
        sec_cfg: Sec128AsConfig,
        integrity_enabled: bool,
        ciphering_enabled: bool,
    ) {
        let domain_ok = (self.is_srb() && sec_cfg.domain == SecDomain::Rrc)
            || (self.is_drb() && sec_cfg.domain == SecDomain::Up);
        if !domain_ok {
            error!(domain = ?sec_cfg.domain, "invalid security domain for bearer type");
        }
        // NIA0 is only allowed on SRBs in limited service mode, where NEA0 is
        // used as well (TS 38.331 Sec. 5.3.1.2).
        if sec_cfg.integ_algo == Some(nr_security::IntegrityAlgorithm::Nia0)
            && (self.is_drb()
                || sec_cfg.cipher_algo != nr_security::CipheringAlgorithm::Nea0)
        {
            error!("integrity algorithm NIA0 is only permitted for SRBs configured with NEA0");
        }

        if integrity_enabled {
            if sec_cfg.k_128_int.is_none() {
                error!("cannot enable integrity protection: integrity key is not configured");
                return;
            }
            if sec_cfg.integ_algo.is_none() {
                error!("cannot enable integrity protection: integrity algorithm is not configured");
                return;
            }
        } else if self.is_srb() {
            error!("integrity protection cannot be disabled for SRBs");
        }
        core.integrity_enabled = integrity_enabled;
        core.ciphering_enabled = ciphering_enabled;

        let mut pool = self.engines.write();
        pool.clear();
        for _ in 0..self.max_nof_crypto_workers {
            pool.push(Some(SecurityEngine::new(
                &sec_cfg,
                self.bearer_id,
                self.cfg.direction,
                integrity_enabled,
                ciphering_enabled,
            )));
        }
        info!(
            integ_algo = ?sec_cfg.integ_algo,
            cipher_algo = ?sec_cfg.cipher_algo,
            integrity_enabled,
            ciphering_enabled,
            domain = ?sec_cfg.domain,
            "security configured"
        );
    }

    fn retransmit_all_pdus_locked(&self, core: &mut TxCore) {
        if self.cfg.discard_timer.is_none() {
            debug!("cannot retransmit, no discard timer configured");
            return;
        }
        if !self.is_am() {
            error!("cannot retransmit, not an AM bearer");
            return;
        }

        // Rewind transmission progress; in-flight PDUs are invalidated by the
        // new retransmission generation.
        core.st.tx_trans = core.st.tx_next_ack;
        core.st.tx_trans_crypto = core.st.tx_next_ack;
        core.retransmit_id += 1;

        for count in core.st.tx_next_ack..core.st.tx_next {
            if !core.window.has_sn(count) {
                continue;
            }
            let sdu_copy = core
                .window
                .get(count)
                .and_then(|e| e.sdu.as_ref())
                .map(|sdu| sdu.deep_copy());
            let mut buf = match sdu_copy {
                Some(Ok(buf)) => buf,
                Some(Err(_)) | None => {
                    error!(count, "could not deep copy SDU for retransmission");
                    self.upper.on_protocol_failure();
                    return;
                }
            };

            if pdu::write_data_pdu_header(&mut buf, self.sn(count), self.cfg.sn_size, self.is_drb())
                .is_err()
            {
                error!(count, "could not prepend PDU header for retransmission");
                self.upper.on_protocol_failure();
                return;
            }

            let Some(token) = self.token_mngr.try_issue() else {
                debug!(count, "dropping retransmission, PDU processing is stopped");
                return;
            };
            let buf_info = TxBufferInfo {
                is_retx: true,
                retx_id: core.retransmit_id,
                count,
                buf,
                token,
            };
            let this = self.self_arc();
            if !self
                .crypto_executor
                .execute(Box::new(move || this.apply_security(buf_info)))
            {
                warn!(count, "dropped PDU, crypto executor queue is full");
            }
        }
    }

    fn handle_transmit_notification_locked(&self, core: &mut TxCore, notif_sn: u32, is_retx: bool) {
        debug!(notif_sn, is_retx, "handling transmit notification");
        if notif_sn >= self.cfg.sn_size.cardinality() {
            error!(notif_sn, "invalid transmit notification, SN exceeds sn_size");
            return;
        }
        let notif_count = self.notification_count_estimation(core, notif_sn);
        if notif_count >= core.st.tx_trans_crypto {
            error!(
                notif_sn,
                notif_count, "invalid notification SN, notif_count is larger than pending TXes"
            );
            return;
        }
        if notif_count < core.st.tx_trans {
            info!(notif_sn, notif_count, is_retx, "invalid notification SN, notif_count too low");
            return;
        }
        if notif_count >= core.st.tx_next {
            error!(notif_sn, notif_count, is_retx, "invalid notification SN, notif_count too high");
            return;
        }
        core.st.tx_trans = notif_count + 1;
        debug!(st = ?core.st, "updated tx_trans");

        if self.cfg.discard_timer.is_none() {
            return;
        }
        if self.is_um() {
            self.stop_discard_timer_locked(core, notif_count);
        }
    }

    fn handle_delivery_notification_locked(&self, core: &mut TxCore, notif_sn: u32, is_retx: bool) {
        debug!(notif_sn, is_retx, "handling delivery notification");
        if notif_sn >= self.cfg.sn_size.cardinality() {
            error!(notif_sn, "invalid delivery notification, SN exceeds sn_size");
            return;
        }
        let notif_count = self.notification_count_estimation(core, notif_sn);
        if notif_count >= core.st.tx_next {
            error!(notif_count, is_retx, "got delivery notification for invalid COUNT");
            return;
        }
        if self.cfg.discard_timer.is_none() {
            return;
        }
        if self.is_am() {
            self.stop_discard_timer_locked(core, notif_count);
        } else {
            error!(notif_sn, is_retx, "ignored unexpected PDU delivery notification on UM bearer");
        }
    }

    /// COUNT estimation for notification SNs, anchored at the lower edge of
    /// the TX window (TX_NEXT_ACK with a discard timer, TX_TRANS otherwise).
    fn notification_count_estimation(&self, core: &TxCore, notification_sn: u32) -> u32 {
        let tx_lower = if self.cfg.discard_timer.is_some() {
            core.st.tx_next_ack
        } else {
            core.st.tx_trans
        };
        let sn_lower = self.sn(tx_lower);
        let hfn_lower = self.hfn(tx_lower);
        let notification_hfn = if (notification_sn as i64) < sn_lower as i64 - self.window_size as i64
        {
            hfn_lower.wrapping_add(1)
        } else if notification_sn >= sn_lower + self.window_size {
            hfn_lower.wrapping_sub(1)
        } else {
            hfn_lower
        };
        notification_hfn.wrapping_shl(self.sn_bits) | notification_sn
    }

    /// Releases discard slots up to `highest_count` and re-arms the timer for
    /// the new oldest SDU.
    fn stop_discard_timer_locked(&self, core: &mut TxCore, highest_count: u32) {
        let Some(discard) = self.cfg.discard_timer else {
            debug!(highest_count, "cannot stop discard timers, no discard timer configured");
            return;
        };
        if highest_count < core.st.tx_next_ack || highest_count >= core.st.tx_next {
            // The notification can arrive after the discard timer has expired.
            debug!(highest_count, "cannot stop discard timers, COUNT outside tx_window");
            return;
        }
        if !core.window.has_sn(core.st.tx_next_ack) {
            error!(
                highest_count,
                st = ?core.st,
                "trying to stop discard timers, but TX_NEXT_ACK not in TX window"
            );
            return;
        }
        debug!(highest_count, "stopping discard timers");

        self.discard_timer.stop();
        while core.st.tx_next_ack <= highest_count {
            if core.window.has_sn(core.st.tx_next_ack) {
                core.window.remove_sdu(core.st.tx_next_ack);
                debug!(count = core.st.tx_next_ack, "stopped discard timer");
            }
            core.st.tx_next_ack += 1;
        }
        core.st.tx_trans = core.st.tx_trans.max(core.st.tx_next_ack);

        let DiscardTimer::Finite(duration) = discard else {
            return;
        };

        // There are still old SDUs; restart the timer for the oldest one.
        while core.st.tx_next_ack != core.st.tx_next && !core.window.has_sn(core.st.tx_next_ack) {
            core.st.tx_next_ack += 1;
        }
        if core.st.tx_next_ack != core.st.tx_next {
            let Some(tick) = core
                .window
                .get(core.st.tx_next_ack)
                .and_then(|e| e.tick_point_of_arrival)
            else {
                error!(count = core.st.tx_next_ack, "cannot update discard timer, SDU without arrival time");
                return;
            };
            let now = self.discard_timer.now();
            let new_timeout = (tick + duration).saturating_duration_since(now);
            self.discard_timer.set_duration(new_timeout);
            self.discard_timer.run();
        }
    }

    /// Discards one SDU: the lower layer is told to drop anything not yet
    /// transmitted, and TX_NEXT_ACK advances over the hole.
    fn discard_pdu_locked(&self, core: &mut TxCore, count: u32) {
        if self.cfg.discard_timer.is_none() {
            debug!(count, "cannot discard PDU, no discard timer configured");
            return;
        }
        if count < core.st.tx_next_ack || count >= core.st.tx_next {
            warn!(count, st = ?core.st, "cannot discard PDU, outside tx_window");
            return;
        }
        if !core.window.has_sn(count) {
            warn!(count, st = ?core.st, "cannot discard PDU, missing in tx_window");
            return;
        }
        debug!(count, "discarding PDU");

        self.lower.on_discard_pdu(self.sn(count));
        core.window.remove_sdu(count);

        while core.st.tx_next_ack < core.st.tx_next && !core.window.has_sn(core.st.tx_next_ack) {
            core.st.tx_next_ack += 1;
        }
        core.st.tx_trans = core.st.tx_trans.max(core.st.tx_next_ack);
    }

    fn on_discard_timer_expired(&self) {
        if self.stopped.load(Ordering::SeqCst) {
            debug!("discard timer expired after bearer was stopped");
            return;
        }
        let mut core = self.state.lock();
        debug!(st = ?core.st, "discard timer expired");
        core.metrics.num_discard_timeouts += 1;

        if !core.window.has_sn(core.st.tx_next_ack) {
            error!(st = ?core.st, "discard timer expired, but oldest PDU not in TX window");
            return;
        }
        let Some(oldest_tick) = core
            .window
            .get(core.st.tx_next_ack)
            .and_then(|e| e.tick_point_of_arrival)
        else {
            error!("discard timer expired for SDU without arrival time");
            return;
        };

        // Discard every SDU that shares the expired tick point; the first
        // newer SDU reprograms the timer with the tick delta.
        loop {
            let oldest = core.st.tx_next_ack;
            self.discard_pdu_locked(&mut core, oldest);
            if !core.window.has_sn(core.st.tx_next_ack) {
                debug!(st = ?core.st, "finished discard callback, no new PDUs");
                break;
            }
            let Some(tick) = core
                .window
                .get(core.st.tx_next_ack)
                .and_then(|e| e.tick_point_of_arrival)
            else {
                error!("cannot update discard timer for SDU without arrival time");
                break;
            };
            if tick != oldest_tick {
                let new_timeout = tick.saturating_duration_since(oldest_tick);
                debug!(?new_timeout, st = ?core.st, "finished discard callback, rearmed for newer PDUs");
                self.discard_timer.set_duration(new_timeout);
                self.discard_timer.run();
                break;
            }
        }
    }

    fn on_crypto_reordering_expired(&self) {
        if self.stopped.load(Ordering::SeqCst) {
            debug!("crypto reordering timer expired after bearer was stopped");
            return;
        }
        let mut core = self.state.lock();
        if self.cfg.custom.warn_on_drop {
            warn!(st = ?core.st, "crypto reordering timer expired");
        } else {
            debug!(st = ?core.st, "crypto reordering timer expired");
        }

        // Force-advance TX_TRANS_CRYPTO to TX_REORD_CRYPTO, releasing what
        // completed and dropping the holes.
        while core.st.tx_trans_crypto != core.st.tx_reord_crypto {
            let count = core.st.tx_trans_crypto;
            let pdu = core.window.get_mut(count).and_then(|e| e.pdu.take());
            if let Some(pdu) = pdu {
                self.write_data_pdu_to_lower_layers(&mut core, pdu, count, false);
            } else {
                debug!(count, "dropping SDU, crypto did not complete in time");
            }
            core.st.tx_trans_crypto += 1;
        }

        self.deliver_consecutive_pdus(&mut core, false);

        if core.st.tx_trans_crypto < core.st.tx_next {
            debug!(st = ?core.st, "restarting crypto reordering timer");
            core.st.tx_reord_crypto = core.st.tx_next;
            self.crypto_reordering_timer.run();
        }
    }
}
