//! PDCP receiving entity (TS 38.323 Sec. 5.2.2).
//!
//! Incoming PDUs are COUNT-estimated against RX_DELIV, deciphered and
//! integrity-checked on the crypto worker pool, then reinserted on the UE-UL
//! executor where the reordering window restores in-order delivery to the
//! upper layer. t-Reordering bounds how long a missing COUNT can stall
//! delivery.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use nr_bytes::ByteBuffer;
use nr_security::{Sec128AsConfig, SecDomain, SecurityEngine, SecurityError, SEC_MAC_LEN};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::config::{validate_common, PdcpConfigError, PdcpRxConfig, RbType, RlcMode, TReordering};
use crate::exec::{current_worker_index, TaskExecutor};
use crate::interfaces::{
    PdcpRxUpperControlNotifier, PdcpRxUpperDataNotifier, PdcpStatusHandler, PdcpStatusProvider,
};
use crate::pdu;
use crate::timer::{TimerFactory, UniqueTimer};
use crate::token::{CryptoToken, CryptoTokenManager, EventFlag};
use crate::window::SnWindow;

/// RX state variables (TS 38.323 Sec. 7.1).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PdcpRxState {
    /// One past the highest COUNT received so far.
    pub rx_next: u32,
    /// Next COUNT to deliver in order.
    pub rx_deliv: u32,
    /// Snapshot of RX_NEXT when t-Reordering was armed.
    pub rx_reord: u32,
}

/// RX-side counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PdcpRxMetrics {
    pub num_pdus: u64,
    pub num_pdu_bytes: u64,
    pub num_data_pdus: u64,
    pub num_sdus: u64,
    pub num_sdu_bytes: u64,
    pub num_dropped_pdus: u64,
    pub num_integrity_failed_pdus: u64,
    pub num_integrity_verified_pdus: u64,
    pub num_t_reordering_timeouts: u64,
}

struct RxSduInfo {
    buf: ByteBuffer,
    #[allow(dead_code)]
    time_of_arrival: Instant,
}

struct RxPduInfo {
    buf: ByteBuffer,
    count: u32,
    time_of_arrival: Instant,
    #[allow(dead_code)]
    token: CryptoToken,
}

struct RxCore {
    st: PdcpRxState,
    window: SnWindow<RxSduInfo>,
    integrity_enabled: bool,
    ciphering_enabled: bool,
    max_count_notified: bool,
    max_count_overflow: bool,
    metrics: PdcpRxMetrics,
}

struct PdcpRxInner {
    self_weak: Weak<PdcpRxInner>,
    cfg: PdcpRxConfig,
    bearer_id: u8,
    hdr_len: usize,
    sn_bits: u32,
    window_size: u32,
    upper_dn: Arc<dyn PdcpRxUpperDataNotifier>,
    upper_cn: Arc<dyn PdcpRxUpperControlNotifier>,
    ue_ul_executor: Arc<dyn TaskExecutor>,
    crypto_executor: Arc<dyn TaskExecutor>,
    max_nof_crypto_workers: usize,
    engines: RwLock<Vec<Option<SecurityEngine>>>,
    token_mngr: CryptoTokenManager,
    state: Mutex<RxCore>,
    stopped: AtomicBool,
    reordering_timer: UniqueTimer,
    status_handler: Mutex<Option<Arc<dyn PdcpStatusHandler>>>,
}

/// Handle to a PDCP RX entity. Clones share the entity.
#[derive(Clone)]
pub struct PdcpRx {
    inner: Arc<PdcpRxInner>,
}

impl PdcpRx {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cfg: PdcpRxConfig,
        bearer_id: u8,
        upper_dn: Arc<dyn PdcpRxUpperDataNotifier>,
        upper_cn: Arc<dyn PdcpRxUpperControlNotifier>,
        ue_ul_timer_factory: TimerFactory,
        ue_ul_executor: Arc<dyn TaskExecutor>,
        crypto_executor: Arc<dyn TaskExecutor>,
        max_nof_crypto_workers: usize,
    ) -> Result<Self, PdcpConfigError> {
        validate_common(cfg.rb_type, cfg.rlc_mode, cfg.sn_size, bearer_id)?;

        if cfg.rb_type == RbType::Drb && cfg.t_reordering == TReordering::Infinity {
            warn!("t-Reordering of infinity on DRBs is not advised, it can cause data stalls");
        }

        let mut engines = Vec::with_capacity(max_nof_crypto_workers);
        engines.resize_with(max_nof_crypto_workers, || None);

        let hdr_len = cfg.sn_size.header_len();
        let sn_bits = cfg.sn_size.bits();
        let window_size = cfg.sn_size.window_size();
        let window_capacity = cfg.sn_size.cardinality() as usize;
        let t_reordering = cfg.t_reordering;

        let inner = Arc::new_cyclic(|self_weak| PdcpRxInner {
            self_weak: self_weak.clone(),
            cfg,
            bearer_id,
            hdr_len,
            sn_bits,
            window_size,
            upper_dn,
            upper_cn,
            ue_ul_executor,
            crypto_executor,
            max_nof_crypto_workers,
            engines: RwLock::new(engines),
            token_mngr: CryptoTokenManager::new(),
            state: Mutex::new(RxCore {
                st: PdcpRxState::default(),
                window: SnWindow::new(window_capacity),
                integrity_enabled: false,
                ciphering_enabled: false,
                max_count_notified: false,
                max_count_overflow: false,
                metrics: PdcpRxMetrics::default(),
            }),
            stopped: AtomicBool::new(false),
            reordering_timer: ue_ul_timer_factory.create_timer(),
            status_handler: Mutex::new(None),
        });

        if let TReordering::Finite(duration) = t_reordering {
            let weak = inner.self_weak.clone();
            inner.reordering_timer.set(duration, move || {
                if let Some(inner) = weak.upgrade() {
                    inner.on_t_reordering_expired();
                }
            });
        }

        info!(bearer_id, "PDCP RX entity configured");
        Ok(Self { inner })
    }

    /// Entry point for PDUs arriving from the lower layer.
    pub fn handle_pdu(&self, buf: ByteBuffer) {
        self.inner.handle_pdu(buf);
    }

    /// Re-establishes the entity per TS 38.323 Sec. 5.1.2.
    pub fn reestablish(&self, sec_cfg: Sec128AsConfig) {
        self.inner.reestablish(sec_cfg);
    }

    pub fn stop(&self) {
        if !self.inner.stopped.swap(true, Ordering::SeqCst) {
            self.inner.reordering_timer.stop();
            self.inner.token_mngr.stop();
            debug!("stopped PDCP RX entity");
        }
    }

    /// Pauses new crypto dispatches without tearing down state.
    pub fn notify_pdu_processing_stopped(&self) {
        if !self.inner.stopped.load(Ordering::SeqCst) {
            self.inner.token_mngr.stop();
            debug!("stopped PDCP RX PDU processing");
        }
    }

    /// Resumes crypto dispatches after a pause.
    pub fn restart_pdu_processing(&self) {
        if !self.inner.stopped.load(Ordering::SeqCst) {
            self.inner.token_mngr.start();
            debug!("restarted PDCP RX PDU processing");
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

    pub fn set_status_handler(&self, handler: Arc<dyn PdcpStatusHandler>) {
        *self.inner.status_handler.lock() = Some(handler);
    }

    /// Builds a status report from the current window state.
    pub fn compile_status_report(&self) -> ByteBuffer {
        let core = self.inner.state.lock();
        pdu::build_status_report(core.st.rx_deliv, core.st.rx_next, |count| {
            core.window.has_sn(count)
        })
    }

    /// Snapshot of the state variables.
    pub fn state(&self) -> PdcpRxState {
        self.inner.state.lock().st
    }

    /// Snapshot of the RX counters.
    pub fn metrics(&self) -> PdcpRxMetrics {
        self.inner.state.lock().metrics
    }

    /// Number of SDUs currently buffered in the reordering window.
    pub fn window_len(&self) -> usize {
        self.inner.state.lock().window.len()
    }
}

impl PdcpStatusProvider for PdcpRx {
    fn compile_status_report(&self) -> ByteBuffer {
        PdcpRx::compile_status_report(self)
    }
}

impl PdcpRxInner {
    fn is_srb(&self) -> bool {
        self.cfg.rb_type == RbType::Srb
    }

    fn is_drb(&self) -> bool {
        self.cfg.rb_type == RbType::Drb
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

    fn self_arc(&self) -> Arc<PdcpRxInner> {
        self.self_weak.upgrade().expect("entity alive")
    }

    fn handle_pdu(&self, buf: ByteBuffer) {
        if self.stopped.load(Ordering::SeqCst) {
            info!("dropping PDU, entity is stopped");
            return;
        }
        let time_of_arrival = Instant::now();
        {
            let mut core = self.state.lock();
            core.metrics.num_pdus += 1;
            core.metrics.num_pdu_bytes += buf.len() as u64;
            if buf.is_empty() {
                core.metrics.num_dropped_pdus += 1;
                error!("dropping empty PDU");
                return;
            }
        }
        debug!(pdu_len = buf.len(), "RX PDU");

        if self.is_srb() || pdu::pdu_is_data(buf[0]) {
            self.handle_data_pdu(buf, time_of_arrival);
        } else {
            self.handle_control_pdu(buf);
        }
    }

    fn handle_data_pdu(&self, buf: ByteBuffer, time_of_arrival: Instant) {
        let mut core = self.state.lock();
        core.metrics.num_data_pdus += 1;

        if buf.len() <= self.hdr_len {
            core.metrics.num_dropped_pdus += 1;
            error!(pdu_len = buf.len(), hdr_len = self.hdr_len, "RX PDU too small");
            return;
        }
        let Some(rcvd_sn) = pdu::read_data_pdu_header(&buf, self.cfg.sn_size) else {
            core.metrics.num_dropped_pdus += 1;
            error!(pdu_len = buf.len(), "failed to extract SN");
            return;
        };

        /*
         * RCVD_COUNT estimation (TS 38.323 Sec. 5.2.2):
         * - SN below the window: HFN(RX_DELIV) + 1
         * - SN at or above the window: HFN(RX_DELIV) - 1
         * - otherwise: HFN(RX_DELIV)
         */
        let sn_deliv = self.sn(core.st.rx_deliv);
        let hfn_deliv = self.hfn(core.st.rx_deliv);
        let rcvd_hfn = if (rcvd_sn as i64) < sn_deliv as i64 - self.window_size as i64 {
            hfn_deliv.wrapping_add(1)
        } else if rcvd_sn >= sn_deliv + self.window_size {
            hfn_deliv.wrapping_sub(1)
        } else {
            hfn_deliv
        };
        let rcvd_count = rcvd_hfn.wrapping_shl(self.sn_bits) | rcvd_sn;

        info!(pdu_len = buf.len(), sn = rcvd_sn, count = rcvd_count, "RX PDU type=data");

        // COUNT values must not repeat under one key; notify once near the
        // limit and refuse traffic at the hard limit.
        if rcvd_count > self.cfg.custom.max_count.notify && !core.max_count_notified {
            warn!(count = rcvd_count, "approaching max_count, notifying upper layer");
            self.upper_cn.on_max_count_reached();
            core.max_count_notified = true;
        }
        if rcvd_count >= self.cfg.custom.max_count.hard {
            if !core.max_count_overflow {
                error!(count = rcvd_count, "reached max_count, refusing further RX");
                self.upper_cn.on_protocol_failure();
                core.max_count_overflow = true;
            }
            return;
        }

        let Some(token) = self.token_mngr.try_issue() else {
            debug!(count = rcvd_count, "dropping PDU, PDU processing is stopped");
            return;
        };
        drop(core);

        let pdu_info = RxPduInfo {
            buf,
            count: rcvd_count,
            time_of_arrival,
            token,
        };
        let this = self.self_arc();
        if !self
            .crypto_executor
            .execute(Box::new(move || this.apply_security(pdu_info)))
        {
            warn!(count = rcvd_count, "dropped PDU, crypto executor queue is full");
        }
    }

    /// Runs on a crypto worker: deciphers and verifies with the worker's
    /// engine, trims the header and schedules reordering on UE-UL.
    fn apply_security(&self, pdu_info: RxPduInfo) {
        let RxPduInfo {
            buf,
            count,
            time_of_arrival,
            token,
        } = pdu_info;

        let result = self.apply_deciphering_and_integrity_check(buf, count);

        match result {
            Err(sec_err) => {
                let upper_cn = Arc::clone(&self.upper_cn);
                let state_weak = self.self_weak.clone();
                let handle_failure = Box::new(move || {
                    // Token released once the failure is accounted for.
                    let _token = token;
                    match sec_err {
                        SecurityError::IntegrityFailure => {
                            warn!(count, "integrity failed, dropping PDU");
                            if let Some(inner) = state_weak.upgrade() {
                                inner.state.lock().metrics.num_integrity_failed_pdus += 1;
                            }
                            upper_cn.on_integrity_failure();
                        }
                        SecurityError::CipheringFailure => {
                            warn!(count, "deciphering failed, dropping PDU");
                            upper_cn.on_protocol_failure();
                        }
                        SecurityError::BufferFailure => {
                            error!(count, "buffer error while verifying PDU, dropping PDU");
                            upper_cn.on_protocol_failure();
                        }
                        SecurityError::EngineFailure => {
                            error!(count, "engine error while verifying PDU, dropping PDU");
                            upper_cn.on_protocol_failure();
                        }
                    }
                });
                if !self.ue_ul_executor.execute(handle_failure) {
                    warn!(count, "dropped PDU with security error, UE executor queue is full");
                }
            }
            Ok(mut buf) => {
                debug!(count, "security passed");
                // Integrity checked; the header can go.
                buf.trim_head(self.hdr_len);
                let pdu_info = RxPduInfo {
                    buf,
                    count,
                    time_of_arrival,
                    token,
                };
                let this = self.self_arc();
                if !self.ue_ul_executor.execute(Box::new(move || {
                    this.state.lock().metrics.num_integrity_verified_pdus += 1;
                    this.apply_reordering(pdu_info);
                })) {
                    warn!(count, "dropped PDU, UE executor queue is full");
                }
            }
        }
    }

    fn apply_deciphering_and_integrity_check(
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
                // Security not configured yet: pass-through for DRBs, trim the
                // zero MAC-I for SRBs.
                if self.is_srb() {
                    if buf.len() <= SEC_MAC_LEN {
                        warn!(count, "failed to trim MAC-I from PDU");
                        return Err(SecurityError::BufferFailure);
                    }
                    let mut buf = buf;
                    buf.trim_tail(SEC_MAC_LEN);
                    Ok(buf)
                } else {
                    Ok(buf)
                }
            }
            Some(engine) => engine.decrypt_and_verify_integrity(buf, self.hdr_len, count),
        }
    }

    /// Runs on the UE-UL executor: inserts into the reordering window,
    /// delivers in-order SDUs and manages t-Reordering.
    fn apply_reordering(&self, pdu_info: RxPduInfo) {
        let mut core = self.state.lock();
        let rcvd_count = pdu_info.count;

        // Stale, duplicate or wrapped-around COUNT.
        if rcvd_count < core.st.rx_deliv {
            debug!(count = rcvd_count, st = ?core.st, "out-of-order after timeout, duplicate or wrap-around");
            return;
        }
        if let Some(slot_count) = core.window.slot_count(rcvd_count) {
            if slot_count == rcvd_count {
                debug!(count = rcvd_count, "duplicate PDU dropped");
                return;
            }
            error!(old_count = slot_count, count = rcvd_count, "removing old PDU for new COUNT");
            core.window.remove_sn(slot_count);
        }

        core.window.add_sn(
            rcvd_count,
            RxSduInfo {
                buf: pdu_info.buf,
                time_of_arrival: pdu_info.time_of_arrival,
            },
        );

        if rcvd_count >= core.st.rx_next {
            core.st.rx_next = rcvd_count + 1;
        }

        if rcvd_count == core.st.rx_deliv {
            self.deliver_all_consecutive_counts(&mut core);
        }

        // Timer handling.
        if self.reordering_timer.is_running() && core.st.rx_deliv >= core.st.rx_reord {
            self.reordering_timer.stop();
            debug!("stopped t-Reordering");
        }
        match self.cfg.t_reordering {
            TReordering::Infinity => {}
            TReordering::Ms0 => {
                core.st.rx_reord = core.st.rx_next;
                self.t_reordering_expire_locked(&mut core);
            }
            TReordering::Finite(_) => {
                if !self.reordering_timer.is_running() && core.st.rx_deliv < core.st.rx_next {
                    core.st.rx_reord = core.st.rx_next;
                    self.reordering_timer.run();
                    debug!("started t-Reordering");
                }
            }
        }
    }

    fn handle_control_pdu(&self, buf: ByteBuffer) {
        let cpt = pdu::control_pdu_type(buf[0]);
        if cpt == pdu::CPT_STATUS_REPORT {
            let handler = self.status_handler.lock().clone();
            match handler {
                Some(handler) => handler.on_status_report(buf),
                None => warn!("received status report but no handler registered"),
            }
        } else {
            error!(cpt, "unsupported control PDU type");
        }
    }

    /// Delivers stored SDUs with consecutive COUNTs starting at RX_DELIV.
    fn deliver_all_consecutive_counts(&self, core: &mut RxCore) {
        while core.st.rx_deliv != core.st.rx_next {
            let Some(sdu_info) = core.window.remove_sn(core.st.rx_deliv) else {
                break;
            };
            info!(count = core.st.rx_deliv, "RX SDU");
            core.metrics.num_sdus += 1;
            core.metrics.num_sdu_bytes += sdu_info.buf.len() as u64;
            self.upper_dn.on_new_sdu(sdu_info.buf);
            core.st.rx_deliv = core.st.rx_deliv.wrapping_add(1);
        }
    }

    /// Delivers every stored SDU in ascending COUNT, regardless of holes.
    /// Used during UM re-establishment; state is reset by the caller.
    fn deliver_all_sdus(&self, core: &mut RxCore) {
        for count in core.st.rx_deliv..core.st.rx_next {
            if let Some(sdu_info) = core.window.remove_sn(count) {
                info!(count, "RX SDU");
                core.metrics.num_sdus += 1;
                core.metrics.num_sdu_bytes += sdu_info.buf.len() as u64;
                self.upper_dn.on_new_sdu(sdu_info.buf);
            }
        }
    }

    fn discard_all_sdus(&self, core: &mut RxCore) {
        while core.st.rx_deliv != core.st.rx_next {
            if core.window.remove_sn(core.st.rx_deliv).is_some() {
                debug!(count = core.st.rx_deliv, "discarded RX SDU");
            }
            core.st.rx_deliv = core.st.rx_deliv.wrapping_add(1);
        }
    }

    fn reestablish(&self, sec_cfg: Sec128AsConfig) {
        let mut core = self.state.lock();

        // SRBs drop everything that is still buffered.
        if self.is_srb() {
            self.discard_all_sdus(&mut core);
        }

        // SRBs and UM DRBs stop t-Reordering; UM DRBs flush their buffered
        // SDUs upward first, then restart from the initial state.
        if self.is_srb() || self.is_um() {
            if self.reordering_timer.is_running() {
                self.reordering_timer.stop();
            }
            if self.is_um() {
                self.deliver_all_sdus(&mut core);
            }
            core.st = PdcpRxState::default();
        }

        let integrity_enabled = core.integrity_enabled;
        let ciphering_enabled = core.ciphering_enabled;
        self.configure_security_locked(&mut core, sec_cfg, integrity_enabled, ciphering_enabled);
    }

    fn configure_security_locked(
        &self,
        core: &mut RxCore,
        sec_cfg: Sec128AsConfig,
        integrity_enabled: bool,
        ciphering_enabled: bool,
    ) {
        let domain_ok = (self.is_srb() && sec_cfg.domain == SecDomain::Rrc)
            || (self.is_drb() && sec_cfg.domain == SecDomain::Up);
        if !domain_ok {
            error!(domain = ?sec_cfg.domain, "invalid security domain for bearer type");
        }
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

    /// Delivers everything below RX_REORD, skipping holes, then drains the
    /// consecutive run at the new RX_DELIV.
    fn t_reordering_expire_locked(&self, core: &mut RxCore) {
        core.metrics.num_t_reordering_timeouts += 1;
        while core.st.rx_deliv != core.st.rx_reord {
            if let Some(sdu_info) = core.window.remove_sn(core.st.rx_deliv) {
                info!(count = core.st.rx_deliv, "RX SDU");
                core.metrics.num_sdus += 1;
                core.metrics.num_sdu_bytes += sdu_info.buf.len() as u64;
                self.upper_dn.on_new_sdu(sdu_info.buf);
            }
            core.st.rx_deliv = core.st.rx_deliv.wrapping_add(1);
        }

        self.deliver_all_consecutive_counts(core);

        if core.st.rx_deliv < core.st.rx_next {
            if self.cfg.t_reordering == TReordering::Ms0 {
                error!(st = ?core.st, "reordering timer expired after 0ms and rx_deliv < rx_next");
                return;
            }
            debug!(st = ?core.st, "updating rx_reord to rx_next");
            core.st.rx_reord = core.st.rx_next;
            self.reordering_timer.run();
        }
    }

    fn on_t_reordering_expired(&self) {
        if self.stopped.load(Ordering::SeqCst) {
            debug!("t-Reordering expired after bearer was stopped");
            return;
        }
        let mut core = self.state.lock();
        info!(st = ?core.st, "reordering timer expired");
        self.t_reordering_expire_locked(&mut core);
    }
}
