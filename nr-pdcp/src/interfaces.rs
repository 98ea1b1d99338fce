//! Interfaces between the PDCP entities and their collaborators.

use nr_bytes::ByteBuffer;

/// Lower-layer consumer of protected PDUs (RLC side), invoked by TX.
pub trait PdcpTxLowerNotifier: Send + Sync {
    /// Hands off a protected PDU for transmission.
    fn on_new_pdu(&self, pdu: ByteBuffer, is_retx: bool);

    /// Requests the drop of an SDU that was not transmitted yet.
    fn on_discard_pdu(&self, sn: u32);
}

/// Control-plane signals raised by the TX entity.
pub trait PdcpTxUpperControlNotifier: Send + Sync {
    fn on_max_count_reached(&self);
    fn on_protocol_failure(&self);
}

/// Upper-layer consumer of delivered SDUs, invoked by RX.
pub trait PdcpRxUpperDataNotifier: Send + Sync {
    fn on_new_sdu(&self, sdu: ByteBuffer);
}

/// Control-plane signals raised by the RX entity.
pub trait PdcpRxUpperControlNotifier: Send + Sync {
    fn on_max_count_reached(&self);
    fn on_protocol_failure(&self);
    fn on_integrity_failure(&self);
}

/// Compiles a status report from the receiving side's window. Implemented by
/// the RX entity, consumed by TX when a report must be sent.
pub trait PdcpStatusProvider: Send + Sync {
    fn compile_status_report(&self) -> ByteBuffer;
}

/// Consumes a received status report. Implemented by the TX entity, invoked
/// from the RX control-PDU path.
pub trait PdcpStatusHandler: Send + Sync {
    fn on_status_report(&self, report: ByteBuffer);
}
