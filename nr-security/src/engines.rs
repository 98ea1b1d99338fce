//! Per-bearer ciphering and integrity engines.
//!
//! An engine is bound to a single (key, bearer, direction) tuple at
//! construction and is immutable afterwards. The PDCP entities keep one
//! [`SecurityEngine`] per crypto worker, so no engine is ever shared between
//! threads.

use nr_bytes::ByteBuffer;
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

use crate::nea::{apply_nea1, apply_nea2, apply_nea3};
use crate::nia::{security_nia1, security_nia2, security_nia3};
use crate::types::{
    CipheringAlgorithm, IntegrityAlgorithm, Sec128AsConfig, Sec128Key, SecMac, SecurityDirection,
    SecurityError, SEC_MAC_LEN,
};

pub trait CipheringEngine: Send + Sync {
    /// XORs the keystream over `buf[offset..]` in place.
    fn apply_ciphering(
        &self,
        buf: ByteBuffer,
        offset: usize,
        count: u32,
    ) -> Result<ByteBuffer, SecurityError>;
}

pub trait IntegrityEngine: Send + Sync {
    /// Appends the 4-byte MAC-I computed over the whole buffer.
    fn protect_integrity(&self, buf: ByteBuffer, count: u32) -> Result<ByteBuffer, SecurityError>;

    /// Splits the buffer into body and MAC-I, recomputes the MAC over the
    /// body and returns the body with the MAC trimmed on success.
    fn verify_integrity(&self, buf: ByteBuffer, count: u32) -> Result<ByteBuffer, SecurityError>;
}

/// Keystream-based ciphering for NEA0/NEA1/NEA3 (NEA0 is a no-op).
pub struct CipheringEngineGeneric {
    k_128_enc: Sec128Key,
    bearer_id: u8,
    direction: SecurityDirection,
    cipher_algo: CipheringAlgorithm,
}

impl CipheringEngineGeneric {
    pub fn new(
        k_128_enc: Sec128Key,
        bearer_id: u8,
        direction: SecurityDirection,
        cipher_algo: CipheringAlgorithm,
    ) -> Self {
        Self {
            k_128_enc,
            bearer_id,
            direction,
            cipher_algo,
        }
    }
}

impl CipheringEngine for CipheringEngineGeneric {
    fn apply_ciphering(
        &self,
        mut buf: ByteBuffer,
        offset: usize,
        count: u32,
    ) -> Result<ByteBuffer, SecurityError> {
        match self.cipher_algo {
            CipheringAlgorithm::Nea0 => {}
            CipheringAlgorithm::Nea1 => {
                apply_nea1(&self.k_128_enc, count, self.bearer_id, self.direction, &mut buf, offset);
            }
            CipheringAlgorithm::Nea2 => {
                apply_nea2(&self.k_128_enc, count, self.bearer_id, self.direction, &mut buf, offset);
            }
            CipheringAlgorithm::Nea3 => {
                apply_nea3(&self.k_128_enc, count, self.bearer_id, self.direction, &mut buf, offset);
            }
        }
        Ok(buf)
    }
}

/// AES-CTR ciphering specialized for NEA2: the keystream is applied to each
/// contiguous segment without per-byte calls.
pub struct CipheringEngineNea2 {
    k_128_enc: Sec128Key,
    bearer_id: u8,
    direction: SecurityDirection,
}

impl CipheringEngineNea2 {
    pub fn new(k_128_enc: Sec128Key, bearer_id: u8, direction: SecurityDirection) -> Self {
        Self {
            k_128_enc,
            bearer_id,
            direction,
        }
    }
}

impl CipheringEngine for CipheringEngineNea2 {
    fn apply_ciphering(
        &self,
        mut buf: ByteBuffer,
        offset: usize,
        count: u32,
    ) -> Result<ByteBuffer, SecurityError> {
        apply_nea2(&self.k_128_enc, count, self.bearer_id, self.direction, &mut buf, offset);
        Ok(buf)
    }
}

/// Integrity protection for any NIA algorithm.
pub struct IntegrityEngineGeneric {
    k_128_int: Sec128Key,
    bearer_id: u8,
    direction: SecurityDirection,
    integ_algo: IntegrityAlgorithm,
}

impl IntegrityEngineGeneric {
    pub fn new(
        k_128_int: Sec128Key,
        bearer_id: u8,
        direction: SecurityDirection,
        integ_algo: IntegrityAlgorithm,
    ) -> Self {
        Self {
            k_128_int,
            bearer_id,
            direction,
            integ_algo,
        }
    }

    fn mac(&self, msg: &[u8], count: u32) -> SecMac {
        let len_bits = msg.len() * 8;
        match self.integ_algo {
            // TS 33.501 Sec. D.1: NIA0 yields an all-zero MAC-I.
            IntegrityAlgorithm::Nia0 => [0; SEC_MAC_LEN],
            IntegrityAlgorithm::Nia1 => {
                security_nia1(&self.k_128_int, count, self.bearer_id, self.direction, msg, len_bits)
            }
            IntegrityAlgorithm::Nia2 => {
                security_nia2(&self.k_128_int, count, self.bearer_id, self.direction, msg, len_bits)
            }
            IntegrityAlgorithm::Nia3 => {
                security_nia3(&self.k_128_int, count, self.bearer_id, self.direction, msg, len_bits)
            }
        }
    }
}

impl IntegrityEngine for IntegrityEngineGeneric {
    fn protect_integrity(
        &self,
        mut buf: ByteBuffer,
        count: u32,
    ) -> Result<ByteBuffer, SecurityError> {
        let msg = buf.to_vec();
        let mac = self.mac(&msg, count);
        debug!(count, mac = %hex::encode(mac), "integrity protection applied");
        buf.append_slice(&mac)?;
        Ok(buf)
    }

    fn verify_integrity(&self, mut buf: ByteBuffer, count: u32) -> Result<ByteBuffer, SecurityError> {
        if buf.len() <= SEC_MAC_LEN {
            return Err(SecurityError::IntegrityFailure);
        }
        let body_len = buf.len() - SEC_MAC_LEN;
        let msg = buf.view(0, body_len).to_vec();
        let mac_rx: Vec<u8> = buf.view(body_len, SEC_MAC_LEN).to_vec();
        let mac = self.mac(&msg, count);

        if !bool::from(mac.ct_eq(&mac_rx)) {
            warn!(
                count,
                mac_received = %hex::encode(&mac_rx),
                mac_expected = %hex::encode(mac),
                "integrity check failed"
            );
            return Err(SecurityError::IntegrityFailure);
        }
        debug!(count, mac = %hex::encode(mac), "integrity check passed");
        buf.trim_tail(SEC_MAC_LEN);
        Ok(buf)
    }
}

/// Combined TX/RX security engine: integrity protection before ciphering on
/// the way out, deciphering before verification on the way in. Ciphering
/// starts at `offset` (the PDU header stays in clear); the MAC-I is part of
/// the ciphered region.
pub struct SecurityEngine {
    integ: Option<Box<dyn IntegrityEngine>>,
    cipher: Option<Box<dyn CipheringEngine>>,
}

impl SecurityEngine {
    pub fn new(
        sec_cfg: &Sec128AsConfig,
        bearer_id: u8,
        direction: SecurityDirection,
        integrity_enabled: bool,
        ciphering_enabled: bool,
    ) -> Self {
        let mut integ: Option<Box<dyn IntegrityEngine>> = None;
        if integrity_enabled {
            if let (Some(algo), Some(key)) = (sec_cfg.integ_algo, sec_cfg.k_128_int) {
                integ = Some(Box::new(IntegrityEngineGeneric::new(
                    key, bearer_id, direction, algo,
                )));
            }
        }
        let cipher: Option<Box<dyn CipheringEngine>> = if ciphering_enabled {
            if sec_cfg.cipher_algo == CipheringAlgorithm::Nea2 {
                Some(Box::new(CipheringEngineNea2::new(
                    sec_cfg.k_128_enc,
                    bearer_id,
                    direction,
                )))
            } else {
                Some(Box::new(CipheringEngineGeneric::new(
                    sec_cfg.k_128_enc,
                    bearer_id,
                    direction,
                    sec_cfg.cipher_algo,
                )))
            }
        } else {
            None
        };
        Self { integ, cipher }
    }

    pub fn encrypt_and_protect_integrity(
        &self,
        buf: ByteBuffer,
        offset: usize,
        count: u32,
    ) -> Result<ByteBuffer, SecurityError> {
        let mut buf = buf;
        if let Some(integ) = &self.integ {
            buf = integ.protect_integrity(buf, count)?;
        }
        if let Some(cipher) = &self.cipher {
            buf = cipher.apply_ciphering(buf, offset, count)?;
        }
        Ok(buf)
    }

    pub fn decrypt_and_verify_integrity(
        &self,
        buf: ByteBuffer,
        offset: usize,
        count: u32,
    ) -> Result<ByteBuffer, SecurityError> {
        let mut buf = buf;
        if let Some(cipher) = &self.cipher {
            buf = cipher.apply_ciphering(buf, offset, count)?;
        }
        if let Some(integ) = &self.integ {
            buf = integ.verify_integrity(buf, count)?;
        }
        Ok(buf)
    }
}
