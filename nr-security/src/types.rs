use nr_bytes::BufferFailure;
use thiserror::Error;

/// MAC-I length in bytes.
pub const SEC_MAC_LEN: usize = 4;
/// Security key length in bytes.
pub const SEC_KEY_LEN: usize = 32;
/// Security key length in bytes for the 128-bit algorithms.
pub const SEC_128_KEY_LEN: usize = 16;

pub type SecMac = [u8; SEC_MAC_LEN];
pub type SecKey = [u8; SEC_KEY_LEN];
pub type Sec128Key = [u8; SEC_128_KEY_LEN];

/// NR ciphering algorithm identifiers (TS 38.331).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CipheringAlgorithm {
    Nea0 = 0,
    Nea1 = 1,
    Nea2 = 2,
    Nea3 = 3,
}

impl CipheringAlgorithm {
    pub fn to_id(self) -> u8 {
        self as u8
    }

    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            0 => Some(Self::Nea0),
            1 => Some(Self::Nea1),
            2 => Some(Self::Nea2),
            3 => Some(Self::Nea3),
            _ => None,
        }
    }
}

/// NR integrity algorithm identifiers (TS 38.331).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum IntegrityAlgorithm {
    Nia0 = 0,
    Nia1 = 1,
    Nia2 = 2,
    Nia3 = 3,
}

impl IntegrityAlgorithm {
    pub fn to_id(self) -> u8 {
        self as u8
    }

    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            0 => Some(Self::Nia0),
            1 => Some(Self::Nia1),
            2 => Some(Self::Nia2),
            3 => Some(Self::Nia3),
            _ => None,
        }
    }
}

/// Direction bit that enters the per-PDU IV.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SecurityDirection {
    Uplink = 0,
    Downlink = 1,
}

impl SecurityDirection {
    pub fn bit(self) -> u8 {
        self as u8
    }
}

/// Whether a key pair protects the control plane or the user plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecDomain {
    Rrc,
    Up,
}

/// AS security configuration with 128-bit keys, as delivered to a PDCP
/// entity. Integrity key and algorithm are optional per TS 38.463 Sec. 9.4.5.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sec128AsConfig {
    pub domain: SecDomain,
    pub k_128_int: Option<Sec128Key>,
    pub k_128_enc: Sec128Key,
    pub integ_algo: Option<IntegrityAlgorithm>,
    pub cipher_algo: CipheringAlgorithm,
}

/// AS security configuration with full 256-bit keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecAsConfig {
    pub domain: SecDomain,
    pub k_int: Option<SecKey>,
    pub k_enc: SecKey,
    pub integ_algo: Option<IntegrityAlgorithm>,
    pub cipher_algo: CipheringAlgorithm,
}

/// Preference-ordered algorithm lists used for selection.
pub type PreferredIntegrityAlgorithms = [IntegrityAlgorithm; 4];
pub type PreferredCipheringAlgorithms = [CipheringAlgorithm; 4];

/// Support flags for NxA1..NxA3. Support of NxA0 is implicit.
pub type SupportedAlgorithms = [bool; 3];

/// Failures raised by the security engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SecurityError {
    #[error("buffer failure")]
    BufferFailure,
    #[error("engine failure")]
    EngineFailure,
    #[error("integrity failure")]
    IntegrityFailure,
    #[error("ciphering failure")]
    CipheringFailure,
}

impl From<BufferFailure> for SecurityError {
    fn from(_: BufferFailure) -> Self {
        SecurityError::BufferFailure
    }
}
