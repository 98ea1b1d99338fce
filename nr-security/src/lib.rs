//! # NR Security
//!
//! The 3GPP AS security suite used by the PDCP layer: NEA1/NEA2/NEA3
//! ciphering, NIA1/NIA2/NIA3 integrity protection, the key-derivation
//! functions of TS 33.220 / TS 33.501, and the per-bearer engines that
//! apply them to PDUs.
//!
//! NEA2/NIA2 are built on the AES-128 block cipher from the `aes` crate
//! (CTR keystream via `ctr`, CMAC computed locally so sub-byte message
//! lengths are representable). SNOW-3G (NEA1/NIA1) and ZUC (NEA3/NIA3)
//! are implemented here, bit-exact against the published reference code.

pub mod engines;
pub mod kdf;
pub mod nea;
pub mod nia;
pub mod s3g;
pub mod zuc;

mod types;

pub use engines::{
    CipheringEngine, CipheringEngineGeneric, CipheringEngineNea2, IntegrityEngine,
    IntegrityEngineGeneric, SecurityEngine,
};
pub use types::{
    CipheringAlgorithm, IntegrityAlgorithm, PreferredCipheringAlgorithms,
    PreferredIntegrityAlgorithms, Sec128AsConfig, Sec128Key, SecAsConfig, SecDomain, SecKey,
    SecMac, SecurityDirection, SecurityError, SupportedAlgorithms, SEC_128_KEY_LEN, SEC_KEY_LEN,
    SEC_MAC_LEN,
};
