//! Key derivation per TS 33.220 Annex B and TS 33.501 Annex A, plus the
//! algorithm-selection policy applied when building an AS security context.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::types::{
    CipheringAlgorithm, IntegrityAlgorithm, PreferredCipheringAlgorithms,
    PreferredIntegrityAlgorithms, Sec128AsConfig, Sec128Key, SecAsConfig, SecKey,
    SupportedAlgorithms,
};

type HmacSha256 = Hmac<Sha256>;

/// FC value for the algorithm key derivation functions (TS 33.501 A.8).
pub const FC_ALGORITHM_KEY_DERIVATION: u8 = 0x69;
/// FC value for the K_NG-RAN* derivation for a target gNB (TS 33.501 A.11).
pub const FC_K_NG_RAN_STAR_DERIVATION: u8 = 0x70;

/// Algorithm type distinguishers (TS 33.501 Table A.8-1).
pub const ALGO_DISTINGUISHER_RRC_ENC: u8 = 0x03;
pub const ALGO_DISTINGUISHER_RRC_INT: u8 = 0x04;
pub const ALGO_DISTINGUISHER_UP_ENC: u8 = 0x05;
pub const ALGO_DISTINGUISHER_UP_INT: u8 = 0x06;

/// Generic KDF of TS 33.220 Sec. B.2:
/// `HMAC-SHA-256(key, FC || P0 || L0 || P1 || L1)`.
pub fn generic_kdf(key_in: &SecKey, fc: u8, p0: &[u8], p1: &[u8]) -> SecKey {
    let mut s = Vec::with_capacity(1 + p0.len() + 2 + p1.len() + 2);
    s.push(fc);
    s.extend_from_slice(p0);
    s.extend_from_slice(&(p0.len() as u16).to_be_bytes());
    s.extend_from_slice(p1);
    s.extend_from_slice(&(p1.len() as u16).to_be_bytes());

    let mut mac = HmacSha256::new_from_slice(key_in).expect("HMAC accepts any key length");
    mac.update(&s);
    let digest = mac.finalize().into_bytes();

    let mut key_out = SecKey::default();
    key_out.copy_from_slice(&digest);
    key_out
}

/// Derives (K_RRC_enc, K_RRC_int) from K_gNB (TS 33.501 A.8).
pub fn generate_k_rrc(
    k_gnb: &SecKey,
    cipher_algo: CipheringAlgorithm,
    integ_algo: IntegrityAlgorithm,
) -> (SecKey, SecKey) {
    let k_rrc_enc = generic_kdf(
        k_gnb,
        FC_ALGORITHM_KEY_DERIVATION,
        &[ALGO_DISTINGUISHER_RRC_ENC],
        &[cipher_algo.to_id()],
    );
    let k_rrc_int = generic_kdf(
        k_gnb,
        FC_ALGORITHM_KEY_DERIVATION,
        &[ALGO_DISTINGUISHER_RRC_INT],
        &[integ_algo.to_id()],
    );
    (k_rrc_enc, k_rrc_int)
}

/// Derives (K_UP_enc, K_UP_int) from K_gNB (TS 33.501 A.8).
pub fn generate_k_up(
    k_gnb: &SecKey,
    cipher_algo: CipheringAlgorithm,
    integ_algo: IntegrityAlgorithm,
) -> (SecKey, SecKey) {
    let k_up_enc = generic_kdf(
        k_gnb,
        FC_ALGORITHM_KEY_DERIVATION,
        &[ALGO_DISTINGUISHER_UP_ENC],
        &[cipher_algo.to_id()],
    );
    let k_up_int = generic_kdf(
        k_gnb,
        FC_ALGORITHM_KEY_DERIVATION,
        &[ALGO_DISTINGUISHER_UP_INT],
        &[integ_algo.to_id()],
    );
    (k_up_enc, k_up_int)
}

/// K_NG-RAN* derivation for the target cell (TS 33.501 A.11).
/// P0 is the target PCI, P1 the target SSB ARFCN (24 bits).
pub fn generate_k_ng_ran_star(k: &SecKey, target_pci: u16, target_ssb_arfcn: u32) -> SecKey {
    let p0 = target_pci.to_be_bytes();
    let p1 = [
        ((target_ssb_arfcn >> 16) & 0xff) as u8,
        ((target_ssb_arfcn >> 8) & 0xff) as u8,
        (target_ssb_arfcn & 0xff) as u8,
    ];
    generic_kdf(k, FC_K_NG_RAN_STAR_DERIVATION, &p0, &p1)
}

/// Truncates a 256-bit key to the 128-bit key of the 128-bit algorithms,
/// keeping the least significant bytes (TS 33.501 A.8).
pub fn truncate_key(key_in: &SecKey) -> Sec128Key {
    let mut out = Sec128Key::default();
    out.copy_from_slice(&key_in[16..32]);
    out
}

/// Truncates the 256-bit keys of an AS configuration.
pub fn truncate_config(cfg: &SecAsConfig) -> Sec128AsConfig {
    Sec128AsConfig {
        domain: cfg.domain,
        k_128_int: cfg.k_int.as_ref().map(truncate_key),
        k_128_enc: truncate_key(&cfg.k_enc),
        integ_algo: cfg.integ_algo,
        cipher_algo: cfg.cipher_algo,
    }
}

fn integrity_supported(algo: IntegrityAlgorithm, supported: &SupportedAlgorithms) -> bool {
    match algo {
        IntegrityAlgorithm::Nia0 => true,
        IntegrityAlgorithm::Nia1 => supported[0],
        IntegrityAlgorithm::Nia2 => supported[1],
        IntegrityAlgorithm::Nia3 => supported[2],
    }
}

fn ciphering_supported(algo: CipheringAlgorithm, supported: &SupportedAlgorithms) -> bool {
    match algo {
        CipheringAlgorithm::Nea0 => true,
        CipheringAlgorithm::Nea1 => supported[0],
        CipheringAlgorithm::Nea2 => supported[1],
        CipheringAlgorithm::Nea3 => supported[2],
    }
}

/// Picks the first algorithm of each preference list that the peer supports.
/// A selection that would pair NIA0 with a real cipher is rejected: NIA0 is
/// only allowed in limited service mode where NEA0 is used as well.
pub fn select_algorithms(
    pref_integ: &PreferredIntegrityAlgorithms,
    pref_cipher: &PreferredCipheringAlgorithms,
    supp_integ: &SupportedAlgorithms,
    supp_cipher: &SupportedAlgorithms,
) -> Option<(IntegrityAlgorithm, CipheringAlgorithm)> {
    let integ = pref_integ
        .iter()
        .copied()
        .find(|a| integrity_supported(*a, supp_integ))?;
    let cipher = pref_cipher
        .iter()
        .copied()
        .find(|a| ciphering_supported(*a, supp_cipher))?;
    if integ == IntegrityAlgorithm::Nia0 && cipher != CipheringAlgorithm::Nea0 {
        return None;
    }
    Some((integ, cipher))
}
