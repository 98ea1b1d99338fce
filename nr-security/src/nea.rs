//! NEA ciphering algorithms: keystream generation and in-place XOR.
//!
//! Two entry points per algorithm: a contiguous-slice form that honors a
//! bit-exact message length (conformance test vectors are not always
//! byte-aligned), and a segmented form used by the engines that ciphers a
//! [`ByteBuffer`] suffix in place.

use aes::Aes128;
use ctr::cipher::{KeyIvInit, StreamCipher};
use ctr::Ctr128BE;
use nr_bytes::ByteBuffer;

use crate::s3g;
use crate::types::{Sec128Key, SecurityDirection};
use crate::zuc::{eea3_iv, Zuc};

type Aes128Ctr = Ctr128BE<Aes128>;

/// Zeroes the bits of `byte` beyond `len_bits % 8` occupied bits.
pub fn zero_tailing_bits(byte: &mut u8, len_bits: usize) {
    let bits = (8 - (len_bits & 0x7)) & 0x7;
    *byte &= 0xffu8 << bits;
}

fn keystream_byte(ks: &[u32], i: usize) -> u8 {
    ((ks[i / 4] >> (8 * (3 - (i % 4)))) & 0xff) as u8
}

fn xor_keystream_words(buf: &mut ByteBuffer, offset: usize, ks: &[u32]) {
    let mut pos = 0usize;
    let mut ks_i = 0usize;
    for seg in buf.segments_mut() {
        for b in seg.iter_mut() {
            if pos >= offset {
                *b ^= keystream_byte(ks, ks_i);
                ks_i += 1;
            }
            pos += 1;
        }
    }
}

fn nea2_nonce(count: u32, bearer: u8, direction: SecurityDirection) -> [u8; 16] {
    let mut nonce = [0u8; 16];
    nonce[0..4].copy_from_slice(&count.to_be_bytes());
    nonce[4] = ((bearer & 0x1f) << 3) | ((direction.bit() & 0x01) << 2);
    nonce
}

/// SNOW-3G ciphering over a contiguous message of `len_bits` bits.
pub fn security_nea1(
    key: &Sec128Key,
    count: u32,
    bearer: u8,
    direction: SecurityDirection,
    msg: &mut [u8],
    len_bits: usize,
) {
    let nof_bytes = len_bits.div_ceil(8);
    if nof_bytes > msg.len() {
        return;
    }
    let ks = s3g::f8_keystream(key, count, bearer, direction.bit(), len_bits.div_ceil(32));
    for (i, b) in msg.iter_mut().take(nof_bytes).enumerate() {
        *b ^= keystream_byte(&ks, i);
    }
    zero_tailing_bits(&mut msg[nof_bytes - 1], len_bits);
}

/// AES-128-CTR ciphering over a contiguous message of `len_bits` bits.
pub fn security_nea2(
    key: &Sec128Key,
    count: u32,
    bearer: u8,
    direction: SecurityDirection,
    msg: &mut [u8],
    len_bits: usize,
) {
    let nof_bytes = len_bits.div_ceil(8);
    if nof_bytes > msg.len() {
        return;
    }
    let nonce = nea2_nonce(count, bearer, direction);
    let mut cipher = Aes128Ctr::new(&(*key).into(), &nonce.into());
    cipher.apply_keystream(&mut msg[..nof_bytes]);
    zero_tailing_bits(&mut msg[nof_bytes - 1], len_bits);
}

/// ZUC ciphering over a contiguous message of `len_bits` bits.
pub fn security_nea3(
    key: &Sec128Key,
    count: u32,
    bearer: u8,
    direction: SecurityDirection,
    msg: &mut [u8],
    len_bits: usize,
) {
    let nof_bytes = len_bits.div_ceil(8);
    if nof_bytes > msg.len() {
        return;
    }
    let iv = eea3_iv(count, bearer, direction.bit());
    let ks = Zuc::new(key, &iv).generate_keystream(len_bits.div_ceil(32));
    for (i, b) in msg.iter_mut().take(nof_bytes).enumerate() {
        *b ^= keystream_byte(&ks, i);
    }
    zero_tailing_bits(&mut msg[nof_bytes - 1], len_bits);
}

/// SNOW-3G ciphering of `buf[offset..]` in place, segment by segment.
pub fn apply_nea1(
    key: &Sec128Key,
    count: u32,
    bearer: u8,
    direction: SecurityDirection,
    buf: &mut ByteBuffer,
    offset: usize,
) {
    let len = buf.len().saturating_sub(offset);
    if len == 0 {
        return;
    }
    let ks = s3g::f8_keystream(key, count, bearer, direction.bit(), len.div_ceil(4));
    xor_keystream_words(buf, offset, &ks);
}

/// AES-128-CTR ciphering of `buf[offset..]` in place. The keystream position
/// carries across segments, so segmentation does not affect the output.
pub fn apply_nea2(
    key: &Sec128Key,
    count: u32,
    bearer: u8,
    direction: SecurityDirection,
    buf: &mut ByteBuffer,
    offset: usize,
) {
    let nonce = nea2_nonce(count, bearer, direction);
    let mut cipher = Aes128Ctr::new(&(*key).into(), &nonce.into());
    let mut pos = 0usize;
    for seg in buf.segments_mut() {
        let seg_len = seg.len();
        if pos + seg_len > offset {
            let from = offset.saturating_sub(pos);
            cipher.apply_keystream(&mut seg[from..]);
        }
        pos += seg_len;
    }
}

/// ZUC ciphering of `buf[offset..]` in place, segment by segment.
pub fn apply_nea3(
    key: &Sec128Key,
    count: u32,
    bearer: u8,
    direction: SecurityDirection,
    buf: &mut ByteBuffer,
    offset: usize,
) {
    let len = buf.len().saturating_sub(offset);
    if len == 0 {
        return;
    }
    let iv = eea3_iv(count, bearer, direction.bit());
    let ks = Zuc::new(key, &iv).generate_keystream(len.div_ceil(4));
    xor_keystream_words(buf, offset, &ks);
}
