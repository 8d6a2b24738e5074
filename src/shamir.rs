//! # Shamir secret sharing
//!
//! Threshold sharing over GF(2^8) used to back up keychain passphrases.
//! Every byte of the (framed) secret is the constant term of its own random
//! polynomial of degree `threshold - 1`; share `i` holds the evaluation of
//! all those polynomials at `x = i`.
//!
//! ## Share encoding
//!
//! - byte 0: `threshold`
//! - byte 1: share index (1..=total)
//! - byte 2..: payload, one y-value per framed secret byte
//!
//! Artifacts carry shares as lowercase hex of those bytes.
//!
//! ## Framing
//!
//! The secret is prefixed with [`FRAME_MARKER`] before splitting. A share set
//! that interpolates to anything without the marker is reported as corrupt
//! instead of silently returning garbage.
//!
//! ```rust
//! # use airgap_custody::shamir::{split, combine};
//! let set = split(b"correct horse battery staple", 2, 3).unwrap();
//! let subset = [set.shares[0].clone(), set.shares[2].clone()];
//! let recovered = combine(&subset).unwrap();
//! assert_eq!(recovered.as_slice(), b"correct horse battery staple");
//! ```
use std::collections::BTreeMap;
use std::fmt;

use rand::Rng;

use crate::security::SecretVec;

/// Leading byte placed in front of every secret before it is split.
pub const FRAME_MARKER: u8 = 0x01;

/// Smallest threshold accepted by [`split`].
pub const MIN_THRESHOLD: u8 = 2;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ShamirError {
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),
    #[error("insufficient shares: need {needed}, have {have}")]
    InsufficientShares { needed: u8, have: usize },
    #[error("corrupt share: {0}")]
    CorruptShare(String),
}

// GF(2^8) with the AES polynomial 0x11b
const POLY: u8 = 0x1b;

fn gf_mul(mut a: u8, mut b: u8) -> u8 {
    let mut r: u8 = 0;
    while b != 0 {
        if (b & 1) != 0 {
            r ^= a;
        }
        let hi = (a & 0x80) != 0;
        a <<= 1;
        if hi {
            a ^= POLY;
        }
        b >>= 1;
    }
    r
}

fn gf_pow(mut a: u8, mut e: u8) -> u8 {
    let mut r = 1u8;
    while e != 0 {
        if (e & 1) != 0 {
            r = gf_mul(r, a);
        }
        a = gf_mul(a, a);
        e >>= 1;
    }
    r
}

/// Multiplicative inverse; callers guarantee `a != 0`.
fn gf_inv(a: u8) -> u8 {
    debug_assert!(a != 0, "gf_inv(0)");
    gf_pow(a, 0xfe)
}

/// Evaluate polynomial with little-endian coeffs at x (coeffs[0] + coeffs[1]*x + ...)
fn eval_poly_at(coeffs: &[u8], x: u8) -> u8 {
    // Horner, highest degree first
    coeffs.iter().rev().fold(0u8, |acc, &c| gf_mul(acc, x) ^ c)
}

/// One share of a split secret.
#[derive(Clone, PartialEq, Eq)]
pub struct Share {
    threshold: u8,
    index: u8,
    payload: SecretVec,
}

impl Share {
    pub fn threshold(&self) -> u8 {
        self.threshold
    }

    pub fn index(&self) -> u8 {
        self.index
    }

    /// Hex encoding used inside recovery artifacts.
    pub fn to_hex(&self) -> String {
        let mut bytes = Vec::with_capacity(2 + self.payload.len());
        bytes.push(self.threshold);
        bytes.push(self.index);
        bytes.extend_from_slice(&self.payload);
        hex::encode(bytes)
    }

    pub fn from_hex(encoded: &str) -> Result<Self, ShamirError> {
        let bytes = SecretVec::new(
            hex::decode(encoded.trim())
                .map_err(|e| ShamirError::CorruptShare(format!("invalid hex: {}", e)))?,
        );
        if bytes.len() < 3 {
            return Err(ShamirError::CorruptShare("share too short".to_string()));
        }
        let (threshold, index) = (bytes[0], bytes[1]);
        if threshold < MIN_THRESHOLD {
            return Err(ShamirError::CorruptShare(format!("invalid threshold {}", threshold)));
        }
        if index == 0 {
            return Err(ShamirError::CorruptShare("share index cannot be zero".to_string()));
        }
        Ok(Self { threshold, index, payload: SecretVec::new(bytes[2..].to_vec()) })
    }
}

impl fmt::Debug for Share {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Share")
            .field("threshold", &self.threshold)
            .field("index", &self.index)
            .field("payload", &format_args!("<{} bytes>", self.payload.len()))
            .finish()
    }
}

/// All shares of one secret together with their `(M, N)` parameters.
#[derive(Debug, Clone)]
pub struct ShareSet {
    pub threshold: u8,
    pub total: u8,
    pub shares: Vec<Share>,
}

impl ShareSet {
    /// Share with the given 1-based index.
    pub fn get(&self, index: u8) -> Option<&Share> {
        self.shares.iter().find(|s| s.index == index)
    }
}

/// Split `secret` into `total` shares, any `threshold` of which recombine it.
pub fn split(secret: &[u8], threshold: u8, total: u8) -> Result<ShareSet, ShamirError> {
    if threshold < MIN_THRESHOLD {
        return Err(ShamirError::InvalidParameters(format!(
            "threshold must be at least {}",
            MIN_THRESHOLD
        )));
    }
    if threshold > total {
        return Err(ShamirError::InvalidParameters(
            "threshold cannot be greater than total shares".to_string(),
        ));
    }

    let mut framed = SecretVec::new(Vec::with_capacity(secret.len() + 1));
    framed.push(FRAME_MARKER);
    framed.extend_from_slice(secret);

    let mut rng = rand::rngs::OsRng;
    let mut coeffs = SecretVec::new(vec![0u8; threshold as usize]);
    let mut payloads: Vec<SecretVec> =
        (0..total).map(|_| SecretVec::new(Vec::with_capacity(framed.len()))).collect();

    for &b in framed.iter() {
        coeffs[0] = b;
        for coeff in coeffs.iter_mut().skip(1) {
            *coeff = rng.gen();
        }
        for (slot, payload) in payloads.iter_mut().enumerate() {
            payload.push(eval_poly_at(&coeffs, slot as u8 + 1));
        }
    }

    let shares = payloads
        .into_iter()
        .enumerate()
        .map(|(slot, payload)| Share { threshold, index: slot as u8 + 1, payload })
        .collect();

    Ok(ShareSet { threshold, total, shares })
}

/// Recombine shares produced by [`split`].
///
/// Duplicated indices with identical payloads are collapsed; the remaining
/// distinct shares must reach the threshold recorded inside them.
pub fn combine(shares: &[Share]) -> Result<SecretVec, ShamirError> {
    let first = shares
        .first()
        .ok_or(ShamirError::InsufficientShares { needed: MIN_THRESHOLD, have: 0 })?;
    let threshold = first.threshold;
    let payload_len = first.payload.len();

    let mut distinct: BTreeMap<u8, &Share> = BTreeMap::new();
    for share in shares {
        if share.threshold != threshold {
            return Err(ShamirError::CorruptShare("inconsistent threshold in shares".to_string()));
        }
        if share.payload.len() != payload_len {
            return Err(ShamirError::CorruptShare(
                "inconsistent share payload length".to_string(),
            ));
        }
        if let Some(existing) = distinct.insert(share.index, share) {
            if existing.payload != share.payload {
                return Err(ShamirError::CorruptShare(format!(
                    "conflicting shares for index {}",
                    share.index
                )));
            }
        }
    }

    if distinct.len() < threshold as usize {
        return Err(ShamirError::InsufficientShares { needed: threshold, have: distinct.len() });
    }

    let points: Vec<&Share> = distinct.into_values().collect();
    let framed = interpolate(&points);
    match framed.split_first() {
        Some((&FRAME_MARKER, rest)) => Ok(SecretVec::new(rest.to_vec())),
        _ => Err(ShamirError::CorruptShare("reconstructed secret has invalid framing".to_string())),
    }
}

/// Lagrange interpolation at x = 0 over every byte position.
fn interpolate(points: &[&Share]) -> SecretVec {
    let payload_len = points.first().map(|s| s.payload.len()).unwrap_or(0);
    let xs: Vec<u8> = points.iter().map(|s| s.index).collect();

    // basis coefficients l_j(0) depend only on the x-coordinates
    let basis: Vec<u8> = xs
        .iter()
        .enumerate()
        .map(|(j, &xj)| {
            let mut num = 1u8;
            let mut den = 1u8;
            for (m, &xm) in xs.iter().enumerate() {
                if m == j {
                    continue;
                }
                num = gf_mul(num, xm);
                den = gf_mul(den, xm ^ xj);
            }
            gf_mul(num, gf_inv(den))
        })
        .collect();

    let mut secret = SecretVec::new(vec![0u8; payload_len]);
    for (byte_idx, out) in secret.iter_mut().enumerate() {
        *out = points
            .iter()
            .zip(basis.iter())
            .fold(0u8, |acc, (share, &lj)| acc ^ gf_mul(share.payload[byte_idx], lj));
    }
    secret
}
