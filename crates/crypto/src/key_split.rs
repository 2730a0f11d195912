//! XOR key splitting
//!
//! A key split into `n` shares is recovered only by XOR-ing all `n` together.
//! The first `n - 1` shares are random and the last is the key XOR-ed with
//! them, so a single share is the key itself.

use crate::random::RandomSource;
use crate::types::{KeyShare, SymmetricKey, KEY_SIZE};
use crate::types::sealed::Sealed;
use thiserror::Error;
use zeroize::Zeroizing;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeySplitError {
    #[error("Cannot split a key into zero shares")]
    ZeroShares,

    #[error("No shares to merge")]
    Empty,

    #[error("Share length mismatch: expected {expected} bytes, got {got}")]
    LengthMismatch { expected: usize, got: usize },
}

/// XOR `b` into `a` in place
pub fn bxor(a: &mut [u8], b: &[u8]) {
    for (x, y) in a.iter_mut().zip(b) {
        *x ^= y;
    }
}

/// Split arbitrary bytes into `n` XOR shares
pub fn split_bytes(
    key: &[u8],
    n: usize,
    rng: &dyn RandomSource,
) -> Result<Vec<Zeroizing<Vec<u8>>>, KeySplitError> {
    if n == 0 {
        return Err(KeySplitError::ZeroShares);
    }
    let mut last = Zeroizing::new(key.to_vec());
    let mut shares = Vec::with_capacity(n);
    for _ in 1..n {
        let mut share = Zeroizing::new(vec![0u8; key.len()]);
        rng.fill_bytes(&mut share);
        bxor(&mut last, &share);
        shares.push(share);
    }
    shares.push(last);
    Ok(shares)
}

/// XOR all shares together
pub fn merge_bytes<S: AsRef<[u8]>>(shares: &[S]) -> Result<Zeroizing<Vec<u8>>, KeySplitError> {
    let (first, rest) = shares.split_first().ok_or(KeySplitError::Empty)?;
    let mut merged = Zeroizing::new(first.as_ref().to_vec());
    for share in rest {
        let share = share.as_ref();
        if share.len() != merged.len() {
            return Err(KeySplitError::LengthMismatch {
                expected: merged.len(),
                got: share.len(),
            });
        }
        bxor(&mut merged, share);
    }
    Ok(merged)
}

impl SymmetricKey {
    /// Split into `n` shares, one per key-access target
    pub fn split(&self, n: usize, rng: &dyn RandomSource) -> Result<Vec<KeyShare>, KeySplitError> {
        let shares = split_bytes(self.secret_bytes(), n, rng)?;
        Ok(shares
            .iter()
            .map(|share| {
                let mut bytes = [0u8; KEY_SIZE];
                bytes.copy_from_slice(share);
                KeyShare::from_array(bytes)
            })
            .collect())
    }
}

/// Recover a key from every one of its shares
pub fn merge_shares(shares: &[KeyShare]) -> Result<SymmetricKey, KeySplitError> {
    let arrays: Vec<&[u8; KEY_SIZE]> = shares.iter().map(KeyShare::as_array).collect();
    let merged = merge_bytes(&arrays)?;
    SymmetricKey::from_slice(&merged).map_err(|_| KeySplitError::LengthMismatch {
        expected: KEY_SIZE,
        got: merged.len(),
    })
}
