//! Hashcash challenges gating work requests.
//!
//! A challenge is a random nonce plus a difficulty. A proof is any string
//! such that the SHA-256 digest of `nonce || proof`, written as lowercase
//! hex, starts with `difficulty` zero digits. Producing a proof costs about
//! `16^difficulty` hashes on average; checking one costs a single hash.
//!
//! Challenges are single-use. The connection state machine drops the
//! challenge as soon as a proof for it has been checked, whatever the
//! outcome, so a captured proof cannot be replayed.

use rand::RngCore;
use sha2::{Digest, Sha256};

/// Number of random bytes in a nonce (hex encoded on the wire).
pub const NONCE_LEN: usize = 16;

/// An outstanding proof-of-work puzzle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub nonce: String,
    pub difficulty: u32,
}

impl Challenge {
    /// Does `proof` solve this challenge?
    pub fn is_solved_by(&self, proof: &str) -> bool {
        verify(&self.nonce, self.difficulty, proof)
    }
}

/// Issues challenges at the configured difficulty.
#[derive(Debug, Clone)]
pub struct HashCash {
    difficulty: u32,
}

impl HashCash {
    pub fn new(difficulty: u32) -> Self {
        Self { difficulty }
    }

    pub fn difficulty(&self) -> u32 {
        self.difficulty
    }

    /// Issue a fresh challenge with a nonce from the thread RNG.
    pub fn issue(&self) -> Challenge {
        self.issue_with(&mut rand::thread_rng())
    }

    pub fn issue_with<R: RngCore + ?Sized>(&self, rng: &mut R) -> Challenge {
        let mut nonce = [0u8; NONCE_LEN];
        rng.fill_bytes(&mut nonce);
        Challenge {
            nonce: hex::encode(nonce),
            difficulty: self.difficulty,
        }
    }
}

/// Check `proof` against the exact `(nonce, difficulty)` pair.
pub fn verify(nonce: &str, difficulty: u32, proof: &str) -> bool {
    leading_zero_digits(&digest(nonce, proof)) >= difficulty
}

/// Brute-force a proof for `(nonce, difficulty)`.
///
/// Proofs are decimal counters. Intended for tests and reference clients;
/// runtime grows by 16x per difficulty step.
pub fn solve(nonce: &str, difficulty: u32) -> String {
    let mut counter: u64 = 0;
    loop {
        let proof = counter.to_string();
        if verify(nonce, difficulty, &proof) {
            return proof;
        }
        counter += 1;
    }
}

fn digest(nonce: &str, proof: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(nonce.as_bytes());
    hasher.update(proof.as_bytes());
    hasher.finalize().into()
}

// Count leading zero nibbles, i.e. leading '0' characters of the hex digest.
fn leading_zero_digits(hash: &[u8; 32]) -> u32 {
    let mut digits = 0;
    for byte in hash {
        if *byte == 0 {
            digits += 2;
        } else {
            if byte >> 4 == 0 {
                digits += 1;
            }
            break;
        }
    }
    digits
}
