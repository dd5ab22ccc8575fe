//! Password storage.
//!
//! Stored form is `sha256$<rounds>$<salt>$<hex digest>`, where the digest is
//! SHA-256 over `salt || password` fed back through `rounds - 1` more passes
//! of `previous || password`.

use sha2::{Digest, Sha256};
use uuid::Uuid;

pub const MIN_PASSWORD_LEN: usize = 6;
pub const HASH_ROUNDS: u32 = 10_000;
const SCHEME: &str = "sha256";
const MAX_ROUNDS: u32 = 1_000_000;

fn stretch(salt: &str, password: &str, rounds: u32) -> String {
    let mut state = Sha256::new()
        .chain_update(salt.as_bytes())
        .chain_update(password.as_bytes())
        .finalize();
    for _ in 1..rounds {
        state = Sha256::new()
            .chain_update(state)
            .chain_update(password.as_bytes())
            .finalize();
    }
    hex::encode(state)
}

pub fn hash_password(password: &str) -> String {
    let salt = Uuid::new_v4().simple().to_string();
    format!(
        "{}${}${}${}",
        SCHEME,
        HASH_ROUNDS,
        salt,
        stretch(&salt, password, HASH_ROUNDS)
    )
}

fn parse_stored(stored: &str) -> Option<(u32, &str, &str)> {
    let mut parts = stored.splitn(4, '$');
    if parts.next()? != SCHEME {
        return None;
    }
    let rounds: u32 = parts.next()?.parse().ok()?;
    if rounds == 0 || rounds > MAX_ROUNDS {
        return None;
    }
    Some((rounds, parts.next()?, parts.next()?))
}

pub fn verify_password(stored: &str, password: &str) -> bool {
    let Some((rounds, salt, expected)) = parse_stored(stored) else {
        return false;
    };
    let actual = stretch(salt, password, rounds);
    // Length is fixed (hex sha256), so compare every byte.
    actual.len() == expected.len()
        && actual
            .bytes()
            .zip(expected.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}
