use rand::Rng;
use sha2::{Digest, Sha256};

/// Buckets are integers in `0..BUCKET_COUNT`, one per rollout percentage point.
pub const BUCKET_COUNT: u32 = 100;

/// Maps a subject and a salt (usually the flag or experiment key) to a bucket in `[0, 100)`.
///
/// The bucket is the first four bytes of `sha256("{subject_id}-{salt}")` read as a
/// big-endian integer, modulo 100. It only depends on the input bytes, so it is
/// stable across restarts and can be reproduced by any SHA-256 implementation.
/// Raising a rollout percentage only ever adds subjects: a subject enabled at
/// `p` has `bucket < p`, which still holds for every `p' >= p`.
pub fn bucket(subject_id: &str, salt: &str) -> u8 {
    let mut hasher = Sha256::new();
    hasher.update(subject_id.as_bytes());
    hasher.update(b"-");
    hasher.update(salt.as_bytes());
    let digest = hasher.finalize();

    let prefix = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    (prefix % BUCKET_COUNT) as u8
}

/// A uniformly random bucket for callers without a subject id.
///
/// Anonymous callers get a fresh draw on every evaluation, so the same anonymous
/// visitor can see a partially rolled out flag flip between calls. That is accepted
/// behavior: only identified subjects get a stable bucket.
pub fn random_bucket() -> u8 {
    rand::thread_rng().gen_range(0..100)
}

/// Deterministic bucket when a subject is known, random otherwise.
pub fn bucket_for(subject_id: Option<&str>, salt: &str) -> u8 {
    match subject_id {
        Some(subject_id) => bucket(subject_id, salt),
        None => random_bucket(),
    }
}
