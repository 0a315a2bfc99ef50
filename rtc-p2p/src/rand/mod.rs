use shared::util::generate_crypto_random_string;


const RUNES_ALPHA: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";
const RUNES_CANDIDATE_ID: &[u8] =
    b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789/+";

const LEN_CANDIDATE_ID: usize = 8;
const LEN_UFRAG: usize = 16;
const LEN_PWD: usize = 32;

/// Random id for a locally synthesized (peer reflexive) candidate.
pub fn generate_cand_id() -> String {
    generate_crypto_random_string(LEN_CANDIDATE_ID, RUNES_CANDIDATE_ID)
}

/// Generates ICE pwd.
pub fn generate_pwd() -> String {
    generate_crypto_random_string(LEN_PWD, RUNES_ALPHA)
}

/// Generates ICE user fragment.
pub fn generate_ufrag() -> String {
    generate_crypto_random_string(LEN_UFRAG, RUNES_ALPHA)
}

/// Random tiebreaker used to resolve ICE role conflicts.
pub fn generate_tiebreaker() -> u64 {
    rand::random::<u64>()
}
