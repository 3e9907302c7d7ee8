use crate::protocol::mysql::constants::SCRAMBLE_SIZE;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sha1::Digest;

/// Generates a 20-byte nonce for the handshake. Avoids NUL and `$` the way
/// real MySQL's `crypt_genhash_impl.cc` does, since some client libraries
/// treat those as string terminators.
/// https://github.com/mysql/mysql-server/blob/8.0/mysys/crypt_genhash_impl.cc#L427
pub fn gen_nonce() -> [u8; SCRAMBLE_SIZE] {
    let mut nonce: [u8; SCRAMBLE_SIZE] = [0; SCRAMBLE_SIZE];
    let mut r = StdRng::from_entropy();
    for item in nonce.iter_mut() {
        let v = r.gen_range(0..127) as u8;
        *item = if v == b'\0' || v == b'$' { v + 1 } else { v };
    }
    nonce
}

fn sha1(bytes: impl AsRef<[u8]>) -> [u8; 20] {
    sha1::Sha1::digest(bytes).into()
}

fn sha1_2(bytes1: impl AsRef<[u8]>, bytes2: impl AsRef<[u8]>) -> [u8; 20] {
    let mut hasher = sha1::Sha1::new();
    hasher.update(bytes1.as_ref());
    hasher.update(bytes2.as_ref());
    hasher.finalize().into()
}

fn xor(mut left: [u8; 20], right: [u8; 20]) -> [u8; 20] {
    for (l, r) in left.iter_mut().zip(right.iter()) {
        *l ^= r;
    }
    left
}

/// Computes the `mysql_native_password` auth response a well-behaved client
/// sends, per §4.5 / §8 scenario 6:
/// `SHA1(password) XOR SHA1(nonce || SHA1(SHA1(password)))`.
pub fn native_password_response(password: &[u8], nonce: &[u8; SCRAMBLE_SIZE]) -> [u8; 20] {
    let password_sha = sha1(password);
    let password_sha_sha = sha1(password_sha);
    let nonce_mix = sha1_2(nonce, password_sha_sha);
    xor(password_sha, nonce_mix)
}

/// Verifies a client's auth response against the configured password. Empty
/// passwords are accepted only when the client's auth response is also empty.
pub fn verify_native_password(password: &[u8], nonce: &[u8; SCRAMBLE_SIZE], response: &[u8]) -> bool {
    if password.is_empty() {
        return response.is_empty();
    }
    if response.len() != 20 {
        return false;
    }
    let expected = native_password_response(password, nonce);
    expected.as_slice() == response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_protocol_scenario() {
        let nonce = [1u8; SCRAMBLE_SIZE];
        let response = native_password_response(b"p", &nonce);
        assert!(verify_native_password(b"p", &nonce, &response));
        assert!(!verify_native_password(b"wrong", &nonce, &response));
    }

    #[test]
    fn empty_password_requires_empty_response() {
        let nonce = [2u8; SCRAMBLE_SIZE];
        assert!(verify_native_password(b"", &nonce, b""));
        assert!(!verify_native_password(b"", &nonce, b"anything"));
    }
}
