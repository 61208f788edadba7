//! Diffie-Hellman exchange and the sign-bit byte convention used to turn
//! the shared secret into HMAC key material.

use num_bigint::BigUint;
use num_traits::Num;
use rand::RngCore;

use crate::error::{GatewayError, GatewayResult};

/// The client's private DH exponent: 32 random bytes.
pub struct DhRandom {
    bytes: [u8; 32],
}

impl DhRandom {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::rng().fill_bytes(&mut bytes);
        Self { bytes }
    }

    pub fn as_biguint(&self) -> BigUint {
        BigUint::from_bytes_be(&self.bytes)
    }
}

fn parse_hex_biguint(hex_str: &str, what: &str) -> GatewayResult<BigUint> {
    BigUint::from_str_radix(hex_str.trim(), 16)
        .map_err(|e| GatewayError::Auth(format!("invalid {what} hex: {e}")))
}

/// `dh_challenge = generator^dh_random mod dh_prime`, serialized as
/// lowercase hex without leading zeros.
pub fn dh_challenge(generator: u64, dh_random: &BigUint, dh_prime_hex: &str) -> GatewayResult<String> {
    let prime = parse_hex_biguint(dh_prime_hex, "dh_prime")?;
    let generator = BigUint::from(generator);
    Ok(generator.modpow(dh_random, &prime).to_str_radix(16))
}

/// `K = dh_response^dh_random mod dh_prime`.
pub fn shared_secret(dh_response_hex: &str, dh_random: &BigUint, dh_prime_hex: &str) -> GatewayResult<BigUint> {
    let response = parse_hex_biguint(dh_response_hex, "diffie_hellman_response")?;
    let prime = parse_hex_biguint(dh_prime_hex, "dh_prime")?;
    Ok(response.modpow(dh_random, &prime))
}

/// Big-endian byte serialization of `K`, with a leading zero byte whenever
/// the bit length is divisible by eight (the two's-complement sign-bit
/// convention, so a high bit in the top byte is never mistaken for a sign).
pub fn to_signed_bytes(k: &BigUint) -> Vec<u8> {
    let mut bytes = k.to_bytes_be();
    if k.bits() % 8 != 0 {
        return bytes;
    }
    let mut signed = Vec::with_capacity(bytes.len() + 1);
    signed.push(0u8);
    signed.append(&mut bytes);
    signed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_bit_prepends_zero_when_bit_length_divisible_by_eight() {
        let k = BigUint::from_bytes_be(&[0xff]);
        assert_eq!(to_signed_bytes(&k), vec![0x00, 0xff]);
    }

    #[test]
    fn sign_bit_omits_zero_otherwise() {
        let k = BigUint::from_bytes_be(&[0x7f]);
        assert_eq!(to_signed_bytes(&k), vec![0x7f]);
    }

    #[test]
    fn dh_challenge_matches_modpow() {
        // Small toy prime so the test is fast and the expected value is
        // easy to hand-verify: 5^3 mod 23 = 10.
        let prime_hex = format!("{:x}", 23u32);
        let random = BigUint::from(3u32);
        let challenge = dh_challenge(5, &random, &prime_hex).unwrap();
        assert_eq!(challenge, format!("{:x}", 10u32));
    }

    #[test]
    fn shared_secret_is_symmetric() {
        let prime_hex = "17".to_string(); // 23
        let a = BigUint::from(6u32);
        let b = BigUint::from(15u32);
        let generator = 5u64;
        let a_pub = dh_challenge(generator, &a, &prime_hex).unwrap();
        let b_pub = dh_challenge(generator, &b, &prime_hex).unwrap();
        let k_from_a = shared_secret(&b_pub, &a, &prime_hex).unwrap();
        let k_from_b = shared_secret(&a_pub, &b, &prime_hex).unwrap();
        assert_eq!(k_from_a, k_from_b);
    }
}
