//! RSA operations for the live-session-token handshake: decrypting the
//! access-token secret and signing the handshake request.
//!
//! The RustCrypto `rsa` crate is used here, consistent with the RustCrypto
//! family already present elsewhere in this dependency stack (`sha2`,
//! `signature`, `ed25519-dalek`) — see DESIGN.md for why it was added.

use std::path::Path;

use base64::{engine::general_purpose::STANDARD, Engine};
use rsa::pkcs1v15::{Pkcs1v15Encrypt, SigningKey};
use rsa::signature::{SignatureEncoding, Signer};
use rsa::RsaPrivateKey;
use sha2::Sha256;

use crate::error::{GatewayError, GatewayResult};

pub fn load_private_key(path: &Path) -> GatewayResult<RsaPrivateKey> {
    use rsa::pkcs8::DecodePrivateKey;
    use rsa::pkcs1::DecodeRsaPrivateKey;

    let pem = std::fs::read_to_string(path)
        .map_err(|e| GatewayError::Config(format!("cannot read key file {}: {e}", path.display())))?;

    RsaPrivateKey::from_pkcs8_pem(&pem)
        .or_else(|_| RsaPrivateKey::from_pkcs1_pem(&pem))
        .map_err(|e| GatewayError::Config(format!("invalid RSA private key in {}: {e}", path.display())))
}

/// Decrypts the base64 access-token-secret with PKCS#1 v1.5 padding,
/// returning the raw plaintext bytes (the caller hex-encodes this as the
/// `prepend`).
pub fn decrypt_access_token_secret(key: &RsaPrivateKey, access_token_secret_b64: &str) -> GatewayResult<Vec<u8>> {
    let ciphertext = STANDARD
        .decode(access_token_secret_b64.trim())
        .map_err(|e| GatewayError::Auth(format!("access_token_secret is not valid base64: {e}")))?;
    key.decrypt(Pkcs1v15Encrypt, &ciphertext)
        .map_err(|e| GatewayError::Auth(format!("failed to decrypt access_token_secret: {e}")))
}

/// Signs `data` with RSA-SHA256 / PKCS#1 v1.5, returning the raw signature
/// bytes (base64-then-percent-encoded by the caller).
pub fn sign_rsa_sha256(key: &RsaPrivateKey, data: &[u8]) -> GatewayResult<Vec<u8>> {
    let signing_key = SigningKey::<Sha256>::new(key.clone());
    let signature = signing_key
        .try_sign(data)
        .map_err(|e| GatewayError::Auth(format!("RSA-SHA256 signing failed: {e}")))?;
    Ok(signature.to_vec())
}
