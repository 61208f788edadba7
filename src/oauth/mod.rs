mod crypto;
mod dh;
mod signer;

pub use signer::{LiveSessionToken, OAuthSigner, SignatureMethod};
