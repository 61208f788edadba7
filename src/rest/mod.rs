mod client;
mod executor;
mod request;
mod response;
mod retry;

pub use client::{RestEngine, Signer};
pub use executor::{run_parallel, run_parallel_keyed};
pub use request::{elide_nulls, HttpMethod, RequestEnvelope};
pub use response::GatewayResponse;
