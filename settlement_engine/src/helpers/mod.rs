pub mod data_uri;
mod payload_hash;

pub use payload_hash::{hash_payload, sha256_base64url};
