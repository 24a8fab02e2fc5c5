pub mod password;
pub mod validation;

pub use password::{dummy_verify, hash_secret, verify_secret, SecretHash};
pub use validation::ValidatedJson;
