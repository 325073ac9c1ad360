pub mod credentials;
pub mod secret;

pub use credentials::{CredentialDecryptor, Credentials, PassthroughDecryptor};
pub use secret::Secret;
