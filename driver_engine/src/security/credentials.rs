use super::secret::Secret;
use crate::connectivity::ConnectProperties;
use crate::error::Result;

/// Decrypts credentials stored in descriptors. Provided by the host; this
/// crate never implements real cryptography.
pub trait CredentialDecryptor: Send + Sync {
    fn decrypt(&self, ciphertext: &str) -> Result<Secret>;
}

/// Treats stored credentials as plaintext.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughDecryptor;

impl CredentialDecryptor for PassthroughDecryptor {
    fn decrypt(&self, ciphertext: &str) -> Result<Secret> {
        Ok(Secret::from(ciphertext))
    }
}

#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub username: Option<String>,
    pub password: Option<Secret>,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(Secret::from_string(password.into())),
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Decrypts stored credentials; a value that fails to decrypt is logged
    /// and left out.
    pub fn decrypt(
        decryptor: &dyn CredentialDecryptor,
        username: Option<&str>,
        password: Option<&str>,
    ) -> Self {
        let username = username.and_then(|u| match decryptor.decrypt(u) {
            Ok(secret) => Some(secret.to_string_lossy()),
            Err(e) => {
                log::error!("Failed to decrypt username: {}", e);
                None
            }
        });
        let password = password.and_then(|p| match decryptor.decrypt(p) {
            Ok(secret) => Some(secret),
            Err(e) => {
                log::error!("Failed to decrypt password: {}", e);
                None
            }
        });
        Self { username, password }
    }

    /// Adds `user`/`password` connection properties.
    pub fn apply_to(&self, properties: &mut ConnectProperties) {
        if let Some(user) = &self.username {
            properties.set("user", user.as_str());
        }
        if let Some(password) = &self.password {
            properties.set("password", password.to_string_lossy());
        }
    }

    pub fn to_properties(&self) -> ConnectProperties {
        let mut properties = ConnectProperties::new();
        self.apply_to(&mut properties);
        properties
    }
}
