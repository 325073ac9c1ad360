use zeroize::ZeroizeOnDrop;

/// Decrypted credential material; wiped on drop and never printed.
#[derive(Clone, PartialEq, Eq, ZeroizeOnDrop)]
pub struct Secret {
    value: Vec<u8>,
}

impl Secret {
    pub fn new(value: Vec<u8>) -> Self {
        Self { value }
    }

    pub fn from_string(value: String) -> Self {
        Self::new(value.into_bytes())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.value
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.value).to_string()
    }
}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Self::new(value.as_bytes().to_vec())
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret(***)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_roundtrip() {
        let secret = Secret::from_string("tiger".to_string());
        assert_eq!(secret.as_bytes(), b"tiger");
        assert_eq!(secret.to_string_lossy(), "tiger");
        assert!(!secret.is_empty());
    }

    #[test]
    fn test_secret_debug_redacted() {
        let secret = Secret::from("tiger");
        assert_eq!(format!("{:?}", secret), "Secret(***)");
    }
}
