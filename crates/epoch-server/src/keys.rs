use rsa::pkcs8::EncodePublicKey;
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};

const KEY_BITS: usize = 1024;
const SECRET_LEN: usize = 16;

/// The server's RSA key pair for the release login key exchange.
pub struct ServerKeys {
    private: RsaPrivateKey,
    public_der: Vec<u8>,
}

impl ServerKeys {
    pub fn generate() -> anyhow::Result<Self> {
        let private = RsaPrivateKey::new(&mut rand::thread_rng(), KEY_BITS)?;
        let public_der = RsaPublicKey::from(&private)
            .to_public_key_der()?
            .as_bytes()
            .to_vec();
        Ok(Self {
            private,
            public_der,
        })
    }

    /// SubjectPublicKeyInfo DER, as sent in the encryption request.
    pub fn public_der(&self) -> &[u8] {
        &self.public_der
    }

    pub fn decrypt(&self, data: &[u8]) -> anyhow::Result<Vec<u8>> {
        Ok(self.private.decrypt(Pkcs1v15Encrypt, data)?)
    }

    /// Decrypt the client's response and check it against the token we
    /// sent. Returns the shared secret.
    pub fn finish_exchange(
        &self,
        encrypted_secret: &[u8],
        encrypted_token: &[u8],
        expected_token: &[u8],
    ) -> anyhow::Result<Vec<u8>> {
        let token = self.decrypt(encrypted_token)?;
        if token != expected_token {
            anyhow::bail!("Verify token mismatch");
        }
        let secret = self.decrypt(encrypted_secret)?;
        if secret.len() != SECRET_LEN {
            anyhow::bail!("Shared secret is {} bytes, expected {}", secret.len(), SECRET_LEN);
        }
        Ok(secret)
    }
}

impl std::fmt::Debug for ServerKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerKeys")
            .field("public_der_len", &self.public_der.len())
            .finish_non_exhaustive()
    }
}

/// Four random bytes for the encryption request.
pub fn verify_token() -> [u8; 4] {
    rand::random()
}
