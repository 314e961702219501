use aes::cipher::{BlockEncrypt, KeyInit};
use aes::Aes128;

/// Streaming AES-128-CFB8.
///
/// The shift register carries over between calls, so a byte stream can be
/// processed in arbitrary chunks.
pub struct Cfb8Cipher {
    cipher: Aes128,
    iv: [u8; 16],
}

impl Cfb8Cipher {
    pub fn new(key: &[u8; 16], iv: &[u8; 16]) -> Self {
        let cipher = Aes128::new(key.into());
        Self { cipher, iv: *iv }
    }

    /// Key and IV are both the shared secret.
    pub fn from_secret(secret: &[u8; 16]) -> Self {
        Self::new(secret, secret)
    }

    pub fn encrypt(&mut self, data: &mut [u8]) {
        for byte in data.iter_mut() {
            let mut block = aes::Block::from(self.iv);
            self.cipher.encrypt_block(&mut block);
            *byte ^= block[0];
            // Shift IV left by 1, append ciphertext byte
            self.iv.copy_within(1.., 0);
            self.iv[15] = *byte;
        }
    }

    pub fn decrypt(&mut self, data: &mut [u8]) {
        for byte in data.iter_mut() {
            let mut block = aes::Block::from(self.iv);
            self.cipher.encrypt_block(&mut block);
            let ciphertext = *byte;
            *byte ^= block[0];
            self.iv.copy_within(1.., 0);
            self.iv[15] = ciphertext;
        }
    }
}

impl std::fmt::Debug for Cfb8Cipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Cfb8Cipher")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cfb8::cipher::{AsyncStreamCipher, KeyIvInit};

    const SECRET: [u8; 16] = *b"0123456789abcdef";

    #[test]
    fn test_matches_reference_cfb8() {
        let plaintext: Vec<u8> = (0..200u8).collect();

        let mut ours = plaintext.clone();
        Cfb8Cipher::from_secret(&SECRET).encrypt(&mut ours);

        let mut reference = plaintext.clone();
        cfb8::Encryptor::<Aes128>::new(&SECRET.into(), &SECRET.into()).encrypt(&mut reference);

        assert_eq!(ours, reference);
    }

    #[test]
    fn test_chunking_does_not_matter() {
        let plaintext: Vec<u8> = (0..97u8).rev().collect();

        let mut whole = plaintext.clone();
        Cfb8Cipher::from_secret(&SECRET).encrypt(&mut whole);

        let mut pieces = plaintext.clone();
        let mut cipher = Cfb8Cipher::from_secret(&SECRET);
        for chunk in pieces.chunks_mut(7) {
            cipher.encrypt(chunk);
        }
        assert_eq!(whole, pieces);

        let mut decryptor = Cfb8Cipher::from_secret(&SECRET);
        let (head, tail) = pieces.split_at_mut(40);
        decryptor.decrypt(head);
        decryptor.decrypt(tail);
        assert_eq!(pieces, plaintext);
    }
}
