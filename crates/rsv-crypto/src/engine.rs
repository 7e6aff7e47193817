//! RSA-2048 keypair with OAEP encryption and PKCS#1 v1.5 signatures.

use std::fmt;

use aes::Aes256;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand_core::{OsRng, RngCore};
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::hybrid::HybridFrame;

/// Modulus size of every key this crate generates or accepts.
pub const KEY_BITS: usize = 2048;

const AES_KEY_LEN: usize = 32;
const AES_IV_LEN: usize = 16;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// A peer's public key as imported from its PEM document.
pub type PublicKey = RsaPublicKey;

/// One party's key material.
///
/// The private key never leaves this struct; only the SPKI PEM of the public
/// half is exported.
pub struct CryptoEngine {
    private_key: RsaPrivateKey,
    public_key: RsaPublicKey,
    public_pem: String,
}

impl CryptoEngine {
    /// Generate a fresh 2048-bit keypair from the OS random source.
    pub fn generate() -> Result<Self, CryptoError> {
        let private_key = RsaPrivateKey::new(&mut OsRng, KEY_BITS)
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
        Self::from_private_key(private_key)
    }

    pub fn from_private_key(private_key: RsaPrivateKey) -> Result<Self, CryptoError> {
        let public_key = RsaPublicKey::from(&private_key);
        if public_key.size() * 8 < KEY_BITS {
            return Err(CryptoError::KeyGeneration(format!(
                "modulus of {} bits is below {KEY_BITS}",
                public_key.size() * 8
            )));
        }
        let public_pem = public_key
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
        Ok(Self {
            private_key,
            public_key,
            public_pem,
        })
    }

    /// SPKI PEM of the public key. Stable for the lifetime of the engine.
    pub fn export_public_key(&self) -> String {
        self.public_pem.clone()
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    pub fn key_bits(&self) -> usize {
        self.public_key.size() * 8
    }

    /// Parse a peer's PEM document.
    pub fn import_public_key(document: &str) -> Result<PublicKey, CryptoError> {
        let key = RsaPublicKey::from_public_key_pem(document.trim())
            .map_err(|e| CryptoError::KeyFormat(e.to_string()))?;
        if key.size() * 8 < KEY_BITS {
            return Err(CryptoError::KeyFormat(format!(
                "modulus of {} bits is below {KEY_BITS}",
                key.size() * 8
            )));
        }
        Ok(key)
    }

    /// Largest plaintext RSA-OAEP (SHA-256) can carry for `key`.
    pub fn max_direct_payload(key: &PublicKey) -> usize {
        key.size().saturating_sub(2 * <Sha256 as Digest>::output_size() + 2)
    }

    /// Encrypt `plaintext` so only the holder of `recipient`'s private key can
    /// read it.
    pub fn encrypt(&self, plaintext: &[u8], recipient: &PublicKey) -> Result<Vec<u8>, CryptoError> {
        if plaintext.len() <= Self::max_direct_payload(recipient) {
            return recipient
                .encrypt(&mut OsRng, Oaep::new::<Sha256>(), plaintext)
                .map_err(|e| CryptoError::Encryption(e.to_string()));
        }

        let mut key = Zeroizing::new([0u8; AES_KEY_LEN]);
        let mut iv = Zeroizing::new([0u8; AES_IV_LEN]);
        OsRng.fill_bytes(&mut key[..]);
        OsRng.fill_bytes(&mut iv[..]);

        let ciphertext = Aes256CbcEnc::new_from_slices(&key[..], &iv[..])
            .map_err(|e| CryptoError::Encryption(e.to_string()))?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext);

        let encrypted_key = recipient
            .encrypt(&mut OsRng, Oaep::new::<Sha256>(), &key[..])
            .map_err(|e| CryptoError::Encryption(e.to_string()))?;
        let encrypted_iv = recipient
            .encrypt(&mut OsRng, Oaep::new::<Sha256>(), &iv[..])
            .map_err(|e| CryptoError::Encryption(e.to_string()))?;

        Ok(HybridFrame {
            encrypted_key,
            encrypted_iv,
            ciphertext,
        }
        .encode())
    }

    /// Reverse [`encrypt`](Self::encrypt) with this engine's private key.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        // A hybrid frame is always longer than one RSA block.
        if ciphertext.len() == self.public_key.size() {
            if let Ok(plaintext) = self.private_key.decrypt(Oaep::new::<Sha256>(), ciphertext) {
                return Ok(plaintext);
            }
        }

        let frame = HybridFrame::parse(ciphertext)?;
        let key = Zeroizing::new(
            self.private_key
                .decrypt(Oaep::new::<Sha256>(), &frame.encrypted_key)
                .map_err(|e| CryptoError::Decryption(format!("session key: {e}")))?,
        );
        let iv = Zeroizing::new(
            self.private_key
                .decrypt(Oaep::new::<Sha256>(), &frame.encrypted_iv)
                .map_err(|e| CryptoError::Decryption(format!("iv: {e}")))?,
        );
        if key.len() != AES_KEY_LEN || iv.len() != AES_IV_LEN {
            return Err(CryptoError::Decryption("unexpected session key size".into()));
        }

        Aes256CbcDec::new_from_slices(&key, &iv)
            .map_err(|e| CryptoError::Decryption(e.to_string()))?
            .decrypt_padded_vec_mut::<Pkcs7>(&frame.ciphertext)
            .map_err(|_| CryptoError::Decryption("bad padding".into()))
    }

    /// RSASSA-PKCS1-v1_5 signature over SHA-256(`data`).
    pub fn sign(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.private_key
            .sign(Pkcs1v15Sign::new::<Sha256>(), &Sha256::digest(data))
            .map_err(|e| CryptoError::Signing(e.to_string()))
    }

    pub fn verify(data: &[u8], signature: &[u8], public_key: &PublicKey) -> bool {
        public_key
            .verify(Pkcs1v15Sign::new::<Sha256>(), &Sha256::digest(data), signature)
            .is_ok()
    }

    /// Sign and encode the signature as standard base64, the envelope format.
    pub fn sign_base64(&self, data: &[u8]) -> Result<String, CryptoError> {
        Ok(STANDARD.encode(self.sign(data)?))
    }

    /// Verify a base64 signature. Undecodable base64 fails verification.
    pub fn verify_base64(data: &[u8], signature: &str, public_key: &PublicKey) -> bool {
        match STANDARD.decode(signature) {
            Ok(raw) => Self::verify(data, &raw, public_key),
            Err(_) => false,
        }
    }
}

impl fmt::Debug for CryptoEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CryptoEngine")
            .field("key_bits", &self.key_bits())
            .finish_non_exhaustive()
    }
}
