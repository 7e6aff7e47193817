//! Wire layout of a hybrid ciphertext.
//!
//! ```text
//! u32 LE len(enc_key) || enc_key || u32 LE len(enc_iv) || enc_iv || aes_ciphertext
//! ```

use bytes::{Buf, BufMut};

use crate::error::CryptoError;

const LEN_PREFIX: usize = 4;

/// RSA-wrapped AES key and IV followed by the symmetric ciphertext.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HybridFrame {
    pub encrypted_key: Vec<u8>,
    pub encrypted_iv: Vec<u8>,
    pub ciphertext: Vec<u8>,
}

impl HybridFrame {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            2 * LEN_PREFIX + self.encrypted_key.len() + self.encrypted_iv.len() + self.ciphertext.len(),
        );
        out.put_u32_le(self.encrypted_key.len() as u32);
        out.extend_from_slice(&self.encrypted_key);
        out.put_u32_le(self.encrypted_iv.len() as u32);
        out.extend_from_slice(&self.encrypted_iv);
        out.extend_from_slice(&self.ciphertext);
        out
    }

    /// Split `data` into its three parts.
    ///
    /// Fails when a length prefix is missing or points past the end of the
    /// buffer, or when no symmetric ciphertext remains.
    pub fn parse(data: &[u8]) -> Result<Self, CryptoError> {
        let mut buf = data;
        let encrypted_key = take_prefixed(&mut buf, "key")?;
        let encrypted_iv = take_prefixed(&mut buf, "iv")?;
        if !buf.has_remaining() {
            return Err(CryptoError::Decryption("hybrid frame has no ciphertext".into()));
        }
        Ok(Self {
            encrypted_key,
            encrypted_iv,
            ciphertext: buf.to_vec(),
        })
    }
}

fn take_prefixed(buf: &mut &[u8], part: &str) -> Result<Vec<u8>, CryptoError> {
    if buf.remaining() < LEN_PREFIX {
        return Err(CryptoError::Decryption(format!("hybrid frame truncated before {part} length")));
    }
    let len = buf.get_u32_le() as usize;
    if len == 0 || len > buf.remaining() {
        return Err(CryptoError::Decryption(format!(
            "hybrid {part} length {len} out of range ({} bytes left)",
            buf.remaining()
        )));
    }
    let part_bytes = buf[..len].to_vec();
    buf.advance(len);
    Ok(part_bytes)
}
