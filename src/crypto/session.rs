//! Per-connection cipher session
//!
//! Each direction of a connection carries its own IV at the very beginning of the stream:
//!
//! ```plain
//! +--------+------------------------------+
//! |   IV   | cipher(payload) ...          |
//! +--------+------------------------------+
//! | iv_len |        Variable              |
//! +--------+------------------------------+
//! ```
//!
//! The encrypt half generates a random IV on its first call and prepends it to the output,
//! the decrypt half takes the first `iv_len` bytes of the incoming stream as its IV, however
//! they are fragmented.

use byte_string::ByteStr;
use bytes::{BufMut, Bytes, BytesMut};
use log::trace;

use super::{
    cipher::{CipherResult, CipherType},
    stream::{new_stream, StreamCipher, StreamCipherVariant},
    CryptoMode,
};

/// Encrypt half of a `CipherSession`
pub struct Encryptor {
    method: CipherType,
    key: Bytes,
    iv: Bytes,
    cipher: Option<StreamCipherVariant>,
}

impl Encryptor {
    pub fn new(method: CipherType, key: Bytes) -> Encryptor {
        Encryptor {
            method,
            key,
            iv: Bytes::new(),
            cipher: None,
        }
    }

    /// Encrypts a chunk of plain text
    ///
    /// The first call returns `IV || cipher(data)`, later calls continue the key stream.
    pub fn encrypt(&mut self, data: &[u8]) -> CipherResult<Bytes> {
        let mut out = BytesMut::with_capacity(data.len() + self.method.iv_size());

        if self.cipher.is_none() {
            let iv = self.method.gen_init_vec();
            let c = new_stream(self.method, &self.key, &iv, CryptoMode::Encrypt)?;
            trace!("{} encryptor initialized with iv {:?}", self.method, ByteStr::new(&iv));
            out.put_slice(&iv);
            self.iv = iv;
            self.cipher = Some(c);
        }

        let offset = out.len();
        out.put_slice(data);
        if let Some(ref mut c) = self.cipher {
            c.update(&mut out[offset..]);
        }

        Ok(out.freeze())
    }

    /// IV of this direction, `None` before the first `encrypt`
    pub fn iv(&self) -> Option<&[u8]> {
        self.cipher.as_ref().map(|_| &self.iv[..])
    }
}

/// Decrypt half of a `CipherSession`
pub struct Decryptor {
    method: CipherType,
    key: Bytes,
    iv: BytesMut,
    cipher: Option<StreamCipherVariant>,
}

impl Decryptor {
    pub fn new(method: CipherType, key: Bytes) -> Decryptor {
        Decryptor {
            method,
            key,
            iv: BytesMut::with_capacity(method.iv_size()),
            cipher: None,
        }
    }

    /// Decrypts a chunk of the incoming stream
    ///
    /// Bytes belonging to the IV are consumed silently, so the result may be empty.
    pub fn decrypt(&mut self, mut data: &[u8]) -> CipherResult<Bytes> {
        if self.cipher.is_none() {
            let iv_len = self.method.iv_size();
            let need = iv_len - self.iv.len();
            let n = need.min(data.len());
            self.iv.put_slice(&data[..n]);
            data = &data[n..];

            if self.iv.len() < iv_len {
                return Ok(Bytes::new());
            }

            let c = new_stream(self.method, &self.key, &self.iv, CryptoMode::Decrypt)?;
            trace!("{} decryptor initialized with iv {:?}", self.method, ByteStr::new(&self.iv));
            self.cipher = Some(c);
        }

        let mut out = BytesMut::from(data);
        if let Some(ref mut c) = self.cipher {
            c.update(&mut out);
        }
        Ok(out.freeze())
    }

    /// IV received from peer, `None` until it is complete
    pub fn iv(&self) -> Option<&[u8]> {
        self.cipher.as_ref().map(|_| &self.iv[..])
    }
}

/// Encrypt and decrypt halves sharing one key
pub struct CipherSession {
    encryptor: Encryptor,
    decryptor: Decryptor,
}

impl CipherSession {
    /// Creates a session with a key already derived by `CipherType::bytes_to_key`
    pub fn new(method: CipherType, key: Bytes) -> CipherSession {
        CipherSession {
            encryptor: Encryptor::new(method, key.clone()),
            decryptor: Decryptor::new(method, key),
        }
    }

    /// Creates a session from password
    pub fn with_password(method: CipherType, password: &str) -> CipherSession {
        CipherSession::new(method, method.bytes_to_key(password.as_bytes()))
    }

    pub fn encrypt(&mut self, data: &[u8]) -> CipherResult<Bytes> {
        self.encryptor.encrypt(data)
    }

    pub fn decrypt(&mut self, data: &[u8]) -> CipherResult<Bytes> {
        self.decryptor.decrypt(data)
    }

    pub fn encrypt_iv(&self) -> Option<&[u8]> {
        self.encryptor.iv()
    }

    pub fn decrypt_iv(&self) -> Option<&[u8]> {
        self.decryptor.iv()
    }

    /// Splits into halves that could be driven from different threads
    pub fn split(self) -> (Encryptor, Decryptor) {
        (self.encryptor, self.decryptor)
    }
}
