//! Crypto methods for shadowsocks

pub use self::{
    cipher::{available_ciphers, CipherResult, CipherType},
    session::{CipherSession, Decryptor, Encryptor},
    stream::{new_stream, StreamCipher, StreamCipherVariant},
};

pub mod cfb;
pub mod cipher;
pub mod rc4_md5;
pub mod session;
pub mod stream;

/// Crypto mode, encrypt or decrypt
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CryptoMode {
    Encrypt,
    Decrypt,
}
