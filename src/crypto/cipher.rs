//! Ciphers

use std::{
    fmt::{self, Display},
    io,
    str::FromStr,
};

use bytes::{BufMut, Bytes, BytesMut};
use md5::{Digest, Md5};
use rand::RngCore;

/// Cipher result
pub type CipherResult<T> = Result<T, Error>;

/// Cipher error
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("unknown cipher type \"{0}\"")]
    UnknownCipherType(String),
    #[error("invalid key or iv length for {0}")]
    InvalidLength(CipherType),
}

impl From<Error> for io::Error {
    fn from(e: Error) -> io::Error {
        io::Error::new(io::ErrorKind::Other, e)
    }
}

/// ShadowSocks stream cipher type
#[derive(Clone, Debug, Copy, Eq, PartialEq, Hash)]
pub enum CipherType {
    Aes128Cfb,
    Aes192Cfb,
    Aes256Cfb,

    Camellia128Cfb,
    Camellia192Cfb,
    Camellia256Cfb,

    BfCfb,

    Rc4Md5,

    ChaCha20,
    ChaCha20Ietf,
    Salsa20,
}

#[rustfmt::skip]
const AVAILABLE_CIPHERS: &[(&str, CipherType)] = &[
    ("aes-128-cfb",      CipherType::Aes128Cfb),
    ("aes-192-cfb",      CipherType::Aes192Cfb),
    ("aes-256-cfb",      CipherType::Aes256Cfb),
    ("camellia-128-cfb", CipherType::Camellia128Cfb),
    ("camellia-192-cfb", CipherType::Camellia192Cfb),
    ("camellia-256-cfb", CipherType::Camellia256Cfb),
    ("bf-cfb",           CipherType::BfCfb),
    ("rc4-md5",          CipherType::Rc4Md5),
    ("chacha20",         CipherType::ChaCha20),
    ("chacha20-ietf",    CipherType::ChaCha20Ietf),
    ("salsa20",          CipherType::Salsa20),
];

/// Names of all supported ciphers, in registry order
pub fn available_ciphers() -> impl Iterator<Item = &'static str> {
    AVAILABLE_CIPHERS.iter().map(|(name, _)| *name)
}

impl CipherType {
    /// Symmetric crypto key size
    #[rustfmt::skip]
    pub fn key_size(self) -> usize {
        match self {
            CipherType::Aes128Cfb | CipherType::Camellia128Cfb => 16,
            CipherType::Aes192Cfb | CipherType::Camellia192Cfb => 24,
            CipherType::Aes256Cfb | CipherType::Camellia256Cfb => 32,
            CipherType::BfCfb                                  => 16,
            CipherType::Rc4Md5                                 => 16,
            CipherType::ChaCha20
            | CipherType::ChaCha20Ietf
            | CipherType::Salsa20                              => 32,
        }
    }

    /// Symmetric crypto initialize vector size
    #[rustfmt::skip]
    pub fn iv_size(self) -> usize {
        match self {
            CipherType::Aes128Cfb
            | CipherType::Aes192Cfb
            | CipherType::Aes256Cfb
            | CipherType::Camellia128Cfb
            | CipherType::Camellia192Cfb
            | CipherType::Camellia256Cfb => 16,
            CipherType::BfCfb            => 8,
            CipherType::Rc4Md5           => 16,
            CipherType::ChaCha20         => 8,
            CipherType::ChaCha20Ietf     => 12,
            CipherType::Salsa20          => 8,
        }
    }

    /// Extends key to match the required key length
    ///
    /// `EVP_BytesToKey` with MD5 and no salt, which is what every shadowsocks
    /// implementation uses for stream ciphers.
    pub fn bytes_to_key(self, key: &[u8]) -> Bytes {
        let key_len = self.key_size();
        let digest_len = Md5::output_size();

        let total_loop = (key_len + digest_len - 1) / digest_len;
        let mut result = BytesMut::with_capacity(total_loop * digest_len);

        let mut last: Option<Vec<u8>> = None;
        for _ in 0..total_loop {
            let mut digest = Md5::new();
            if let Some(ref prev) = last {
                digest.update(prev);
            }
            digest.update(key);

            let m = digest.finalize().to_vec();
            result.put_slice(&m);
            last = Some(m);
        }

        result.truncate(key_len);
        result.freeze()
    }

    /// Generate a random initialize vector for this cipher
    pub fn gen_init_vec(self) -> Bytes {
        let mut iv = vec![0u8; self.iv_size()];
        rand::thread_rng().fill_bytes(&mut iv);
        Bytes::from(iv)
    }

    /// Name of this cipher, as accepted by `FromStr`
    pub fn name(self) -> &'static str {
        AVAILABLE_CIPHERS
            .iter()
            .find(|(_, t)| *t == self)
            .map(|(name, _)| *name)
            .unwrap_or("unknown")
    }
}

impl FromStr for CipherType {
    type Err = Error;

    fn from_str(s: &str) -> Result<CipherType, Error> {
        AVAILABLE_CIPHERS
            .iter()
            .find(|(name, _)| *name == s)
            .map(|(_, t)| *t)
            .ok_or_else(|| Error::UnknownCipherType(s.to_owned()))
    }
}

impl Display for CipherType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod test_cipher {
    use super::*;

    #[test]
    fn test_cipher_names() {
        for name in available_ciphers() {
            let t = name.parse::<CipherType>().unwrap();
            assert_eq!(t.to_string(), name);
        }

        assert!(matches!(
            "aes-128-gcm".parse::<CipherType>(),
            Err(Error::UnknownCipherType(..))
        ));
        assert!("".parse::<CipherType>().is_err());
    }

    #[test]
    fn test_bytes_to_key() {
        // md5("foobar")
        let expected = [
            0x38, 0x58, 0xf6, 0x22, 0x30, 0xac, 0x3c, 0x91, 0x5f, 0x30, 0x0c, 0x66, 0x43, 0x12, 0xc6, 0x3f,
        ];

        let key = CipherType::Aes128Cfb.bytes_to_key(b"foobar");
        assert_eq!(&key[..], &expected[..]);

        let key = CipherType::Aes256Cfb.bytes_to_key(b"foobar");
        assert_eq!(key.len(), 32);
        assert_eq!(&key[..16], &expected[..]);

        let mut second = Md5::new();
        second.update(expected);
        second.update(b"foobar");
        assert_eq!(&key[16..], &second.finalize()[..]);

        let key = CipherType::Aes192Cfb.bytes_to_key(b"foobar");
        assert_eq!(key.len(), 24);
    }

    #[test]
    fn test_bytes_to_key_deterministic() {
        for name in available_ciphers() {
            let t = name.parse::<CipherType>().unwrap();
            let k1 = t.bytes_to_key(b"PassWORD");
            let k2 = t.bytes_to_key(b"PassWORD");
            assert_eq!(k1, k2);
            assert_eq!(k1.len(), t.key_size());
        }
    }

    #[test]
    fn test_gen_init_vec() {
        let t = CipherType::ChaCha20Ietf;
        let iv1 = t.gen_init_vec();
        let iv2 = t.gen_init_vec();
        assert_eq!(iv1.len(), 12);
        assert_eq!(iv2.len(), 12);
        assert_ne!(iv1, iv2);
    }

    #[test]
    fn test_rc4_md5_key_iv() {
        let ty = CipherType::Rc4Md5;
        assert_eq!(ty.key_size(), 16);
        assert_eq!(ty.iv_size(), 16);
    }
}
