//! Stream ciphers

use aes::{Aes128, Aes192, Aes256};
use blowfish::Blowfish;
use camellia::{Camellia128, Camellia192, Camellia256};
use chacha20::{ChaCha20, ChaCha20Legacy};
use cipher::{KeyIvInit, StreamCipher as _};
use salsa20::Salsa20;

use super::{
    cfb::CfbCipher,
    cipher::{CipherResult, CipherType, Error},
    rc4_md5::Rc4Md5Cipher,
    CryptoMode,
};

/// Basic operation of Cipher, which is a Symmetric Cipher.
///
/// The `update` method transforms `data` in place and could be called multiple times,
/// each call continues the key stream of the previous one.
pub trait StreamCipher {
    fn update(&mut self, data: &mut [u8]);
}

/// Pure key stream cipher (ChaCha20 / Salsa20 family)
///
/// Encryption and decryption are the same operation.
pub struct KeyStreamCipher<C> {
    crypto: C,
}

impl<C> KeyStreamCipher<C>
where
    C: KeyIvInit + cipher::StreamCipher,
{
    pub fn new(t: CipherType, key: &[u8], iv: &[u8]) -> CipherResult<KeyStreamCipher<C>> {
        let crypto = C::new_from_slices(key, iv).map_err(|_| Error::InvalidLength(t))?;
        Ok(KeyStreamCipher { crypto })
    }
}

impl<C> StreamCipher for KeyStreamCipher<C>
where
    C: cipher::StreamCipher,
{
    fn update(&mut self, data: &mut [u8]) {
        self.crypto.apply_keystream(data);
    }
}

macro_rules! define_stream_ciphers {
    ($($name:ident => $cipher:ty,)+) => {
        /// Variant cipher which contains all possible ciphers
        pub enum StreamCipherVariant {
            $(
                $name($cipher),
            )+
        }

        impl StreamCipherVariant {
            /// Creates from an actual cipher
            pub fn new<C>(cipher: C) -> StreamCipherVariant
                where StreamCipherVariant: From<C>
            {
                From::from(cipher)
            }
        }

        impl StreamCipher for StreamCipherVariant {
            fn update(&mut self, data: &mut [u8]) {
                match *self {
                    $(
                        StreamCipherVariant::$name(ref mut cipher) => cipher.update(data),
                    )+
                }
            }
        }

        $(
            impl From<$cipher> for StreamCipherVariant {
                fn from(cipher: $cipher) -> StreamCipherVariant {
                    StreamCipherVariant::$name(cipher)
                }
            }
        )+
    }
}

define_stream_ciphers! {
    Aes128Cfb => CfbCipher<Aes128>,
    Aes192Cfb => CfbCipher<Aes192>,
    Aes256Cfb => CfbCipher<Aes256>,
    Camellia128Cfb => CfbCipher<Camellia128>,
    Camellia192Cfb => CfbCipher<Camellia192>,
    Camellia256Cfb => CfbCipher<Camellia256>,
    BfCfb => CfbCipher<Blowfish>,
    Rc4Md5 => Rc4Md5Cipher,
    ChaCha20 => KeyStreamCipher<ChaCha20Legacy>,
    ChaCha20Ietf => KeyStreamCipher<ChaCha20>,
    Salsa20 => KeyStreamCipher<Salsa20>,
}

/// Generate a specific Cipher with key and initialize vector
pub fn new_stream(t: CipherType, key: &[u8], iv: &[u8], mode: CryptoMode) -> CipherResult<StreamCipherVariant> {
    let cipher = match t {
        CipherType::Aes128Cfb => StreamCipherVariant::new(CfbCipher::<Aes128>::new(t, key, iv, mode)?),
        CipherType::Aes192Cfb => StreamCipherVariant::new(CfbCipher::<Aes192>::new(t, key, iv, mode)?),
        CipherType::Aes256Cfb => StreamCipherVariant::new(CfbCipher::<Aes256>::new(t, key, iv, mode)?),
        CipherType::Camellia128Cfb => StreamCipherVariant::new(CfbCipher::<Camellia128>::new(t, key, iv, mode)?),
        CipherType::Camellia192Cfb => StreamCipherVariant::new(CfbCipher::<Camellia192>::new(t, key, iv, mode)?),
        CipherType::Camellia256Cfb => StreamCipherVariant::new(CfbCipher::<Camellia256>::new(t, key, iv, mode)?),
        CipherType::BfCfb => StreamCipherVariant::new(CfbCipher::<Blowfish>::new(t, key, iv, mode)?),

        CipherType::Rc4Md5 => StreamCipherVariant::new(Rc4Md5Cipher::new(key, iv)),

        CipherType::ChaCha20 => StreamCipherVariant::new(KeyStreamCipher::<ChaCha20Legacy>::new(t, key, iv)?),
        CipherType::ChaCha20Ietf => StreamCipherVariant::new(KeyStreamCipher::<ChaCha20>::new(t, key, iv)?),
        CipherType::Salsa20 => StreamCipherVariant::new(KeyStreamCipher::<Salsa20>::new(t, key, iv)?),
    };

    Ok(cipher)
}
