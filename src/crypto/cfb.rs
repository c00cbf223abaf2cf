//! Block ciphers running in 128-bit (or 64-bit for Blowfish) CFB mode

use cfb_mode::{BufDecryptor, BufEncryptor};
use cipher::{BlockCipher, BlockEncryptMut, InnerIvInit, KeyInit};

use super::{
    cipher::{CipherResult, CipherType, Error},
    stream::StreamCipher,
    CryptoMode,
};

/// CFB stream over block cipher `C`
///
/// CFB keeps partial blocks internally, so the stream could be fed with chunks of any size.
pub enum CfbCipher<C>
where
    C: BlockEncryptMut + BlockCipher,
{
    Encrypt(BufEncryptor<C>),
    Decrypt(BufDecryptor<C>),
}

impl<C> CfbCipher<C>
where
    C: BlockEncryptMut + BlockCipher + KeyInit,
{
    pub fn new(t: CipherType, key: &[u8], iv: &[u8], mode: CryptoMode) -> CipherResult<CfbCipher<C>> {
        let block = C::new_from_slice(key).map_err(|_| Error::InvalidLength(t))?;

        let cipher = match mode {
            CryptoMode::Encrypt => {
                CfbCipher::Encrypt(BufEncryptor::inner_iv_slice_init(block, iv).map_err(|_| Error::InvalidLength(t))?)
            }
            CryptoMode::Decrypt => {
                CfbCipher::Decrypt(BufDecryptor::inner_iv_slice_init(block, iv).map_err(|_| Error::InvalidLength(t))?)
            }
        };

        Ok(cipher)
    }
}

impl<C> StreamCipher for CfbCipher<C>
where
    C: BlockEncryptMut + BlockCipher,
{
    fn update(&mut self, data: &mut [u8]) {
        match *self {
            CfbCipher::Encrypt(ref mut c) => c.encrypt(data),
            CfbCipher::Decrypt(ref mut c) => c.decrypt(data),
        }
    }
}

#[cfg(test)]
mod test {
    use aes::Aes128;
    use blowfish::Blowfish;

    use super::*;

    const NIST_KEY: [u8; 16] = [
        0x2b, 0x7e, 0x15, 0x16, 0x28, 0xae, 0xd2, 0xa6, 0xab, 0xf7, 0x15, 0x88, 0x09, 0xcf, 0x4f, 0x3c,
    ];
    const NIST_IV: [u8; 16] = [
        0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d, 0x0e, 0x0f,
    ];
    const NIST_PLAIN: [u8; 32] = [
        0x6b, 0xc1, 0xbe, 0xe2, 0x2e, 0x40, 0x9f, 0x96, 0xe9, 0x3d, 0x7e, 0x11, 0x73, 0x93, 0x17, 0x2a, //
        0xae, 0x2d, 0x8a, 0x57, 0x1e, 0x03, 0xac, 0x9c, 0x9e, 0xb7, 0x6f, 0xac, 0x45, 0xaf, 0x8e, 0x51,
    ];
    const NIST_CIPHER: [u8; 32] = [
        0x3b, 0x3f, 0xd9, 0x2e, 0xb7, 0x2d, 0xad, 0x20, 0x33, 0x34, 0x49, 0xf8, 0xe8, 0x3c, 0xfb, 0x4a, //
        0xc8, 0xa6, 0x45, 0x37, 0xa0, 0xb3, 0xa9, 0x3f, 0xcd, 0xe3, 0xcd, 0xad, 0x9f, 0x1c, 0xe5, 0x8b,
    ];

    #[test]
    fn test_aes_128_cfb_nist_vector() {
        let mut enc = CfbCipher::<Aes128>::new(CipherType::Aes128Cfb, &NIST_KEY, &NIST_IV, CryptoMode::Encrypt).unwrap();

        // Uneven chunks must produce the same stream as one shot
        let mut data = NIST_PLAIN;
        let (a, rest) = data.split_at_mut(5);
        let (b, c) = rest.split_at_mut(17);
        enc.update(a);
        enc.update(b);
        enc.update(c);
        assert_eq!(data, NIST_CIPHER);

        let mut dec = CfbCipher::<Aes128>::new(CipherType::Aes128Cfb, &NIST_KEY, &NIST_IV, CryptoMode::Decrypt).unwrap();
        dec.update(&mut data);
        assert_eq!(data, NIST_PLAIN);
    }

    #[test]
    fn test_blowfish_cfb() {
        let key = CipherType::BfCfb.bytes_to_key(b"key");
        let iv = CipherType::BfCfb.gen_init_vec();

        let mut enc = CfbCipher::<Blowfish>::new(CipherType::BfCfb, &key, &iv, CryptoMode::Encrypt).unwrap();
        let mut dec = CfbCipher::<Blowfish>::new(CipherType::BfCfb, &key, &iv, CryptoMode::Decrypt).unwrap();

        let message = b"the quick brown fox jumps over the lazy dog";
        let mut data = message.to_vec();
        enc.update(&mut data);
        assert_ne!(&data[..], &message[..]);
        dec.update(&mut data[..3]);
        dec.update(&mut data[3..]);
        assert_eq!(&data[..], &message[..]);
    }

    #[test]
    fn test_invalid_iv_length() {
        let r = CfbCipher::<Aes128>::new(CipherType::Aes128Cfb, &NIST_KEY, &NIST_IV[..8], CryptoMode::Encrypt);
        assert!(matches!(r, Err(Error::InvalidLength(CipherType::Aes128Cfb))));
    }
}
