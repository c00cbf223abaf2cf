//! Rc4Md5 cipher definition

use cipher::{consts::U16, KeyInit, StreamCipher as _};
use md5::{Digest, Md5};
use rc4::Rc4;

use super::stream::StreamCipher;

/// RC4 keyed with `MD5(key || iv)`
pub struct Rc4Md5Cipher {
    crypto: Rc4<U16>,
}

impl Rc4Md5Cipher {
    pub fn new(key: &[u8], iv: &[u8]) -> Rc4Md5Cipher {
        let mut md5_digest = Md5::new();
        md5_digest.update(key);
        md5_digest.update(iv);
        let key = md5_digest.finalize();

        Rc4Md5Cipher { crypto: Rc4::new(&key) }
    }
}

impl StreamCipher for Rc4Md5Cipher {
    fn update(&mut self, data: &mut [u8]) {
        self.crypto.apply_keystream(data);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::crypto::CipherType;

    #[test]
    fn test_rc4_md5_cipher() {
        let msg = b"abcd1234";
        let key = b"key";

        let t = CipherType::Rc4Md5;
        let iv = t.gen_init_vec();

        let mut enc = Rc4Md5Cipher::new(key, &iv[..]);
        let mut data = msg.to_vec();
        enc.update(&mut data);
        assert_ne!(&data[..], &msg[..]);

        let mut dec = Rc4Md5Cipher::new(key, &iv[..]);
        dec.update(&mut data[..2]);
        dec.update(&mut data[2..]);

        assert_eq!(&msg[..], &data[..]);
    }

    #[test]
    fn test_rc4_md5_iv_changes_keystream() {
        let key = b"key";
        let mut a = [0u8; 16];
        let mut b = [0u8; 16];
        Rc4Md5Cipher::new(key, &[1u8; 16]).update(&mut a);
        Rc4Md5Cipher::new(key, &[2u8; 16]).update(&mut b);
        assert_ne!(a, b);
    }
}
