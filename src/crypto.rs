//! Field encryption for outgoing samples.
//!
//! The key is the SHA-256 digest of the shared secret. Each scalar field is
//! encrypted independently with AES-256-CBC and PKCS#7 padding, all four
//! fields of a sample sharing one random IV.

use aes::cipher::{block_padding::Pkcs7, BlockEncryptMut, KeyIvInit};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::sample::Sample;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;

/// Length of the initialization vector in bytes.
pub const IV_LEN: usize = 16;

/// Hex length every encoded field (and the IV) must have.
pub const ENCODED_FIELD_LEN: usize = 32;

/// Wire representation of one sample.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedSample {
    /// Hex-encoded initialization vector
    pub iv: String,

    /// Name of the submitting device, in clear
    pub device_name: String,

    /// Unix timestamp of the fix, in clear
    pub utctime: i64,

    /// Hex-encoded ciphertext of the latitude
    pub lat: String,

    /// Hex-encoded ciphertext of the longitude
    pub lon: String,

    /// Hex-encoded ciphertext of the altitude
    pub alt: String,

    /// Hex-encoded ciphertext of the speed
    pub speed: String,
}

/// An encoded field had an unexpected length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CryptoError {
    pub field: &'static str,
    pub len: usize,
}

impl std::fmt::Display for CryptoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Length error during encryption of '{}': expected {} hex characters, got {}",
            self.field, ENCODED_FIELD_LEN, self.len
        )
    }
}

impl std::error::Error for CryptoError {}

/// Stateless field cipher holding the derived key.
#[derive(Clone)]
pub struct FieldCipher {
    key: [u8; 32],
}

impl std::fmt::Debug for FieldCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldCipher").finish_non_exhaustive()
    }
}

impl FieldCipher {
    /// Derive the key from the shared secret.
    pub fn from_secret(secret: &str) -> Self {
        let digest = Sha256::digest(secret.as_bytes());
        let mut key = [0u8; 32];
        key.copy_from_slice(&digest);
        Self { key }
    }

    /// Encrypt `plaintext` with the given IV.
    pub fn encrypt(&self, iv: &[u8; IV_LEN], plaintext: &[u8]) -> Vec<u8> {
        Aes256CbcEnc::new(&self.key.into(), &(*iv).into())
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext)
    }

    /// Encrypt a sample under a fresh random IV.
    pub fn seal(&self, sample: &Sample, device_name: &str) -> Result<EncryptedSample, CryptoError> {
        let iv: [u8; IV_LEN] = rand::random();
        self.seal_with_iv(&iv, sample, device_name)
    }

    /// Encrypt a sample under `iv`, rejecting any field whose encoding is
    /// not exactly [`ENCODED_FIELD_LEN`] characters.
    pub fn seal_with_iv(
        &self,
        iv: &[u8; IV_LEN],
        sample: &Sample,
        device_name: &str,
    ) -> Result<EncryptedSample, CryptoError> {
        let encode = |field: &'static str, plaintext: &str| -> Result<String, CryptoError> {
            let encoded = hex::encode(self.encrypt(iv, plaintext.as_bytes()));
            check_len(field, encoded)
        };

        Ok(EncryptedSample {
            iv: check_len("iv", hex::encode(iv))?,
            device_name: device_name.to_string(),
            utctime: sample.utctime,
            lat: encode("lat", &sample.lat)?,
            lon: encode("lon", &sample.lon)?,
            alt: encode("alt", &sample.alt)?,
            speed: encode("speed", &sample.speed)?,
        })
    }
}

fn check_len(field: &'static str, encoded: String) -> Result<String, CryptoError> {
    if encoded.len() == ENCODED_FIELD_LEN {
        Ok(encoded)
    } else {
        Err(CryptoError {
            field,
            len: encoded.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aes::cipher::BlockDecryptMut;

    type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

    fn sample() -> Sample {
        Sample {
            lat: "52.52".to_string(),
            lon: "13.405".to_string(),
            alt: "34.0".to_string(),
            speed: "0.0".to_string(),
            utctime: 1_704_067_200,
        }
    }

    fn decrypt(cipher: &FieldCipher, iv: &[u8; IV_LEN], encoded: &str) -> String {
        let ciphertext = hex::decode(encoded).unwrap();
        let plaintext = Aes256CbcDec::new(&cipher.key.into(), &(*iv).into())
            .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
            .unwrap();
        String::from_utf8(plaintext).unwrap()
    }

    #[test]
    fn test_key_is_sha256_of_secret() {
        let cipher = FieldCipher::from_secret("abc");
        assert_eq!(
            hex::encode(cipher.key),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_encrypt_pads_to_block_size() {
        let cipher = FieldCipher::from_secret("secret");
        let iv = [7u8; IV_LEN];

        assert_eq!(cipher.encrypt(&iv, b"52.52").len(), 16);
        assert_eq!(cipher.encrypt(&iv, b"12345678901234").len(), 16);
        // A full block of plaintext gets a full block of padding.
        assert_eq!(cipher.encrypt(&iv, b"1234567890123456").len(), 32);
    }

    #[test]
    fn test_seal_round_trips_through_decryption() {
        let cipher = FieldCipher::from_secret("secret");
        let iv = [3u8; IV_LEN];

        let sealed = cipher.seal_with_iv(&iv, &sample(), "tracker-1").unwrap();
        assert_eq!(sealed.iv, "03".repeat(16));
        assert_eq!(sealed.device_name, "tracker-1");
        assert_eq!(sealed.utctime, 1_704_067_200);
        assert_eq!(decrypt(&cipher, &iv, &sealed.lat), "52.52");
        assert_eq!(decrypt(&cipher, &iv, &sealed.lon), "13.405");
        assert_eq!(decrypt(&cipher, &iv, &sealed.alt), "34.0");
        assert_eq!(decrypt(&cipher, &iv, &sealed.speed), "0.0");
    }

    #[test]
    fn test_seal_uses_fresh_iv() {
        let cipher = FieldCipher::from_secret("secret");
        let first = cipher.seal(&sample(), "tracker-1").unwrap();
        let second = cipher.seal(&sample(), "tracker-1").unwrap();

        assert_eq!(first.iv.len(), ENCODED_FIELD_LEN);
        assert_ne!(first.iv, second.iv);
        assert_ne!(first.lat, second.lat);
    }

    #[test]
    fn test_seal_rejects_oversized_field() {
        let cipher = FieldCipher::from_secret("secret");
        let mut oversized = sample();
        oversized.alt = "1234567890.123456".to_string();

        let err = cipher.seal(&oversized, "tracker-1").unwrap_err();
        assert_eq!(err, CryptoError { field: "alt", len: 64 });
    }

    #[test]
    fn test_wire_shape() {
        let cipher = FieldCipher::from_secret("secret");
        let sealed = cipher.seal(&sample(), "tracker-1").unwrap();
        let value = serde_json::to_value(&sealed).unwrap();

        for key in ["iv", "device_name", "utctime", "lat", "lon", "alt", "speed"] {
            assert!(value.get(key).is_some(), "missing {}", key);
        }
        assert_eq!(value["utctime"], serde_json::json!(1_704_067_200));
    }

    #[test]
    fn test_debug_hides_key() {
        let cipher = FieldCipher::from_secret("secret");
        let debug = format!("{:?}", cipher);
        assert!(!debug.contains("key"));
    }
}
