use argon2::password_hash::{rand_core::OsRng, SaltString};
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use base64::{engine::general_purpose, Engine as _};
use ring::rand::{SecureRandom, SystemRandom};

use crate::core::error::{AppError, AppResult};

const CODE_MIN: u32 = 100_000;
const CODE_SPAN: u32 = 900_000;

/// Join codes skip look-alike characters (0/O, 1/I/L) since students type them.
const JOIN_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";
pub const JOIN_CODE_LEN: usize = 8;

pub struct CryptoService {
    rng: SystemRandom,
}

impl CryptoService {
    pub fn new() -> Self {
        Self {
            rng: SystemRandom::new(),
        }
    }

    fn random_u32(&self) -> AppResult<u32> {
        let mut bytes = [0u8; 4];
        self.rng
            .fill(&mut bytes)
            .map_err(|e| AppError::Crypto(format!("Failed to generate random bytes: {}", e)))?;
        Ok(u32::from_le_bytes(bytes))
    }

    /// Uniform integer in `0..span`, rejecting draws that would bias the modulo.
    fn random_below(&self, span: u32) -> AppResult<u32> {
        let zone = u32::MAX - (u32::MAX % span);
        loop {
            let value = self.random_u32()?;
            if value < zone {
                return Ok(value % span);
            }
        }
    }

    /// Six decimal digits in `100000..=999999`.
    pub fn generate_verification_code(&self) -> AppResult<String> {
        let code = CODE_MIN + self.random_below(CODE_SPAN)?;
        Ok(code.to_string())
    }

    pub fn generate_join_code(&self) -> AppResult<String> {
        let span = JOIN_CODE_ALPHABET.len() as u32;
        (0..JOIN_CODE_LEN)
            .map(|_| {
                self.random_below(span)
                    .map(|index| JOIN_CODE_ALPHABET[index as usize] as char)
            })
            .collect()
    }

    /// Hash a password using Argon2
    pub fn hash_password(&self, password: &str) -> AppResult<String> {
        let salt = SaltString::generate(&mut OsRng);
        let argon2 = Argon2::default();

        let password_hash = argon2
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| AppError::Crypto(format!("Password hashing failed: {}", e)))?;

        Ok(password_hash.to_string())
    }

    /// Verify a password against its hash
    pub fn verify_password(&self, password: &str, hash: &str) -> AppResult<bool> {
        let parsed_hash = PasswordHash::new(hash)
            .map_err(|e| AppError::Crypto(format!("Invalid password hash: {}", e)))?;

        Ok(Argon2::default()
            .verify_password(password.as_bytes(), &parsed_hash)
            .is_ok())
    }

    /// Generate a random session token
    pub fn generate_token(&self) -> AppResult<String> {
        let mut token_bytes = [0u8; 32];
        self.rng
            .fill(&mut token_bytes)
            .map_err(|e| AppError::Crypto(format!("Failed to generate token: {}", e)))?;

        Ok(general_purpose::URL_SAFE_NO_PAD.encode(token_bytes))
    }

    /// Hash data using SHA-256
    pub fn hash_data(&self, data: &str) -> String {
        use ring::digest;
        let digest = digest::digest(&digest::SHA256, data.as_bytes());
        general_purpose::STANDARD.encode(digest.as_ref())
    }
}

impl Default for CryptoService {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verification_codes_are_six_digits_in_range() {
        let crypto = CryptoService::new();
        for _ in 0..2_000 {
            let code = crypto.generate_verification_code().unwrap();
            assert_eq!(code.len(), 6);
            assert!(code.bytes().all(|b| b.is_ascii_digit()));
            let value: u32 = code.parse().unwrap();
            assert!((100_000..=999_999).contains(&value));
        }
    }

    #[test]
    fn join_codes_use_the_unambiguous_alphabet() {
        let crypto = CryptoService::new();
        let code = crypto.generate_join_code().unwrap();
        assert_eq!(code.len(), JOIN_CODE_LEN);
        assert!(code.bytes().all(|b| JOIN_CODE_ALPHABET.contains(&b)));
    }

    #[test]
    fn password_round_trip() {
        let crypto = CryptoService::new();
        let hash = crypto.hash_password("crayons").unwrap();
        assert!(crypto.verify_password("crayons", &hash).unwrap());
        assert!(!crypto.verify_password("markers", &hash).unwrap());
    }

    #[test]
    fn tokens_are_unique_and_hash_deterministically() {
        let crypto = CryptoService::new();
        let a = crypto.generate_token().unwrap();
        let b = crypto.generate_token().unwrap();
        assert_ne!(a, b);
        assert_eq!(crypto.hash_data(&a), crypto.hash_data(&a));
        assert_ne!(crypto.hash_data(&a), crypto.hash_data(&b));
    }
}
