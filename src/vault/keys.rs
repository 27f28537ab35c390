//! Account key material.
//!
//! Each non-watch-only account owns two keypairs derived from its
//! BIP39 seed by domain-separated SHA-256:
//!
//! - an Ed25519 signing key (transactions, events)
//! - an X25519 agreement key (ECDH message encryption)
//!
//! The account id is a pure function of the signing public key, so it
//! can be recomputed anywhere without touching secrets.

use bip39::{Language, Mnemonic};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use x25519_dalek::{PublicKey as AgreementPublicKey, StaticSecret};

use super::error::{VaultError, VaultResult};

/// Domain-separation prefixes for seed -> key expansion.
const SIGNING_KEY_DOMAIN: &[u8] = b"wvc:sign:v1";
const AGREEMENT_KEY_DOMAIN: &[u8] = b"wvc:agree:v1";

pub const PUBLIC_KEY_LEN: usize = 32;
pub const SIGNATURE_LEN: usize = 64;

/// Both keypairs of one account, in memory only for the duration of
/// the operation that derived them.
pub struct AccountKeys {
    pub signing: SigningKey,
    pub agreement: StaticSecret,
}

impl AccountKeys {
    pub fn public_key(&self) -> [u8; PUBLIC_KEY_LEN] {
        self.signing.verifying_key().to_bytes()
    }

    pub fn agreement_public_key(&self) -> [u8; PUBLIC_KEY_LEN] {
        AgreementPublicKey::from(&self.agreement).to_bytes()
    }
}

/// Generate a new 24-word mnemonic from 256 bits of OS entropy.
pub fn generate_mnemonic() -> VaultResult<String> {
    let mut entropy = [0u8; 32];
    OsRng.fill_bytes(&mut entropy);

    let mnemonic = Mnemonic::from_entropy_in(Language::English, &entropy)
        .map_err(|e| VaultError::InvalidKeyMaterial(format!("entropy: {e}")))?;

    Ok(mnemonic.words().collect::<Vec<&str>>().join(" "))
}

/// Parse and checksum-validate a mnemonic phrase.
pub fn parse_mnemonic(phrase: &str) -> VaultResult<Mnemonic> {
    Mnemonic::parse_in(Language::English, phrase)
        .map_err(|e| VaultError::InvalidKeyMaterial(format!("mnemonic: {e}")))
}

/// Derive both account keypairs from a mnemonic phrase.
pub fn derive_account_keys(phrase: &str) -> VaultResult<AccountKeys> {
    let mnemonic = parse_mnemonic(phrase)?;
    let seed = mnemonic.to_seed("");

    let signing_seed = expand_seed(SIGNING_KEY_DOMAIN, &seed);
    let agreement_seed = expand_seed(AGREEMENT_KEY_DOMAIN, &seed);

    Ok(AccountKeys {
        signing: SigningKey::from_bytes(&signing_seed),
        agreement: StaticSecret::from(agreement_seed),
    })
}

/// Build account keys from a raw 32-byte signing seed (private-key
/// import). The agreement key is expanded from the same seed so an
/// imported account can still decrypt messages.
pub fn keys_from_signing_seed(seed: &[u8; 32]) -> AccountKeys {
    let agreement_seed = expand_seed(AGREEMENT_KEY_DOMAIN, seed);
    AccountKeys {
        signing: SigningKey::from_bytes(seed),
        agreement: StaticSecret::from(agreement_seed),
    }
}

fn expand_seed(domain: &[u8], seed: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(domain);
    hasher.update(seed);
    hasher.finalize().into()
}

/// Account id: u64 read from the first 8 little-endian bytes of
/// SHA-256(public key), rendered in decimal.
pub fn account_id_from_public_key(public_key: &[u8; PUBLIC_KEY_LEN]) -> String {
    let digest = Sha256::digest(public_key);
    let mut id_bytes = [0u8; 8];
    id_bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(id_bytes).to_string()
}

/// Parse hex-encoded 32-byte key material, public or secret.
pub fn parse_key_bytes(hex_key: &str) -> VaultResult<[u8; 32]> {
    let bytes =
        hex::decode(hex_key).map_err(|e| VaultError::InvalidKeyMaterial(format!("hex: {e}")))?;
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| VaultError::InvalidKeyMaterial("key must be 32 bytes".into()))
}

/// Parse a hex-encoded 32-byte public key.
pub fn parse_public_key(hex_key: &str) -> VaultResult<[u8; PUBLIC_KEY_LEN]> {
    parse_key_bytes(hex_key)
}

/// Sign a message with the account signing key.
pub fn sign(signing_key: &SigningKey, message: &[u8]) -> [u8; SIGNATURE_LEN] {
    signing_key.sign(message).to_bytes()
}

/// Verify an Ed25519 signature against a public key.
pub fn verify(
    public_key: &[u8; PUBLIC_KEY_LEN],
    message: &[u8],
    signature: &[u8; SIGNATURE_LEN],
) -> VaultResult<()> {
    let key = VerifyingKey::from_bytes(public_key)
        .map_err(|e| VaultError::InvalidKeyMaterial(format!("verifying key: {e}")))?;
    let sig = Signature::from_bytes(signature);
    key.verify(message, &sig)
        .map_err(|_| VaultError::SignatureInvalid)
}

/// X25519 ECDH shared secret between our agreement key and a peer's
/// agreement public key.
pub fn derive_shared_secret(
    our_secret: &StaticSecret,
    their_public_key: &[u8; PUBLIC_KEY_LEN],
) -> [u8; 32] {
    let their_public = AgreementPublicKey::from(*their_public_key);
    *our_secret.diffie_hellman(&their_public).as_bytes()
}

/// Encrypt a message for a peer: ECDH shared secret as AES-256-GCM key,
/// random nonce prepended to the ciphertext.
pub fn encrypt_message(
    our_secret: &StaticSecret,
    their_public_key: &[u8; PUBLIC_KEY_LEN],
    plaintext: &[u8],
) -> VaultResult<Vec<u8>> {
    use aes_gcm::aead::{Aead, KeyInit};
    use aes_gcm::{Aes256Gcm, Nonce};

    let shared = derive_shared_secret(our_secret, their_public_key);
    let cipher =
        Aes256Gcm::new_from_slice(&shared).map_err(|e| VaultError::Encryption(e.to_string()))?;

    let mut nonce_bytes = [0u8; 12];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| VaultError::Encryption(e.to_string()))?;

    let mut result = nonce_bytes.to_vec();
    result.extend(ciphertext);
    Ok(result)
}

/// Decrypt a message produced by [`encrypt_message`] on the other side.
pub fn decrypt_message(
    our_secret: &StaticSecret,
    their_public_key: &[u8; PUBLIC_KEY_LEN],
    data: &[u8],
) -> VaultResult<Vec<u8>> {
    use aes_gcm::aead::{Aead, KeyInit};
    use aes_gcm::{Aes256Gcm, Nonce};

    if data.len() < 12 {
        return Err(VaultError::DecryptionFailed);
    }

    let shared = derive_shared_secret(our_secret, their_public_key);
    let cipher =
        Aes256Gcm::new_from_slice(&shared).map_err(|e| VaultError::Encryption(e.to_string()))?;

    let (nonce_bytes, ciphertext) = data.split_at(12);
    let nonce = Nonce::from_slice(nonce_bytes);

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| VaultError::DecryptionFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_mnemonic_is_24_words() {
        let phrase = generate_mnemonic().unwrap();
        assert_eq!(phrase.split_whitespace().count(), 24);
        assert!(parse_mnemonic(&phrase).is_ok());
    }

    #[test]
    fn test_invalid_mnemonic_rejected() {
        let err = parse_mnemonic("not a real phrase at all").unwrap_err();
        assert!(matches!(err, VaultError::InvalidKeyMaterial(_)));
    }

    #[test]
    fn test_key_derivation_deterministic() {
        let phrase = generate_mnemonic().unwrap();
        let keys1 = derive_account_keys(&phrase).unwrap();
        let keys2 = derive_account_keys(&phrase).unwrap();

        assert_eq!(keys1.public_key(), keys2.public_key());
        assert_eq!(keys1.agreement_public_key(), keys2.agreement_public_key());
        // Signing and agreement keys must not collide.
        assert_ne!(keys1.public_key(), keys1.agreement_public_key());
    }

    #[test]
    fn test_account_id_is_pure_function_of_public_key() {
        let keys = derive_account_keys(&generate_mnemonic().unwrap()).unwrap();
        let pk = keys.public_key();
        assert_eq!(
            account_id_from_public_key(&pk),
            account_id_from_public_key(&pk)
        );
        // Decimal digits only.
        assert!(account_id_from_public_key(&pk)
            .chars()
            .all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn test_parse_key_bytes_enforces_shape() {
        assert!(parse_key_bytes(&"aa".repeat(32)).is_ok());
        assert!(matches!(
            parse_key_bytes("not hex").unwrap_err(),
            VaultError::InvalidKeyMaterial(_)
        ));
        assert!(matches!(
            parse_key_bytes("aabb").unwrap_err(),
            VaultError::InvalidKeyMaterial(_)
        ));
    }

    #[test]
    fn test_sign_and_verify() {
        let keys = derive_account_keys(&generate_mnemonic().unwrap()).unwrap();
        let sig = sign(&keys.signing, b"payload");
        assert!(verify(&keys.public_key(), b"payload", &sig).is_ok());

        let err = verify(&keys.public_key(), b"tampered", &sig).unwrap_err();
        assert!(matches!(err, VaultError::SignatureInvalid));
    }

    #[test]
    fn test_ecdh_message_roundtrip() {
        let alice = derive_account_keys(&generate_mnemonic().unwrap()).unwrap();
        let bob = derive_account_keys(&generate_mnemonic().unwrap()).unwrap();

        let ciphertext = encrypt_message(
            &alice.agreement,
            &bob.agreement_public_key(),
            b"hello bob",
        )
        .unwrap();

        let plaintext = decrypt_message(
            &bob.agreement,
            &alice.agreement_public_key(),
            &ciphertext,
        )
        .unwrap();

        assert_eq!(plaintext, b"hello bob");
    }

    #[test]
    fn test_wrong_recipient_cannot_decrypt() {
        let alice = derive_account_keys(&generate_mnemonic().unwrap()).unwrap();
        let bob = derive_account_keys(&generate_mnemonic().unwrap()).unwrap();
        let eve = derive_account_keys(&generate_mnemonic().unwrap()).unwrap();

        let ciphertext =
            encrypt_message(&alice.agreement, &bob.agreement_public_key(), b"secret").unwrap();

        let err = decrypt_message(&eve.agreement, &alice.agreement_public_key(), &ciphertext)
            .unwrap_err();
        assert!(matches!(err, VaultError::DecryptionFailed));
    }

    #[test]
    fn test_private_key_import_matches_direct_derivation() {
        let phrase = generate_mnemonic().unwrap();
        let derived = derive_account_keys(&phrase).unwrap();
        let seed = derived.signing.to_bytes();

        let imported = keys_from_signing_seed(&seed);
        assert_eq!(imported.public_key(), derived.public_key());
    }
}
