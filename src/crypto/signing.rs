//! secp256k1 signing keys shared by the EVM and Tron connectors

use ethereum_types::H160;
use k256::ecdsa::SigningKey;

use crate::chains::abi::keccak256;
use crate::error::ChainError;

/// Recoverable ECDSA signature split into its components.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoverableSignature {
    pub r: [u8; 32],
    pub s: [u8; 32],
    /// Recovery id (0 or 1)
    pub recid: u8,
}

impl RecoverableSignature {
    /// r ‖ s ‖ (recid + 27), the layout Tron nodes accept.
    pub fn to_rsv_bytes(&self) -> [u8; 65] {
        let mut out = [0u8; 65];
        out[..32].copy_from_slice(&self.r);
        out[32..64].copy_from_slice(&self.s);
        out[64] = self.recid + 27;
        out
    }
}

/// Private key of a chain signer.
pub struct SignerKey {
    key: SigningKey,
}

impl SignerKey {
    /// Parses a 32-byte hex private key (0x prefix optional).
    pub fn from_hex(value: &str) -> Result<Self, ChainError> {
        let trimmed = value.trim();
        let stripped = trimmed.strip_prefix("0x").unwrap_or(trimmed);
        let bytes = hex::decode(stripped)
            .map_err(|e| ChainError::Signing(format!("private key is not hex: {}", e)))?;
        if bytes.len() != 32 {
            return Err(ChainError::Signing(format!(
                "private key must be 32 bytes, got {}",
                bytes.len()
            )));
        }
        let key = SigningKey::from_slice(&bytes)
            .map_err(|e| ChainError::Signing(format!("invalid private key: {}", e)))?;
        Ok(Self { key })
    }

    /// Last 20 bytes of keccak256 over the uncompressed public key.
    ///
    /// EVM address; Tron prefixes the same bytes with 0x41.
    pub fn address_bytes(&self) -> H160 {
        let point = self.key.verifying_key().to_encoded_point(false);
        let hash = keccak256(&point.as_bytes()[1..]);
        H160::from_slice(&hash[12..])
    }

    pub fn sign_prehash(&self, digest: &[u8; 32]) -> Result<RecoverableSignature, ChainError> {
        let (signature, recid) = self
            .key
            .sign_prehash_recoverable(digest)
            .map_err(|e| ChainError::Signing(e.to_string()))?;
        let bytes = signature.to_bytes();
        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&bytes[..32]);
        s.copy_from_slice(&bytes[32..]);
        Ok(RecoverableSignature {
            r,
            s,
            recid: recid.to_byte(),
        })
    }
}

impl std::fmt::Debug for SignerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SignerKey({:?})", self.address_bytes())
    }
}
