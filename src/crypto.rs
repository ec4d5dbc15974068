/// Key handling and signing
///
/// Implements secp256k1-based signing for documents and tokens: key
/// loading, CCID derivation, detached signatures, and compact JWT assembly.
use crate::error::{ClientError, ClientResult};
use crate::model::ids;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use k256::ecdsa::{signature::Signer, Signature, SigningKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::SecretKey;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A loaded signing key and its derived identity
#[derive(Clone)]
pub struct KeyPair {
    signing_key: SigningKey,
    /// Compressed SEC1 public key bytes
    public_key: Vec<u8>,
    ccid: String,
}

impl KeyPair {
    /// Load a key pair from a hex-encoded 32-byte private key
    pub fn from_private_key(hex_key: &str) -> ClientResult<Self> {
        let key_bytes = hex::decode(hex_key.trim())
            .map_err(|e| ClientError::InvalidKey(format!("invalid hex: {}", e)))?;

        let secret_key = SecretKey::from_slice(&key_bytes)
            .map_err(|e| ClientError::InvalidKey(format!("invalid private key: {}", e)))?;

        let signing_key = SigningKey::from(secret_key);
        let public_key = signing_key
            .verifying_key()
            .to_encoded_point(true)
            .as_bytes()
            .to_vec();
        let ccid = compute_ccid(&public_key);

        Ok(Self {
            signing_key,
            public_key,
            ccid,
        })
    }

    /// CCID derived from this key's public half
    pub fn ccid(&self) -> &str {
        &self.ccid
    }

    /// Compressed public key bytes
    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    /// Produce a detached signature over `data`
    ///
    /// Returns a hex-encoded 64-byte compact ECDSA signature.
    pub fn sign(&self, data: &str) -> String {
        let signature: Signature = self.signing_key.sign(data.as_bytes());
        hex::encode(signature.to_bytes())
    }
}

/// Derive a CCID from a compressed public key
///
/// `con1` followed by 38 lowercase hex characters of the key's SHA-256
/// digest: 42 characters total, never containing `.`.
pub fn compute_ccid(public_key: &[u8]) -> String {
    let digest = Sha256::digest(public_key);
    format!("con1{}", hex::encode(&digest[..19]))
}

/// A parsed sub-key credential
#[derive(Clone)]
pub struct SubKey {
    pub domain: String,
    pub ccid: String,
    pub ckid: String,
    pub keypair: KeyPair,
}

/// Parse a sub-key blob
///
/// Expected shape: `concurrent-subkey <secret-hex> <ccid> <ckid>@<domain>`.
pub fn parse_subkey(blob: &str) -> ClientResult<SubKey> {
    let tokens: Vec<&str> = blob.split_whitespace().collect();
    if tokens.len() != 4 || tokens[0] != "concurrent-subkey" {
        return Err(ClientError::InvalidKey(
            "malformed sub-key blob".to_string(),
        ));
    }

    let keypair = KeyPair::from_private_key(tokens[1])?;

    let ccid = tokens[2].to_string();
    if !ids::is_ccid(&ccid) {
        return Err(ClientError::InvalidKey(format!(
            "sub-key blob names a malformed CCID: {}",
            ccid
        )));
    }

    let (ckid, domain) = tokens[3]
        .split_once('@')
        .ok_or_else(|| ClientError::InvalidKey("sub-key blob is missing its domain".to_string()))?;
    if !ids::is_ckid(ckid) {
        return Err(ClientError::InvalidKey(format!(
            "sub-key blob names a malformed CKID: {}",
            ckid
        )));
    }
    if domain.is_empty() {
        return Err(ClientError::InvalidKey("sub-key blob is missing its domain".to_string()));
    }

    Ok(SubKey {
        domain: domain.to_string(),
        ccid,
        ckid: ckid.to_string(),
        keypair,
    })
}

/// Claims carried by a minted token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtClaims {
    pub iss: String,
    pub sub: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
}

#[derive(Serialize)]
struct JwtHeader<'a> {
    alg: &'a str,
    typ: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    kid: Option<&'a str>,
}

/// Assemble and sign a compact JWT
///
/// secp256k1 is outside the algorithm set of the usual JWT crates, so the
/// token is built from base64url segments and signed directly.
pub fn issue_jwt(keypair: &KeyPair, claims: &JwtClaims, key_id: Option<&str>) -> ClientResult<String> {
    let header = JwtHeader {
        alg: "ES256K",
        typ: "JWT",
        kid: key_id,
    };

    let header_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header)?);
    let payload_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims)?);
    let signing_input = format!("{}.{}", header_b64, payload_b64);

    let signature: Signature = keypair.signing_key.sign(signing_input.as_bytes());
    let signature_b64 = URL_SAFE_NO_PAD.encode(signature.to_bytes());

    Ok(format!("{}.{}", signing_input, signature_b64))
}

/// Whether a token's validity window covers the present
///
/// Checks `exp` only (minted tokens carry no other timing claims);
/// signature verification is the server's concern.
pub fn check_jwt_is_valid(token: &str) -> bool {
    let mut parts = token.split('.');
    let (Some(_), Some(payload), Some(_), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return false;
    };

    let Ok(payload_bytes) = URL_SAFE_NO_PAD.decode(payload) else {
        return false;
    };
    let Ok(claims) = serde_json::from_slice::<serde_json::Value>(&payload_bytes) else {
        return false;
    };

    let now = chrono::Utc::now().timestamp();
    if let Some(exp) = claims.get("exp").and_then(|v| v.as_i64()) {
        if exp <= now {
            return false;
        }
    }
    true
}
