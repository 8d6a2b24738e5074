//! HTTP message signatures (`digest` header signed with ed25519).
//!
//! Requests are signed offline over canonical JSON and replayed verbatim by
//! the online machine, so the exact octets travel inside the artifact.

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::core::artifacts::{HttpSignedRequest, SignedPayload};

pub const REQUEST_TYPE: &str = "httpSignature";
pub const KEY_ID: &str = "primary";

/// Serialize with object keys sorted at every level and no whitespace.
pub fn canonical_json(value: &Value) -> String {
    sorted(value).to_string()
}

fn sorted(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut out = Map::new();
            for key in keys {
                out.insert(key.clone(), sorted(&map[key]));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
        other => other.clone(),
    }
}

fn digest_header(octets: &str) -> String {
    format!("SHA-256={}", B64.encode(Sha256::digest(octets.as_bytes())))
}

fn signing_string(digest: &str) -> String {
    format!("digest: {}", digest)
}

/// Sign `body`, producing the envelope stored in artifacts.
pub fn sign(key: &SigningKey, body: Value) -> SignedPayload {
    let octets = canonical_json(&body);
    let digest = digest_header(&octets);
    let signature = key.sign(signing_string(&digest).as_bytes());

    let mut headers = BTreeMap::new();
    headers.insert(
        "signature".to_string(),
        format!(
            "keyId=\"{}\",algorithm=\"ed25519\",headers=\"digest\",signature=\"{}\"",
            KEY_ID,
            B64.encode(signature.to_bytes())
        ),
    );
    headers.insert("digest".to_string(), digest);

    SignedPayload {
        request_type: REQUEST_TYPE.to_string(),
        signed_tx: HttpSignedRequest { headers, body, octets },
    }
}

/// Check digest and signature of a signed request against `key`.
pub fn verify(key: &VerifyingKey, request: &HttpSignedRequest) -> bool {
    let Some(digest) = request.headers.get("digest") else {
        return false;
    };
    if *digest != digest_header(&request.octets) {
        return false;
    }
    let Some(encoded) = request.headers.get("signature").and_then(|h| signature_param(h)) else {
        return false;
    };
    let Ok(bytes) = B64.decode(encoded) else {
        return false;
    };
    let Ok(signature) = Signature::from_slice(&bytes) else {
        return false;
    };
    key.verify(signing_string(digest).as_bytes(), &signature).is_ok()
}

fn signature_param(header: &str) -> Option<&str> {
    header
        .split(',')
        .filter_map(|part| part.split_once('='))
        .find(|(name, _)| name.trim() == "signature")
        .map(|(_, value)| value.trim().trim_matches('"'))
}
