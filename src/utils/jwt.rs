use base64::Engine as _;
use serde_json::Value;

/// Decode the payload JSON ("claims") from a JWT.
///
/// Signature-agnostic: the payload segment is base64url-decoded and parsed, nothing is verified.
pub(crate) fn decode_jwt_claims(jwt: &str) -> Option<Value> {
    let payload_b64 = jwt.split('.').nth(1)?;

    // Most JWTs are base64url without padding, but some issuers pad.
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(payload_b64)
        .or_else(|_| base64::engine::general_purpose::URL_SAFE.decode(payload_b64))
        .ok()?;

    serde_json::from_slice(&bytes).ok()
}

/// Copy `email` and `sub` from an embedded `id_token` onto the token payload itself.
pub(crate) fn attach_identity_claims(token_value: &mut Value) {
    let Some(claims) = token_value
        .get("id_token")
        .and_then(Value::as_str)
        .and_then(decode_jwt_claims)
    else {
        return;
    };

    let Some(obj) = token_value.as_object_mut() else {
        return;
    };
    for key in ["sub", "email"] {
        if let Some(v) = claims.get(key).and_then(Value::as_str) {
            obj.insert(key.to_string(), Value::String(v.to_owned()));
        }
    }
}
