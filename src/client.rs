//! Verify-request query builder, supplementing `spec.md` with the one piece
//! of `examples/original_source/yubistack/ykauth.py`'s `VerificationClient`
//! that survives the "auth wrapper is an external collaborator" non-goal: the
//! signed query string a caller sends to `/wsapi/2.0/verify`. No user/password
//! authentication is implemented here, only the OTP-verification query.

use crate::signer;

/// Build the signed query string for a verify call, mirroring
/// `VerificationClient.generate_query`: assemble `id`/`otp`/`nonce`, sign the
/// canonical form under `secret`, then append `&h=<sig>`.
pub fn build_verify_query(
    client_id: i64,
    otp: &str,
    nonce: &str,
    secret_b64: &str,
) -> Result<String, crate::error::SignerError> {
    let client_id_str = client_id.to_string();
    let params = [("id", client_id_str.as_str()), ("otp", otp), ("nonce", nonce)];
    let signature = signer::sign(&params, secret_b64)?;

    let mut sorted = params.to_vec();
    sorted.sort_by_key(|(k, _)| *k);
    let query = sorted
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");
    Ok(format!("{query}&h={signature}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD as b64;

    #[test]
    fn query_carries_a_trailing_signature() {
        let secret = b64.encode(b"client-secret");
        let query = build_verify_query(1, "ccccccbchvthelloworldmodhex", "abcdefghij0123456789", &secret)
            .unwrap();
        assert!(query.contains("id=1"));
        assert!(query.contains("otp=ccccccbchvthelloworldmodhex"));
        let last_pair = query.rsplit('&').next().unwrap();
        assert!(last_pair.starts_with("h="));
    }
}
