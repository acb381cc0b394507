use serde_json::Value;
use vendra_core::ProviderErrorKind;

/// Sanitize a tenant-supplied base address into one canonical absolute URL.
/// Handles stray leading slashes, missing schemes, doubled-protocol paste
/// artifacts and trailing slashes. Returns `None` when no usable host
/// remains.
pub fn normalize_base_url(raw: &str) -> Option<String> {
    let trimmed = raw.trim().trim_start_matches('/');
    if trimmed.is_empty() {
        return None;
    }

    // A pasted value can carry a doubled protocol ("https:///https://host");
    // the last scheme occurrence wins.
    let last_https = trimmed.rfind("https://");
    let last_http = trimmed.rfind("http://");
    let absolute = match (last_https, last_http) {
        (None, None) => format!("https://{}", trimmed),
        (Some(i), None) => trimmed[i..].to_string(),
        (None, Some(i)) => trimmed[i..].to_string(),
        (Some(a), Some(b)) => trimmed[a.max(b)..].to_string(),
    };

    let absolute = absolute.trim_end_matches('/').to_string();
    let host = absolute
        .strip_prefix("https://")
        .or_else(|| absolute.strip_prefix("http://"))
        .unwrap_or("");
    if host.is_empty() {
        return None;
    }

    Some(absolute)
}

/// Strip a decorative `Bearer ` / `Token ` prefix (case-insensitive) that
/// admins tend to paste along with the credential.
pub fn normalize_credential(raw: &str) -> String {
    let trimmed = raw.trim();
    for prefix in ["bearer ", "token "] {
        if trimmed.len() > prefix.len() && trimmed[..prefix.len()].eq_ignore_ascii_case(prefix) {
            return trimmed[prefix.len()..].trim().to_string();
        }
    }
    trimmed.to_string()
}

/// Storefront API tokens are exactly 40 hex chars.
pub fn is_store_api_token(token: &str) -> bool {
    token.len() == 40 && token.chars().all(|c| c.is_ascii_hexdigit())
}

/// Header (name, value) for an outbound call. A storefront-shaped token goes
/// out under its dedicated header; anything else is treated as a bearer
/// token.
pub fn auth_header(raw: &str) -> (&'static str, String) {
    let token = normalize_credential(raw);
    if is_store_api_token(&token) {
        ("X-Api-Token", token)
    } else {
        ("Authorization", format!("Bearer {}", token))
    }
}

/// Extract a balance from an irregular upstream payload. Shapes are checked
/// in priority order: top-level `balance` (number or numeric string), then
/// `user.balance`, then a numeric-string `wallet_balance`. A body that is
/// itself an error envelope, or that matches no shape, is an error and never
/// a coerced zero.
pub fn parse_balance(body: &Value) -> Result<f64, ProviderErrorKind> {
    if let Some(code) = remote_error_code(body) {
        return Err(ProviderErrorKind::Remote(code));
    }

    if let Some(balance) = as_number(body.get("balance")) {
        return Ok(balance);
    }
    if let Some(balance) = as_number(body.get("user").and_then(|u| u.get("balance"))) {
        return Ok(balance);
    }
    if let Some(balance) = as_number(body.get("wallet_balance")) {
        return Ok(balance);
    }

    Err(ProviderErrorKind::BalanceParseFail)
}

/// Some providers embed an application error inside a 200 response as
/// `{"code": 500, "message": ...}`. Codes in the HTTP error range mark the
/// body as an error envelope.
pub fn remote_error_code(body: &Value) -> Option<u32> {
    let code = body.get("code")?.as_u64()?;
    if code >= 400 {
        Some(code as u32)
    } else {
        None
    }
}

fn as_number(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_url_leading_slash_and_trailing_slash() {
        assert_eq!(
            normalize_base_url("/https://shop.example.com/"),
            Some("https://shop.example.com".to_string())
        );
    }

    #[test]
    fn test_url_missing_scheme_defaults_to_https() {
        assert_eq!(
            normalize_base_url("shop.example.com"),
            Some("https://shop.example.com".to_string())
        );
    }

    #[test]
    fn test_url_doubled_protocol_collapses() {
        assert_eq!(
            normalize_base_url("https:///https://host"),
            Some("https://host".to_string())
        );
        assert_eq!(
            normalize_base_url("http://https://host.example"),
            Some("https://host.example".to_string())
        );
    }

    #[test]
    fn test_url_rejects_empty_host() {
        assert_eq!(normalize_base_url("   "), None);
        assert_eq!(normalize_base_url("https://"), None);
        assert_eq!(normalize_base_url("///"), None);
    }

    #[test]
    fn test_url_keeps_path_free_host_with_port() {
        assert_eq!(
            normalize_base_url("http://10.0.0.5:8000/"),
            Some("http://10.0.0.5:8000".to_string())
        );
    }

    #[test]
    fn test_credential_prefix_stripping() {
        assert_eq!(normalize_credential("Bearer abc123"), "abc123");
        assert_eq!(normalize_credential("bEaReR abc123"), "abc123");
        assert_eq!(normalize_credential("Token  abc123 "), "abc123");
        assert_eq!(normalize_credential("abc123"), "abc123");
    }

    #[test]
    fn test_store_token_shape() {
        let store_token = "a".repeat(40);
        assert!(is_store_api_token(&store_token));
        assert!(is_store_api_token(&"AB12".repeat(10)));
        assert!(!is_store_api_token(&"a".repeat(64)));
        assert!(!is_store_api_token("zz".repeat(20).as_str()));
    }

    #[test]
    fn test_auth_header_selection() {
        let (name, value) = auth_header(&format!("Token {}", "f".repeat(40)));
        assert_eq!(name, "X-Api-Token");
        assert_eq!(value, "f".repeat(40));

        // 64 hex chars fails the 40-char check and rides as a bearer token.
        let long = "a".repeat(64);
        let (name, value) = auth_header(&format!("Bearer {}", long));
        assert_eq!(name, "Authorization");
        assert_eq!(value, format!("Bearer {}", long));
    }

    #[test]
    fn test_balance_shape_priority() {
        assert_eq!(parse_balance(&json!({"balance": 12.5})), Ok(12.5));
        assert_eq!(
            parse_balance(&json!({"user": {"balance": "99.25"}})),
            Ok(99.25)
        );
        assert_eq!(parse_balance(&json!({"wallet_balance": "42"})), Ok(42.0));
        // Top-level balance wins over nested shapes.
        assert_eq!(
            parse_balance(&json!({"balance": 1.0, "user": {"balance": 2.0}})),
            Ok(1.0)
        );
    }

    #[test]
    fn test_balance_error_envelope_is_never_zero() {
        let result = parse_balance(&json!({"code": 500, "message": "Unknown error"}));
        assert_eq!(result, Err(ProviderErrorKind::Remote(500)));
    }

    #[test]
    fn test_balance_unmatched_shape_is_parse_fail() {
        assert_eq!(
            parse_balance(&json!({"funds": 10})),
            Err(ProviderErrorKind::BalanceParseFail)
        );
        assert_eq!(
            parse_balance(&json!({"balance": true})),
            Err(ProviderErrorKind::BalanceParseFail)
        );
    }

    #[test]
    fn test_success_code_is_not_an_envelope() {
        assert_eq!(parse_balance(&json!({"code": 0, "balance": 7.0})), Ok(7.0));
        assert_eq!(remote_error_code(&json!({"code": 200})), None);
        assert_eq!(remote_error_code(&json!({"code": 502})), Some(502));
    }
}
