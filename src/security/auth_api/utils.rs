use axum::http::{header, HeaderMap};

pub fn extract_bearer_token<'a>(headers: &'a HeaderMap, prefix: &str) -> Option<&'a str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = value
        .strip_prefix(prefix)
        .or_else(|| value.strip_prefix(&prefix.to_lowercase()))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

pub fn is_jwt_format(token: &str) -> bool {
    let parts: Vec<&str> = token.split('.').collect();
    parts.len() == 3 && parts.iter().all(|p| !p.is_empty())
}
