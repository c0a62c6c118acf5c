pub mod epg_parser;
pub mod time;

/// Ensure a source URL carries an explicit scheme, defaulting to http as the
/// overwhelming majority of provider panels do not terminate TLS themselves.
pub fn normalize_url_scheme(url: &str) -> String {
    if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!("http://{url}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_url_scheme() {
        assert_eq!(
            normalize_url_scheme("provider.example.com:8080"),
            "http://provider.example.com:8080"
        );
        assert_eq!(
            normalize_url_scheme("https://provider.example.com"),
            "https://provider.example.com"
        );
    }
}
