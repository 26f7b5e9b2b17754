use crate::config::AuthConfig;
use urlencoding::encode;

/// Client for the hosted-UI identity provider.
///
/// Auth is browser-level: the service only constructs the redirect URLs and
/// extracts the authorization code from the callback query string. Whatever
/// bearer token the caller presents later is passed through to the analysis
/// endpoint unchanged.
pub struct AuthGateway {
    config: AuthConfig,
}

impl AuthGateway {
    pub fn new(config: AuthConfig) -> Self {
        Self { config }
    }

    /// Browser redirect target for login
    pub fn authorize_url(&self) -> String {
        format!(
            "{}/oauth2/authorize?client_id={}&response_type=code&scope={}&redirect_uri={}",
            self.config.authority.trim_end_matches('/'),
            encode(&self.config.client_id),
            encode(&self.config.scope),
            encode(&self.config.redirect_uri),
        )
    }

    /// Browser redirect target for logout
    pub fn logout_url(&self) -> String {
        format!(
            "{}/logout?client_id={}&logout_uri={}",
            self.config.authority.trim_end_matches('/'),
            encode(&self.config.client_id),
            encode(&self.config.logout_uri),
        )
    }
}

/// Extract the authorization code from a callback query string
pub fn extract_code(query: &str) -> Option<String> {
    query
        .trim_start_matches('?')
        .split('&')
        .find_map(|pair| pair.strip_prefix("code="))
        .and_then(|code| urlencoding::decode(code).ok())
        .map(|code| code.into_owned())
        .filter(|code| !code.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_config() -> AuthConfig {
        AuthConfig {
            authority: "https://auth.example.com".to_string(),
            client_id: "client-123".to_string(),
            redirect_uri: "http://localhost:8080/auth/callback".to_string(),
            logout_uri: "http://localhost:8080/".to_string(),
            scope: "openid".to_string(),
        }
    }

    #[test]
    fn test_authorize_url() {
        let gateway = AuthGateway::new(create_test_config());
        let url = gateway.authorize_url();

        assert!(url.starts_with("https://auth.example.com/oauth2/authorize?"));
        assert!(url.contains("client_id=client-123"));
        assert!(url.contains("response_type=code"));
        assert!(url.contains("scope=openid"));
        assert!(url.contains("redirect_uri=http%3A%2F%2Flocalhost%3A8080%2Fauth%2Fcallback"));
    }

    #[test]
    fn test_logout_url() {
        let gateway = AuthGateway::new(create_test_config());
        let url = gateway.logout_url();

        assert!(url.starts_with("https://auth.example.com/logout?"));
        assert!(url.contains("client_id=client-123"));
        assert!(url.contains("logout_uri=http%3A%2F%2Flocalhost%3A8080%2F"));
    }

    #[test]
    fn test_trailing_slash_on_authority_is_trimmed() {
        let mut config = create_test_config();
        config.authority = "https://auth.example.com/".to_string();
        let gateway = AuthGateway::new(config);

        assert!(gateway
            .authorize_url()
            .starts_with("https://auth.example.com/oauth2/authorize?"));
    }

    #[test]
    fn test_extract_code() {
        assert_eq!(
            extract_code("?code=abc123&state=xyz"),
            Some("abc123".to_string())
        );
        assert_eq!(
            extract_code("state=xyz&code=abc123"),
            Some("abc123".to_string())
        );
    }

    #[test]
    fn test_extract_code_missing_or_empty() {
        assert_eq!(extract_code("state=xyz"), None);
        assert_eq!(extract_code("code="), None);
        assert_eq!(extract_code(""), None);
    }

    #[test]
    fn test_extract_code_decodes_escapes() {
        assert_eq!(
            extract_code("code=abc%2F123"),
            Some("abc/123".to_string())
        );
    }
}
