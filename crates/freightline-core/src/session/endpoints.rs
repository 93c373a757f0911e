use serde::{Deserialize, Serialize};

/// Paths of the backend's authentication endpoints, relative to the v1 base URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthEndpoints {
    /// Password login, issues an access/refresh token pair.
    pub login: String,
    /// Refresh spellings in the order they are tried. Older backends only
    /// know the second one.
    pub refresh: Vec<String>,
    /// Identity of the current user.
    pub me: String,
    pub logout: String,
}

impl Default for AuthEndpoints {
    fn default() -> Self {
        Self {
            login: "/auth/token".to_string(),
            refresh: vec!["/auth/refresh".to_string(), "/auth/token/refresh".to_string()],
            me: "/auth/me".to_string(),
            logout: "/auth/logout".to_string(),
        }
    }
}

impl AuthEndpoints {
    /// Login and refresh calls never carry a bearer token and never
    /// trigger a refresh themselves.
    pub fn is_auth_route(&self, url: &str) -> bool {
        std::iter::once(&self.login)
            .chain(self.refresh.iter())
            .any(|path| !path.is_empty() && url.contains(path.as_str()))
    }
}
