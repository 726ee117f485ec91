/// Connection authentication
use std::collections::HashMap;

/// Resolves a client-supplied token to a user id
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, token: &str) -> Option<String>;
}

/// Fixed token table from `[broker].auth_tokens`
#[derive(Debug, Clone, Default)]
pub struct StaticTokenAuthenticator {
    tokens: HashMap<String, String>,
}

impl StaticTokenAuthenticator {
    pub fn new(tokens: HashMap<String, String>) -> Self {
        Self { tokens }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl Authenticator for StaticTokenAuthenticator {
    fn authenticate(&self, token: &str) -> Option<String> {
        if token.is_empty() {
            return None;
        }
        self.tokens.get(token).cloned()
    }
}
