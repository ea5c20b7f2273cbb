use std::sync::RwLock;

use super::credential::Credential;

#[derive(Default)]
struct StoreState {
    current: Option<Credential>,
    /// Survives `clear()` so a re-authentication can still use it.
    refresh_token: Option<String>,
}

/// Holds the current credential of one [`AuthManager`](super::AuthManager).
///
/// Reads and replacements are atomic with respect to each other. Only the
/// owning auth manager mutates it.
#[derive(Default)]
pub struct TokenStore {
    state: RwLock<StoreState>,
}

impl std::fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenStore")
            .field("has_current", &self.current().is_some())
            .finish_non_exhaustive()
    }
}

impl TokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<Credential> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state.current.clone()
    }

    pub fn refresh_token(&self) -> Option<String> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state.refresh_token.clone()
    }

    /// Install a new credential. A credential without a refresh token keeps
    /// the previously stored one (providers often omit it on refresh).
    pub fn replace(&self, credential: Credential) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        if let Some(rt) = credential.refresh_token() {
            state.refresh_token = Some(rt.to_string());
        }
        state.current = Some(credential);
    }

    pub fn set_refresh_token(&self, refresh_token: Option<String>) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.refresh_token = refresh_token;
    }

    /// Drop the current credential; the refresh token is kept.
    pub fn clear(&self) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.current = None;
    }
}
