//! On-disk token cache for interactively authorized connections
//! (`~/.connkit/<connection>/tokens.json`).

use std::path::{Path, PathBuf};

use crate::error::ConnectorError;

use super::credential::TokenData;

fn default_root() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".connkit")
}

pub fn cache_path(connection: &str) -> PathBuf {
    cache_path_in(&default_root(), connection)
}

pub fn cache_path_in(root: &Path, connection: &str) -> PathBuf {
    root.join(connection).join("tokens.json")
}

pub fn load_cached_token(connection: &str) -> Option<TokenData> {
    load_cached_token_in(&default_root(), connection)
}

pub fn load_cached_token_in(root: &Path, connection: &str) -> Option<TokenData> {
    let data = std::fs::read_to_string(cache_path_in(root, connection)).ok()?;
    serde_json::from_str(&data).ok()
}

pub fn save_token(connection: &str, token: &TokenData) -> Result<(), ConnectorError> {
    save_token_in(&default_root(), connection, token)
}

pub fn save_token_in(
    root: &Path,
    connection: &str,
    token: &TokenData,
) -> Result<(), ConnectorError> {
    let path = cache_path_in(root, connection);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let data = serde_json::to_string_pretty(token)
        .map_err(|e| ConnectorError::auth(format!("Failed to serialize token: {e}")))?;
    std::fs::write(&path, data)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_path_structure() {
        let path = cache_path("crm");
        let path_str = path.to_string_lossy();
        assert!(path_str.contains(".connkit"));
        assert!(path_str.contains("crm"));
        assert!(path_str.ends_with("tokens.json"));
    }

    #[test]
    fn load_nonexistent_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_cached_token_in(dir.path(), "nothing-here").is_none());
    }

    #[test]
    fn save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let token = TokenData {
            access_token: "test-access".into(),
            refresh_token: Some("test-refresh".into()),
            expires_at: None,
            token_type: "Bearer".into(),
            scope: Some("api".into()),
        };

        save_token_in(dir.path(), "crm", &token).unwrap();
        let loaded = load_cached_token_in(dir.path(), "crm").unwrap();
        assert_eq!(loaded, token);
    }

    #[cfg(unix)]
    #[test]
    fn saved_token_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let token = TokenData {
            access_token: "a".into(),
            refresh_token: None,
            expires_at: None,
            token_type: "Bearer".into(),
            scope: None,
        };
        save_token_in(dir.path(), "crm", &token).unwrap();
        let mode = std::fs::metadata(cache_path_in(dir.path(), "crm"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn corrupt_cache_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = cache_path_in(dir.path(), "crm");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{not json").unwrap();
        assert!(load_cached_token_in(dir.path(), "crm").is_none());
    }
}
