// ABOUTME: Relay token discovery with precedence chain
// ABOUTME: CLI flag → ORGFOUNDRY_TOKEN → FOUNDRY_SYNC_PASSWORD → config file

use crate::{Error, Result};
use std::env;

pub const TOKEN_ENV: &str = "ORGFOUNDRY_TOKEN";
pub const LEGACY_TOKEN_ENV: &str = "FOUNDRY_SYNC_PASSWORD";

pub fn resolve_token(cli_token: Option<String>, config_token: Option<String>) -> Result<String> {
    resolve_token_with(cli_token, config_token, |key| env::var(key).ok())
}

fn resolve_token_with(
    cli_token: Option<String>,
    config_token: Option<String>,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<String> {
    let candidates = [
        cli_token,
        lookup(TOKEN_ENV),
        lookup(LEGACY_TOKEN_ENV),
        config_token,
    ];

    candidates
        .into_iter()
        .flatten()
        .map(|token| token.trim().to_string())
        .find(|token| !token.is_empty())
        .ok_or_else(|| {
            Error::Config(format!(
                "No relay token found. Provide via --token, {} or the config file",
                TOKEN_ENV
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_resolve_token_cli_precedence() {
        let env = env_of(&[(TOKEN_ENV, "env_token")]);
        let token = resolve_token_with(Some("cli_token".into()), Some("file".into()), env).unwrap();
        assert_eq!(token, "cli_token");
    }

    #[test]
    fn test_resolve_token_env_order() {
        let env = env_of(&[(TOKEN_ENV, "new"), (LEGACY_TOKEN_ENV, "old")]);
        assert_eq!(resolve_token_with(None, None, env).unwrap(), "new");

        let legacy = env_of(&[(LEGACY_TOKEN_ENV, "old")]);
        assert_eq!(
            resolve_token_with(None, Some("file".into()), legacy).unwrap(),
            "old"
        );
    }

    #[test]
    fn test_resolve_token_config_fallback() {
        let token = resolve_token_with(None, Some("file_token".into()), env_of(&[])).unwrap();
        assert_eq!(token, "file_token");
    }

    #[test]
    fn test_resolve_token_skips_blank_values() {
        let env = env_of(&[(TOKEN_ENV, "  ")]);
        let token = resolve_token_with(None, Some("file_token".into()), env).unwrap();
        assert_eq!(token, "file_token");
    }

    #[test]
    fn test_resolve_token_missing() {
        let err = resolve_token_with(None, None, env_of(&[])).unwrap_err();
        assert_eq!(err.exit_code(), 12);
    }
}
