use std::path::Path;
use std::sync::{Arc, RwLock};
use crate::api::AccountInfo;
use crate::errors::{AppError, Result};

/// Session shared between the repository and whoever manages credentials.
pub type SharedSession = Arc<RwLock<Session>>;

/// Credential and identity for one signed-in account.
///
/// The numeric account id is taken from the token prefix (`<id>.<secret>`)
/// when present, and replaced by the authoritative id once the token has been
/// validated.
#[derive(Debug, Clone, Default)]
pub struct Session {
    token: Option<String>,
    user_id: Option<i64>,
    account: Option<AccountInfo>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared(self) -> SharedSession {
        Arc::new(RwLock::new(self))
    }

    pub fn set_token(&mut self, token: &str) {
        let token = token.trim();
        self.account = None;

        if token.is_empty() {
            self.token = None;
            self.user_id = None;
            return;
        }

        self.user_id = token
            .split_once('.')
            .and_then(|(prefix, _)| prefix.parse::<i64>().ok());
        self.token = Some(token.to_string());
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn user_id(&self) -> Option<i64> {
        self.user_id
    }

    pub fn account(&self) -> Option<&AccountInfo> {
        self.account.as_ref()
    }

    pub fn set_account(&mut self, account: AccountInfo) {
        self.user_id = Some(account.id);
        self.account = Some(account);
    }

    /// Token for calls that do not need an identity.
    pub fn require_token(&self) -> Result<String> {
        self.token.clone().ok_or_else(AppError::token_not_set)
    }

    /// Token plus numeric id for calls scoped to the account.
    pub fn require_identity(&self) -> Result<(String, i64)> {
        match (&self.token, self.user_id) {
            (Some(token), Some(user_id)) => Ok((token.clone(), user_id)),
            _ => Err(AppError::token_not_set()),
        }
    }

    /// Reads a single-line token file. An absent or blank file is an error.
    pub fn load_token_from_file(&mut self, path: &Path) -> Result<()> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(AppError::NotFound(format!("Token file {:?} not found", path)));
            }
            Err(e) => return Err(e.into()),
        };

        let token = content.trim();
        if token.is_empty() {
            return Err(AppError::NotFound(format!("Token file {:?} is empty", path)));
        }

        self.set_token(token);
        log::info!("[AUTH] Token loaded from {:?}", path);
        Ok(())
    }

    /// Overwrites `path` with the current token.
    pub fn save_token_to_file(&self, path: &Path) -> Result<()> {
        let token = self.require_token()?;
        std::fs::write(path, token)?;
        log::info!("[AUTH] Token saved to {:?}", path);
        Ok(())
    }
}
