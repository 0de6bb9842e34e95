//! Email/password accounts and bearer-token sessions
//!
//! Passwords are stored as Argon2id PHC strings. Session tokens live in
//! memory only; a restart signs everyone out.

use crate::db::{Database, DbError};
use crate::state_machine::Identity;
use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::RngCore;
use std::collections::HashMap;
use std::sync::RwLock;
use thiserror::Error;

const MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid email address")]
    InvalidEmail,
    #[error("Password must be at least 6 characters")]
    WeakPassword,
    #[error("Email already registered")]
    EmailTaken,
    #[error("Invalid login credentials")]
    InvalidCredentials,
    #[error("Password hashing failed: {0}")]
    Hashing(String),
    #[error("Storage error: {0}")]
    Storage(#[from] DbError),
}

/// A signed-in session
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub token: String,
    pub identity: Identity,
}

pub struct AuthService {
    db: Database,
    sessions: RwLock<HashMap<String, Identity>>,
}

impl AuthService {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Register a new account and sign it in
    pub fn sign_up(&self, email: &str, password: &str) -> Result<AuthSession, AuthError> {
        let email = normalize_email(email)?;
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AuthError::WeakPassword);
        }

        let hash = hash_password(password)?;
        let id = uuid::Uuid::new_v4().to_string();
        let user = self
            .db
            .create_user(&id, &email, &hash)
            .map_err(|e| match e {
                DbError::EmailExists(_) => AuthError::EmailTaken,
                other => AuthError::Storage(other),
            })?;

        tracing::info!(user_id = %user.id, "Account created");
        Ok(self.open_session(Identity::new(user.id, user.email)))
    }

    pub fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession, AuthError> {
        let email = normalize_email(email)?;
        let user = self
            .db
            .find_user_by_email(&email)?
            .ok_or(AuthError::InvalidCredentials)?;

        if !verify_password(password, &user.password_hash) {
            tracing::info!(user_id = %user.id, "Rejected sign-in");
            return Err(AuthError::InvalidCredentials);
        }
        Ok(self.open_session(Identity::new(user.id, user.email)))
    }

    /// End the session; returns who was signed in, if anyone
    pub fn sign_out(&self, token: &str) -> Option<Identity> {
        self.sessions
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(token)
    }

    pub fn resolve(&self, token: &str) -> Option<Identity> {
        self.sessions
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(token)
            .cloned()
    }

    fn open_session(&self, identity: Identity) -> AuthSession {
        let token = random_token(32);
        self.sessions
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(token.clone(), identity.clone());
        AuthSession { token, identity }
    }
}

fn normalize_email(email: &str) -> Result<String, AuthError> {
    let email = email.trim().to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(email),
        _ => Err(AuthError::InvalidEmail),
    }
}

fn random_token(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}

/// Argon2id with the crate's default (OWASP) parameters, as a PHC string
fn hash_password(password: &str) -> Result<String, AuthError> {
    let mut salt = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut salt);
    let salt = SaltString::encode_b64(&salt).map_err(|e| AuthError::Hashing(e.to_string()))?;
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AuthError::Hashing(e.to_string()))
}

fn verify_password(password: &str, stored: &str) -> bool {
    match PasswordHash::new(stored) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            tracing::warn!(error = %e, "Stored password hash is unreadable");
            false
        }
    }
}
