// Signed-in principal, held in an explicit context object passed to workflows

use crate::gateway::{Gateway, GatewayError};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("{}", .0.message())]
    Gateway(#[from] GatewayError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: Uuid,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub user: AuthUser,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SignUp {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
}

// Cloning shares the same underlying session slot
#[derive(Debug, Clone, Default)]
pub struct SessionHolder {
    current: Arc<RwLock<Option<Session>>>,
}

impl SessionHolder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(session: Session) -> Self {
        Self {
            current: Arc::new(RwLock::new(Some(session))),
        }
    }

    pub fn current(&self) -> Option<Session> {
        self.current.read().clone()
    }

    pub fn user_id(&self) -> Option<Uuid> {
        self.current.read().as_ref().map(|s| s.user.id)
    }

    pub fn is_signed_in(&self) -> bool {
        self.current.read().is_some()
    }

    pub async fn sign_in<G: Gateway + ?Sized>(
        &self,
        gateway: &G,
        email: &str,
        password: &str,
    ) -> Result<Session, SessionError> {
        let email = email.trim();
        if email.is_empty() {
            return Err(SessionError::MissingField("email"));
        }
        if password.trim().is_empty() {
            return Err(SessionError::MissingField("password"));
        }

        let session = gateway.sign_in(email, password).await.map_err(|e| {
            warn!(error = %e, "sign-in rejected");
            e
        })?;
        info!(user_id = %session.user.id, "signed in");
        *self.current.write() = Some(session.clone());
        Ok(session)
    }

    pub async fn sign_up<G: Gateway + ?Sized>(
        &self,
        gateway: &G,
        request: SignUp,
    ) -> Result<Session, SessionError> {
        let request = SignUp {
            email: request.email.trim().to_string(),
            first_name: request.first_name.trim().to_string(),
            last_name: request.last_name.trim().to_string(),
            password: request.password,
        };
        if request.email.is_empty() {
            return Err(SessionError::MissingField("email"));
        }
        if request.password.trim().is_empty() {
            return Err(SessionError::MissingField("password"));
        }

        let session = gateway.sign_up(&request).await?;
        info!(user_id = %session.user.id, "account created");
        *self.current.write() = Some(session.clone());
        Ok(session)
    }

    // The local session is cleared even if the gateway call fails
    pub async fn sign_out<G: Gateway + ?Sized>(&self, gateway: &G) -> Result<(), SessionError> {
        let previous = self.current.write().take();
        if previous.is_none() {
            return Ok(());
        }
        gateway.sign_out().await?;
        Ok(())
    }
}
