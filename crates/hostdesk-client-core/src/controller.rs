use std::rc::Rc;

use crate::dispatch::{Dispatcher, TransportError};
use crate::notifier::UpdateNotifier;
use crate::session::{SessionBundle, SessionError, SessionStore};
use crate::storage::StorageError;
use crate::wire::{
    ClusterDescriptor, LoginEvent, OpModeRequest, OperationMode, RequestEnvelope,
    ResponseEnvelope, ResponseStatus, SimpleRequest,
};

pub const LOGIN_REQUEST: &str = "login";
pub const LOGOUT_REQUEST: &str = "logout";
pub const VALIDATE_SESSION_REQUEST: &str = "validateSession";

pub const MISSING_CLUSTER_NAME: &str = "Please, type a cluster name...";
pub const MISSING_CLUSTER_PASSWORD: &str = "Please, type the cluster password...";
pub const MODE_UNCHANGED: &str = "Host is already in mode";

#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Session(#[from] SessionError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepaliveOutcome {
    /// Store now holds the server's latest token.
    Refreshed,
    /// No session to validate.
    Skipped,
    /// The session changed while the call was in flight; result discarded.
    Superseded,
    /// The server rejected the session and it was cleared.
    Rejected,
    /// The server answered `info`; nothing was stored.
    Unconfirmed,
}

/// Login, logout, keepalive and operation-mode changes over one dispatcher.
pub struct SessionController {
    dispatcher: Rc<dyn Dispatcher>,
    session: Rc<SessionStore>,
    notifier: Rc<UpdateNotifier>,
}

impl SessionController {
    pub fn new(
        dispatcher: Rc<dyn Dispatcher>,
        session: Rc<SessionStore>,
        notifier: Rc<UpdateNotifier>,
    ) -> Self {
        Self {
            dispatcher,
            session,
            notifier,
        }
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    /// On `ok`, persists the new session and publishes `startSession`. Any other
    /// status is returned as is and the store is left alone.
    pub async fn login(&self, owner: &str, password: &str) -> Result<ResponseEnvelope, ControllerError> {
        let owner = owner.trim();
        if owner.is_empty() {
            return Err(ControllerError::Validation("user name is required".to_string()));
        }
        if password.is_empty() {
            return Err(ControllerError::Validation("password is required".to_string()));
        }
        let request = SimpleRequest::new(LOGIN_REQUEST)
            .with_param("Name", owner)
            .with_param("Password", password);
        let response = self.dispatcher.dispatch(&request.into()).await?;
        if !response.is_ok() {
            tracing::info!(owner, status = response.status.as_str(), message = %response.message, "login refused");
            return Ok(response);
        }
        let bundle = SessionBundle::from_login_payload(response.payload.as_ref())?;
        self.session.set(&bundle)?;
        tracing::info!(owner, module = bundle.module().map_or("", |m| m.as_str()), "logged in");
        self.notifier.publish_login(&LoginEvent::start_session());
        Ok(response)
    }

    pub async fn logout(&self) -> Result<ResponseEnvelope, ControllerError> {
        let bundle = self.session.get();
        let owner = bundle.owner().unwrap_or_default().to_string();
        let request = RequestEnvelope::from(SimpleRequest::new(LOGOUT_REQUEST).with_param("", owner))
            .with_auth(&bundle);
        let response = self.dispatcher.dispatch(&request).await?;
        if response.is_ok() {
            self.session.clear()?;
            self.notifier.publish_login(&LoginEvent::stop_session());
        } else {
            tracing::warn!(message = %response.message, "logout refused");
        }
        Ok(response)
    }

    /// Keepalive: submits the current owner and token, stores the rotated token.
    /// Transport failures are returned for the caller to log; an `error`
    /// response ends the session.
    pub async fn validate_session(&self) -> Result<KeepaliveOutcome, ControllerError> {
        let bundle = self.session.get();
        let (Some(owner), Some(token)) = (bundle.owner(), bundle.token()) else {
            return Ok(KeepaliveOutcome::Skipped);
        };
        let request = RequestEnvelope::from(
            SimpleRequest::new(VALIDATE_SESSION_REQUEST)
                .with_param("Owner", owner)
                .with_param("Token", token.to_transport()),
        )
        .with_auth(&bundle);
        let response = self.dispatcher.dispatch(&request).await?;

        if self.session.get() != bundle {
            return Ok(KeepaliveOutcome::Superseded);
        }
        match response.status {
            ResponseStatus::Ok => {
                let refreshed = bundle.refreshed_from_payload(response.payload.as_ref())?;
                self.session.set(&refreshed)?;
                Ok(KeepaliveOutcome::Refreshed)
            }
            ResponseStatus::Error => {
                tracing::warn!(message = %response.message, "session rejected by server");
                self.force_logout(&response.message)?;
                Ok(KeepaliveOutcome::Rejected)
            }
            ResponseStatus::Info => {
                tracing::debug!(message = %response.message, "keepalive info");
                Ok(KeepaliveOutcome::Unconfirmed)
            }
        }
    }

    /// Invalid requests are rejected locally and never sent, and so is a switch
    /// to the mode the last host-info snapshot already reports (answered with
    /// `info`). Publishes the new mode only when the server answers `ok`.
    pub async fn change_op_mode(
        &self,
        mode: OperationMode,
        cluster: ClusterDescriptor,
    ) -> Result<ResponseEnvelope, ControllerError> {
        let current = self
            .notifier
            .latest_host_info()
            .and_then(|snapshot| snapshot.op_mode.clone());
        if current.as_ref() == Some(&mode) {
            tracing::debug!(op_mode = %mode, "host already in requested mode");
            return Ok(ResponseEnvelope::info(format!("{MODE_UNCHANGED} {mode}")));
        }
        validate_op_mode(&mode, &cluster)?;
        let request = RequestEnvelope::from(OpModeRequest::new(mode.clone(), cluster))
            .with_auth(&self.session.get());
        let response = self.dispatcher.dispatch(&request).await?;
        if response.is_ok() {
            self.notifier.publish_op_mode(&mode);
        } else {
            tracing::warn!(op_mode = %mode, message = %response.message, "operation mode change refused");
        }
        Ok(response)
    }

    /// Clears the session and announces `error`. The event is published even if
    /// clearing storage fails.
    pub fn force_logout(&self, reason: &str) -> Result<(), StorageError> {
        let cleared = self.session.clear();
        self.notifier.publish_login(&LoginEvent::error(reason));
        cleared
    }

    /// For calls that need a valid session: an `error` response ends it.
    /// Returns `true` when the session was ended.
    pub fn enforce_auth(&self, response: &ResponseEnvelope) -> bool {
        if !response.is_error() {
            return false;
        }
        if let Err(error) = self.force_logout(&response.message) {
            tracing::warn!(error = %error, "failed to clear rejected session");
        }
        true
    }
}

fn validate_op_mode(mode: &OperationMode, cluster: &ClusterDescriptor) -> Result<(), ControllerError> {
    if *mode == OperationMode::Master && cluster.name.trim().is_empty() {
        return Err(ControllerError::Validation(MISSING_CLUSTER_NAME.to_string()));
    }
    if cluster.is_protected() && cluster.check.as_deref().is_none_or(str::is_empty) {
        return Err(ControllerError::Validation(MISSING_CLUSTER_PASSWORD.to_string()));
    }
    Ok(())
}
