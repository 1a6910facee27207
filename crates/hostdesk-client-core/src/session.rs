//! Persisted client session: owner, module and the `id|password|token` triplet.

use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::storage::{KeyValueStore, StorageError};
use crate::wire::AuthContext;

pub const SESSION_STORAGE_KEY: &str = "hostdesk.session.v1";
pub const TOKEN_DELIMITER: char = '|';

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("session bundle is missing `{0}`")]
    MissingField(&'static str),
    #[error("session token must have three `|`-separated parts")]
    MalformedToken,
    #[error("session payload is invalid: {0}")]
    InvalidPayload(String),
}

/// Application module the user signed into.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Module {
    Admin,
    User,
    SelfRegistration,
    Other(String),
}

impl Module {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Admin => "Admin",
            Self::User => "User",
            Self::SelfRegistration => "SelfRegistration",
            Self::Other(raw) => raw.as_str(),
        }
    }
}

impl From<String> for Module {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "Admin" => Self::Admin,
            "User" => Self::User,
            "SelfRegistration" => Self::SelfRegistration,
            _ => Self::Other(raw),
        }
    }
}

impl From<&str> for Module {
    fn from(raw: &str) -> Self {
        Self::from(raw.to_string())
    }
}

impl From<Module> for String {
    fn from(module: Module) -> Self {
        match module {
            Module::Other(raw) => raw,
            other => other.as_str().to_string(),
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct SessionToken {
    id: String,
    password: String,
    token: String,
}

impl SessionToken {
    pub fn new(
        id: impl Into<String>,
        password: impl Into<String>,
        token: impl Into<String>,
    ) -> Result<Self, SessionError> {
        let id = id.into();
        let password = password.into();
        let token = token.into();
        if id.trim().is_empty() {
            return Err(SessionError::MissingField("Id"));
        }
        if password.trim().is_empty() {
            return Err(SessionError::MissingField("Password"));
        }
        if token.trim().is_empty() {
            return Err(SessionError::MissingField("Token"));
        }
        Ok(Self {
            id,
            password,
            token,
        })
    }

    /// Parses the transport form `id|password|token`.
    pub fn parse(raw: &str) -> Result<Self, SessionError> {
        let mut parts = raw.split(TOKEN_DELIMITER);
        let (Some(id), Some(password), Some(token), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(SessionError::MalformedToken);
        };
        Self::new(id, password, token)
    }

    #[must_use]
    pub fn to_transport(&self) -> String {
        format!(
            "{}{TOKEN_DELIMITER}{}{TOKEN_DELIMITER}{}",
            self.id, self.password, self.token
        )
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn with_token(&self, token: impl Into<String>) -> Result<Self, SessionError> {
        Self::new(self.id.clone(), self.password.clone(), token)
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionToken")
            .field("id", &self.id)
            .field("password", &"[REDACTED]")
            .field("token", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Credentials {
    owner: String,
    module: Module,
    token: SessionToken,
}

/// Either empty (anonymous) or a complete set of credentials; never partial.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionBundle {
    credentials: Option<Credentials>,
}

impl SessionBundle {
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn authenticated(
        owner: impl Into<String>,
        module: impl Into<Module>,
        token: SessionToken,
    ) -> Result<Self, SessionError> {
        let owner = owner.into();
        if owner.trim().is_empty() {
            return Err(SessionError::MissingField("Owner"));
        }
        let module = module.into();
        if module.as_str().trim().is_empty() {
            return Err(SessionError::MissingField("Module"));
        }
        Ok(Self {
            credentials: Some(Credentials {
                owner,
                module,
                token,
            }),
        })
    }

    /// Builds a bundle from a login response payload.
    ///
    /// The token arrives either as separate `Id`/`Password`/`Token` fields or as
    /// one `id|password|token` string in `Token`.
    pub fn from_login_payload(payload: Option<&Value>) -> Result<Self, SessionError> {
        let payload = SessionPayload::decode(payload)?;
        let owner = payload.owner.ok_or(SessionError::MissingField("Owner"))?;
        let module = payload.module.ok_or(SessionError::MissingField("Module"))?;
        let token = payload.token.ok_or(SessionError::MissingField("Token"))?;
        let token = match (payload.id, payload.password) {
            (Some(id), Some(password)) => SessionToken::new(id, password, token)?,
            _ => SessionToken::parse(&token)?,
        };
        Self::authenticated(owner, module, token)
    }

    /// Applies a keepalive response: the server may rotate the token or resend
    /// the whole triplet. A payload without a token keeps the bundle as is.
    pub fn refreshed_from_payload(&self, payload: Option<&Value>) -> Result<Self, SessionError> {
        let current = self
            .credentials
            .as_ref()
            .ok_or(SessionError::MissingField("Owner"))?;
        let payload = SessionPayload::decode(payload)?;
        let Some(token) = payload.token else {
            return Ok(self.clone());
        };
        let token = match (payload.id, payload.password) {
            (Some(id), Some(password)) => SessionToken::new(id, password, token)?,
            _ if token.contains(TOKEN_DELIMITER) => SessionToken::parse(&token)?,
            _ => current.token.with_token(token)?,
        };
        Self::authenticated(current.owner.clone(), current.module.clone(), token)
    }

    pub fn is_authenticated(&self) -> bool {
        self.credentials.is_some()
    }

    pub fn owner(&self) -> Option<&str> {
        self.credentials.as_ref().map(|c| c.owner.as_str())
    }

    pub fn module(&self) -> Option<&Module> {
        self.credentials.as_ref().map(|c| &c.module)
    }

    pub fn token(&self) -> Option<&SessionToken> {
        self.credentials.as_ref().map(|c| &c.token)
    }

    pub fn auth_context(&self) -> Option<AuthContext> {
        self.credentials.as_ref().map(|c| AuthContext {
            owner: c.owner.clone(),
            module: c.module.as_str().to_string(),
            token: c.token.to_transport(),
        })
    }
}

#[derive(Debug, Default, Deserialize)]
struct SessionPayload {
    #[serde(rename = "Owner", default, deserialize_with = "non_empty")]
    owner: Option<String>,
    #[serde(rename = "Module", default, deserialize_with = "non_empty")]
    module: Option<String>,
    #[serde(rename = "Id", default, deserialize_with = "non_empty")]
    id: Option<String>,
    #[serde(rename = "Password", default, deserialize_with = "non_empty")]
    password: Option<String>,
    #[serde(rename = "Token", default, deserialize_with = "non_empty")]
    token: Option<String>,
}

impl SessionPayload {
    fn decode(payload: Option<&Value>) -> Result<Self, SessionError> {
        match payload {
            None | Some(Value::Null) => Ok(Self::default()),
            Some(value) => Self::deserialize(value)
                .map_err(|error| SessionError::InvalidPayload(error.to_string())),
        }
    }
}

/// Accepts strings or numbers; blank values count as absent.
fn non_empty<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(match raw {
        Some(Value::String(text)) if !text.trim().is_empty() => Some(text),
        Some(Value::Number(number)) => Some(number.to_string()),
        _ => None,
    })
}

/// On-disk form of the bundle.
#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedSession {
    #[serde(rename = "Owner", default)]
    owner: String,
    #[serde(rename = "Module", default)]
    module: String,
    #[serde(rename = "Id", default)]
    id: String,
    #[serde(rename = "Password", default)]
    password: String,
    #[serde(rename = "Token", default)]
    token: String,
}

impl PersistedSession {
    fn from_bundle(bundle: &SessionBundle) -> Self {
        match &bundle.credentials {
            Some(credentials) => Self {
                owner: credentials.owner.clone(),
                module: credentials.module.as_str().to_string(),
                id: credentials.token.id.clone(),
                password: credentials.token.password.clone(),
                token: credentials.token.token.clone(),
            },
            None => Self::default(),
        }
    }

    fn into_bundle(self) -> Result<SessionBundle, SessionError> {
        let fields = [
            &self.owner,
            &self.module,
            &self.id,
            &self.password,
            &self.token,
        ];
        if fields.iter().all(|field| field.is_empty()) {
            return Ok(SessionBundle::empty());
        }
        let token = SessionToken::new(self.id, self.password, self.token)?;
        SessionBundle::authenticated(self.owner, self.module, token)
    }
}

pub struct SessionStore {
    storage: Rc<dyn KeyValueStore>,
    key: String,
}

impl SessionStore {
    pub fn new(storage: Rc<dyn KeyValueStore>) -> Self {
        Self::with_key(storage, SESSION_STORAGE_KEY)
    }

    pub fn with_key(storage: Rc<dyn KeyValueStore>, key: impl Into<String>) -> Self {
        Self {
            storage,
            key: key.into(),
        }
    }

    pub fn storage_key(&self) -> &str {
        &self.key
    }

    /// Replaces the persisted bundle. Persisting the empty bundle clears it.
    pub fn set(&self, bundle: &SessionBundle) -> Result<(), StorageError> {
        if !bundle.is_authenticated() {
            return self.clear();
        }
        let encoded = serde_json::to_string(&PersistedSession::from_bundle(bundle)).map_err(
            |error| StorageError::Encode {
                key: self.key.clone(),
                message: error.to_string(),
            },
        )?;
        self.storage.set_item(&self.key, &encoded)
    }

    pub fn get(&self) -> SessionBundle {
        let raw = match self.storage.get_item(&self.key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return SessionBundle::empty(),
            Err(error) => {
                tracing::warn!(error = %error, key = %self.key, "session read failed");
                return SessionBundle::empty();
            }
        };
        let persisted = match serde_json::from_str::<PersistedSession>(&raw) {
            Ok(persisted) => persisted,
            Err(error) => {
                tracing::warn!(error = %error, key = %self.key, "discarding undecodable session");
                return SessionBundle::empty();
            }
        };
        persisted.into_bundle().unwrap_or_else(|error| {
            tracing::warn!(error = %error, key = %self.key, "discarding partial session");
            SessionBundle::empty()
        })
    }

    pub fn clear(&self) -> Result<(), StorageError> {
        self.storage.remove_item(&self.key)
    }
}
