//! Request/response envelopes and shared wire types for the host backend.
//!
//! The backend speaks PascalCase JSON. Request bodies are a closed set of three
//! shapes; responses are either a status envelope (`{"Name": "ok", "Status": ...}`)
//! or a bare payload (a row list, an object, or `null`).

use std::collections::BTreeMap;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::dispatch::OperationName;
use crate::session::SessionBundle;

/// Marker reported for a feature whose data set is empty.
pub const EMPTY_MARKER: &str = "0";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Value")]
    pub value: String,
}

impl Param {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Authentication context embedded by callers into outgoing request bodies.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthContext {
    #[serde(rename = "Owner")]
    pub owner: String,
    #[serde(rename = "Module")]
    pub module: String,
    #[serde(rename = "Token")]
    pub token: String,
}

impl fmt::Debug for AuthContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthContext")
            .field("owner", &self.owner)
            .field("module", &self.module)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimpleRequest {
    #[serde(rename = "Request")]
    pub request: String,
    #[serde(rename = "Param", default)]
    pub params: Vec<Param>,
    #[serde(rename = "Auth", default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthContext>,
}

impl SimpleRequest {
    pub fn new(request: impl Into<String>) -> Self {
        Self {
            request: request.into(),
            params: Vec::new(),
            auth: None,
        }
    }

    #[must_use]
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push(Param::new(name, value));
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableOperation {
    View,
    Update,
    Drop,
    Insert,
}

impl TableOperation {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::View => "view",
            Self::Update => "update",
            Self::Drop => "drop",
            Self::Insert => "insert",
        }
    }
}

/// Generic CRUD request against one backend entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableRequest {
    #[serde(rename = "Operation")]
    pub operation: TableOperation,
    #[serde(rename = "TableData", default)]
    pub table_data: Option<Value>,
    #[serde(rename = "Custom")]
    pub entity: String,
    #[serde(rename = "Filter", default)]
    pub filter: Vec<Param>,
    #[serde(rename = "Auth", default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthContext>,
}

impl TableRequest {
    pub fn new(operation: TableOperation, entity: impl Into<String>) -> Self {
        Self {
            operation,
            table_data: None,
            entity: entity.into(),
            filter: Vec::new(),
            auth: None,
        }
    }

    pub fn view(entity: impl Into<String>) -> Self {
        Self::new(TableOperation::View, entity)
    }

    pub fn drop(entity: impl Into<String>) -> Self {
        Self::new(TableOperation::Drop, entity)
    }

    pub fn update(entity: impl Into<String>, row: Value) -> Self {
        Self::new(TableOperation::Update, entity).with_row(row)
    }

    pub fn insert(entity: impl Into<String>, row: Value) -> Self {
        Self::new(TableOperation::Insert, entity).with_row(row)
    }

    #[must_use]
    pub fn with_row(mut self, row: Value) -> Self {
        self.table_data = Some(row);
        self
    }

    #[must_use]
    pub fn with_filter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.filter.push(Param::new(name, value));
        self
    }
}

/// Role of the host inside a cluster. Unknown modes (e.g. `LOCAL`) round-trip verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum OperationMode {
    Master,
    Node,
    Other(String),
}

impl OperationMode {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Master => "MASTER",
            Self::Node => "NODE",
            Self::Other(raw) => raw.as_str(),
        }
    }
}

impl From<String> for OperationMode {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "MASTER" => Self::Master,
            "NODE" => Self::Node,
            _ => Self::Other(raw),
        }
    }
}

impl From<OperationMode> for String {
    fn from(mode: OperationMode) -> Self {
        match mode {
            OperationMode::Other(raw) => raw,
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for OperationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterDescriptor {
    #[serde(rename = "Name", default)]
    pub name: String,
    #[serde(rename = "Owner", default)]
    pub owner: String,
    /// Present when the cluster requires a password to join.
    #[serde(rename = "Password", default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Password typed by the user when joining a protected cluster.
    #[serde(rename = "Check", default, skip_serializing_if = "Option::is_none")]
    pub check: Option<String>,
}

impl ClusterDescriptor {
    pub fn new(name: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            owner: owner.into(),
            password: None,
            check: None,
        }
    }

    #[must_use]
    pub fn is_protected(&self) -> bool {
        self.password
            .as_deref()
            .is_some_and(|password| !password.is_empty())
    }

    #[must_use]
    pub fn with_check(mut self, check: impl Into<String>) -> Self {
        self.check = Some(check.into());
        self
    }
}

impl fmt::Debug for ClusterDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterDescriptor")
            .field("name", &self.name)
            .field("owner", &self.owner)
            .field("protected", &self.is_protected())
            .field("check", &self.check.as_ref().map(|_| "[PRESENT]"))
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpModeRequest {
    #[serde(rename = "NewOpMode")]
    pub new_op_mode: OperationMode,
    #[serde(rename = "Cluster")]
    pub cluster: ClusterDescriptor,
    #[serde(rename = "Auth", default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthContext>,
}

impl OpModeRequest {
    pub fn new(new_op_mode: OperationMode, cluster: ClusterDescriptor) -> Self {
        Self {
            new_op_mode,
            cluster,
            auth: None,
        }
    }
}

/// One request body; the populated shape decides the default server operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RequestEnvelope {
    Simple(SimpleRequest),
    Table(TableRequest),
    OpMode(OpModeRequest),
}

impl RequestEnvelope {
    #[must_use]
    pub fn operation(&self) -> OperationName {
        match self {
            Self::Simple(_) => OperationName::SimpleRequest,
            Self::Table(_) => OperationName::TableRequest,
            Self::OpMode(_) => OperationName::SetOpMode,
        }
    }

    #[must_use]
    pub fn auth(&self) -> Option<&AuthContext> {
        match self {
            Self::Simple(request) => request.auth.as_ref(),
            Self::Table(request) => request.auth.as_ref(),
            Self::OpMode(request) => request.auth.as_ref(),
        }
    }

    /// Embeds the bundle's credentials; an anonymous bundle clears them.
    #[must_use]
    pub fn with_auth(mut self, session: &SessionBundle) -> Self {
        let auth = session.auth_context();
        match &mut self {
            Self::Simple(request) => request.auth = auth,
            Self::Table(request) => request.auth = auth,
            Self::OpMode(request) => request.auth = auth,
        }
        self
    }
}

impl From<SimpleRequest> for RequestEnvelope {
    fn from(request: SimpleRequest) -> Self {
        Self::Simple(request)
    }
}

impl From<TableRequest> for RequestEnvelope {
    fn from(request: TableRequest) -> Self {
        Self::Table(request)
    }
}

impl From<OpModeRequest> for RequestEnvelope {
    fn from(request: OpModeRequest) -> Self {
        Self::OpMode(request)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Ok,
    Error,
    Info,
}

impl ResponseStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Error => "error",
            Self::Info => "info",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "ok" => Some(Self::Ok),
            "error" => Some(Self::Error),
            "info" => Some(Self::Info),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResponseEnvelope {
    pub status: ResponseStatus,
    pub message: String,
    /// Only meaningful when `status` is `Ok`.
    pub payload: Option<Value>,
}

impl ResponseEnvelope {
    pub fn ok(payload: Option<Value>) -> Self {
        Self {
            status: ResponseStatus::Ok,
            message: String::new(),
            payload,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Error,
            message: message.into(),
            payload: None,
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Info,
            message: message.into(),
            payload: None,
        }
    }

    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status == ResponseStatus::Ok
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        self.status == ResponseStatus::Error
    }

    /// Interprets a decoded response body.
    #[must_use]
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Null => Self::ok(None),
            Value::Object(mut fields) => {
                let status = fields
                    .get("Name")
                    .and_then(Value::as_str)
                    .and_then(ResponseStatus::parse);
                let Some(status) = status else {
                    return Self::ok(Some(Value::Object(fields)));
                };
                fields.remove("Name");
                let message = match fields.remove("Status") {
                    Some(Value::String(message)) => message,
                    Some(Value::Null) | None => String::new(),
                    Some(other) => other.to_string(),
                };
                let payload = if fields.is_empty() {
                    None
                } else {
                    Some(Value::Object(fields))
                };
                Self {
                    status,
                    message,
                    payload,
                }
            }
            other => Self::ok(Some(other)),
        }
    }

    pub fn from_body(raw: &str) -> Result<Self, serde_json::Error> {
        if raw.trim().is_empty() {
            return Ok(Self::ok(None));
        }
        serde_json::from_str::<Value>(raw).map(Self::from_value)
    }

    /// `false` for a missing/null payload or an empty row list.
    #[must_use]
    pub fn has_data(&self) -> bool {
        match &self.payload {
            None | Some(Value::Null) => false,
            Some(Value::Array(rows)) => !rows.is_empty(),
            Some(_) => true,
        }
    }

    pub fn decode_payload<T: DeserializeOwned>(&self) -> Result<Option<T>, serde_json::Error> {
        match &self.payload {
            None | Some(Value::Null) => Ok(None),
            Some(value) => T::deserialize(value).map(Some),
        }
    }

    #[must_use]
    pub fn payload_field(&self, name: &str) -> Option<&Value> {
        self.payload.as_ref()?.as_object()?.get(name)
    }
}

/// Opaque per-feature revision marker. Compared for equality only, never ordered.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct RevisionMarker(String);

impl RevisionMarker {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_empty_marker(&self) -> bool {
        self.0 == EMPTY_MARKER
    }
}

impl fmt::Display for RevisionMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RevisionMarker {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawMarker {
    Text(String),
    Number(serde_json::Number),
    Flag(bool),
}

impl<'de> Deserialize<'de> for RevisionMarker {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match RawMarker::deserialize(deserializer)? {
            RawMarker::Text(text) => Self(text),
            RawMarker::Number(number) => Self(number.to_string()),
            RawMarker::Flag(flag) => Self(flag.to_string()),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostInfoSnapshot {
    #[serde(rename = "OpMode", default)]
    pub op_mode: Option<OperationMode>,
    #[serde(rename = "Cluster", default)]
    pub cluster: Option<ClusterDescriptor>,
    #[serde(
        rename = "Updates",
        default,
        deserialize_with = "deserialize_updates"
    )]
    pub updates: BTreeMap<String, RevisionMarker>,
}

impl HostInfoSnapshot {
    #[must_use]
    pub fn marker(&self, feature_key: &str) -> Option<&RevisionMarker> {
        self.updates.get(feature_key)
    }

    #[must_use]
    pub fn with_marker(mut self, feature_key: impl Into<String>, marker: impl Into<String>) -> Self {
        self.updates
            .insert(feature_key.into(), RevisionMarker::new(marker));
        self
    }
}

fn deserialize_updates<'de, D>(deserializer: D) -> Result<BTreeMap<String, RevisionMarker>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<BTreeMap<String, Option<RevisionMarker>>>::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .filter_map(|(key, marker)| marker.map(|marker| (key, marker)))
        .collect())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LoginEventKind {
    #[serde(rename = "error")]
    Error,
    #[serde(rename = "stopSession")]
    StopSession,
    #[serde(rename = "startSession")]
    StartSession,
    #[serde(rename = "ok")]
    Ok,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginEvent {
    #[serde(rename = "Name")]
    pub kind: LoginEventKind,
    #[serde(rename = "Status", default)]
    pub status: String,
}

impl LoginEvent {
    pub fn new(kind: LoginEventKind, status: impl Into<String>) -> Self {
        Self {
            kind,
            status: status.into(),
        }
    }

    pub fn error(status: impl Into<String>) -> Self {
        Self::new(LoginEventKind::Error, status)
    }

    #[must_use]
    pub fn start_session() -> Self {
        Self::new(LoginEventKind::StartSession, "")
    }

    #[must_use]
    pub fn stop_session() -> Self {
        Self::new(LoginEventKind::StopSession, "")
    }

    #[must_use]
    pub fn ok() -> Self {
        Self::new(LoginEventKind::Ok, "")
    }
}
