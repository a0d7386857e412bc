//! Log record types
//!
//! A producer's context is normalized into a [`NewRecord`]; ingestion then
//! assigns an id and a timestamp to turn it into an immutable [`LogRecord`].

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ParseError;
use crate::identity::RecordId;
use crate::limits::{self, truncate_opt};

/// Classification of a record by the kind of producer that emitted it
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    /// Explicit application error call
    Error,
    /// Schema change notification
    DdlEvent,
    /// Runtime/server error with a nested error stack
    ServerError,
    /// Failed authentication attempt
    LoginFailure,
    /// Self-reporting from log maintenance (retention purges)
    Maintenance,
    /// Producer-defined extension tag
    Custom(String),
}

impl EventType {
    /// Canonical tag as stored and indexed
    pub fn as_str(&self) -> &str {
        match self {
            EventType::Error => "ERROR",
            EventType::DdlEvent => "DDL_EVENT",
            EventType::ServerError => "SERVER_ERROR",
            EventType::LoginFailure => "LOGIN_FAILURE",
            EventType::Maintenance => "MAINTENANCE",
            EventType::Custom(tag) => tag,
        }
    }

    /// Map a custom tag that spells a built-in kind onto that kind
    pub fn canonical(self) -> Self {
        match self {
            EventType::Custom(tag) => match tag.parse::<EventType>() {
                Ok(EventType::Custom(_)) | Err(_) => EventType::Custom(tag),
                Ok(builtin) => builtin,
            },
            other => other,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tag = s.trim().to_ascii_uppercase();
        match tag.as_str() {
            "" => Err(ParseError::EmptyEventType),
            "ERROR" => Ok(EventType::Error),
            "DDL_EVENT" => Ok(EventType::DdlEvent),
            "SERVER_ERROR" => Ok(EventType::ServerError),
            "LOGIN_FAILURE" => Ok(EventType::LoginFailure),
            "MAINTENANCE" => Ok(EventType::Maintenance),
            _ => Ok(EventType::Custom(tag)),
        }
    }
}

/// Record severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "INFO" => Ok(Severity::Info),
            "WARNING" | "WARN" => Ok(Severity::Warning),
            "ERROR" => Ok(Severity::Error),
            other => Err(ParseError::UnknownSeverity(other.to_string())),
        }
    }
}

/// Identity and origin of the producing context
///
/// Producers resolve this from their own environment and pass it explicitly;
/// every field is optional and captured best-effort.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionContext {
    pub username: Option<String>,
    pub os_user: Option<String>,
    pub client_host: Option<String>,
    pub client_address: Option<String>,
    pub program: Option<String>,
    pub module: Option<String>,
    pub session_id: Option<String>,
    /// Database the session is attached to
    pub database_name: Option<String>,
}

impl SessionContext {
    /// Empty context (nothing known about the caller)
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_os_user(mut self, os_user: impl Into<String>) -> Self {
        self.os_user = Some(os_user.into());
        self
    }

    pub fn with_client(mut self, host: impl Into<String>, address: impl Into<String>) -> Self {
        self.client_host = Some(host.into());
        self.client_address = Some(address.into());
        self
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = Some(program.into());
        self
    }

    pub fn with_module(mut self, module: impl Into<String>) -> Self {
        self.module = Some(module.into());
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_database(mut self, database_name: impl Into<String>) -> Self {
        self.database_name = Some(database_name.into());
        self
    }

    /// Fill every field that is still unset from `ambient`
    ///
    /// Fields already set by the producer always win.
    pub fn fill_missing_from(&mut self, ambient: &SessionContext) {
        fn fill(slot: &mut Option<String>, from: &Option<String>) {
            if slot.is_none() {
                slot.clone_from(from);
            }
        }
        fill(&mut self.username, &ambient.username);
        fill(&mut self.os_user, &ambient.os_user);
        fill(&mut self.client_host, &ambient.client_host);
        fill(&mut self.client_address, &ambient.client_address);
        fill(&mut self.program, &ambient.program);
        fill(&mut self.module, &ambient.module);
        fill(&mut self.session_id, &ambient.session_id);
        fill(&mut self.database_name, &ambient.database_name);
    }

    /// One-line summary for free-form context text
    pub fn summary(&self) -> String {
        let field = |value: &Option<String>| value.as_deref().unwrap_or("unknown").to_string();
        format!(
            "User: {}, OS User: {}, Host: {}, IP: {}, Program: {}",
            field(&self.username),
            field(&self.os_user),
            field(&self.client_host),
            field(&self.client_address),
            field(&self.program),
        )
    }

    fn enforce_limits(&mut self) {
        truncate_opt(&mut self.username, limits::USERNAME_MAX);
        truncate_opt(&mut self.os_user, limits::OS_USER_MAX);
        truncate_opt(&mut self.client_host, limits::CLIENT_HOST_MAX);
        truncate_opt(&mut self.client_address, limits::CLIENT_ADDRESS_MAX);
        truncate_opt(&mut self.program, limits::PROGRAM_MAX);
        truncate_opt(&mut self.module, limits::MODULE_MAX);
        truncate_opt(&mut self.session_id, limits::SESSION_ID_MAX);
        truncate_opt(&mut self.database_name, limits::DATABASE_NAME_MAX);
    }
}

/// A normalized record that has not been assigned an identity yet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRecord {
    /// When the event happened; defaults to write time
    pub occurred_at: Option<DateTime<Utc>>,
    pub code: Option<i64>,
    pub message: Option<String>,
    pub backtrace: Option<String>,
    pub error_stack: Option<String>,
    pub call_stack: Option<String>,
    pub actor: SessionContext,
    pub object_name: Option<String>,
    pub statement_text: Option<String>,
    pub event_type: EventType,
    pub severity: Severity,
    pub additional_info: Option<String>,
}

impl NewRecord {
    /// Create an empty record of the given kind
    pub fn new(event_type: EventType, severity: Severity) -> Self {
        Self {
            occurred_at: None,
            code: None,
            message: None,
            backtrace: None,
            error_stack: None,
            call_stack: None,
            actor: SessionContext::default(),
            object_name: None,
            statement_text: None,
            event_type,
            severity,
            additional_info: None,
        }
    }

    /// Truncate every text field to its bound
    pub fn enforce_limits(&mut self) {
        truncate_opt(&mut self.message, limits::MESSAGE_MAX);
        truncate_opt(&mut self.backtrace, limits::BACKTRACE_MAX);
        truncate_opt(&mut self.error_stack, limits::ERROR_STACK_MAX);
        truncate_opt(&mut self.call_stack, limits::CALL_STACK_MAX);
        truncate_opt(&mut self.object_name, limits::OBJECT_NAME_MAX);
        truncate_opt(&mut self.statement_text, limits::LARGE_TEXT_MAX);
        truncate_opt(&mut self.additional_info, limits::LARGE_TEXT_MAX);
        if let EventType::Custom(tag) = &mut self.event_type {
            limits::truncate_chars(tag, limits::EVENT_TYPE_MAX);
        }
        self.event_type = std::mem::replace(&mut self.event_type, EventType::Error).canonical();
        self.actor.enforce_limits();
    }
}

/// An immutable, committed log record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub id: RecordId,
    pub occurred_at: DateTime<Utc>,
    pub code: Option<i64>,
    pub message: Option<String>,
    pub backtrace: Option<String>,
    pub error_stack: Option<String>,
    pub call_stack: Option<String>,
    pub actor: SessionContext,
    pub object_name: Option<String>,
    pub statement_text: Option<String>,
    pub event_type: EventType,
    pub severity: Severity,
    pub additional_info: Option<String>,
}

impl LogRecord {
    /// Resolve a normalized record into a storable one
    ///
    /// `occurred_at` falls back to `now` when the producer did not supply
    /// one and is truncated to microseconds, the precision of the storage
    /// key. Text fields are truncated to their bounds.
    pub fn resolve(id: RecordId, mut new: NewRecord, now: DateTime<Utc>) -> Self {
        new.enforce_limits();
        Self {
            id,
            occurred_at: new.occurred_at.unwrap_or(now).trunc_subsecs(6),
            code: new.code,
            message: new.message,
            backtrace: new.backtrace,
            error_stack: new.error_stack,
            call_stack: new.call_stack,
            actor: new.actor,
            object_name: new.object_name,
            statement_text: new.statement_text,
            event_type: new.event_type,
            severity: new.severity,
            additional_info: new.additional_info,
        }
    }

    /// Storage key: timestamp in microseconds, then id
    pub fn key(&self) -> (i64, u64) {
        (self.occurred_at.timestamp_micros(), self.id.0)
    }

    pub fn username(&self) -> Option<&str> {
        self.actor.username.as_deref()
    }

    pub fn database_name(&self) -> Option<&str> {
        self.actor.database_name.as_deref()
    }

    /// Rough in-memory footprint, used for partition size reporting
    pub fn approx_size(&self) -> u64 {
        let text = |field: &Option<String>| field.as_ref().map_or(0, |s| s.len());
        let actor = &self.actor;
        let total = 64
            + text(&self.message)
            + text(&self.backtrace)
            + text(&self.error_stack)
            + text(&self.call_stack)
            + text(&self.object_name)
            + text(&self.statement_text)
            + text(&self.additional_info)
            + text(&actor.username)
            + text(&actor.os_user)
            + text(&actor.client_host)
            + text(&actor.client_address)
            + text(&actor.program)
            + text(&actor.module)
            + text(&actor.session_id)
            + text(&actor.database_name)
            + self.event_type.as_str().len();
        total as u64
    }
}
