//! Event normalization
//!
//! Each producer kind carries its own context type. Normalizing maps that
//! context onto the single [`NewRecord`] schema; anything that has no column
//! of its own goes into `additional_info` as free-form text.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use faultlog_core::{EventType, NewRecord, SessionContext, Severity};
use faultlog_storage::PurgeReport;

/// Code recorded for rejected credentials
pub const INVALID_CREDENTIALS_CODE: i64 = 1017;

/// What the runtime knows about the error currently being handled
///
/// Used to fill fields an [`ErrorContext`] leaves unset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmbientError {
    pub code: Option<i64>,
    pub message: Option<String>,
    pub backtrace: Option<String>,
    pub error_stack: Option<String>,
    pub call_stack: Option<String>,
}

impl AmbientError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn with_backtrace(mut self, backtrace: impl Into<String>) -> Self {
        self.backtrace = Some(backtrace.into());
        self
    }

    pub fn with_error_stack(mut self, error_stack: impl Into<String>) -> Self {
        self.error_stack = Some(error_stack.into());
        self
    }

    pub fn with_call_stack(mut self, call_stack: impl Into<String>) -> Self {
        self.call_stack = Some(call_stack.into());
        self
    }
}

/// Generic error or explicit application log call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorContext {
    pub occurred_at: Option<DateTime<Utc>>,
    pub code: Option<i64>,
    pub message: Option<String>,
    pub backtrace: Option<String>,
    pub error_stack: Option<String>,
    pub call_stack: Option<String>,
    pub object_name: Option<String>,
    pub statement_text: Option<String>,
    pub additional_info: Option<String>,
    /// Defaults to `ERROR`
    pub severity: Option<Severity>,
    /// Defaults to `ERROR`; set for producer-defined tags
    pub event_type: Option<EventType>,
    /// Source for fields left unset above
    pub ambient: Option<AmbientError>,
    /// Overrides for the caller's session
    pub actor: SessionContext,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Error with a code and message
    pub fn error(code: i64, message: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            message: Some(message.into()),
            ..Default::default()
        }
    }

    /// Error described entirely by the ambient runtime state
    pub fn from_ambient(ambient: AmbientError) -> Self {
        Self {
            ambient: Some(ambient),
            ..Default::default()
        }
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }

    pub fn with_event_type(mut self, event_type: EventType) -> Self {
        self.event_type = Some(event_type);
        self
    }

    pub fn with_object(mut self, object_name: impl Into<String>) -> Self {
        self.object_name = Some(object_name.into());
        self
    }

    pub fn with_statement(mut self, statement_text: impl Into<String>) -> Self {
        self.statement_text = Some(statement_text.into());
        self
    }

    pub fn with_additional_info(mut self, info: impl Into<String>) -> Self {
        self.additional_info = Some(info.into());
        self
    }

    pub fn with_ambient(mut self, ambient: AmbientError) -> Self {
        self.ambient = Some(ambient);
        self
    }

    pub fn with_occurred_at(mut self, ts: DateTime<Utc>) -> Self {
        self.occurred_at = Some(ts);
        self
    }

    fn normalize(self) -> NewRecord {
        let ambient = self.ambient.unwrap_or_default();
        let mut record = NewRecord::new(
            self.event_type.unwrap_or(EventType::Error),
            self.severity.unwrap_or(Severity::Error),
        );
        record.occurred_at = self.occurred_at;
        record.code = self.code.or(ambient.code);
        record.message = self.message.or(ambient.message);
        record.backtrace = self.backtrace.or(ambient.backtrace);
        record.error_stack = self.error_stack.or(ambient.error_stack);
        record.call_stack = self.call_stack.or(ambient.call_stack);
        record.object_name = self.object_name;
        record.statement_text = self.statement_text;
        record.additional_info = self.additional_info;
        record.actor = self.actor;
        record
    }
}

/// A schema object was created, altered or dropped
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaChangeContext {
    /// Kind of change, e.g. `CREATE`, `ALTER`, `DROP`
    pub event_type_name: String,
    pub object_name: Option<String>,
    pub object_type: Option<String>,
    pub statement_text: Option<String>,
    pub occurred_at: Option<DateTime<Utc>>,
}

impl SchemaChangeContext {
    pub fn new(event_type_name: impl Into<String>) -> Self {
        Self {
            event_type_name: event_type_name.into(),
            object_name: None,
            object_type: None,
            statement_text: None,
            occurred_at: None,
        }
    }

    pub fn with_object(mut self, object_type: impl Into<String>, name: impl Into<String>) -> Self {
        self.object_type = Some(object_type.into());
        self.object_name = Some(name.into());
        self
    }

    pub fn with_statement(mut self, statement_text: impl Into<String>) -> Self {
        self.statement_text = Some(statement_text.into());
        self
    }

    fn normalize(self) -> NewRecord {
        let mut record = NewRecord::new(EventType::DdlEvent, Severity::Info);
        record.occurred_at = self.occurred_at;
        record.code = Some(0);
        record.message = Some(format!("DDL Event: {}", self.event_type_name));
        record.additional_info = self
            .object_type
            .map(|kind| format!("Object Type: {kind}"));
        record.object_name = self.object_name;
        record.statement_text = self.statement_text;
        record
    }
}

/// One level of a nested server error
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackFrame {
    pub code: i64,
    pub message: String,
}

impl StackFrame {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// An error raised by the server itself, with its nested cause stack
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerErrorContext {
    /// Outermost error first
    pub frames: Vec<StackFrame>,
    pub statement_text: Option<String>,
    pub occurred_at: Option<DateTime<Utc>>,
    /// Session the error was raised in; summarized into `additional_info`
    pub actor: SessionContext,
}

impl ServerErrorContext {
    pub fn new(frames: Vec<StackFrame>) -> Self {
        Self {
            frames,
            ..Default::default()
        }
    }

    pub fn with_statement(mut self, statement_text: impl Into<String>) -> Self {
        self.statement_text = Some(statement_text.into());
        self
    }

    pub fn with_actor(mut self, actor: SessionContext) -> Self {
        self.actor = actor;
        self
    }

    fn normalize(self) -> NewRecord {
        let mut record = NewRecord::new(EventType::ServerError, Severity::Error);
        record.occurred_at = self.occurred_at;

        let mut info = vec![format!("Error Stack Depth: {}", self.frames.len())];
        info.extend(self.frames.iter().map(|f| format!("{} - {}", f.code, f.message)));
        info.push(self.actor.summary());

        if let Some(top) = self.frames.into_iter().next() {
            record.code = Some(top.code);
            record.message = Some(top.message);
        }
        record.additional_info = Some(info.join("\n"));
        record.statement_text = self.statement_text;
        record.actor = self.actor;
        record
    }
}

/// An authentication attempt was rejected
///
/// There is no established session at this point, so the attempted identity
/// and origin travel in the context itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoginFailureContext {
    pub username: String,
    pub reason: String,
    pub client_host: Option<String>,
    pub client_address: Option<String>,
    pub occurred_at: Option<DateTime<Utc>>,
}

impl LoginFailureContext {
    pub fn new(username: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            reason: reason.into(),
            client_host: None,
            client_address: None,
            occurred_at: None,
        }
    }

    pub fn with_client(mut self, host: impl Into<String>, address: impl Into<String>) -> Self {
        self.client_host = Some(host.into());
        self.client_address = Some(address.into());
        self
    }

    fn normalize(self) -> NewRecord {
        let mut record = NewRecord::new(EventType::LoginFailure, Severity::Warning);
        record.occurred_at = self.occurred_at;
        record.code = Some(INVALID_CREDENTIALS_CODE);
        record.message = Some("Failed login attempt".to_string());
        record.additional_info = Some(format!(
            "Failed login attempt - Username: {}, Reason: {}, Host: {}, IP: {}",
            self.username,
            self.reason,
            self.client_host.as_deref().unwrap_or("unknown"),
            self.client_address.as_deref().unwrap_or("unknown"),
        ));
        record.actor.username = Some(self.username);
        record.actor.client_host = self.client_host;
        record.actor.client_address = self.client_address;
        record
    }
}

/// Housekeeping performed by the log itself
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaintenanceContext {
    pub message: String,
    pub object_name: Option<String>,
    pub additional_info: Option<String>,
}

impl MaintenanceContext {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            object_name: None,
            additional_info: None,
        }
    }

    /// Summary of a retention purge
    pub fn retention_purge(report: &PurgeReport) -> Self {
        let mut info = format!(
            "records_deleted={}, partitions_dropped={}, cutoff={}",
            report.records_deleted,
            report.partitions_dropped(),
            report.cutoff.to_rfc3339(),
        );
        if !report.dropped.is_empty() {
            let names: Vec<&str> = report.dropped.iter().map(|p| p.name.as_str()).collect();
            info.push_str(&format!(", partitions=[{}]", names.join(",")));
        }
        if let Some(failure) = &report.failure {
            info.push_str(&format!(", failure={failure}"));
        }

        Self {
            message: format!(
                "Retention purge: {} records deleted before {}",
                report.records_deleted,
                report.cutoff.to_rfc3339()
            ),
            object_name: Some("partitions".to_string()),
            additional_info: Some(info),
        }
    }

    fn normalize(self) -> NewRecord {
        let mut record = NewRecord::new(EventType::Maintenance, Severity::Info);
        record.code = Some(0);
        record.message = Some(self.message);
        record.object_name = self.object_name;
        record.additional_info = self.additional_info;
        record
    }
}

/// Any event a producer can hand to the recorder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ProducerEvent {
    Error(ErrorContext),
    SchemaChange(SchemaChangeContext),
    ServerError(ServerErrorContext),
    LoginFailure(LoginFailureContext),
    Maintenance(MaintenanceContext),
}

impl ProducerEvent {
    /// Map onto the uniform record schema, with text truncated to its bounds
    pub fn normalize(self) -> NewRecord {
        let mut record = match self {
            ProducerEvent::Error(ctx) => ctx.normalize(),
            ProducerEvent::SchemaChange(ctx) => ctx.normalize(),
            ProducerEvent::ServerError(ctx) => ctx.normalize(),
            ProducerEvent::LoginFailure(ctx) => ctx.normalize(),
            ProducerEvent::Maintenance(ctx) => ctx.normalize(),
        };
        record.enforce_limits();
        record
    }

    /// Normalize, resolving actor fields the producer left unset from `session`
    pub fn normalize_with(mut self, session: &SessionContext) -> NewRecord {
        // The session summary is part of the server error text
        if let ProducerEvent::ServerError(ctx) = &mut self {
            ctx.actor.fill_missing_from(session);
        }
        let mut record = self.normalize();
        record.actor.fill_missing_from(session);
        record.enforce_limits();
        record
    }
}

impl From<ErrorContext> for ProducerEvent {
    fn from(ctx: ErrorContext) -> Self {
        ProducerEvent::Error(ctx)
    }
}

impl From<SchemaChangeContext> for ProducerEvent {
    fn from(ctx: SchemaChangeContext) -> Self {
        ProducerEvent::SchemaChange(ctx)
    }
}

impl From<ServerErrorContext> for ProducerEvent {
    fn from(ctx: ServerErrorContext) -> Self {
        ProducerEvent::ServerError(ctx)
    }
}

impl From<LoginFailureContext> for ProducerEvent {
    fn from(ctx: LoginFailureContext) -> Self {
        ProducerEvent::LoginFailure(ctx)
    }
}

impl From<MaintenanceContext> for ProducerEvent {
    fn from(ctx: MaintenanceContext) -> Self {
        ProducerEvent::Maintenance(ctx)
    }
}
