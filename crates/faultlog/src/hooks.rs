//! Producer hook interfaces
//!
//! Subsystems that detect errors hold an `Arc<dyn …Hook>` and call it from
//! their own failure paths. Hooks return nothing: whatever happens to the
//! log record cannot change the outcome of the operation being logged.

use async_trait::async_trait;

use faultlog_core::SessionContext;

use crate::ingest::EventRecorder;
use crate::normalize::{ErrorContext, LoginFailureContext, SchemaChangeContext, ServerErrorContext};

/// Called after a schema object is created, altered or dropped
#[async_trait]
pub trait SchemaChangeHook: Send + Sync {
    async fn on_schema_change(&self, ctx: SchemaChangeContext, session: SessionContext);
}

/// Called when the server raises an error in a session
#[async_trait]
pub trait ServerErrorHook: Send + Sync {
    async fn on_server_error(&self, ctx: ServerErrorContext, session: SessionContext);
}

/// Called when an authentication attempt is rejected
///
/// No session exists yet; the attempted identity travels in the context.
#[async_trait]
pub trait LoginFailureHook: Send + Sync {
    async fn on_login_failure(&self, ctx: LoginFailureContext);
}

/// Explicit logging from application code
#[async_trait]
pub trait ApplicationLogHook: Send + Sync {
    async fn log_error(&self, ctx: ErrorContext, session: SessionContext);
}

#[async_trait]
impl SchemaChangeHook for EventRecorder {
    async fn on_schema_change(&self, ctx: SchemaChangeContext, session: SessionContext) {
        self.record_event(ctx, session).await;
    }
}

#[async_trait]
impl ServerErrorHook for EventRecorder {
    async fn on_server_error(&self, ctx: ServerErrorContext, session: SessionContext) {
        self.record_event(ctx, session).await;
    }
}

#[async_trait]
impl LoginFailureHook for EventRecorder {
    async fn on_login_failure(&self, ctx: LoginFailureContext) {
        self.record_event(ctx, SessionContext::anonymous()).await;
    }
}

#[async_trait]
impl ApplicationLogHook for EventRecorder {
    async fn log_error(&self, ctx: ErrorContext, session: SessionContext) {
        self.record_event(ctx, session).await;
    }
}
