//! ---
//! cg_section: "03-persistence-logging"
//! cg_subsection: "module"
//! cg_type: "source"
//! cg_scope: "code"
//! cg_description: "Structured logging adapters and sinks."
//! cg_version: "v0.0.0-prealpha"
//! cg_owner: "tbd"
//! ---
#![warn(missing_docs)]

use tracing::Level;
use tracing_subscriber::{fmt as subscriber_fmt, prelude::*, EnvFilter, Registry};

pub mod macros;

/// Initialize a baseline tracing subscriber suitable for tests and tooling.
pub fn init() {
    let _ = Registry::default()
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(subscriber_fmt::layer())
        .try_init();
}

/// Structured logging context propagated by the convenience macros.
#[derive(Debug, Default, Clone)]
pub struct LogContext<'a> {
    /// Principal the event is attributed to.
    pub principal: Option<&'a str>,
    /// Protected resource involved in the event.
    pub resource: Option<&'a str>,
    /// Certificate fingerprint involved in the event.
    pub fingerprint: Option<&'a str>,
}

impl<'a> LogContext<'a> {
    /// Create an empty logging context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a principal identifier.
    pub fn with_principal(mut self, principal: &'a str) -> Self {
        self.principal = Some(principal);
        self
    }

    /// Attach a resource identifier.
    pub fn with_resource(mut self, resource: &'a str) -> Self {
        self.resource = Some(resource);
        self
    }

    /// Attach a certificate fingerprint.
    pub fn with_fingerprint(mut self, fingerprint: &'a str) -> Self {
        self.fingerprint = Some(fingerprint);
        self
    }
}

/// Outcome of an access-controlled operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessOutcome {
    /// The operation was permitted.
    Granted,
    /// The operation was refused.
    Denied,
}

impl AccessOutcome {
    /// Lowercase label used in log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessOutcome::Granted => "granted",
            AccessOutcome::Denied => "denied",
        }
    }
}

impl From<bool> for AccessOutcome {
    fn from(allowed: bool) -> Self {
        if allowed {
            AccessOutcome::Granted
        } else {
            AccessOutcome::Denied
        }
    }
}

/// Emit a standardized access event with a granted/denied outcome.
pub fn log_access_event(
    context: Option<&LogContext>,
    event: &str,
    message: &str,
    outcome: AccessOutcome,
) {
    let ctx = context.cloned().unwrap_or_default();
    let principal = ctx.principal.unwrap_or("");
    let resource = ctx.resource.unwrap_or("");
    let fingerprint = ctx.fingerprint.unwrap_or("");
    // `tracing::event!` needs a constant level.
    match outcome {
        AccessOutcome::Denied => tracing::event!(
            Level::WARN,
            event,
            outcome = outcome.as_str(),
            principal,
            resource,
            fingerprint,
            message = %message
        ),
        AccessOutcome::Granted => tracing::event!(
            Level::INFO,
            event,
            outcome = outcome.as_str(),
            principal,
            resource,
            fingerprint,
            message = %message
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn macros_emit_without_panic() {
        init();
        let ctx = LogContext::new()
            .with_principal("alice")
            .with_resource("/ca/issue");
        cg_info!(context = ctx.clone(), "authorization granted");
        cg_debug!("debug message");
        cg_warn!(context = ctx.clone(), "denied for {}", "bob");
        cg_error!(context = ctx, "error code: {}", 42);
    }

    #[test]
    fn access_event_helper_emits() {
        init();
        let ctx = LogContext::new().with_fingerprint("ab12");
        log_access_event(
            Some(&ctx),
            "certificate.store",
            "certificate stored",
            AccessOutcome::Granted,
        );
        log_access_event(
            None,
            "certificate.store",
            "store refused",
            AccessOutcome::Denied,
        );
    }

    #[test]
    fn outcome_from_bool() {
        assert_eq!(AccessOutcome::from(true), AccessOutcome::Granted);
        assert_eq!(AccessOutcome::from(false).as_str(), "denied");
    }
}
