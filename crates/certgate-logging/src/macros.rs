//! ---
//! cg_section: "03-persistence-logging"
//! cg_subsection: "module"
//! cg_type: "source"
//! cg_scope: "code"
//! cg_description: "Structured logging adapters and sinks."
//! cg_version: "v0.0.0-prealpha"
//! cg_owner: "tbd"
//! ---
/// Emit an informational log enriched with access context.
#[macro_export]
macro_rules! cg_info {
    (context = $ctx:expr, $($arg:tt)+) => {{
        let ctx = &$ctx;
        tracing::event!(
            tracing::Level::INFO,
            principal = ctx.principal.unwrap_or(""),
            resource = ctx.resource.unwrap_or(""),
            fingerprint = ctx.fingerprint.unwrap_or(""),
            message = %format_args!($($arg)+)
        );
    }};
    ($($arg:tt)+) => {{
        let ctx = &$crate::LogContext::default();
        tracing::event!(
            tracing::Level::INFO,
            principal = ctx.principal.unwrap_or(""),
            resource = ctx.resource.unwrap_or(""),
            fingerprint = ctx.fingerprint.unwrap_or(""),
            message = %format_args!($($arg)+)
        );
    }};
}

/// Emit a debug log enriched with access context.
#[macro_export]
macro_rules! cg_debug {
    (context = $ctx:expr, $($arg:tt)+) => {{
        let ctx = &$ctx;
        tracing::event!(
            tracing::Level::DEBUG,
            principal = ctx.principal.unwrap_or(""),
            resource = ctx.resource.unwrap_or(""),
            fingerprint = ctx.fingerprint.unwrap_or(""),
            message = %format_args!($($arg)+)
        );
    }};
    ($($arg:tt)+) => {{
        let ctx = &$crate::LogContext::default();
        tracing::event!(
            tracing::Level::DEBUG,
            principal = ctx.principal.unwrap_or(""),
            resource = ctx.resource.unwrap_or(""),
            fingerprint = ctx.fingerprint.unwrap_or(""),
            message = %format_args!($($arg)+)
        );
    }};
}

/// Emit a warning log enriched with access context.
#[macro_export]
macro_rules! cg_warn {
    (context = $ctx:expr, $($arg:tt)+) => {{
        let ctx = &$ctx;
        tracing::event!(
            tracing::Level::WARN,
            principal = ctx.principal.unwrap_or(""),
            resource = ctx.resource.unwrap_or(""),
            fingerprint = ctx.fingerprint.unwrap_or(""),
            message = %format_args!($($arg)+)
        );
    }};
    ($($arg:tt)+) => {{
        let ctx = &$crate::LogContext::default();
        tracing::event!(
            tracing::Level::WARN,
            principal = ctx.principal.unwrap_or(""),
            resource = ctx.resource.unwrap_or(""),
            fingerprint = ctx.fingerprint.unwrap_or(""),
            message = %format_args!($($arg)+)
        );
    }};
}

/// Emit an error log enriched with access context.
#[macro_export]
macro_rules! cg_error {
    (context = $ctx:expr, $($arg:tt)+) => {{
        let ctx = &$ctx;
        tracing::event!(
            tracing::Level::ERROR,
            principal = ctx.principal.unwrap_or(""),
            resource = ctx.resource.unwrap_or(""),
            fingerprint = ctx.fingerprint.unwrap_or(""),
            message = %format_args!($($arg)+)
        );
    }};
    ($($arg:tt)+) => {{
        let ctx = &$crate::LogContext::default();
        tracing::event!(
            tracing::Level::ERROR,
            principal = ctx.principal.unwrap_or(""),
            resource = ctx.resource.unwrap_or(""),
            fingerprint = ctx.fingerprint.unwrap_or(""),
            message = %format_args!($($arg)+)
        );
    }};
}
