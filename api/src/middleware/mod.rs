//! HTTP interceptors, applied by [`crate::routes::app`] in this order
//! (outermost first): body limit, request id, access log, error report,
//! request span, authentication.

pub mod access_log;
pub mod body_limit;
pub mod error_report;
pub mod request_info;
pub mod span;
