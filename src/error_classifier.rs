//! Failure Classifier
//!
//! The Service Layer reports the same underlying problems through a mix of
//! status codes and free-text messages. The heuristic lives here as one
//! tested mapping table instead of inline substring checks at call sites.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::InsightError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    /// Session rejected mid-flight: expired, invalidated, or never valid.
    SessionExpired,
    /// Filter referenced a property the resource does not expose.
    InvalidProperty,
    /// Everything else; not eligible for a scoped retry.
    Other,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::SessionExpired => write!(f, "SessionExpired"),
            FailureKind::InvalidProperty => write!(f, "InvalidProperty"),
            FailureKind::Other => write!(f, "Other"),
        }
    }
}

pub struct FailureClassifier;

impl FailureClassifier {
    pub fn new() -> Self {
        Self
    }

    pub fn classify(&self, error: &InsightError) -> FailureKind {
        let (status, message) = match error {
            InsightError::Fetch { status, message } => (*status, message.to_lowercase()),
            _ => return FailureKind::Other,
        };

        if status == Some(401) {
            return FailureKind::SessionExpired;
        }
        if message.contains("unauthorized")
            || message.contains("not authenticated")
            || message.contains("401")
        {
            return FailureKind::SessionExpired;
        }
        // SAP error -301 "Invalid session or session already timeout"
        if message.contains("session")
            && (message.contains("invalid")
                || message.contains("expired")
                || message.contains("timeout"))
        {
            return FailureKind::SessionExpired;
        }

        if message.contains("property")
            && (message.contains("invalid")
                || message.contains("unknown")
                || message.contains("does not exist")
                || message.contains("not found"))
        {
            return FailureKind::InvalidProperty;
        }

        FailureKind::Other
    }
}

impl Default for FailureClassifier {
    fn default() -> Self {
        Self::new()
    }
}
