//! Data models and DTOs (Data Transfer Objects)
//!
//! Table registry, governance records and the response envelopes shared by
//! every handler.

pub mod governance;
pub mod tables;

pub use governance::{Actor, ChangeHistoryRecord};
pub use tables::{Record, TableKind};

use serde::Serialize;

/// Generic success response
#[derive(Serialize)]
pub struct SuccessResponse<T: Serialize> {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T: Serialize> SuccessResponse<T> {
    pub fn with_data(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
        }
    }
}
