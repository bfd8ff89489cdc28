//! Response envelope returned by every admin API endpoint.

use serde::{Deserialize, Serialize};

/// `{ data, message?, success, total?, page?, limit? }` as sent by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub data: T,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
}

/// Pagination metadata of a list response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub total: u64,
    pub page: u64,
    pub limit: u64,
}

impl<T> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            data,
            message: None,
            success: true,
            total: None,
            page: None,
            limit: None,
        }
    }

    /// Present only when the server reported all three fields.
    pub fn pagination(&self) -> Option<Pagination> {
        Some(Pagination {
            total: self.total?,
            page: self.page?,
            limit: self.limit?,
        })
    }

    pub fn into_data(self) -> T {
        self.data
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Envelope<U> {
        Envelope {
            data: f(self.data),
            message: self.message,
            success: self.success,
            total: self.total,
            page: self.page,
            limit: self.limit,
        }
    }
}
