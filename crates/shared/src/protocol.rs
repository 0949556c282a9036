//! Wire bodies exchanged with the locker-control service.
//!
//! Field names are camelCase on the wire and are part of the compatibility
//! surface with the service.

use serde::{Deserialize, Serialize};

use crate::domain::{ClosetId, LockerId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenDepositRequest {
    pub locker_id: LockerId,
    pub tracking_code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseDepositRequest {
    pub locker_id: LockerId,
    pub closet_id: ClosetId,
    pub tracking_code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenWithdrawRequest {
    pub locker_id: LockerId,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseWithdrawRequest {
    pub locker_id: LockerId,
    pub closet_id: ClosetId,
}

/// Body shared by open-deposit, open-withdraw, close-withdraw and error replies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageResponse {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseDepositResponse {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default, alias = "withdrawPassword")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    #[serde(default)]
    pub hardware: Option<serde_json::Value>,
}
