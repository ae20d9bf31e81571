//! API route handlers for the gateway.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use sendloop_core::types::{Contact, MessageStatus, NewMessage};

use super::server::AppState;

type ApiResponse = (StatusCode, Json<serde_json::Value>);

fn ok(value: serde_json::Value) -> ApiResponse {
    (StatusCode::OK, Json(value))
}

fn error(status: StatusCode, message: impl std::fmt::Display) -> ApiResponse {
    (status, Json(serde_json::json!({"ok": false, "error": message.to_string()})))
}

/// Health check endpoint.
pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "sendloop-gateway",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// System information endpoint.
pub async fn system_info(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let uptime = state.start_time.elapsed();
    Json(serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "platform": format!("{}/{}", std::env::consts::OS, std::env::consts::ARCH),
        "uptime_secs": uptime.as_secs(),
        "scheduler_running": state.engine.is_running(),
    }))
}

/// A schedule request as the API accepts it.
#[derive(Debug, Deserialize)]
pub struct ScheduleRequest {
    pub user_id: String,
    #[serde(default)]
    pub contact_name: String,
    pub contact_phone: String,
    pub content: String,
    /// RFC3339 timestamp.
    pub scheduled_at: String,
}

/// Validate a schedule request. Violations are rejected here, synchronously,
/// and never reach the scheduler.
fn validate(req: &ScheduleRequest) -> Result<DateTime<Utc>, String> {
    if req.user_id.is_empty() {
        return Err("user_id must not be empty".into());
    }
    if !req
        .user_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '@' | '.'))
        || !req.user_id.chars().any(|c| c.is_ascii_alphanumeric())
    {
        // user_id names the session directory on disk, so it must be a safe
        // path component.
        return Err("user_id may only contain alphanumerics, '-', '_', '@', '.'".into());
    }

    let digits: String = req
        .contact_phone
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')'))
        .collect();
    let bare = digits.strip_prefix('+').unwrap_or(&digits);
    if bare.is_empty() {
        return Err("contact_phone must not be empty".into());
    }
    if !bare.chars().all(|c| c.is_ascii_digit()) || !(7..=15).contains(&bare.len()) {
        return Err(format!("'{}' is not a valid phone number", req.contact_phone));
    }

    if req.content.is_empty() {
        return Err("content must not be empty".into());
    }

    DateTime::parse_from_rfc3339(&req.scheduled_at)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("scheduled_at is not a valid RFC3339 timestamp: {e}"))
}

/// Schedule a new message for future delivery.
pub async fn schedule_message(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ScheduleRequest>,
) -> ApiResponse {
    let scheduled_at = match validate(&req) {
        Ok(ts) => ts,
        Err(reason) => return error(StatusCode::BAD_REQUEST, format!("Validation error: {reason}")),
    };

    let draft = NewMessage {
        user_id: req.user_id,
        contact: Contact { name: req.contact_name, phone: req.contact_phone },
        content: req.content,
        scheduled_at,
    };

    match state.store.insert(draft).await {
        Ok(message) => {
            state.engine.schedule(&message);
            (StatusCode::CREATED, Json(serde_json::json!({"ok": true, "message": message})))
        }
        Err(e) => error(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

/// List all messages with their current status.
pub async fn list_messages(State(state): State<Arc<AppState>>) -> ApiResponse {
    match state.store.list().await {
        Ok(messages) => ok(serde_json::json!({"ok": true, "messages": messages})),
        Err(e) => error(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

/// Current status of one message.
pub async fn get_message(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResponse {
    match state.store.get(&id).await {
        Ok(Some(message)) => ok(serde_json::json!({"ok": true, "message": message})),
        Ok(None) => error(StatusCode::NOT_FOUND, format!("No such message: {id}")),
        Err(e) => error(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

/// Cancel a message. Only `Scheduled` messages can be canceled; an attempt
/// already under way is never aborted.
pub async fn cancel_message(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResponse {
    let current = match state.store.get(&id).await {
        Ok(Some(message)) => message,
        Ok(None) => return error(StatusCode::NOT_FOUND, format!("No such message: {id}")),
        Err(e) => return error(StatusCode::INTERNAL_SERVER_ERROR, e),
    };
    if current.status != MessageStatus::Scheduled {
        return error(
            StatusCode::CONFLICT,
            format!("Only scheduled messages can be canceled; status is {}", current.status),
        );
    }

    // The store re-checks the transition atomically, so a dispatch racing us
    // here loses nothing: if it flipped the message to Processing first, the
    // cancel write is rejected.
    match state.store.set_status(&id, MessageStatus::Canceled).await {
        Ok(()) => {
            state.engine.cancel(&id);
            ok(serde_json::json!({"ok": true, "id": id, "status": MessageStatus::Canceled}))
        }
        Err(e) => error(StatusCode::CONFLICT, e),
    }
}

/// Session pool snapshot.
pub async fn list_sessions(State(state): State<Arc<AppState>>) -> ApiResponse {
    ok(serde_json::json!({"ok": true, "sessions": state.sessions.snapshot()}))
}

/// Administrative session revocation. The durable session directory stays
/// on disk.
pub async fn revoke_session(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> ApiResponse {
    let revoked = state.sessions.revoke(&user_id).await;
    if revoked {
        ok(serde_json::json!({"ok": true, "user_id": user_id}))
    } else {
        error(StatusCode::NOT_FOUND, format!("No session for user {user_id}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(phone: &str, content: &str, at: &str) -> ScheduleRequest {
        ScheduleRequest {
            user_id: "alice".into(),
            contact_name: "Bob".into(),
            contact_phone: phone.into(),
            content: content.into(),
            scheduled_at: at.into(),
        }
    }

    #[test]
    fn test_accepts_well_formed_request() {
        let req = request("+1 555-000-1111", "see you at 6", "2026-08-07T18:00:00Z");
        assert!(validate(&req).is_ok());
    }

    #[test]
    fn test_rejects_missing_phone() {
        assert!(validate(&request("", "hi", "2026-08-07T18:00:00Z")).is_err());
        assert!(validate(&request("+", "hi", "2026-08-07T18:00:00Z")).is_err());
    }

    #[test]
    fn test_rejects_non_numeric_phone() {
        assert!(validate(&request("call-me-maybe", "hi", "2026-08-07T18:00:00Z")).is_err());
        assert!(validate(&request("123", "hi", "2026-08-07T18:00:00Z")).is_err());
    }

    #[test]
    fn test_rejects_empty_content() {
        assert!(validate(&request("+15550001111", "", "2026-08-07T18:00:00Z")).is_err());
    }

    #[test]
    fn test_rejects_bad_timestamp() {
        assert!(validate(&request("+15550001111", "hi", "tomorrow at 6")).is_err());
    }

    #[test]
    fn test_rejects_path_unsafe_user_id() {
        let mut req = request("+15550001111", "hi", "2026-08-07T18:00:00Z");
        req.user_id = "../etc".into();
        assert!(validate(&req).is_err());
        req.user_id = "..".into();
        assert!(validate(&req).is_err());
        req.user_id = String::new();
        assert!(validate(&req).is_err());
    }
}
