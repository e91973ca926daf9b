//! Field validation for round creation and editing.
//!
//! Every violation is collected so the requester sees them all at once.

use fairway_sdk::events::{RoundCreationRequested, RoundUpdateRequested};

pub const MAX_TITLE_LEN: usize = 100;
pub const MAX_DESCRIPTION_LEN: usize = 1000;
pub const MAX_LOCATION_LEN: usize = 200;
/// How far in the past a start time may be before it is rejected.
pub const START_TIME_GRACE_SECS: i64 = 60;

fn check_title(title: &str, errors: &mut Vec<String>) {
    let title = title.trim();
    if title.is_empty() {
        errors.push("title is required".to_string());
    } else if title.chars().count() > MAX_TITLE_LEN {
        errors.push(format!("title must be at most {MAX_TITLE_LEN} characters"));
    }
}

fn check_optional_text(
    field: &str,
    value: Option<&str>,
    max: usize,
    errors: &mut Vec<String>,
) {
    if value.is_some_and(|v| v.chars().count() > max) {
        errors.push(format!("{field} must be at most {max} characters"));
    }
}

fn check_start_time(start_time: Option<i64>, now: i64, errors: &mut Vec<String>) {
    if start_time.is_some_and(|start| start < now - START_TIME_GRACE_SECS) {
        errors.push("start time must not be in the past".to_string());
    }
}

/// Validate a creation request. `now` is a unix timestamp in seconds.
pub fn validate_creation(request: &RoundCreationRequested, now: i64) -> Vec<String> {
    let mut errors = Vec::new();
    check_title(&request.title, &mut errors);
    check_optional_text(
        "description",
        request.description.as_deref(),
        MAX_DESCRIPTION_LEN,
        &mut errors,
    );
    check_optional_text(
        "location",
        request.location.as_deref(),
        MAX_LOCATION_LEN,
        &mut errors,
    );
    check_start_time(request.start_time, now, &mut errors);
    errors
}

/// Validate the fields of an edit request.
///
/// The nil-id and "at least one field" checks happen first and separately,
/// since they must run before any store access.
pub fn validate_edit(request: &RoundUpdateRequested, now: i64) -> Vec<String> {
    let mut errors = Vec::new();
    if let Some(title) = &request.title {
        check_title(title, &mut errors);
    }
    check_optional_text(
        "description",
        request.description.as_deref(),
        MAX_DESCRIPTION_LEN,
        &mut errors,
    );
    check_optional_text(
        "location",
        request.location.as_deref(),
        MAX_LOCATION_LEN,
        &mut errors,
    );
    check_start_time(request.start_time, now, &mut errors);
    errors
}
