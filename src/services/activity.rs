use chrono::{DateTime, FixedOffset, Offset, Utc};

use crate::common::AppState;
use crate::config::Config;
use crate::session::Principal;
use crate::store::{ActivityLogEntry, StoreError};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

fn display_offset(config: &Config) -> FixedOffset {
    FixedOffset::east_opt(config.display_utc_offset_minutes.saturating_mul(60))
        .unwrap_or_else(|| Utc.fix())
}

/// Wall-clock timestamp in the configured display offset.
#[must_use]
pub fn format_timestamp(config: &Config, at: DateTime<Utc>) -> String {
    at.with_timezone(&display_offset(config))
        .format(TIMESTAMP_FORMAT)
        .to_string()
}

/// `HH:MM:SS` in the configured display offset.
#[must_use]
pub fn format_clock(config: &Config, at: DateTime<Utc>) -> String {
    at.with_timezone(&display_offset(config))
        .format("%H:%M:%S")
        .to_string()
}

/// Append one entry for `actor`. A failed append is logged and swallowed;
/// the store-assigned key is returned on success.
pub async fn record(state: &AppState, actor: &Principal, action: &str) -> Option<String> {
    let entry = ActivityLogEntry {
        user: actor.username.clone(),
        action: action.to_string(),
        timestamp: format_timestamp(&state.config, Utc::now()),
        role: Some(actor.role.as_str().to_string()),
    };

    match state.store.push_activity(&entry).await {
        Ok(key) => {
            tracing::debug!(key = %key, user = %entry.user, action = %entry.action, "Activity recorded");
            Some(key)
        }
        Err(e) => {
            tracing::warn!(
                error = %e,
                user = %entry.user,
                action = %entry.action,
                "Failed to append activity entry"
            );
            None
        }
    }
}

/// The configured number of most recent entries, newest first.
///
/// # Errors
///
/// Returns the `StoreError` of the underlying read.
pub async fn recent(state: &AppState, limit: usize) -> Result<Vec<ActivityLogEntry>, StoreError> {
    Ok(state
        .store
        .recent_activity(limit)
        .await?
        .into_iter()
        .map(|(_, entry)| entry)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn timestamps_follow_display_offset() {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 23, 30, 5).unwrap();
        let utc = Config::default();
        assert_eq!(format_timestamp(&utc, at), "2026-03-01 23:30:05");

        let bangkok = Config {
            display_utc_offset_minutes: 7 * 60,
            ..Config::default()
        };
        assert_eq!(format_timestamp(&bangkok, at), "2026-03-02 06:30:05");
        assert_eq!(format_clock(&bangkok, at), "06:30:05");
    }

    #[test]
    fn out_of_range_offset_falls_back_to_utc() {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let config = Config {
            display_utc_offset_minutes: 100_000,
            ..Config::default()
        };
        assert_eq!(format_clock(&config, at), "12:00:00");
    }
}
