//! Abuse tracking and enforcement for the import pipeline. Each rejected
//! archive becomes a persistent record with a severity; accumulating
//! records past a per-severity threshold inside the window earns a
//! permanent ban.

use crate::app::App;
use models::Severity;

#[derive(Debug, Clone)]
pub struct AbuseContext {
    pub import_job_id: Option<i64>,
    pub ip_address: Option<String>,
    pub user_agent: String,
}

impl AbuseContext {
    pub fn from_request_details(job_id: i64, details: &serde_json::Value) -> Self {
        Self {
            import_job_id: Some(job_id),
            ip_address: details
                .get("ip_address")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            user_agent: details
                .get("user_agent")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
        }
    }
}

/// Record one violation.
pub async fn record_abuse(
    app: &App,
    user_id: i64,
    reason: &str,
    severity: Severity,
    details: &serde_json::Value,
    context: &AbuseContext,
) -> anyhow::Result<()> {
    relay_sql::abuse::insert_record(
        user_id,
        context.import_job_id,
        reason,
        severity,
        details,
        context.ip_address.as_deref(),
        &context.user_agent,
        &app.pool,
    )
    .await?;

    tracing::error!(
        user_id,
        reason,
        ?severity,
        ip = context.ip_address.as_deref().unwrap_or("-"),
        "import abuse detected"
    );
    Ok(())
}

/// Which threshold (if any) a set of per-severity counts crosses.
pub fn exceeded_threshold(
    counts: &std::collections::HashMap<Severity, i64>,
    settings: &crate::config::Settings,
) -> Option<(Severity, &'static str)> {
    let thresholds = [
        (
            Severity::Critical,
            settings.abuse_critical_threshold,
            "critical_threshold_exceeded",
        ),
        (
            Severity::High,
            settings.abuse_high_threshold,
            "high_threshold_exceeded",
        ),
        (
            Severity::Medium,
            settings.abuse_medium_threshold,
            "medium_threshold_exceeded",
        ),
        (
            Severity::Low,
            settings.abuse_low_threshold,
            "low_threshold_exceeded",
        ),
    ];
    for (severity, threshold, reason) in thresholds {
        if counts.get(&severity).copied().unwrap_or(0) >= threshold {
            return Some((severity, reason));
        }
    }
    None
}

/// Whether the user is blocked from starting imports. Checks the standing
/// ban first, then whether windowed counts cross a threshold; crossing one
/// creates (or re-enforces a lifted) permanent ban.
pub async fn should_block(app: &App, user_id: i64) -> anyhow::Result<Option<&'static str>> {
    if let Some(ban) = relay_sql::abuse::fetch_ban(user_id, &app.pool).await? {
        if ban.enforced {
            return Ok(Some("import_banned"));
        }
    }

    let since = chrono::Utc::now() - chrono::Duration::days(app.settings.abuse_window_days);
    let counts: std::collections::HashMap<Severity, i64> =
        relay_sql::abuse::severity_counts_since(user_id, since, &app.pool)
            .await?
            .into_iter()
            .collect();

    if let Some((_severity, reason)) = exceeded_threshold(&counts, &app.settings) {
        let reason_text = format!("Auto-banned: {reason}. Counts: {counts:?}");
        let created = relay_sql::abuse::upsert_ban(user_id, &reason_text, &app.pool).await?;
        if created {
            tracing::error!(user_id, reason, "import ban created");
        } else {
            tracing::error!(user_id, reason, "import ban re-enabled");
        }
        return Ok(Some(reason));
    }

    Ok(None)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::Settings;
    use std::collections::HashMap;

    #[test]
    fn test_threshold_ladder() {
        let settings = Settings::default();

        // One critical within the window is enough.
        let counts = HashMap::from([(Severity::Critical, 1)]);
        assert_eq!(
            exceeded_threshold(&counts, &settings),
            Some((Severity::Critical, "critical_threshold_exceeded"))
        );

        // Below every threshold: no ban.
        let counts = HashMap::from([
            (Severity::High, 2),
            (Severity::Medium, 9),
            (Severity::Low, 49),
        ]);
        assert_eq!(exceeded_threshold(&counts, &settings), None);

        // Meeting a threshold exactly triggers it.
        let counts = HashMap::from([(Severity::Medium, 10)]);
        assert_eq!(
            exceeded_threshold(&counts, &settings),
            Some((Severity::Medium, "medium_threshold_exceeded"))
        );

        let counts = HashMap::from([(Severity::Low, 50)]);
        assert_eq!(
            exceeded_threshold(&counts, &settings),
            Some((Severity::Low, "low_threshold_exceeded"))
        );
    }

    #[test]
    fn test_higher_severities_evaluate_first() {
        let settings = Settings::default();
        let counts = HashMap::from([(Severity::Critical, 1), (Severity::Low, 50)]);
        assert_eq!(
            exceeded_threshold(&counts, &settings).unwrap().0,
            Severity::Critical
        );
    }
}
