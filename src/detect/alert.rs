//! Persisted alerts: dedup/escalation on submit and the open → acknowledged →
//! resolved lifecycle.

use crate::config::{AlertConfig, WindowAnchor};
use crate::detect::{AlertStatus, AnomalyCandidate, Severity};
use crate::storage::{days_before, format_timestamp, parse_timestamp, Pool};
use chrono::{DateTime, Duration, NaiveTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

const ALERT_COLUMNS: &str = "id, metric_name, metric_value, expected_range_min, expected_range_max, \
     severity, status, detection_method, assigned_to, notes, timestamp, created_at, updated_at";

const RECENT_LIMIT: usize = 10;

#[derive(Debug, Error)]
pub enum AlertError {
    #[error("alert {0} not found")]
    NotFound(Uuid),

    #[error("submission for metric '{metric}' still conflicting after {attempts} attempts")]
    ConcurrencyConflict { metric: String, attempts: u32 },

    #[error("database error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),
}

/// A persisted, deduplicated anomaly with a lifecycle status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub metric_name: String,
    pub metric_value: f64,
    pub expected_range_min: Option<f64>,
    pub expected_range_max: Option<f64>,
    pub severity: Severity,
    pub status: AlertStatus,
    pub detection_method: String,
    pub assigned_to: Option<String>,
    /// Append-only log of lifecycle actions.
    pub notes: String,
    pub timestamp: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityCounts {
    pub total: u64,
    pub open: u64,
    pub acknowledged: u64,
    pub resolved: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardSummary {
    pub severity_counts: BTreeMap<Severity, SeverityCounts>,
    pub recent: Vec<Alert>,
    pub total_count: u64,
}

fn parse_column<T, E>(row: &Row<'_>, idx: usize, parse: impl FnOnce(&str) -> Result<T, E>) -> rusqlite::Result<T>
where
    E: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    parse(&raw).map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn row_to_alert(row: &Row<'_>) -> rusqlite::Result<Alert> {
    Ok(Alert {
        id: parse_column(row, 0, Uuid::parse_str)?,
        metric_name: row.get(1)?,
        metric_value: row.get(2)?,
        expected_range_min: row.get(3)?,
        expected_range_max: row.get(4)?,
        severity: parse_column(row, 5, str::parse)?,
        status: parse_column(row, 6, str::parse)?,
        detection_method: row.get(7)?,
        assigned_to: row.get(8)?,
        notes: row.get(9)?,
        timestamp: parse_column(row, 10, parse_timestamp)?,
        created_at: parse_column(row, 11, parse_timestamp)?,
        updated_at: parse_column(row, 12, parse_timestamp)?,
    })
}

fn is_busy(err: &AlertError) -> bool {
    matches!(
        err,
        AlertError::Storage(rusqlite::Error::SqliteFailure(e, _))
            if matches!(e.code, rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked)
    )
}

fn append_note(notes: &str, line: &str) -> String {
    if notes.is_empty() {
        line.to_string()
    } else {
        format!("{}\n{}", notes, line)
    }
}

fn fetch(conn: &Connection, id: Uuid) -> Result<Alert, AlertError> {
    conn.query_row(
        &format!("SELECT {} FROM alerts WHERE id = ?1", ALERT_COLUMNS),
        params![id.to_string()],
        row_to_alert,
    )
    .optional()?
    .ok_or(AlertError::NotFound(id))
}

/// Owns the `alerts` table.
///
/// `submit` is serialized per metric: an in-process lock per metric name plus
/// an immediate (write-locking) SQLite transaction around lookup and write.
#[derive(Clone)]
pub struct AlertStore {
    pool: Pool,
    config: AlertConfig,
    metric_locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl AlertStore {
    pub fn new(pool: Pool, config: AlertConfig) -> Self {
        Self {
            pool,
            config,
            metric_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn metric_lock(&self, metric_name: &str) -> Arc<Mutex<()>> {
        let mut locks = self
            .metric_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(locks.entry(metric_name.to_string()).or_default())
    }

    /// Persist a candidate, or escalate/absorb it against a recent alert for
    /// the same metric. Returns the created or upgraded alert, or `None` when
    /// the candidate was absorbed without a write.
    pub fn submit(&self, candidate: &AnomalyCandidate) -> Result<Option<Alert>, AlertError> {
        self.submit_at(candidate, Utc::now())
    }

    pub fn submit_at(&self, candidate: &AnomalyCandidate, now: DateTime<Utc>) -> Result<Option<Alert>, AlertError> {
        let lock = self.metric_lock(&candidate.metric_name);
        let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let attempts = self.config.busy_retries.max(1);
        for attempt in 1..=attempts {
            match self.try_submit(candidate, now) {
                Err(e) if is_busy(&e) => {
                    warn!(metric = %candidate.metric_name, attempt, "Alert table busy, retrying submit");
                    std::thread::sleep(std::time::Duration::from_millis(20 * u64::from(attempt)));
                }
                other => return other,
            }
        }

        Err(AlertError::ConcurrencyConflict {
            metric: candidate.metric_name.clone(),
            attempts,
        })
    }

    fn try_submit(&self, candidate: &AnomalyCandidate, now: DateTime<Utc>) -> Result<Option<Alert>, AlertError> {
        let window = Duration::hours(self.config.dedup_window_hours);
        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let (anchor, existing) = match self.config.window_anchor {
            WindowAnchor::Submission => {
                let existing = tx
                    .query_row(
                        &format!(
                            "SELECT {} FROM alerts WHERE metric_name = ?1 AND timestamp >= ?2
                             ORDER BY timestamp DESC LIMIT 1",
                            ALERT_COLUMNS
                        ),
                        params![candidate.metric_name, format_timestamp(&(now - window))],
                        row_to_alert,
                    )
                    .optional()?;
                (now, existing)
            }
            WindowAnchor::Candidate => {
                let anchor = candidate.timestamp.and_time(NaiveTime::MIN).and_utc();
                let existing = tx
                    .query_row(
                        &format!(
                            "SELECT {} FROM alerts WHERE metric_name = ?1 AND timestamp > ?2 AND timestamp < ?3
                             ORDER BY timestamp DESC LIMIT 1",
                            ALERT_COLUMNS
                        ),
                        params![
                            candidate.metric_name,
                            format_timestamp(&(anchor - window)),
                            format_timestamp(&(anchor + window))
                        ],
                        row_to_alert,
                    )
                    .optional()?;
                (anchor, existing)
            }
        };

        let result = match existing {
            None => {
                let alert = Alert {
                    id: Uuid::new_v4(),
                    metric_name: candidate.metric_name.clone(),
                    metric_value: candidate.metric_value,
                    expected_range_min: Some(candidate.expected_range.0),
                    expected_range_max: Some(candidate.expected_range.1),
                    severity: candidate.severity,
                    status: AlertStatus::Open,
                    detection_method: candidate.detection_method.to_string(),
                    assigned_to: None,
                    notes: candidate.notes.clone(),
                    timestamp: anchor,
                    created_at: now,
                    updated_at: now,
                };
                tx.execute(
                    &format!(
                        "INSERT INTO alerts ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                        ALERT_COLUMNS
                    ),
                    params![
                        alert.id.to_string(),
                        alert.metric_name,
                        alert.metric_value,
                        alert.expected_range_min,
                        alert.expected_range_max,
                        alert.severity.as_str(),
                        alert.status.as_str(),
                        alert.detection_method,
                        alert.assigned_to,
                        alert.notes,
                        format_timestamp(&alert.timestamp),
                        format_timestamp(&alert.created_at),
                        format_timestamp(&alert.updated_at),
                    ],
                )?;
                info!(alert_id = %alert.id, metric = %alert.metric_name, severity = %alert.severity, "Alert created");
                Some(alert)
            }
            Some(mut alert) if candidate.severity > alert.severity => {
                info!(
                    alert_id = %alert.id,
                    metric = %alert.metric_name,
                    from = %alert.severity,
                    to = %candidate.severity,
                    "Alert escalated"
                );
                alert.severity = candidate.severity;
                alert.notes = candidate.notes.clone();
                alert.timestamp = anchor;
                alert.updated_at = now;
                tx.execute(
                    "UPDATE alerts SET severity = ?1, notes = ?2, timestamp = ?3, updated_at = ?4 WHERE id = ?5",
                    params![
                        alert.severity.as_str(),
                        alert.notes,
                        format_timestamp(&alert.timestamp),
                        format_timestamp(&alert.updated_at),
                        alert.id.to_string(),
                    ],
                )?;
                Some(alert)
            }
            Some(alert) => {
                debug!(
                    alert_id = %alert.id,
                    metric = %alert.metric_name,
                    existing = %alert.severity,
                    candidate = %candidate.severity,
                    "Candidate absorbed by existing alert"
                );
                None
            }
        };

        tx.commit()?;
        Ok(result)
    }

    pub fn get(&self, id: Uuid) -> Result<Alert, AlertError> {
        let conn = self.pool.get()?;
        fetch(&conn, id)
    }

    /// Mark an alert acknowledged and log the action. Acknowledging a resolved
    /// alert only appends to the log; status never moves backward.
    pub fn acknowledge(&self, id: Uuid, assigned_to: Option<&str>, notes: Option<&str>) -> Result<Alert, AlertError> {
        self.acknowledge_at(id, assigned_to, notes, Utc::now())
    }

    pub fn acknowledge_at(
        &self,
        id: Uuid,
        assigned_to: Option<&str>,
        notes: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Alert, AlertError> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut alert = fetch(&tx, id)?;

        if alert.status == AlertStatus::Open {
            alert.status = AlertStatus::Acknowledged;
        }
        if let Some(who) = assigned_to {
            alert.assigned_to = Some(who.to_string());
        }

        let mut line = format!("[{}] Acknowledged", format_timestamp(&now));
        if let Some(who) = assigned_to {
            line.push_str(&format!(" by {}", who));
        }
        if let Some(text) = notes.filter(|t| !t.is_empty()) {
            line.push_str(&format!(": {}", text));
        }
        alert.notes = append_note(&alert.notes, &line);
        alert.updated_at = now;

        tx.execute(
            "UPDATE alerts SET status = ?1, assigned_to = ?2, notes = ?3, updated_at = ?4 WHERE id = ?5",
            params![
                alert.status.as_str(),
                alert.assigned_to,
                alert.notes,
                format_timestamp(&alert.updated_at),
                alert.id.to_string(),
            ],
        )?;
        tx.commit()?;

        info!(alert_id = %id, status = %alert.status, "Alert acknowledged");
        Ok(alert)
    }

    /// Resolve an alert from any state and log the resolution.
    pub fn resolve(&self, id: Uuid, resolution: &str) -> Result<Alert, AlertError> {
        self.resolve_at(id, resolution, Utc::now())
    }

    pub fn resolve_at(&self, id: Uuid, resolution: &str, now: DateTime<Utc>) -> Result<Alert, AlertError> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut alert = fetch(&tx, id)?;

        alert.status = AlertStatus::Resolved;
        alert.notes = append_note(
            &alert.notes,
            &format!("[{}] Resolved: {}", format_timestamp(&now), resolution),
        );
        alert.updated_at = now;

        tx.execute(
            "UPDATE alerts SET status = ?1, notes = ?2, updated_at = ?3 WHERE id = ?4",
            params![
                alert.status.as_str(),
                alert.notes,
                format_timestamp(&alert.updated_at),
                alert.id.to_string(),
            ],
        )?;
        tx.commit()?;

        info!(alert_id = %id, "Alert resolved");
        Ok(alert)
    }

    /// Alerts with `timestamp >= now - since_days`, newest first. A window
    /// wider than the calendar returns every alert.
    pub fn query(
        &self,
        metric_name: Option<&str>,
        status: Option<AlertStatus>,
        since_days: i64,
    ) -> Result<Vec<Alert>, AlertError> {
        self.query_at(metric_name, status, since_days, None, Utc::now())
    }

    pub fn query_at(
        &self,
        metric_name: Option<&str>,
        status: Option<AlertStatus>,
        since_days: i64,
        limit: Option<usize>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Alert>, AlertError> {
        let mut clauses = Vec::new();
        let mut args = Vec::new();

        if let Some(cutoff) = days_before(now, since_days) {
            args.push(format_timestamp(&cutoff));
            clauses.push(format!("timestamp >= ?{}", args.len()));
        }
        if let Some(metric) = metric_name {
            args.push(metric.to_string());
            clauses.push(format!("metric_name = ?{}", args.len()));
        }
        if let Some(status) = status {
            args.push(status.as_str().to_string());
            clauses.push(format!("status = ?{}", args.len()));
        }

        let mut sql = format!("SELECT {} FROM alerts", ALERT_COLUMNS);
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY timestamp DESC");
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&sql)?;
        let alerts = stmt
            .query_map(params_from_iter(args.iter()), row_to_alert)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(alerts)
    }

    /// Per-severity status counts over every alert, plus the latest alerts
    /// from the last `recent_days`.
    pub fn dashboard_summary(&self, recent_days: i64) -> Result<DashboardSummary, AlertError> {
        self.dashboard_summary_at(recent_days, Utc::now())
    }

    pub fn dashboard_summary_at(&self, recent_days: i64, now: DateTime<Utc>) -> Result<DashboardSummary, AlertError> {
        let mut severity_counts: BTreeMap<Severity, SeverityCounts> =
            Severity::ALL.iter().map(|s| (*s, SeverityCounts::default())).collect();
        let mut total_count = 0;

        {
            let conn = self.pool.get()?;
            let mut stmt =
                conn.prepare("SELECT severity, status, COUNT(*) FROM alerts GROUP BY severity, status")?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    parse_column(row, 0, str::parse::<Severity>)?,
                    parse_column(row, 1, str::parse::<AlertStatus>)?,
                    row.get::<_, i64>(2)?,
                ))
            })?;

            for r in rows {
                let (severity, status, count) = r?;
                let count = count.max(0) as u64;
                let entry = severity_counts.entry(severity).or_default();
                entry.total += count;
                match status {
                    AlertStatus::Open => entry.open += count,
                    AlertStatus::Acknowledged => entry.acknowledged += count,
                    AlertStatus::Resolved => entry.resolved += count,
                }
                total_count += count;
            }
        }

        let recent = self.query_at(None, None, recent_days, Some(RECENT_LIMIT), now)?;

        Ok(DashboardSummary {
            severity_counts,
            recent,
            total_count,
        })
    }
}
