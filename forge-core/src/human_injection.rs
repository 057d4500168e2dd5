//! Human Injection: request/response contract used when the Escalation
//! Engine decides a human needs to weigh in. The Orchestrator creates a
//! point and polls for a response instead of blocking a thread on stdin,
//! since the human may answer from a different process entirely (the CLI's
//! `respond` subcommand).

use crate::error::{ForgeError, ForgeResult};
use crate::escalation::{EscalationReason, InjectionType};
use crate::persistence::{Store, StoreError};
use rusqlite::params;
use serde::{Deserialize, Serialize};

fn parse_injection_type(s: &str) -> InjectionType {
    match s {
        "approval" => InjectionType::Approval,
        "guidance" => InjectionType::Guidance,
        "review" => InjectionType::Review,
        "redirect" => InjectionType::Redirect,
        _ => InjectionType::Decision,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InjectionStatus {
    Pending,
    Responded,
    TimedOut,
}

impl InjectionStatus {
    fn parse(s: &str) -> Self {
        match s {
            "responded" => Self::Responded,
            "timed_out" => Self::TimedOut,
            _ => Self::Pending,
        }
    }
    fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Responded => "responded",
            Self::TimedOut => "timed_out",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InjectionPoint {
    pub point_id: String,
    pub injection_type: InjectionType,
    pub message: String,
    pub options: Vec<String>,
    pub recommendation: Option<String>,
    pub timeout_seconds: u32,
    pub default_on_timeout: Option<String>,
    pub reasons: Vec<EscalationReason>,
    pub status: InjectionStatus,
    pub response: Option<String>,
    pub created_at: String,
}

pub struct HumanInjection {
    store: Store,
}

impl HumanInjection {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub async fn raise(
        &self,
        injection_type: InjectionType,
        message: &str,
        options: Vec<String>,
        recommendation: Option<String>,
        timeout_seconds: u32,
        default_on_timeout: Option<String>,
        reasons: Vec<EscalationReason>,
    ) -> ForgeResult<InjectionPoint> {
        let seq = self.store.next_seq("INJ").await?;
        let point_id = format!("INJ-{seq}");
        let created_at = chrono::Utc::now().to_rfc3339();
        let options_json = serde_json::to_string(&options)?;
        let context_json = serde_json::to_string(&reasons)?;
        let type_str = injection_type.as_str();

        let (id, msg, opts, ctx, rec, timeout, default_opt, ts) = (
            point_id.clone(),
            message.to_string(),
            options_json,
            context_json,
            recommendation.clone(),
            timeout_seconds,
            default_on_timeout.clone(),
            created_at.clone(),
        );
        self.store
            .write(move |conn| {
                conn.execute(
                    "INSERT INTO injection_points (point_id, seq, type, context, options, recommendation, timeout_seconds, default_on_timeout, message, severity, status, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 2, 'pending', ?10)",
                    params![id, seq as i64, type_str, ctx, opts, rec, timeout, default_opt, msg, ts],
                )
                .map_err(StoreError::from)?;
                Ok(())
            })
            .await?;

        Ok(InjectionPoint {
            point_id,
            injection_type,
            message: message.to_string(),
            options,
            recommendation,
            timeout_seconds,
            default_on_timeout,
            reasons,
            status: InjectionStatus::Pending,
            response: None,
            created_at,
        })
    }

    pub async fn get(&self, point_id: &str) -> ForgeResult<InjectionPoint> {
        let id = point_id.to_string();
        self.store
            .read(move |conn| {
                conn.query_row(
                    "SELECT point_id, message, options, recommendation, timeout_seconds, default_on_timeout, context, status, response, created_at, type
                     FROM injection_points WHERE point_id = ?1",
                    [&id],
                    |row| {
                        let options_json: String = row.get(2)?;
                        let context_json: String = row.get(6)?;
                        let status: String = row.get(7)?;
                        let type_str: String = row.get(10)?;
                        Ok(InjectionPoint {
                            point_id: row.get(0)?,
                            injection_type: parse_injection_type(&type_str),
                            message: row.get(1)?,
                            options: serde_json::from_str(&options_json).unwrap_or_default(),
                            recommendation: row.get(3)?,
                            timeout_seconds: row.get::<_, i64>(4)? as u32,
                            default_on_timeout: row.get(5)?,
                            reasons: serde_json::from_str(&context_json).unwrap_or_default(),
                            status: InjectionStatus::parse(&status),
                            response: row.get(8)?,
                            created_at: row.get(9)?,
                        })
                    },
                )
                .map_err(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                    other => StoreError::from(other),
                })
            })
            .await
            .map_err(|e| match e {
                StoreError::NotFound => ForgeError::InjectionPointNotFound { id: point_id.to_string() },
                other => ForgeError::Store(other),
            })
    }

    /// Record a human's response. Called by the CLI's `respond` subcommand,
    /// running in a different process than the orchestrator polling below.
    pub async fn respond(&self, point_id: &str, response: &str) -> ForgeResult<()> {
        let point = self.get(point_id).await?;
        if point.status != InjectionStatus::Pending {
            return Err(ForgeError::Validation {
                message: format!("injection point {point_id} is no longer pending"),
            });
        }
        let responded_at = chrono::Utc::now().to_rfc3339();
        let (id, resp) = (point_id.to_string(), response.to_string());
        self.store
            .write(move |conn| {
                conn.execute(
                    "UPDATE injection_points SET status = 'responded', response = ?1, responded_at = ?2 WHERE point_id = ?3",
                    params![resp, responded_at, id],
                )
                .map_err(StoreError::from)?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Poll until a response arrives or `timeout_seconds` elapses, at which
    /// point the point is marked timed out and `default_on_timeout` (if
    /// any) is returned in its place.
    pub async fn await_response(&self, point_id: &str) -> ForgeResult<Option<String>> {
        let point = self.get(point_id).await?;
        let deadline = tokio::time::Instant::now()
            + tokio::time::Duration::from_secs(point.timeout_seconds as u64);
        let poll_interval = tokio::time::Duration::from_millis(500);

        loop {
            let current = self.get(point_id).await?;
            match current.status {
                InjectionStatus::Responded => return Ok(current.response),
                InjectionStatus::TimedOut => return Ok(current.default_on_timeout),
                InjectionStatus::Pending => {
                    if tokio::time::Instant::now() >= deadline {
                        let id = point_id.to_string();
                        self.store
                            .write(move |conn| {
                                conn.execute(
                                    "UPDATE injection_points SET status = 'timed_out' WHERE point_id = ?1",
                                    params![id],
                                )
                                .map_err(StoreError::from)?;
                                Ok(())
                            })
                            .await?;
                        return Ok(point.default_on_timeout);
                    }
                    tokio::time::sleep(poll_interval).await;
                }
            }
        }
    }

    pub async fn list_pending(&self) -> ForgeResult<Vec<InjectionPoint>> {
        let rows = self
            .store
            .read(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT point_id, message, options, recommendation, timeout_seconds, default_on_timeout, context, status, response, created_at, type
                     FROM injection_points WHERE status = 'pending' ORDER BY seq",
                )?;
                let rows = stmt
                    .query_map([], |row| {
                        let options_json: String = row.get(2)?;
                        let context_json: String = row.get(6)?;
                        let type_str: String = row.get(10)?;
                        Ok(InjectionPoint {
                            point_id: row.get(0)?,
                            injection_type: parse_injection_type(&type_str),
                            message: row.get(1)?,
                            options: serde_json::from_str(&options_json).unwrap_or_default(),
                            recommendation: row.get(3)?,
                            timeout_seconds: row.get::<_, i64>(4)? as u32,
                            default_on_timeout: row.get(5)?,
                            reasons: serde_json::from_str(&context_json).unwrap_or_default(),
                            status: InjectionStatus::Pending,
                            response: row.get(8)?,
                            created_at: row.get(9)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        Ok(rows)
    }

    /// Every injection point regardless of status, most recent first. Backs
    /// the CLI's `respond --history` and `respond --stats` views.
    pub async fn list_all(&self) -> ForgeResult<Vec<InjectionPoint>> {
        let rows = self
            .store
            .read(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT point_id, message, options, recommendation, timeout_seconds, default_on_timeout, context, status, response, created_at, type
                     FROM injection_points ORDER BY seq DESC",
                )?;
                let rows = stmt
                    .query_map([], |row| {
                        let options_json: String = row.get(2)?;
                        let context_json: String = row.get(6)?;
                        let status: String = row.get(7)?;
                        let type_str: String = row.get(10)?;
                        Ok(InjectionPoint {
                            point_id: row.get(0)?,
                            injection_type: parse_injection_type(&type_str),
                            message: row.get(1)?,
                            options: serde_json::from_str(&options_json).unwrap_or_default(),
                            recommendation: row.get(3)?,
                            timeout_seconds: row.get::<_, i64>(4)? as u32,
                            default_on_timeout: row.get(5)?,
                            reasons: serde_json::from_str(&context_json).unwrap_or_default(),
                            status: InjectionStatus::parse(&status),
                            response: row.get(8)?,
                            created_at: row.get(9)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn injection() -> HumanInjection {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("p.db")).await.unwrap();
        HumanInjection::new(store)
    }

    #[tokio::test]
    async fn raise_and_respond_round_trips() {
        let hi = injection().await;
        let point = hi
            .raise(InjectionType::Decision, "proceed?", vec!["yes".into(), "no".into()], Some("yes".into()), 60, Some("no".into()), vec![])
            .await
            .unwrap();
        hi.respond(&point.point_id, "yes").await.unwrap();
        let loaded = hi.get(&point.point_id).await.unwrap();
        assert_eq!(loaded.status, InjectionStatus::Responded);
        assert_eq!(loaded.response.as_deref(), Some("yes"));
    }

    #[tokio::test]
    async fn await_response_times_out_to_default() {
        let hi = injection().await;
        let point = hi
            .raise(InjectionType::Decision, "proceed?", vec![], None, 1, Some("no".into()), vec![])
            .await
            .unwrap();
        let result = hi.await_response(&point.point_id).await.unwrap();
        assert_eq!(result.as_deref(), Some("no"));
        assert_eq!(hi.get(&point.point_id).await.unwrap().status, InjectionStatus::TimedOut);
    }

    #[tokio::test]
    async fn list_all_includes_every_status() {
        let hi = injection().await;
        let a = hi.raise(InjectionType::Decision, "a?", vec![], None, 60, None, vec![]).await.unwrap();
        let _b = hi.raise(InjectionType::Decision, "b?", vec![], None, 60, None, vec![]).await.unwrap();
        hi.respond(&a.point_id, "yes").await.unwrap();
        let all = hi.list_all().await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.iter().any(|p| p.status == InjectionStatus::Responded));
        assert!(all.iter().any(|p| p.status == InjectionStatus::Pending));
    }

    #[tokio::test]
    async fn double_respond_is_rejected() {
        let hi = injection().await;
        let point = hi.raise(InjectionType::Decision, "p?", vec![], None, 60, None, vec![]).await.unwrap();
        hi.respond(&point.point_id, "yes").await.unwrap();
        let err = hi.respond(&point.point_id, "no").await.unwrap_err();
        assert!(matches!(err, ForgeError::Validation { .. }));
    }

    #[tokio::test]
    async fn injection_type_round_trips() {
        let hi = injection().await;
        let point = hi
            .raise(InjectionType::Approval, "ok to force-push?", vec![], None, 60, None, vec![])
            .await
            .unwrap();
        assert!(point.point_id.starts_with("INJ-"));
        let loaded = hi.get(&point.point_id).await.unwrap();
        assert_eq!(loaded.injection_type, InjectionType::Approval);
    }
}
