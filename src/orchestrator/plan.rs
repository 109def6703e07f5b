//! Composite plans: fan out, settle all, assemble.
//!
//! Every branch runs concurrently under its own deadline. A failing or slow
//! branch becomes an `Unavailable` section and never cancels its siblings;
//! only the branch whose deadline elapses is dropped.

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashSet;
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::{ServiceError, ServiceResult};
use crate::observability::metrics;
use crate::orchestrator::dispatch::Orchestrator;
use crate::orchestrator::events::{EventType, ProgressEvent};

/// A logical request made of independent branches.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanRequest {
    #[serde(default)]
    pub request_id: Option<String>,
    pub branches: Vec<PlanBranch>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlanBranch {
    /// Name of the result slot, unique within a plan.
    pub section: String,
    pub tool: String,
    #[serde(default)]
    pub arguments: Value,
}

impl PlanBranch {
    pub fn new(section: impl Into<String>, tool: impl Into<String>, arguments: Value) -> Self {
        Self {
            section: section.into(),
            tool: tool.into(),
            arguments,
        }
    }
}

/// Outcome of one branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SectionResult {
    Available { value: Value },
    Unavailable { code: String, reason: String },
}

impl SectionResult {
    pub fn is_available(&self) -> bool {
        matches!(self, SectionResult::Available { .. })
    }

    fn from_result(result: ServiceResult<Value>) -> Self {
        match result {
            Ok(value) => SectionResult::Available { value },
            Err(e) => SectionResult::Unavailable {
                code: e.code().to_string(),
                reason: e.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanSection {
    pub section: String,
    pub tool: String,
    #[serde(flatten)]
    pub result: SectionResult,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlanStatus {
    Complete,
    Partial,
    Failed,
}

impl PlanStatus {
    /// FAILED only when every branch failed.
    pub fn from_counts(available: usize, total: usize) -> Self {
        if available == total {
            PlanStatus::Complete
        } else if available == 0 {
            PlanStatus::Failed
        } else {
            PlanStatus::Partial
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PlanStatus::Complete => "COMPLETE",
            PlanStatus::Partial => "PARTIAL",
            PlanStatus::Failed => "FAILED",
        }
    }

    fn event_type(&self) -> EventType {
        match self {
            PlanStatus::Complete => EventType::Complete,
            PlanStatus::Partial => EventType::Partial,
            PlanStatus::Failed => EventType::Failed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositePlan {
    pub request_id: String,
    pub status: PlanStatus,
    pub sections: Vec<PlanSection>,
    pub duration_ms: u64,
}

impl CompositePlan {
    pub fn section(&self, name: &str) -> Option<&PlanSection> {
        self.sections.iter().find(|s| s.section == name)
    }
}

impl Orchestrator {
    /// Run every branch to completion and assemble the plan.
    ///
    /// Only a malformed request is an error; branch failures are sections.
    pub async fn run_plan(&self, request: PlanRequest) -> ServiceResult<CompositePlan> {
        self.validate_plan(&request)?;

        let request_id = request.request_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let started = Instant::now();
        let branch_timeout = self.plan.branch_timeout();
        let total = request.branches.len();

        tracing::info!(request_id = %request_id, branches = total, "Plan started");
        self.events.publish(
            ProgressEvent::new(EventType::Started, request_id.clone(), "running").with_payload(json!({
                "sections": request.branches.iter().map(|b| b.section.as_str()).collect::<Vec<_>>(),
            })),
        );

        let branches = request.branches.into_iter().map(|branch| {
            let request_id = request_id.as_str();
            async move {
                let branch_started = Instant::now();
                let result = self
                    .dispatch_within(&branch.tool, branch.arguments, Some(branch_started + branch_timeout))
                    .await
                    .map(|outcome| outcome.value);

                let result = SectionResult::from_result(result);
                let status = if result.is_available() { "available" } else { "unavailable" };
                if let SectionResult::Unavailable { code, reason } = &result {
                    tracing::warn!(
                        request_id = %request_id,
                        section = %branch.section,
                        code = %code,
                        reason = %reason,
                        "Plan branch unavailable"
                    );
                }
                self.events.publish(
                    ProgressEvent::new(EventType::BranchSettled, request_id, status)
                        .with_payload(json!({ "section": branch.section, "tool": branch.tool })),
                );

                PlanSection {
                    section: branch.section,
                    tool: branch.tool,
                    result,
                    duration_ms: branch_started.elapsed().as_millis() as u64,
                }
            }
        });
        let sections = join_all(branches).await;

        let available = sections.iter().filter(|s| s.result.is_available()).count();
        let status = PlanStatus::from_counts(available, total);
        let duration_ms = started.elapsed().as_millis() as u64;

        tracing::info!(
            request_id = %request_id,
            status = status.as_str(),
            available,
            total,
            duration_ms,
            "Plan settled"
        );
        metrics::record_plan(status.as_str());
        self.events.publish(
            ProgressEvent::new(status.event_type(), request_id.clone(), status.as_str())
                .with_payload(json!({ "available": available, "total": total })),
        );

        Ok(CompositePlan {
            request_id,
            status,
            sections,
            duration_ms,
        })
    }

    fn validate_plan(&self, request: &PlanRequest) -> ServiceResult<()> {
        if request.branches.is_empty() {
            return Err(ServiceError::Validation("plan has no branches".into()));
        }
        if request.branches.len() > self.plan.max_branches {
            return Err(ServiceError::Validation(format!(
                "plan has {} branches, limit is {}",
                request.branches.len(),
                self.plan.max_branches
            )));
        }
        let mut seen = HashSet::new();
        for branch in &request.branches {
            if !seen.insert(branch.section.as_str()) {
                return Err(ServiceError::Validation(format!(
                    "duplicate plan section: {}",
                    branch.section
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStore;
    use crate::config::{OrchestratorConfig, PlanConfig, RetryConfig};
    use crate::registry::{Capability, HandlerWorker};
    use std::sync::Arc;
    use std::time::Duration;

    async fn orchestrator() -> Orchestrator {
        let config = OrchestratorConfig {
            retries: RetryConfig {
                max_retries: 1,
                base_delay_ms: 10,
                jitter: false,
                ..RetryConfig::default()
            },
            plan: PlanConfig {
                branch_timeout_ms: 1_000,
                ..PlanConfig::default()
            },
            ..OrchestratorConfig::default()
        };
        let orchestrator = Orchestrator::new(&config, Arc::new(MemoryStore::new()));

        let weather = HandlerWorker::new("weather").handler("forecast", |_| async { Ok(json!({"wind": 12})) });
        let tides = HandlerWorker::new("tides")
            .handler("tide_height", |_| async { Err(ServiceError::Transient("station offline".into())) });
        let routing = HandlerWorker::new("routing").handler("bearing", |_| async { Ok(json!(270)) });
        let slow = HandlerWorker::new("depth").handler("soundings", |_| async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(json!([]))
        });

        for (worker, cap) in [
            (weather, "forecast"),
            (tides, "tide_height"),
            (routing, "bearing"),
            (slow, "soundings"),
        ] {
            orchestrator
                .register_local(Arc::new(worker), vec![Capability::new(cap)])
                .await
                .unwrap();
        }
        orchestrator
    }

    fn request(branches: &[(&str, &str)]) -> PlanRequest {
        PlanRequest {
            request_id: Some("passage-1".into()),
            branches: branches
                .iter()
                .map(|(section, tool)| PlanBranch::new(*section, *tool, json!({})))
                .collect(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_failing_branch_is_partial() {
        let orchestrator = orchestrator().await;
        let plan = orchestrator
            .run_plan(request(&[("weather", "forecast"), ("tides", "tide_height"), ("route", "bearing")]))
            .await
            .unwrap();

        assert_eq!(plan.status, PlanStatus::Partial);
        assert_eq!(plan.request_id, "passage-1");
        assert!(plan.section("weather").unwrap().result.is_available());
        assert!(plan.section("route").unwrap().result.is_available());
        match &plan.section("tides").unwrap().result {
            SectionResult::Unavailable { code, .. } => assert_eq!(code, "TRANSIENT"),
            other => panic!("unexpected section: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_rules() {
        let orchestrator = orchestrator().await;

        let complete = orchestrator
            .run_plan(request(&[("weather", "forecast"), ("route", "bearing")]))
            .await
            .unwrap();
        assert_eq!(complete.status, PlanStatus::Complete);

        let failed = orchestrator
            .run_plan(request(&[("tides", "tide_height"), ("ghost", "unknown_tool")]))
            .await
            .unwrap();
        assert_eq!(failed.status, PlanStatus::Failed);
        match &failed.section("ghost").unwrap().result {
            SectionResult::Unavailable { code, .. } => assert_eq!(code, "VALIDATION"),
            other => panic!("unexpected section: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_branch_times_out_alone() {
        let orchestrator = orchestrator().await;
        let plan = orchestrator
            .run_plan(request(&[("weather", "forecast"), ("depth", "soundings")]))
            .await
            .unwrap();

        assert_eq!(plan.status, PlanStatus::Partial);
        assert!(plan.section("weather").unwrap().result.is_available());
        match &plan.section("depth").unwrap().result {
            SectionResult::Unavailable { code, .. } => assert_eq!(code, "TIMEOUT"),
            other => panic!("unexpected section: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_branch_timeout_is_recorded_as_worker_failure() {
        let orchestrator = orchestrator().await;
        for _ in 0..5 {
            let plan = orchestrator
                .run_plan(request(&[("depth", "soundings")]))
                .await
                .unwrap();
            assert_eq!(plan.status, PlanStatus::Failed);
        }

        let workers = orchestrator.metrics().worker_stats();
        let depth = workers.iter().find(|w| w.worker == "depth").unwrap();
        assert_eq!((depth.requests, depth.failures), (5, 5));

        let deps = orchestrator.metrics().dependency_stats();
        let depth = deps.iter().find(|d| d.dependency == "depth").unwrap();
        assert_eq!((depth.calls, depth.failures), (5, 5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_events_in_checkpoint_order() {
        let orchestrator = orchestrator().await;
        let mut events = orchestrator.events().subscribe();

        orchestrator
            .run_plan(request(&[("weather", "forecast"), ("tides", "tide_height")]))
            .await
            .unwrap();

        let mut kinds = Vec::new();
        while let Ok(event) = events.try_recv() {
            assert_eq!(event.request_id.as_deref(), Some("passage-1"));
            kinds.push(event.event_type);
        }
        assert_eq!(
            kinds,
            vec![
                EventType::Started,
                EventType::BranchSettled,
                EventType::BranchSettled,
                EventType::Partial
            ]
        );
    }

    #[tokio::test]
    async fn test_malformed_plans_are_rejected() {
        let orchestrator = orchestrator().await;
        assert!(matches!(
            orchestrator.run_plan(request(&[])).await,
            Err(ServiceError::Validation(_))
        ));
        assert!(matches!(
            orchestrator
                .run_plan(request(&[("a", "forecast"), ("a", "bearing")]))
                .await,
            Err(ServiceError::Validation(_))
        ));
    }

    #[test]
    fn test_section_wire_shape() {
        let section = PlanSection {
            section: "tides".into(),
            tool: "tide_height".into(),
            result: SectionResult::Unavailable {
                code: "TIMEOUT".into(),
                reason: "timed out".into(),
            },
            duration_ms: 5,
        };
        assert_eq!(
            serde_json::to_value(&section).unwrap(),
            json!({
                "section": "tides",
                "tool": "tide_height",
                "status": "UNAVAILABLE",
                "code": "TIMEOUT",
                "reason": "timed out",
                "durationMs": 5
            })
        );
    }
}
