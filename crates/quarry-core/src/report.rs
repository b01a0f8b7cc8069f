use quarry_schema::ToolRequest;
use serde::Serialize;
use std::collections::HashSet;

/// Terminal state of one requested tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolOutcome {
    /// Present in the library. `already_present` is set when nothing had to
    /// be staged.
    Installed { already_present: bool },
    Failed { reason: String },
}

impl ToolOutcome {
    pub fn is_installed(&self) -> bool {
        matches!(self, Self::Installed { .. })
    }

    pub fn failure_reason(&self) -> Option<&str> {
        match self {
            Self::Failed { reason } => Some(reason),
            Self::Installed { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolResult {
    #[serde(flatten)]
    pub request: ToolRequest,
    #[serde(flatten)]
    pub outcome: ToolOutcome,
}

/// Why a whole batch failed before any tool was attempted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "reason", rename_all = "snake_case")]
pub enum BatchFailure {
    Policy(String),
    Manifest(String),
}

impl BatchFailure {
    pub fn reason(&self) -> &str {
        match self {
            Self::Policy(r) | Self::Manifest(r) => r,
        }
    }
}

/// Aggregated result of one hydration run. Results keep request order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HydrationReport {
    pub success: bool,
    pub installed_count: usize,
    pub failed_count: usize,
    pub failed_tools: Vec<ToolRequest>,
    pub results: Vec<ToolResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_failure: Option<BatchFailure>,
    pub started_at: String,
    pub finished_at: String,
}

impl HydrationReport {
    pub fn from_results(
        results: Vec<ToolResult>,
        batch_failure: Option<BatchFailure>,
        started_at: String,
    ) -> Self {
        let failed_tools: Vec<ToolRequest> = results
            .iter()
            .filter(|r| !r.outcome.is_installed())
            .map(|r| r.request.clone())
            .collect();
        let installed_count = results.len() - failed_tools.len();
        Self {
            success: failed_tools.is_empty() && batch_failure.is_none(),
            installed_count,
            failed_count: failed_tools.len(),
            failed_tools,
            results,
            batch_failure,
            started_at,
            finished_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Partial success: some tools installed, some failed.
    pub fn is_partial(&self) -> bool {
        self.installed_count > 0 && self.failed_count > 0
    }

    /// The same report with the given tools dropped and counts recomputed.
    #[must_use]
    pub fn without(self, dropped: &HashSet<ToolRequest>) -> Self {
        if dropped.is_empty() {
            return self;
        }
        let results = self
            .results
            .into_iter()
            .filter(|r| !dropped.contains(&r.request))
            .collect();
        let finished_at = self.finished_at;
        Self {
            finished_at,
            ..Self::from_results(results, self.batch_failure, self.started_at)
        }
    }
}

/// Notifications emitted during a run, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HydrationEvent {
    ToolStarted {
        request: ToolRequest,
        index: usize,
        total: usize,
    },
    /// Cumulative bytes staged. `total` equals `bytes` when the size is unknown.
    Progress {
        request: ToolRequest,
        bytes: u64,
        total: u64,
    },
    ToolFinished {
        request: ToolRequest,
        outcome: ToolOutcome,
    },
    BatchFinished {
        report: HydrationReport,
    },
}

impl HydrationEvent {
    /// The tool this event concerns, if any.
    pub fn request(&self) -> Option<&ToolRequest> {
        match self {
            Self::ToolStarted { request, .. }
            | Self::Progress { request, .. }
            | Self::ToolFinished { request, .. } => Some(request),
            Self::BatchFinished { .. } => None,
        }
    }
}

pub trait HydrationObserver {
    fn on_event(&mut self, event: &HydrationEvent);
}

impl<F: FnMut(&HydrationEvent)> HydrationObserver for F {
    fn on_event(&mut self, event: &HydrationEvent) {
        self(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn installed(id: &str) -> ToolResult {
        ToolResult {
            request: ToolRequest::new(id, "1"),
            outcome: ToolOutcome::Installed {
                already_present: false,
            },
        }
    }

    fn failed(id: &str) -> ToolResult {
        ToolResult {
            request: ToolRequest::new(id, "1"),
            outcome: ToolOutcome::Failed {
                reason: "boom".to_owned(),
            },
        }
    }

    #[test]
    fn counts_and_success() {
        let report = HydrationReport::from_results(
            vec![installed("a"), failed("b"), installed("c")],
            None,
            chrono::Utc::now().to_rfc3339(),
        );
        assert!(!report.success);
        assert!(report.is_partial());
        assert_eq!(report.installed_count, 2);
        assert_eq!(report.failed_count, 1);
        assert_eq!(report.failed_tools, vec![ToolRequest::new("b", "1")]);
    }

    #[test]
    fn empty_batch_is_successful() {
        let report = HydrationReport::from_results(Vec::new(), None, String::new());
        assert!(report.success);
        assert!(!report.is_partial());
    }

    #[test]
    fn without_recomputes_counts() {
        let report = HydrationReport::from_results(
            vec![installed("a"), failed("b")],
            None,
            String::new(),
        );
        let dropped: HashSet<_> = [ToolRequest::new("b", "1")].into_iter().collect();
        let trimmed = report.without(&dropped);
        assert!(trimmed.success);
        assert_eq!(trimmed.results.len(), 1);
        assert_eq!(trimmed.failed_count, 0);
    }

    #[test]
    fn report_serializes_flat_results() {
        let report = HydrationReport::from_results(
            vec![failed("godot")],
            Some(BatchFailure::Policy("offline".to_owned())),
            String::new(),
        );
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["results"][0]["id"], "godot");
        assert_eq!(json["results"][0]["status"], "failed");
        assert_eq!(json["results"][0]["reason"], "boom");
        assert_eq!(json["batch_failure"]["kind"], "policy");
    }
}
