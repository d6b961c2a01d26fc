use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a run record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Paused,
    Success,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Cancelled)
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running | Self::Paused)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Token accounting reported by the model API
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    pub fn add(&mut self, other: TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

/// A persistent execution record
///
/// Records are created when a `run_start` event is projected and are only
/// mutated by the projection afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: Uuid,
    pub agent_id: String,
    #[serde(default)]
    pub agent_name: String,
    pub status: RunStatus,
    pub prompt: String,
    pub model: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub iterations: u32,
    #[serde(default)]
    pub tool_calls: u32,
    #[serde(default)]
    pub usage: TokenUsage,
    pub error: Option<String>,
    pub parent_run_id: Option<Uuid>,
    #[serde(default)]
    pub sub_run_ids: Vec<Uuid>,
    #[serde(default)]
    pub is_handoff: bool,
}

impl Run {
    pub fn new(id: Uuid, agent_id: impl Into<String>, prompt: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            id,
            agent_id: agent_id.into(),
            agent_name: String::new(),
            status: RunStatus::Running,
            prompt: prompt.into(),
            model: model.into(),
            start_time: Utc::now(),
            end_time: None,
            iterations: 0,
            tool_calls: 0,
            usage: TokenUsage::default(),
            error: None,
            parent_run_id: None,
            sub_run_ids: Vec::new(),
            is_handoff: false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Append a child run id, ignoring duplicates. Returns whether it was added.
    pub fn add_sub_run(&mut self, sub_run_id: Uuid) -> bool {
        if self.sub_run_ids.contains(&sub_run_id) {
            return false;
        }
        self.sub_run_ids.push(sub_run_id);
        true
    }

    pub fn duration_ms(&self) -> Option<u64> {
        self.end_time.map(|ended| {
            ended
                .signed_duration_since(self.start_time)
                .num_milliseconds()
                .max(0) as u64
        })
    }

    /// Apply a partial update in place.
    ///
    /// A terminal record is closed: only `append_sub_run` still applies, so a
    /// late pause/resume or counter update cannot reopen it.
    pub fn apply(&mut self, update: RunUpdate) {
        if self.is_terminal() {
            if let Some(sub_run_id) = update.append_sub_run {
                self.add_sub_run(sub_run_id);
            }
            return;
        }

        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(end_time) = update.end_time {
            self.end_time = Some(end_time);
        }
        if let Some(iterations) = update.iterations {
            self.iterations = iterations;
        }
        if let Some(tool_calls) = update.tool_calls {
            self.tool_calls = tool_calls;
        }
        if let Some(usage) = update.add_usage {
            self.usage.add(usage);
        }
        if let Some(error) = update.error {
            self.error = Some(error);
        }
        if let Some(sub_run_id) = update.append_sub_run {
            self.add_sub_run(sub_run_id);
        }
    }
}

/// Partial update of a run record. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunUpdate {
    pub status: Option<RunStatus>,
    pub end_time: Option<DateTime<Utc>>,
    pub iterations: Option<u32>,
    pub tool_calls: Option<u32>,
    pub add_usage: Option<TokenUsage>,
    pub error: Option<String>,
    pub append_sub_run: Option<Uuid>,
}

impl RunUpdate {
    pub fn status(status: RunStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn append_sub_run(sub_run_id: Uuid) -> Self {
        Self {
            append_sub_run: Some(sub_run_id),
            ..Default::default()
        }
    }
}

/// Summary of a run for listing purposes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub id: Uuid,
    pub agent_id: String,
    pub prompt_preview: String,
    pub status: RunStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub iterations: u32,
    pub tool_calls: u32,
    pub parent_run_id: Option<Uuid>,
    pub is_handoff: bool,
}

impl From<&Run> for RunSummary {
    fn from(run: &Run) -> Self {
        let prompt_preview = if run.prompt.chars().count() > 100 {
            let head: String = run.prompt.chars().take(100).collect();
            format!("{}...", head)
        } else {
            run.prompt.clone()
        };

        Self {
            id: run.id,
            agent_id: run.agent_id.clone(),
            prompt_preview,
            status: run.status,
            start_time: run.start_time,
            end_time: run.end_time,
            duration_ms: run.duration_ms(),
            iterations: run.iterations,
            tool_calls: run.tool_calls,
            parent_run_id: run.parent_run_id,
            is_handoff: run.is_handoff,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_terminal() {
        assert!(RunStatus::Success.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(RunStatus::Cancelled.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
        assert!(!RunStatus::Paused.is_terminal());
        assert_eq!(
            serde_json::to_string(&RunStatus::Cancelled).unwrap(),
            "\"cancelled\""
        );
    }

    #[test]
    fn test_sub_runs_are_deduplicated_in_insertion_order() {
        let mut run = Run::new(Uuid::new_v4(), "planner", "plan it", "model");
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        assert!(run.add_sub_run(a));
        assert!(run.add_sub_run(b));
        assert!(!run.add_sub_run(a));
        run.apply(RunUpdate::append_sub_run(b));

        assert_eq!(run.sub_run_ids, vec![a, b]);
    }

    #[test]
    fn test_apply_partial_update() {
        let mut run = Run::new(Uuid::new_v4(), "coder", "write code", "model");
        run.apply(RunUpdate {
            add_usage: Some(TokenUsage::new(10, 5)),
            ..Default::default()
        });
        run.apply(RunUpdate {
            status: Some(RunStatus::Failed),
            end_time: Some(Utc::now()),
            iterations: Some(3),
            tool_calls: Some(2),
            add_usage: Some(TokenUsage::new(1, 1)),
            error: Some("boom".to_string()),
            append_sub_run: None,
        });

        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.iterations, 3);
        assert_eq!(run.tool_calls, 2);
        assert_eq!(run.usage, TokenUsage::new(11, 6));
        assert_eq!(run.error.as_deref(), Some("boom"));
        assert!(run.duration_ms().is_some());
    }

    #[test]
    fn test_terminal_record_only_accepts_sub_runs() {
        let mut run = Run::new(Uuid::new_v4(), "coder", "write code", "model");
        let ended = Utc::now();
        run.apply(RunUpdate {
            status: Some(RunStatus::Success),
            end_time: Some(ended),
            iterations: Some(2),
            ..Default::default()
        });

        run.apply(RunUpdate::status(RunStatus::Paused));
        run.apply(RunUpdate::status(RunStatus::Running));
        run.apply(RunUpdate {
            status: Some(RunStatus::Failed),
            iterations: Some(9),
            error: Some("late".to_string()),
            ..Default::default()
        });
        let child = Uuid::new_v4();
        run.apply(RunUpdate::append_sub_run(child));

        assert_eq!(run.status, RunStatus::Success);
        assert_eq!(run.end_time, Some(ended));
        assert_eq!(run.iterations, 2);
        assert!(run.error.is_none());
        assert_eq!(run.sub_run_ids, vec![child]);
    }

    #[test]
    fn test_summary_truncates_prompt() {
        let run = Run::new(Uuid::new_v4(), "coder", "x".repeat(250), "model");
        let summary = RunSummary::from(&run);
        assert_eq!(summary.prompt_preview.len(), 103);
        assert!(summary.prompt_preview.ends_with("..."));
    }
}
