use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use nurture_core::{NurtureError, NurtureResult};

/// Upper bound on the number of steps in one workflow.
pub const MAX_STEPS: u32 = 100;

/// Upper bound on a workflow name.
pub const MAX_NAME_LEN: usize = 200;

/// Upper bound on a step delay (days and hours combined), in hours. Ten years.
pub const MAX_DELAY_HOURS: u64 = 10 * 365 * 24;

/// Upper bound on a condition lookback window, in days. Ten years.
pub const MAX_WINDOW_DAYS: u32 = 10 * 365;

/// A drip / automation workflow: an ordered list of steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub steps: Vec<Step>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowDefinition {
    pub fn new(tenant_id: Uuid, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            name: name.into(),
            steps: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn step_count(&self) -> u32 {
        self.steps.len() as u32
    }

    /// Returns the step with the given 1-based number.
    pub fn step(&self, step_number: u32) -> Option<&Step> {
        if step_number == 0 {
            return None;
        }
        self.steps
            .get(step_number as usize - 1)
            .filter(|s| s.step_number == step_number)
    }

    /// First `(step_number, target)` whose branch target lies past the last step.
    pub fn dangling_branch(&self) -> Option<(u32, u32)> {
        let count = self.step_count();
        self.steps.iter().find_map(|s| match s.next_step_if_false {
            Some(target) if target > count => Some((s.step_number, target)),
            _ => None,
        })
    }
}

/// Wait before a step runs, relative to the previous step's completion
/// (or to enrollment time for step 1).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delay {
    pub days: u32,
    pub hours: u32,
}

impl Delay {
    pub fn new(days: u32, hours: u32) -> Self {
        Self { days, hours }
    }

    pub fn to_duration(self) -> Duration {
        Duration::days(i64::from(self.days)) + Duration::hours(i64::from(self.hours))
    }

    pub fn total_hours(self) -> u64 {
        u64::from(self.days) * 24 + u64::from(self.hours)
    }
}

/// Branch predicate attached to a step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionKind {
    #[default]
    None,
    IfOpened,
    IfClicked,
    IfReplied,
    IfNotOpened,
    IfNotClicked,
}

impl ConditionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::IfOpened => "if_opened",
            Self::IfClicked => "if_clicked",
            Self::IfReplied => "if_replied",
            Self::IfNotOpened => "if_not_opened",
            Self::IfNotClicked => "if_not_clicked",
        }
    }
}

impl fmt::Display for ConditionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConditionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "if_opened" => Ok(Self::IfOpened),
            "if_clicked" => Ok(Self::IfClicked),
            "if_replied" => Ok(Self::IfReplied),
            "if_not_opened" => Ok(Self::IfNotOpened),
            "if_not_clicked" => Ok(Self::IfNotClicked),
            other => Err(format!("unknown condition kind '{}'", other)),
        }
    }
}

/// A condition kind plus its lookback window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepCondition {
    pub kind: ConditionKind,
    pub window_days: u32,
}

impl StepCondition {
    pub fn none() -> Self {
        Self {
            kind: ConditionKind::None,
            window_days: 7,
        }
    }

    pub fn new(kind: ConditionKind, window_days: u32) -> Self {
        Self { kind, window_days }
    }
}

/// Delivery channel for content actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentChannel {
    Email,
    Sms,
    Push,
}

/// The effect a step has. Exactly one per step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum StepAction {
    SendContent {
        channel: ContentChannel,
        #[serde(default)]
        subject: Option<String>,
        body: String,
    },
    AddTag {
        tag: String,
    },
    RemoveTag {
        tag: String,
    },
    AdjustScore {
        delta: i32,
    },
    ChangeStage {
        stage: String,
    },
    Webhook {
        url: String,
        #[serde(default = "default_webhook_method")]
        method: String,
        #[serde(default)]
        payload: serde_json::Value,
    },
}

fn default_webhook_method() -> String {
    "POST".to_string()
}

impl StepAction {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SendContent { .. } => "send_content",
            Self::AddTag { .. } => "add_tag",
            Self::RemoveTag { .. } => "remove_tag",
            Self::AdjustScore { .. } => "adjust_score",
            Self::ChangeStage { .. } => "change_stage",
            Self::Webhook { .. } => "webhook",
        }
    }

    /// Checks the payload carries what its kind needs.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::SendContent { channel, subject, body } => {
                if body.trim().is_empty() {
                    return Err("send_content body must not be empty".into());
                }
                if *channel == ContentChannel::Email
                    && subject.as_deref().map_or(true, |s| s.trim().is_empty())
                {
                    return Err("email content requires a subject".into());
                }
                Ok(())
            }
            Self::AddTag { tag } | Self::RemoveTag { tag } => {
                if tag.trim().is_empty() {
                    Err("tag must not be empty".into())
                } else {
                    Ok(())
                }
            }
            Self::AdjustScore { delta } => {
                if *delta == 0 {
                    Err("score delta must not be zero".into())
                } else {
                    Ok(())
                }
            }
            Self::ChangeStage { stage } => {
                if stage.trim().is_empty() {
                    Err("stage must not be empty".into())
                } else {
                    Ok(())
                }
            }
            Self::Webhook { url, method, .. } => {
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    return Err(format!("webhook url '{}' must be http(s)", url));
                }
                match method.to_ascii_uppercase().as_str() {
                    "POST" | "PUT" | "PATCH" | "GET" => Ok(()),
                    other => Err(format!("unsupported webhook method '{}'", other)),
                }
            }
        }
    }
}

/// One ordered unit of a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub step_number: u32,
    pub delay: Delay,
    pub condition: StepCondition,
    pub action: StepAction,
    pub next_step_if_false: Option<u32>,
    pub created_at: DateTime<Utc>,
}

/// Caller-supplied description of a step, validated before it becomes a `Step`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepSpec {
    pub step_number: u32,
    #[serde(default)]
    pub delay_days: i64,
    #[serde(default)]
    pub delay_hours: i64,
    #[serde(default = "default_condition")]
    pub condition: String,
    #[serde(default)]
    pub condition_window_days: Option<u32>,
    pub action: StepAction,
    #[serde(default)]
    pub next_step_if_false: Option<u32>,
}

fn default_condition() -> String {
    "none".to_string()
}

impl StepSpec {
    /// A step with no delay and no condition.
    pub fn immediate(step_number: u32, action: StepAction) -> Self {
        Self {
            step_number,
            delay_days: 0,
            delay_hours: 0,
            condition: default_condition(),
            condition_window_days: None,
            action,
            next_step_if_false: None,
        }
    }
}

/// Lifecycle status of an enrollment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentStatus {
    Active,
    Completed,
    Cancelled,
}

/// One participant's run through one workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Enrollment {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub workflow_id: Uuid,
    pub participant_id: String,
    pub current_step: u32,
    pub status: EnrollmentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Enrollment {
    pub fn new(workflow: &WorkflowDefinition, participant_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id: workflow.tenant_id,
            workflow_id: workflow.id,
            participant_id: participant_id.to_string(),
            current_step: 1,
            status: EnrollmentStatus::Active,
            created_at: now,
            updated_at: now,
            completed_at: None,
            cancelled_at: None,
        }
    }
}

/// Status of one scheduled step attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Processing,
    Sent,
    Skipped,
    Failed,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Sent | Self::Skipped | Self::Failed)
    }
}

/// Durable record of one scheduled step attempt; the unit of dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLog {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub workflow_id: Uuid,
    pub enrollment_id: Uuid,
    pub step_id: Uuid,
    pub step_number: u32,
    pub scheduled_for: DateTime<Utc>,
    pub status: ExecutionStatus,
    pub claimed_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub artifact_id: Option<String>,
    pub skip_reason: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ExecutionLog {
    /// A pending log for `step`, due `step.delay` after `from`. Fails when
    /// the due time falls outside the representable calendar.
    pub fn schedule(
        enrollment: &Enrollment,
        step: &Step,
        from: DateTime<Utc>,
    ) -> NurtureResult<Self> {
        let scheduled_for = from
            .checked_add_signed(step.delay.to_duration())
            .ok_or_else(|| {
                NurtureError::validation(format!(
                    "step {} delay of {}d {}h overflows the calendar",
                    step.step_number, step.delay.days, step.delay.hours
                ))
            })?;
        Ok(Self {
            id: Uuid::new_v4(),
            tenant_id: enrollment.tenant_id,
            workflow_id: enrollment.workflow_id,
            enrollment_id: enrollment.id,
            step_id: step.id,
            step_number: step.step_number,
            scheduled_for,
            status: ExecutionStatus::Pending,
            claimed_at: None,
            sent_at: None,
            artifact_id: None,
            skip_reason: None,
            error_message: None,
            created_at: from,
        })
    }
}

/// Terminal outcome written for a claimed log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum LogOutcome {
    Sent { artifact_id: String },
    Skipped { reason: String },
    Failed { error: String },
}

impl LogOutcome {
    pub fn status(&self) -> ExecutionStatus {
        match self {
            Self::Sent { .. } => ExecutionStatus::Sent,
            Self::Skipped { .. } => ExecutionStatus::Skipped,
            Self::Failed { .. } => ExecutionStatus::Failed,
        }
    }
}

/// What happens to the enrollment once a log's outcome is recorded.
#[derive(Debug, Clone)]
pub enum Advancement {
    /// Leave the enrollment where it is.
    Stay,
    /// Move to `step_number` and insert `next_log` as its only pending log.
    MoveTo {
        step_number: u32,
        next_log: ExecutionLog,
    },
    /// No further step; `final_step` is the step count plus one.
    Complete { final_step: u32 },
}

/// Atomic write of one log outcome plus its enrollment advancement.
#[derive(Debug, Clone)]
pub struct StepCommit {
    pub log_id: Uuid,
    pub outcome: LogOutcome,
    pub advancement: Advancement,
    pub at: DateTime<Utc>,
}

/// Result of `commit_step`: the enrollment as stored afterwards (`None` when it
/// no longer exists) and whether the advancement was applied. A concurrent
/// cancellation suppresses it.
#[derive(Debug, Clone)]
pub struct CommitResult {
    pub enrollment: Option<Enrollment>,
    pub advanced: bool,
}

/// Counters for one sweep invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Due logs selected for this sweep.
    pub selected: usize,
    /// Logs claimed and driven to a terminal state.
    pub processed: usize,
    pub sent: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Logs another sweep claimed first.
    pub conflicts: usize,
}

/// On-demand rollup for one workflow.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowMetrics {
    pub workflow_id: Uuid,
    pub enrolled: u64,
    pub active: u64,
    pub completed: u64,
    pub cancelled: u64,
    pub pending: u64,
    pub sent: u64,
    pub skipped: u64,
    pub failed: u64,
}
