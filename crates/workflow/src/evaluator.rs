use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use nurture_core::types::EngagementEventType;
use nurture_core::{NurtureError, NurtureResult};

use crate::collaborators::EngagementStore;
use crate::types::{ConditionKind, StepCondition};

/// The engagement lookup a condition needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngagementQuery {
    pub event_type: EngagementEventType,
    pub since: DateTime<Utc>,
    /// `true`: condition holds when at least one event matches.
    /// `false`: condition holds when none does.
    pub expect_any: bool,
}

/// Translates a condition into its engagement query, or `None` for
/// `ConditionKind::None` which always holds.
///
/// The positive kinds look back `window_days`; the negative kinds look at the
/// participant's entire history and ignore the window.
pub fn engagement_query(
    condition: &StepCondition,
    now: DateTime<Utc>,
) -> NurtureResult<Option<EngagementQuery>> {
    let windowed = || {
        now.checked_sub_signed(ChronoDuration::days(i64::from(condition.window_days)))
            .ok_or_else(|| {
                NurtureError::ConditionEvaluation(format!(
                    "window of {} days reaches before the calendar",
                    condition.window_days
                ))
            })
    };
    let (event_type, since, expect_any) = match condition.kind {
        ConditionKind::None => return Ok(None),
        ConditionKind::IfOpened => (EngagementEventType::Open, windowed()?, true),
        ConditionKind::IfClicked => (EngagementEventType::Click, windowed()?, true),
        ConditionKind::IfReplied => (EngagementEventType::Reply, windowed()?, true),
        ConditionKind::IfNotOpened => (EngagementEventType::Open, DateTime::<Utc>::UNIX_EPOCH, false),
        ConditionKind::IfNotClicked => (EngagementEventType::Click, DateTime::<Utc>::UNIX_EPOCH, false),
    };
    Ok(Some(EngagementQuery {
        event_type,
        since,
        expect_any,
    }))
}

/// Evaluates step conditions against the engagement-history collaborator.
#[derive(Clone)]
pub struct ConditionEvaluator {
    engagement: Arc<dyn EngagementStore>,
    timeout: Duration,
}

impl ConditionEvaluator {
    pub fn new(engagement: Arc<dyn EngagementStore>, timeout: Duration) -> Self {
        Self {
            engagement,
            timeout,
        }
    }

    /// Returns whether `condition` holds for `participant_id` at `now`.
    ///
    /// An unreachable or slow engagement store is a `ConditionEvaluation`
    /// error; it never defaults to either branch.
    pub async fn evaluate(
        &self,
        participant_id: &str,
        condition: &StepCondition,
        now: DateTime<Utc>,
    ) -> NurtureResult<bool> {
        let Some(query) = engagement_query(condition, now)? else {
            return Ok(true);
        };

        let count = match tokio::time::timeout(
            self.timeout,
            self.engagement
                .count_events(participant_id, query.event_type, query.since),
        )
        .await
        {
            Ok(Ok(count)) => count,
            Ok(Err(e)) => return Err(NurtureError::ConditionEvaluation(e.to_string())),
            Err(_) => {
                return Err(NurtureError::ConditionEvaluation(format!(
                    "engagement query timed out after {} ms",
                    self.timeout.as_millis()
                )))
            }
        };

        let holds = if query.expect_any { count > 0 } else { count == 0 };
        debug!(
            participant_id = %participant_id,
            condition = %condition.kind,
            count,
            holds,
            "Condition evaluated"
        );
        Ok(holds)
    }
}

impl std::fmt::Debug for ConditionEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConditionEvaluator")
            .field("timeout", &self.timeout)
            .finish()
    }
}
