//! Step planner and time scaler.
//!
//! Turns either a timing template or a target record count into a `Job`
//! plus ordered `Step`s with absolute schedule times. Template offsets are
//! scaled to the target cycle length; programmatic plans spread record sets
//! over jittered offsets so the generated activity doesn't look like a
//! metronome.

pub mod placeholder;
pub mod template;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde_json::{Value, json};
use uuid::Uuid;

use simcrm_types::error::PlanningError;
use simcrm_types::job::{ActionType, Job, JobStatus, RecordType, Step, StepStatus};
use simcrm_types::template::{PlaceholderValues, TimingRow};

use crate::clock::Clock;

/// Upper bound on programmatic record sets.
const MAX_SETS: u32 = 20;

/// Delay of the first programmatic set after job start.
const FIRST_SET_DELAY_SECS: i64 = 30;

/// Spacing range between consecutive programmatic sets, in hours.
const SET_SPACING_HOURS: std::ops::RangeInclusive<f64> = 6.0..=30.0;

/// Offset of dependent records (deals) after their prerequisites, so the
/// prerequisite step is always due first.
const DEPENDENT_OFFSET_MINUTES: i64 = 2;

/// Inputs for planning one job.
#[derive(Debug, Clone)]
pub struct PlanRequest {
    pub outcome: String,
    pub theme: String,
    pub industry: String,
    pub frequency: String,
    pub sequence: u32,
    pub owner_id: Option<String>,
    pub template_id: Option<String>,
    pub metadata: HashMap<String, Value>,
}

/// Produces jobs and their scheduled steps.
pub struct Planner<K: Clock> {
    clock: Arc<K>,
}

impl<K: Clock> Planner<K> {
    pub fn new(clock: Arc<K>) -> Self {
        Self { clock }
    }

    /// Plan a job from a timing template, scaled to `target_cycle_days`.
    pub fn plan_from_template(
        &self,
        request: &PlanRequest,
        rows: &[TimingRow],
        target_cycle_days: f64,
    ) -> Result<(Job, Vec<Step>), PlanningError> {
        if rows.is_empty() {
            return Err(PlanningError::EmptyTemplate);
        }
        if !target_cycle_days.is_finite() || target_cycle_days <= 0.0 {
            return Err(PlanningError::InvalidTargetCycle(target_cycle_days));
        }
        for row in rows {
            if !row.relative_day.is_finite() || row.relative_day < 0.0 {
                return Err(PlanningError::InvalidRelativeDay(row.relative_day));
            }
        }

        let base_cycle_days = rows
            .iter()
            .map(|r| r.relative_day)
            .fold(f64::MIN, f64::max);
        if base_cycle_days <= 0.0 {
            return Err(PlanningError::InvalidBaseCycle(base_cycle_days));
        }

        let scaling_factor = (target_cycle_days * 24.0) / (base_cycle_days * 24.0);
        let job_id = Uuid::now_v7();
        let started_at = self.clock.now();
        let values = self.placeholder_values(request, job_id, started_at);

        let mut steps: Vec<Step> = rows
            .iter()
            .map(|row| {
                let scaled_hours = row.relative_day * 24.0 * scaling_factor;
                Step {
                    id: Uuid::now_v7(),
                    job_id,
                    step_index: 0, // assigned after sorting
                    template_day: row.relative_day,
                    scaled_day: scaled_hours / 24.0,
                    scheduled_at: started_at + millis(scaled_hours * 3_600_000.0),
                    action_type: row.action_type,
                    record_type: row.record_type,
                    record_id_template: row
                        .record_id_template
                        .as_deref()
                        .map(|s| placeholder::substitute(s, &values)),
                    associations_template: row
                        .associations_template
                        .as_ref()
                        .map(|v| placeholder::substitute_value(v, &values)),
                    action_template: row
                        .action_template
                        .as_ref()
                        .map(|v| placeholder::substitute_value(v, &values)),
                    reason_template: row
                        .reason_template
                        .as_deref()
                        .map(|s| placeholder::substitute(s, &values)),
                    status: StepStatus::Pending,
                    attempt: 0,
                    result: None,
                }
            })
            .collect();

        // Fractional-hour scaling can reorder rows relative to their source
        // sequence; execution must follow scaled time. Stable sort keeps the
        // source order of same-day rows.
        steps.sort_by(|a, b| {
            a.scaled_day
                .partial_cmp(&b.scaled_day)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        for (index, step) in steps.iter_mut().enumerate() {
            step.step_index = index as u32;
        }

        let job = self.build_job(request, job_id, started_at, scaling_factor, base_cycle_days);
        tracing::info!(
            job_id = %job.id,
            steps = steps.len(),
            scaling_factor,
            "planned job from template"
        );
        Ok((job, steps))
    }

    /// Plan a job that distributes `record_count` created records across
    /// jittered sets instead of following a template.
    pub fn plan_programmatic(
        &self,
        request: &PlanRequest,
        record_count: u32,
    ) -> Result<(Job, Vec<Step>), PlanningError> {
        if record_count == 0 {
            return Err(PlanningError::InvalidRecordCount(record_count));
        }

        let job_id = Uuid::now_v7();
        let started_at = self.clock.now();
        let sets = record_count.div_ceil(3).min(MAX_SETS);

        let mut rng = rand::thread_rng();
        let mut steps = Vec::new();
        let mut remaining = record_count;
        let mut offset_hours = FIRST_SET_DELAY_SECS as f64 / 3600.0;

        for set_no in 1..=sets {
            if remaining == 0 {
                break;
            }
            let contact_symbol = format!("contact_{set_no}");
            let company_symbol = format!("company_{set_no}");

            let mut in_set = Vec::new();
            if remaining > 0 {
                in_set.push((RecordType::Contact, contact_symbol.clone(), None, 0i64));
                remaining -= 1;
            }
            if remaining > 0 {
                in_set.push((RecordType::Company, company_symbol.clone(), None, 0i64));
                remaining -= 1;
            }
            if remaining > 0 {
                // The deal associates to this set's records, so it runs a
                // fixed offset after them.
                let associations = json!({
                    "contact": [contact_symbol.clone()],
                    "company": [company_symbol.clone()],
                });
                in_set.push((
                    RecordType::Deal,
                    format!("deal_{set_no}"),
                    Some(associations),
                    DEPENDENT_OFFSET_MINUTES,
                ));
                remaining -= 1;
            }

            for (record_type, symbol, associations, extra_minutes) in in_set {
                let day = offset_hours / 24.0 + extra_minutes as f64 / (24.0 * 60.0);
                steps.push(Step {
                    id: Uuid::now_v7(),
                    job_id,
                    step_index: steps.len() as u32,
                    template_day: day,
                    scaled_day: day,
                    scheduled_at: started_at
                        + millis(offset_hours * 3_600_000.0)
                        + Duration::minutes(extra_minutes),
                    action_type: ActionType::Create,
                    record_type,
                    record_id_template: Some(symbol),
                    associations_template: associations,
                    action_template: None,
                    reason_template: None,
                    status: StepStatus::Pending,
                    attempt: 0,
                    result: None,
                });
            }

            offset_hours += rng.gen_range(SET_SPACING_HOURS);
        }

        let base_cycle_days = steps.last().map(|s| s.scaled_day).unwrap_or(0.0).max(1.0);
        let job = self.build_job(request, job_id, started_at, 1.0, base_cycle_days);
        tracing::info!(
            job_id = %job.id,
            steps = steps.len(),
            sets,
            "planned programmatic job"
        );
        Ok((job, steps))
    }

    fn placeholder_values(
        &self,
        request: &PlanRequest,
        job_id: Uuid,
        now: DateTime<Utc>,
    ) -> PlaceholderValues {
        PlaceholderValues {
            theme: request.theme.clone(),
            industry: request.industry.clone(),
            frequency: request.frequency.clone(),
            simulation_id: job_id,
            owner_id: request.owner_id.clone(),
            sequence: request.sequence,
            now,
        }
    }

    fn build_job(
        &self,
        request: &PlanRequest,
        job_id: Uuid,
        started_at: DateTime<Utc>,
        scaling_factor: f64,
        base_cycle_days: f64,
    ) -> Job {
        Job {
            id: job_id,
            outcome: request.outcome.clone(),
            theme: request.theme.clone(),
            industry: request.industry.clone(),
            sequence: request.sequence,
            template_id: request.template_id.clone(),
            owner_id: request.owner_id.clone(),
            scaling_factor,
            base_cycle_days,
            started_at,
            status: JobStatus::Pending,
            metadata: request.metadata.clone(),
        }
    }
}

fn millis(ms: f64) -> Duration {
    Duration::milliseconds(ms.round() as i64)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::{TimeZone, Utc};

    fn planner() -> Planner<ManualClock> {
        let start = Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap();
        Planner::new(Arc::new(ManualClock::new(start)))
    }

    fn request() -> PlanRequest {
        PlanRequest {
            outcome: "closed_won".to_string(),
            theme: "platform migration".to_string(),
            industry: "fintech".to_string(),
            frequency: "weekly".to_string(),
            sequence: 1,
            owner_id: Some("user-1".to_string()),
            template_id: Some("enterprise-90d".to_string()),
            metadata: HashMap::new(),
        }
    }

    fn row(day: f64, action: ActionType, record: RecordType, symbol: &str) -> TimingRow {
        TimingRow {
            relative_day: day,
            action_type: action,
            record_type: record,
            record_id_template: if symbol.is_empty() {
                None
            } else {
                Some(symbol.to_string())
            },
            associations_template: None,
            source_label: None,
            action_template: None,
            reason_template: None,
        }
    }

    // -------------------------------------------------------------------
    // Template mode
    // -------------------------------------------------------------------

    #[test]
    fn test_empty_template_is_fatal() {
        let err = planner()
            .plan_from_template(&request(), &[], 30.0)
            .unwrap_err();
        assert!(matches!(err, PlanningError::EmptyTemplate));
    }

    #[test]
    fn test_zero_base_cycle_is_fatal() {
        let rows = vec![row(0.0, ActionType::Create, RecordType::Contact, "contact_1")];
        let err = planner()
            .plan_from_template(&request(), &rows, 30.0)
            .unwrap_err();
        assert!(matches!(err, PlanningError::InvalidBaseCycle(_)));
    }

    #[test]
    fn test_negative_relative_day_is_fatal() {
        let rows = vec![
            row(-1.0, ActionType::Create, RecordType::Contact, "contact_1"),
            row(5.0, ActionType::Create, RecordType::Company, "company_1"),
        ];
        let err = planner()
            .plan_from_template(&request(), &rows, 30.0)
            .unwrap_err();
        assert!(matches!(err, PlanningError::InvalidRelativeDay(_)));
    }

    #[test]
    fn test_scaling_factor_and_schedule() {
        // Base cycle 10 days, target 5 -> factor 0.5
        let rows = vec![
            row(0.0, ActionType::Create, RecordType::Contact, "contact_1"),
            row(10.0, ActionType::Create, RecordType::Company, "company_1"),
        ];
        let (job, steps) = planner()
            .plan_from_template(&request(), &rows, 5.0)
            .unwrap();

        assert_eq!(job.scaling_factor, 0.5);
        assert_eq!(job.base_cycle_days, 10.0);
        assert_eq!(steps[1].scaled_day, 5.0);
        assert_eq!(steps[1].scheduled_at, job.started_at + Duration::days(5));
    }

    #[test]
    fn test_steps_sorted_by_scaled_day_regardless_of_source_order() {
        let rows = vec![
            row(5.0, ActionType::Create, RecordType::Company, "company_1"),
            row(0.0, ActionType::Create, RecordType::Contact, "contact_1"),
            row(2.0, ActionType::Create, RecordType::Deal, "deal_1"),
        ];
        let (_job, steps) = planner()
            .plan_from_template(&request(), &rows, 5.0)
            .unwrap();

        let days: Vec<f64> = steps.iter().map(|s| s.scaled_day).collect();
        assert!(days.windows(2).all(|w| w[0] <= w[1]), "not sorted: {days:?}");
        let indices: Vec<u32> = steps.iter().map(|s| s.step_index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(steps[0].record_id_template.as_deref(), Some("contact_1"));
        assert_eq!(steps[2].record_id_template.as_deref(), Some("company_1"));
    }

    #[test]
    fn test_contact_company_associate_scenario() {
        // The canonical three-step scenario: create at day 0, create at day
        // 5, associate at day 5, scaled 1:1.
        let mut associate = row(5.0, ActionType::Associate, RecordType::Contact, "contact_1");
        associate.associations_template = Some(json!({ "company": ["company_1"] }));
        let rows = vec![
            row(0.0, ActionType::Create, RecordType::Contact, "contact_1"),
            row(5.0, ActionType::Create, RecordType::Company, "company_1"),
            associate,
        ];

        let (job, steps) = planner()
            .plan_from_template(&request(), &rows, 5.0)
            .unwrap();

        assert_eq!(job.scaling_factor, 1.0);
        assert_eq!(steps.len(), 3);
        assert_eq!(steps[0].scheduled_at, job.started_at);
        assert_eq!(steps[1].scheduled_at, job.started_at + Duration::days(5));
        assert_eq!(steps[2].scheduled_at, job.started_at + Duration::days(5));
        // Same-day rows keep their source order
        assert_eq!(steps[1].record_type, RecordType::Company);
        assert_eq!(steps[2].action_type, ActionType::Associate);
    }

    #[test]
    fn test_placeholders_substituted_at_planning_time() {
        let mut r = row(1.0, ActionType::Create, RecordType::Note, "note_{{sequence}}");
        r.reason_template = Some("touchpoint for {{theme}} in {{industry}}".to_string());
        r.action_template = Some(json!({ "body": "re: {{theme}}" }));
        let rows = vec![r];

        let (_job, steps) = planner()
            .plan_from_template(&request(), &rows, 1.0)
            .unwrap();

        assert_eq!(steps[0].record_id_template.as_deref(), Some("note_1"));
        assert_eq!(
            steps[0].reason_template.as_deref(),
            Some("touchpoint for platform migration in fintech")
        );
        assert_eq!(
            steps[0].action_template.as_ref().unwrap()["body"],
            "re: platform migration"
        );
    }

    // -------------------------------------------------------------------
    // Programmatic mode
    // -------------------------------------------------------------------

    #[test]
    fn test_programmatic_zero_count_rejected() {
        let err = planner()
            .plan_programmatic(&request(), 0)
            .unwrap_err();
        assert!(matches!(err, PlanningError::InvalidRecordCount(0)));
    }

    #[test]
    fn test_programmatic_produces_requested_count() {
        let (_job, steps) = planner().plan_programmatic(&request(), 7).unwrap();
        assert_eq!(steps.len(), 7);
        assert!(steps.iter().all(|s| s.action_type == ActionType::Create));
    }

    #[test]
    fn test_programmatic_offsets_monotonic_and_jittered() {
        let (job, steps) = planner().plan_programmatic(&request(), 12).unwrap();

        let times: Vec<_> = steps.iter().map(|s| s.scheduled_at).collect();
        assert!(times.windows(2).all(|w| w[0] <= w[1]), "not monotonic");
        // First set is near-immediate
        assert!(steps[0].scheduled_at <= job.started_at + Duration::minutes(1));
        // Later sets are spaced by hours, not seconds
        let last_gap = *times.last().unwrap() - times[0];
        assert!(last_gap >= Duration::hours(6));
    }

    #[test]
    fn test_programmatic_deal_scheduled_after_prerequisites() {
        let (_job, steps) = planner().plan_programmatic(&request(), 3).unwrap();

        let contact = steps
            .iter()
            .find(|s| s.record_type == RecordType::Contact)
            .unwrap();
        let deal = steps
            .iter()
            .find(|s| s.record_type == RecordType::Deal)
            .unwrap();

        assert!(deal.scheduled_at > contact.scheduled_at);
        let associations = deal.associations_template.as_ref().unwrap();
        assert_eq!(associations["contact"][0], "contact_1");
        assert_eq!(associations["company"][0], "company_1");
    }

    #[test]
    fn test_programmatic_set_cap() {
        let (_job, steps) = planner().plan_programmatic(&request(), 100).unwrap();
        // 20-set cap bounds the plan at 60 creates
        assert_eq!(steps.len(), 60);
    }
}
