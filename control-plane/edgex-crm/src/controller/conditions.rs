//! Condition bookkeeping on the EdgeX status.
//!
//! Conditions are upserted by type. `lastTransitionTime` only moves when the
//! status flips, so rewriting an unchanged condition leaves the status equal
//! and no write is issued.

use chrono::{SecondsFormat, Utc};

use crate::crd::edgex::{
    Condition, ConditionSeverity, ConditionStatus, ConditionType,
};

/// Conditions summarized into `Ready`.
const SUMMARIZED: [ConditionType; 2] = [
    ConditionType::ConfigmapAvailable,
    ConditionType::ComponentAvailable,
];

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn get(conds: &[Condition], type_: ConditionType) -> Option<&Condition> {
    conds.iter().find(|c| c.type_ == type_)
}

pub fn is_true(conds: &[Condition], type_: ConditionType) -> bool {
    get(conds, type_).is_some_and(|c| c.status == ConditionStatus::True)
}

pub fn set(conds: &mut Vec<Condition>, mut incoming: Condition) {
    match conds.iter_mut().find(|c| c.type_ == incoming.type_) {
        Some(existing) => {
            incoming.last_transition_time =
                if existing.status == incoming.status {
                    existing.last_transition_time.clone()
                } else {
                    Some(now())
                };
            *existing = incoming;
        }
        None => {
            incoming.last_transition_time = Some(now());
            conds.push(incoming);
        }
    }
    conds.sort_by_key(|c| rank(c.type_));
}

pub fn mark_true(conds: &mut Vec<Condition>, type_: ConditionType) {
    set(
        conds,
        Condition {
            type_,
            status: ConditionStatus::True,
            severity: None,
            reason: None,
            message: None,
            last_transition_time: None,
        },
    );
}

pub fn mark_false(
    conds: &mut Vec<Condition>,
    type_: ConditionType,
    reason: &str,
    severity: ConditionSeverity,
    message: impl Into<String>,
) {
    let message = message.into();
    set(
        conds,
        Condition {
            type_,
            status: ConditionStatus::False,
            severity: Some(severity),
            reason: Some(reason.to_string()),
            message: (!message.is_empty()).then_some(message),
            last_transition_time: None,
        },
    );
}

/// Derive `Ready` from the summarized conditions: True when all present ones
/// are True, otherwise False mirroring the most severe failing one.
pub fn set_summary(conds: &mut Vec<Condition>) {
    let worst = SUMMARIZED
        .iter()
        .filter_map(|t| get(conds, *t))
        .filter(|c| c.status != ConditionStatus::True)
        .min_by_key(|c| severity_rank(c.severity))
        .cloned();

    let ready = match worst {
        None => Condition {
            type_: ConditionType::Ready,
            status: ConditionStatus::True,
            severity: None,
            reason: None,
            message: None,
            last_transition_time: None,
        },
        Some(c) => Condition {
            type_: ConditionType::Ready,
            status: c.status,
            severity: c.severity,
            reason: c.reason,
            message: c.message,
            last_transition_time: None,
        },
    };
    set(conds, ready);
}

fn severity_rank(s: Option<ConditionSeverity>) -> u8 {
    match s {
        Some(ConditionSeverity::Error) => 0,
        Some(ConditionSeverity::Warning) => 1,
        Some(ConditionSeverity::Info) => 2,
        None => 3,
    }
}

fn rank(t: ConditionType) -> u8 {
    match t {
        ConditionType::Ready => 0,
        ConditionType::ComponentAvailable => 1,
        ConditionType::ConfigmapAvailable => 2,
        ConditionType::Unknown => 250,
    }
}
