//! Index → template → ILM policy → delete-phase age, and the decision of
//! whether a protective snapshot is due.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{NaiveDate, TimeDelta};
use regex::Regex;
use tracing::{error, warn};

use crate::config::{IlmDoc, TemplateDoc};
use crate::naming;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetentionError {
    NoTemplate,
    TooManyTemplates(Vec<String>),
    TemplateWithoutPolicy(String),
    UnknownPolicy(String),
    NoDeletePhase(String),
    BadMinAge { policy: String, min_age: String },
}

impl fmt::Display for RetentionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetentionError::NoTemplate => f.write_str("template not found"),
            RetentionError::TooManyTemplates(names) => {
                write!(f, "too many templates: {}", names.join(", "))
            }
            RetentionError::TemplateWithoutPolicy(t) => {
                write!(f, "template {t} has no index.lifecycle.name")
            }
            RetentionError::UnknownPolicy(p) => write!(f, "no ilm {p}"),
            RetentionError::NoDeletePhase(p) => write!(f, "no delete phase for {p}"),
            RetentionError::BadMinAge { policy, min_age } => {
                write!(f, "can't read delete min_age '{min_age}' of {policy}")
            }
        }
    }
}

impl std::error::Error for RetentionError {}

/// What to do about an index given its days until automatic deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotDecision {
    /// Deletion date already passed but the index is still there.
    Overdue,
    /// Inside the soft deadline; `urgent` when also inside the hard one.
    Due { urgent: bool },
    NotDue,
}

pub fn snapshot_decision(days_remaining: i64, soft_deadline: i64, hard_deadline: i64) -> SnapshotDecision {
    if days_remaining < 0 {
        SnapshotDecision::Overdue
    } else if days_remaining < soft_deadline {
        SnapshotDecision::Due {
            urgent: days_remaining < hard_deadline,
        }
    } else {
        SnapshotDecision::NotDue
    }
}

struct CompiledTemplate {
    name: String,
    patterns: Vec<Regex>,
    policy: Option<String>,
}

pub struct RetentionResolver {
    templates: Vec<CompiledTemplate>,
    ilms: BTreeMap<String, IlmDoc>,
}

impl RetentionResolver {
    /// Template patterns are regular expressions over the index name.
    /// Invalid ones are logged and ignored.
    pub fn new(templates: &BTreeMap<String, TemplateDoc>, ilms: &BTreeMap<String, IlmDoc>) -> Self {
        let templates = templates
            .iter()
            .map(|(name, doc)| CompiledTemplate {
                name: name.clone(),
                patterns: doc
                    .index_patterns
                    .iter()
                    .filter_map(|p| match Regex::new(p) {
                        Ok(re) => Some(re),
                        Err(err) => {
                            warn!("template {} pattern '{}' invalid: {}", name, p, err);
                            None
                        }
                    })
                    .collect(),
                policy: doc.lifecycle_name().map(String::from),
            })
            .collect();
        Self {
            templates,
            ilms: ilms.clone(),
        }
    }

    /// Lifecycle policy of the single template matching `index`.
    pub fn find_policy(&self, index: &str) -> Result<String, RetentionError> {
        let matched: Vec<&CompiledTemplate> = self
            .templates
            .iter()
            .filter(|t| t.patterns.iter().any(|re| re.is_match(index)))
            .collect();

        match matched.as_slice() {
            [] => Err(RetentionError::NoTemplate),
            [single] => single
                .policy
                .clone()
                .ok_or_else(|| RetentionError::TemplateWithoutPolicy(single.name.clone())),
            many => Err(RetentionError::TooManyTemplates(
                many.iter().map(|t| t.name.clone()).collect(),
            )),
        }
    }

    /// Delete-phase `min_age` of `policy`, in days.
    pub fn delete_age_days(&self, policy: &str) -> Result<i64, RetentionError> {
        let doc = self
            .ilms
            .get(policy)
            .ok_or_else(|| RetentionError::UnknownPolicy(policy.to_string()))?;
        let min_age = doc
            .policy
            .pointer("/phases/delete/min_age")
            .and_then(|v| v.as_str())
            .ok_or_else(|| RetentionError::NoDeletePhase(policy.to_string()))?;
        parse_days(min_age).ok_or_else(|| RetentionError::BadMinAge {
            policy: policy.to_string(),
            min_age: min_age.to_string(),
        })
    }

    /// Calendar days left before ILM deletes `index`. An index name without
    /// a parseable date counts as 1 day left.
    pub fn find_delete_after(&self, index: &str, today: NaiveDate) -> Result<i64, RetentionError> {
        self.days_left(index, today).inspect_err(|err| error!("{}: {}", index, err))
    }

    fn days_left(&self, index: &str, today: NaiveDate) -> Result<i64, RetentionError> {
        let policy = self.find_policy(index)?;
        let age = self.delete_age_days(&policy)?;

        let Some(index_date) = naming::parse_index_date(index) else {
            warn!("can't parse date of {}, treating as urgent", index);
            return Ok(1);
        };
        let delete_date = TimeDelta::try_days(age)
            .and_then(|age| index_date.checked_add_signed(age))
            .ok_or_else(|| RetentionError::BadMinAge {
                policy,
                min_age: format!("{age}d"),
            })?;
        Ok((delete_date - today).num_days())
    }
}

/// `30d` → 30. Hour and bare-number forms are accepted too.
fn parse_days(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if let Some(days) = raw.strip_suffix('d') {
        return days.parse().ok();
    }
    if let Some(hours) = raw.strip_suffix('h') {
        let hours: i64 = hours.parse().ok()?;
        return Some(hours.checked_add(23)? / 24);
    }
    raw.parse().ok()
}
