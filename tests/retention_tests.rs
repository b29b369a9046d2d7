use chrono::NaiveDate;
use es_lifecycle::config::Config;
use es_lifecycle::retention::{snapshot_decision, RetentionError, RetentionResolver, SnapshotDecision};

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn resolver(toml: &str) -> RetentionResolver {
    let cfg = Config::from_toml(toml).unwrap();
    RetentionResolver::new(&cfg.templates, &cfg.ilms)
}

const TABLES: &str = r#"
[templates.twiket]
index_patterns = ["^twiket-logs-.*"]
[templates.twiket.settings]
"index.lifecycle.name" = "twiket-30d"

[templates.nginx]
index_patterns = ["^nginx-.*"]
[templates.nginx.settings]
"index.lifecycle.name" = "nginx-hourly"

[templates.orphan]
index_patterns = ["^orphan-.*"]

[templates.dangling]
index_patterns = ["^dangling-.*"]
[templates.dangling.settings]
"index.lifecycle.name" = "missing-policy"

[ilms.twiket-30d.policy.phases.delete]
min_age = "30d"

[ilms.nginx-hourly.policy.phases.delete]
min_age = "36h"
"#;

#[test]
fn days_until_delete_from_index_date() {
    let r = resolver(TABLES);
    assert_eq!(
        r.find_delete_after("twiket-logs-2024.01.01", date(2024, 1, 20)),
        Ok(11)
    );
    assert_eq!(
        r.find_delete_after("twiket-logs-2024.01.01", date(2024, 2, 5)),
        Ok(-5)
    );
}

#[test]
fn hour_ages_round_up_to_days() {
    let r = resolver(TABLES);
    assert_eq!(r.delete_age_days("nginx-hourly"), Ok(2));
}

#[test]
fn unparseable_date_counts_as_one_day() {
    let r = resolver(TABLES);
    assert_eq!(r.find_delete_after("twiket-logs-latest", date(2024, 1, 20)), Ok(1));
}

#[test]
fn policy_lookup_errors() {
    let r = resolver(TABLES);
    let today = date(2024, 1, 20);
    assert_eq!(
        r.find_delete_after("unknown-2024.01.01", today),
        Err(RetentionError::NoTemplate)
    );
    assert_eq!(
        r.find_delete_after("orphan-2024.01.01", today),
        Err(RetentionError::TemplateWithoutPolicy("orphan".into()))
    );
    assert_eq!(
        r.find_delete_after("dangling-2024.01.01", today),
        Err(RetentionError::UnknownPolicy("missing-policy".into()))
    );
}

#[test]
fn two_matching_templates_are_ambiguous() {
    let r = resolver(&format!(
        "{TABLES}\n[templates.catchall]\nindex_patterns = [\"^twiket-.*\"]\n"
    ));
    match r.find_policy("twiket-logs-2024.01.01") {
        Err(RetentionError::TooManyTemplates(names)) => {
            assert_eq!(names, vec!["catchall".to_string(), "twiket".to_string()]);
        }
        other => panic!("expected ambiguity, got {other:?}"),
    }
}

#[test]
fn policy_without_delete_phase() {
    let r = resolver(
        r#"
[templates.keep]
index_patterns = ["^keep-.*"]
[templates.keep.settings]
"index.lifecycle.name" = "keep-forever"

[ilms.keep-forever.policy.phases.hot]
min_age = "0ms"
"#,
    );
    assert_eq!(
        r.find_delete_after("keep-2024.01.01", date(2024, 1, 2)),
        Err(RetentionError::NoDeletePhase("keep-forever".into()))
    );
}

#[test]
fn invalid_patterns_are_ignored() {
    let r = resolver(
        r#"
[templates.broken]
index_patterns = ["(unclosed"]
[templates.broken.settings]
"index.lifecycle.name" = "x"
"#,
    );
    assert_eq!(r.find_policy("anything"), Err(RetentionError::NoTemplate));
}

#[test]
fn soft_and_hard_deadlines() {
    assert_eq!(snapshot_decision(-1, 7, 3), SnapshotDecision::Overdue);
    assert_eq!(snapshot_decision(0, 7, 3), SnapshotDecision::Due { urgent: true });
    assert_eq!(snapshot_decision(2, 7, 3), SnapshotDecision::Due { urgent: true });
    assert_eq!(snapshot_decision(3, 7, 3), SnapshotDecision::Due { urgent: false });
    assert_eq!(snapshot_decision(6, 7, 3), SnapshotDecision::Due { urgent: false });
    assert_eq!(snapshot_decision(7, 7, 3), SnapshotDecision::NotDue);
    assert_eq!(snapshot_decision(11, 7, 3), SnapshotDecision::NotDue);
}

#[test]
fn huge_min_age_is_a_resolution_error() {
    let r = resolver(
        r#"
[templates.app]
index_patterns = ["^app-.*"]
[templates.app.settings]
"index.lifecycle.name" = "app-forever"

[ilms.app-forever.policy.phases.delete]
min_age = "100000000d"

[templates.way]
index_patterns = ["^way-.*"]
[templates.way.settings]
"index.lifecycle.name" = "way-too-long"

[ilms.way-too-long.policy.phases.delete]
min_age = "9223372036854775807h"
"#,
    );
    let today = date(2024, 1, 20);
    assert_eq!(
        r.find_delete_after("app-2024.01.01", today),
        Err(RetentionError::BadMinAge {
            policy: "app-forever".into(),
            min_age: "100000000d".into()
        })
    );
    assert_eq!(
        r.find_delete_after("way-2024.01.01", today),
        Err(RetentionError::BadMinAge {
            policy: "way-too-long".into(),
            min_age: "9223372036854775807h".into()
        })
    );
}
