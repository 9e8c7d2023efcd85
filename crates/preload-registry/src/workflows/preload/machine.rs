//! Transition rules for a single domain record.
//!
//! Two events drive every change: a submission (or removal request) from a
//! site operator, and a reconciliation pass against the upstream list. The
//! functions here are pure; callers decide whether to persist the result.

use chrono::{DateTime, Utc};

use super::domain::{DomainState, Issue, PolicyType, PreloadEntry, PreloadStatus};

/// Message recorded when a removal request is accepted.
pub const REMOVAL_REQUESTED_MESSAGE: &str = "Removal requested by the domain operator.";

/// Message recorded when a pending removal completes before the domain ever
/// shipped in the list.
pub const SELF_REJECTED_MESSAGE: &str = "Domain was added and removed without being preloaded.";

/// Outcome of a submission against the current record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitDecision {
    /// Persist this record.
    Accept(DomainState),
    /// Nothing changes; tell the submitter why.
    AlreadyListed(Issue),
    /// Nothing changes; the eligibility errors speak for themselves.
    Reject,
}

/// Outcome of a removal request against the current record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemovalDecision {
    Accept(DomainState),
    /// Nothing changes; informational.
    Unneeded(Issue),
    /// Nothing changes; the request is refused.
    Refuse(Issue),
}

/// Outcome of comparing a record against the upstream snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileDecision {
    Unchanged,
    Transition(DomainState),
}

pub fn on_submit(current: &DomainState, eligible: bool, now: DateTime<Utc>) -> SubmitDecision {
    match current.status {
        PreloadStatus::Pending => SubmitDecision::AlreadyListed(already_pending(current)),
        PreloadStatus::Preloaded => SubmitDecision::AlreadyListed(already_preloaded()),
        PreloadStatus::PendingRemoval | PreloadStatus::PendingAutomatedRemoval => {
            SubmitDecision::AlreadyListed(already_pending_removal(current.status))
        }
        PreloadStatus::Unknown | PreloadStatus::Removed | PreloadStatus::Rejected => {
            if eligible {
                SubmitDecision::Accept(DomainState {
                    name: current.name.clone(),
                    status: PreloadStatus::Pending,
                    message: String::new(),
                    submission_date: Some(now),
                    include_sub_domains: true,
                    policy: PolicyType::Bulk1Year,
                })
            } else {
                SubmitDecision::Reject
            }
        }
    }
}

pub fn on_remove(current: &DomainState, now: DateTime<Utc>) -> RemovalDecision {
    match current.status {
        PreloadStatus::Preloaded | PreloadStatus::Pending if current.is_protected() => {
            RemovalDecision::Refuse(Issue::new(
                "server.remove.protected",
                "Domain protected",
                "This domain is currently protected against removal through this service. \
                 Please contact the list maintainers if you want to remove it from the preload list.",
            ))
        }
        PreloadStatus::Preloaded | PreloadStatus::Pending => {
            RemovalDecision::Accept(DomainState {
                name: current.name.clone(),
                status: PreloadStatus::PendingRemoval,
                message: REMOVAL_REQUESTED_MESSAGE.to_string(),
                submission_date: Some(now),
                include_sub_domains: false,
                policy: current.policy.clone(),
            })
        }
        PreloadStatus::PendingRemoval | PreloadStatus::PendingAutomatedRemoval => {
            RemovalDecision::Unneeded(Issue::new(
                "server.remove.already_pending_removal",
                "Already pending removal",
                "Domain is already pending removal.",
            ))
        }
        PreloadStatus::Removed => RemovalDecision::Unneeded(Issue::new(
            "server.remove.already_removed",
            "Already removed",
            "Domain has already been removed.",
        )),
        PreloadStatus::Unknown | PreloadStatus::Rejected => RemovalDecision::Unneeded(Issue::new(
            "server.remove.not_preloaded",
            "Not preloaded",
            "The domain is not part of the preload list, so it cannot be removed.",
        )),
    }
}

/// `upstream` is the snapshot entry with the same name, if any.
pub fn on_reconcile(current: &DomainState, upstream: Option<&PreloadEntry>) -> ReconcileDecision {
    match (current.status, upstream) {
        (
            PreloadStatus::Unknown
            | PreloadStatus::Pending
            | PreloadStatus::Removed
            | PreloadStatus::Rejected,
            Some(entry),
        ) => ReconcileDecision::Transition(DomainState {
            name: current.name.clone(),
            status: PreloadStatus::Preloaded,
            message: String::new(),
            submission_date: None,
            include_sub_domains: entry.include_subdomains,
            policy: entry.policy.clone(),
        }),
        (PreloadStatus::Preloaded, None) => ReconcileDecision::Transition(DomainState {
            status: PreloadStatus::Removed,
            message: String::new(),
            ..current.clone()
        }),
        (PreloadStatus::PendingRemoval, None) => ReconcileDecision::Transition(DomainState {
            status: PreloadStatus::Rejected,
            message: SELF_REJECTED_MESSAGE.to_string(),
            ..current.clone()
        }),
        _ => ReconcileDecision::Unchanged,
    }
}

fn already_pending(current: &DomainState) -> Issue {
    let submitted = current
        .submission_date
        .map(|date| date.format("%A, %e %B %Y").to_string())
        .unwrap_or_else(|| "an unknown date".to_string());
    Issue::new(
        "server.preload.already_pending",
        "Domain is already pending",
        format!("{} is already pending. It was submitted on {submitted}.", current.name),
    )
}

fn already_preloaded() -> Issue {
    Issue::new(
        "server.preload.already_preloaded",
        "Domain is already preloaded",
        "This domain is already preloaded.",
    )
}

fn already_pending_removal(status: PreloadStatus) -> Issue {
    Issue::new(
        "server.preload.already_pending",
        "Domain is pending removal",
        format!("This domain is currently {status}. It cannot be resubmitted until that finishes."),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::preload::domain::PreloadMode;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2017, 1, 2, 3, 4, 5)
            .single()
            .expect("valid date")
    }

    fn record(status: PreloadStatus) -> DomainState {
        DomainState {
            name: "example.com".into(),
            status,
            include_sub_domains: true,
            policy: PolicyType::Bulk18Weeks,
            ..DomainState::default()
        }
    }

    fn entry(policy: PolicyType, include_subdomains: bool) -> PreloadEntry {
        PreloadEntry {
            name: "example.com".into(),
            policy,
            mode: PreloadMode::ForceHttps,
            include_subdomains,
        }
    }

    #[test]
    fn eligible_submission_from_open_states_becomes_pending() {
        for status in [
            PreloadStatus::Unknown,
            PreloadStatus::Removed,
            PreloadStatus::Rejected,
        ] {
            match on_submit(&record(status), true, now()) {
                SubmitDecision::Accept(next) => {
                    assert_eq!(next.status, PreloadStatus::Pending);
                    assert_eq!(next.submission_date, Some(now()));
                    assert_eq!(next.policy, PolicyType::Bulk1Year);
                    assert!(next.include_sub_domains);
                    assert!(next.message.is_empty());
                }
                other => panic!("expected accept from {status}, got {other:?}"),
            }
        }
    }

    #[test]
    fn ineligible_submission_from_open_states_is_rejected() {
        assert_eq!(
            on_submit(&record(PreloadStatus::Unknown), false, now()),
            SubmitDecision::Reject
        );
    }

    #[test]
    fn pending_resubmission_reports_original_date() {
        let mut current = record(PreloadStatus::Pending);
        current.submission_date = Some(
            Utc.with_ymd_and_hms(2016, 11, 7, 0, 0, 0)
                .single()
                .expect("valid date"),
        );
        match on_submit(&current, true, now()) {
            SubmitDecision::AlreadyListed(issue) => {
                assert_eq!(issue.code, "server.preload.already_pending");
                assert_eq!(
                    issue.message,
                    "example.com is already pending. It was submitted on Monday,  7 November 2016."
                );
            }
            other => panic!("expected already pending, got {other:?}"),
        }
    }

    #[test]
    fn locked_states_never_change_on_submit() {
        let cases = [
            (PreloadStatus::Preloaded, "server.preload.already_preloaded"),
            (PreloadStatus::PendingRemoval, "server.preload.already_pending"),
            (
                PreloadStatus::PendingAutomatedRemoval,
                "server.preload.already_pending",
            ),
        ];
        for (status, code) in cases {
            for eligible in [true, false] {
                match on_submit(&record(status), eligible, now()) {
                    SubmitDecision::AlreadyListed(issue) => assert_eq!(issue.code, code),
                    other => panic!("expected warning for {status}, got {other:?}"),
                }
            }
        }
    }

    #[test]
    fn removal_requests_follow_current_status() {
        for status in [PreloadStatus::Preloaded, PreloadStatus::Pending] {
            match on_remove(&record(status), now()) {
                RemovalDecision::Accept(next) => {
                    assert_eq!(next.status, PreloadStatus::PendingRemoval);
                    assert_eq!(next.message, REMOVAL_REQUESTED_MESSAGE);
                    assert_eq!(next.submission_date, Some(now()));
                    assert!(!next.include_sub_domains);
                    assert_eq!(next.policy, PolicyType::Bulk18Weeks);
                }
                other => panic!("expected accept from {status}, got {other:?}"),
            }
        }

        let unneeded = [
            (PreloadStatus::Unknown, "server.remove.not_preloaded"),
            (PreloadStatus::Rejected, "server.remove.not_preloaded"),
            (
                PreloadStatus::PendingRemoval,
                "server.remove.already_pending_removal",
            ),
            (
                PreloadStatus::PendingAutomatedRemoval,
                "server.remove.already_pending_removal",
            ),
            (PreloadStatus::Removed, "server.remove.already_removed"),
        ];
        for (status, code) in unneeded {
            match on_remove(&record(status), now()) {
                RemovalDecision::Unneeded(issue) => assert_eq!(issue.code, code),
                other => panic!("expected no-op for {status}, got {other:?}"),
            }
        }

        let mut protected = record(PreloadStatus::Preloaded);
        protected.policy = PolicyType::Custom;
        match on_remove(&protected, now()) {
            RemovalDecision::Refuse(issue) => assert_eq!(issue.code, "server.remove.protected"),
            other => panic!("expected protected refusal, got {other:?}"),
        }
    }

    #[test]
    fn listed_domains_become_preloaded_with_upstream_attributes() {
        for status in [
            PreloadStatus::Unknown,
            PreloadStatus::Pending,
            PreloadStatus::Removed,
            PreloadStatus::Rejected,
        ] {
            let upstream = entry(PolicyType::Custom, false);
            match on_reconcile(&record(status), Some(&upstream)) {
                ReconcileDecision::Transition(next) => {
                    assert_eq!(next.status, PreloadStatus::Preloaded);
                    assert_eq!(next.policy, PolicyType::Custom);
                    assert!(!next.include_sub_domains);
                }
                other => panic!("expected preloaded from {status}, got {other:?}"),
            }
        }
    }

    #[test]
    fn delisted_domains_keep_their_attributes() {
        match on_reconcile(&record(PreloadStatus::Preloaded), None) {
            ReconcileDecision::Transition(next) => {
                assert_eq!(next.status, PreloadStatus::Removed);
                assert!(next.include_sub_domains);
                assert_eq!(next.policy, PolicyType::Bulk18Weeks);
            }
            other => panic!("expected removal, got {other:?}"),
        }

        match on_reconcile(&record(PreloadStatus::PendingRemoval), None) {
            ReconcileDecision::Transition(next) => {
                assert_eq!(next.status, PreloadStatus::Rejected);
                assert_eq!(next.message, SELF_REJECTED_MESSAGE);
                assert!(next.include_sub_domains);
            }
            other => panic!("expected self rejection, got {other:?}"),
        }
    }

    #[test]
    fn other_reconcile_cases_leave_the_record_alone() {
        let upstream = entry(PolicyType::Bulk1Year, true);
        let unchanged = [
            (PreloadStatus::Preloaded, Some(&upstream)),
            (PreloadStatus::PendingRemoval, Some(&upstream)),
            (PreloadStatus::PendingAutomatedRemoval, Some(&upstream)),
            (PreloadStatus::PendingAutomatedRemoval, None),
            (PreloadStatus::Unknown, None),
            (PreloadStatus::Pending, None),
            (PreloadStatus::Removed, None),
            (PreloadStatus::Rejected, None),
        ];
        for (status, listed) in unchanged {
            assert_eq!(
                on_reconcile(&record(status), listed),
                ReconcileDecision::Unchanged,
                "status {status} listed={}",
                listed.is_some()
            );
        }
    }
}
