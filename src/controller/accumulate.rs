//! Classification of subpool state.
//!
//! Two independent views are derived from the same job records: the per-PR
//! aggregate presubmit state, and whether any completed batch still describes
//! a mergeable set of PRs. Both are built on one primitive, the monotone
//! `SimpleState` lattice.

use std::collections::{BTreeMap, HashMap};

use tracing::error;

use crate::types::{Job, JobState, JobType, PrNumber, PullRequest};

/// The coarse roll-up of a job's outcome. Ordered `None < Pending < Success`
/// so the upgrade rule is a lattice join.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum SimpleState {
    None,
    Pending,
    Success,
}

impl SimpleState {
    pub(crate) fn from_job(state: JobState) -> Self {
        match state {
            JobState::Triggered | JobState::Pending => SimpleState::Pending,
            JobState::Success => SimpleState::Success,
            JobState::Failure | JobState::Error | JobState::Aborted => SimpleState::None,
        }
    }

    /// The monotone upgrade rule: within one aggregation pass a slot never
    /// downgrades, so the best observed result for a job name wins.
    pub(crate) fn upgrade(self, next: SimpleState) -> SimpleState {
        self.max(next)
    }
}

/// Sorts the subpool's PRs into three buckets by their state accumulated
/// across the gating presubmits: every presubmit green, every presubmit at
/// least running, or anything worse. The buckets partition the input.
pub(crate) fn accumulate(
    presubmits: &[String],
    prs: &[PullRequest],
    jobs: &[Job],
) -> (Vec<PullRequest>, Vec<PullRequest>, Vec<PullRequest>) {
    let mut successes = Vec::new();
    let mut pendings = Vec::new();
    let mut nones = Vec::new();

    for pr in prs {
        // Best observed result per job name for this PR.
        let mut slots: BTreeMap<&str, SimpleState> = BTreeMap::new();
        for job in jobs {
            if job.job_type != JobType::Presubmit {
                continue;
            }
            // A presubmit is matched to its PR by the first pull in its refs.
            let Some(first_pull) = job.refs.pulls.first() else {
                error!(job = %job.name, id = %job.id, "presubmit job record has no pulls");
                continue;
            };
            if first_pull.number != pr.number {
                continue;
            }
            let slot = slots.entry(job.name.as_str()).or_insert(SimpleState::None);
            *slot = slot.upgrade(SimpleState::from_job(job.state));
        }

        // The overall result is the worst of the best.
        let mut overall = SimpleState::Success;
        for name in presubmits {
            match slots.get(name.as_str()).copied().unwrap_or(SimpleState::None) {
                SimpleState::None => {
                    overall = SimpleState::None;
                    break;
                }
                SimpleState::Pending => overall = SimpleState::Pending,
                SimpleState::Success => {}
            }
        }

        match overall {
            SimpleState::Success => successes.push(pr.clone()),
            SimpleState::Pending => pendings.push(pr.clone()),
            SimpleState::None => nones.push(pr.clone()),
        }
    }

    (successes, pendings, nones)
}

/// Examines the subpool's batch jobs. Returns the PRs of a batch that has
/// passed every gating presubmit and still matches live PR heads, plus
/// whether any batch is currently running.
///
/// A pending batch short-circuits everything: its result is about to arrive,
/// and merging anything now would invalidate it.
pub(crate) fn accumulate_batch(
    presubmits: &[String],
    prs: &[PullRequest],
    jobs: &[Job],
) -> (Vec<PullRequest>, bool) {
    if jobs.iter().any(|job| {
        job.job_type == JobType::Batch
            && SimpleState::from_job(job.state) == SimpleState::Pending
    }) {
        return (Vec::new(), true);
    }

    let by_number: HashMap<PrNumber, &PullRequest> =
        prs.iter().map(|pr| (pr.number, pr)).collect();

    struct Group {
        prs: Vec<PullRequest>,
        slots: BTreeMap<String, SimpleState>,
        /// Do the recorded pulls still point at the heads of live PRs?
        valid: bool,
    }

    // Grouped by refs signature. BTreeMap iteration makes the winning group
    // deterministic when several qualify at once.
    let mut groups: BTreeMap<String, Group> = BTreeMap::new();
    for job in jobs {
        if job.job_type != JobType::Batch {
            continue;
        }
        let group = groups.entry(job.refs.signature()).or_insert_with(|| {
            let mut group = Group {
                prs: Vec::new(),
                slots: BTreeMap::new(),
                valid: true,
            };
            for pull in &job.refs.pulls {
                match by_number.get(&pull.number) {
                    Some(pr) if pr.head_sha == pull.sha => group.prs.push((*pr).clone()),
                    _ => {
                        group.valid = false;
                        group.prs.clear();
                        break;
                    }
                }
            }
            group
        });
        if !group.valid {
            continue;
        }
        let slot = group
            .slots
            .entry(job.name.clone())
            .or_insert(SimpleState::None);
        *slot = slot.upgrade(SimpleState::from_job(job.state));
    }

    for group in groups.into_values() {
        if !group.valid {
            continue;
        }
        let passes_all = presubmits
            .iter()
            .all(|name| group.slots.get(name).copied() == Some(SimpleState::Success));
        if passes_all {
            return (group.prs, false);
        }
    }

    (Vec::new(), false)
}

/// From a set of PRs, the lowest-numbered one whose head status is passing.
/// The cheap, stable tiebreak used for serial merges and serial triggers.
pub(crate) fn pick_smallest_passing(prs: &[PullRequest]) -> Option<&PullRequest> {
    prs.iter()
        .filter(|pr| pr.head_passing())
        .min_by_key(|pr| pr.number)
}
