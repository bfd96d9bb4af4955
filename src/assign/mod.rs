//! Reviewer assignment engine.
//!
//! Every operation runs inside one store transaction. Merge and reassignment
//! read the pull request through `lock_pull_request`, so they serialize per
//! pull request and a reassignment can never observe a stale status or
//! reviewer set. Candidates are drawn uniformly at random through the injected
//! `ReviewerSelector`.

use chrono::{NaiveDateTime, Utc};
use itertools::Itertools;

use crate::domain::review::{NewAssignment, NewPullRequest, PrStatus, PullRequest,
                            ReviewerAssignment};
use crate::domain::roster::Member;
use crate::error::{ReviewError, ReviewResult};
use crate::store::{Deadline, PullRequestStore, RosterStore, Store};

pub mod selector;


pub use self::selector::{RandomSelector, ReviewerSelector, SeededSelector};

/// Upper bound on simultaneous reviewers of one pull request.
pub const MAX_REVIEWERS: usize = 2;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PullRequestDraft {
    pub id: String,
    pub title: String,
    pub author_id: String,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct PullRequestWithReviewers {
    pub pull_request: PullRequest,
    pub reviewers: Vec<ReviewerAssignment>,
}

impl PullRequestWithReviewers {
    pub fn reviewer_ids(&self) -> Vec<&str> {
        self.reviewers.iter().map(|r| r.reviewer_id.as_str()).collect()
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Reassignment {
    pub replaced_by: String,
    pub reviewers: Vec<String>,
}

pub struct Engine<S, R> {
    store: S,
    selector: R,
}

impl<S: Store, R: ReviewerSelector> Engine<S, R> {
    pub fn new(store: S, selector: R) -> Self {
        Engine { store, selector }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Persist a new pull request and assign up to `MAX_REVIEWERS` reviewers
    /// drawn from the author's first team. Returns the reviewers in draw order.
    pub fn create_pull_request(&self, draft: &PullRequestDraft, deadline: Deadline)
        -> ReviewResult<Vec<String>>
    {
        info!("creating pull request {} ({:?}) by {}", draft.id, draft.title, draft.author_id);

        let result = self
            .store
            .transaction(deadline, |conn| self.create_in(conn, draft));

        if let Ok(ref assigned) = result {
            info!(
                "pull request {} created with reviewers [{}]",
                draft.id,
                assigned.iter().join(", ")
            );
        }
        observe("create", &draft.id, result)
    }

    /// OPEN -> MERGED. Merging a merged pull request changes nothing.
    pub fn merge_pull_request(&self, id: &str, deadline: Deadline) -> ReviewResult<PullRequest> {
        info!("merging pull request {}", id);

        let result = self.store.transaction(deadline, |conn| {
            let pr = conn.lock_pull_request(id)?;
            if pr.is_merged() {
                debug!("pull request {} already merged at {:?}", id, pr.merged_at);
                return Ok(pr);
            }
            conn.update_status(id, PrStatus::Merged, now())
        });

        observe("merge", id, result)
    }

    /// Swap `old_reviewer_id` for another active member of the team the old
    /// reviewer was assigned from.
    pub fn reassign_reviewer(&self, pr_id: &str, old_reviewer_id: &str, deadline: Deadline)
        -> ReviewResult<Reassignment>
    {
        info!("reassigning {} on pull request {}", old_reviewer_id, pr_id);

        let result = self
            .store
            .transaction(deadline, |conn| self.reassign_in(conn, pr_id, old_reviewer_id));

        if let Ok(ref swap) = result {
            info!(
                "pull request {}: {} replaced by {}",
                pr_id, old_reviewer_id, swap.replaced_by
            );
        }
        observe("reassign", pr_id, result)
    }

    pub fn get_pull_request(&self, id: &str, deadline: Deadline)
        -> ReviewResult<PullRequestWithReviewers>
    {
        info!("fetching pull request {}", id);

        let result = self.store.transaction(deadline, |conn| {
            Ok(PullRequestWithReviewers {
                pull_request: conn.pull_request(id)?,
                reviewers: conn.assignments(id)?,
            })
        });

        if let Ok(ref found) = result {
            debug!("pull request {} has reviewers [{}]", id, found.reviewer_ids().join(", "));
        }
        observe("get", id, result)
    }

    /// Pull requests `user_id` currently reviews.
    pub fn list_assigned_to(&self, user_id: &str, deadline: Deadline)
        -> ReviewResult<Vec<PullRequest>>
    {
        info!("listing pull requests assigned to {}", user_id);

        let result = self.store.transaction(deadline, |conn| {
            conn.user(user_id)?;
            conn.assigned_to(user_id)
        });
        observe("list-assigned", user_id, result)
    }

    fn create_in(&self, conn: &S::Conn, draft: &PullRequestDraft) -> ReviewResult<Vec<String>> {
        conn.user(&draft.author_id)?;

        if conn.find_pull_request(&draft.id)?.is_some() {
            return Err(ReviewError::AlreadyExists(draft.id.clone()));
        }

        // a user may sit on several teams; the first by name is the pool
        let team = conn.teams_for_user(&draft.author_id)?.into_iter().next();
        let mut candidates = match team {
            Some(ref team) => {
                eligible_candidates(conn.team_members(team)?, &[draft.author_id.as_str()])
            }
            None => Vec::new(),
        };

        let now = now();
        conn.insert_pull_request(&NewPullRequest {
            id: &draft.id,
            title: &draft.title,
            author_id: &draft.author_id,
            status: PrStatus::Open.repr(),
            created_at: now,
            updated_at: now,
        })?;

        let team = match team {
            Some(team) => team,
            None => {
                info!(
                    "author {} belongs to no team; {} gets no reviewers",
                    draft.author_id, draft.id
                );
                return Ok(Vec::new());
            }
        };

        let mut assigned = Vec::with_capacity(MAX_REVIEWERS);
        while assigned.len() < MAX_REVIEWERS && !candidates.is_empty() {
            let reviewer = self.draw(&mut candidates);
            let row = NewAssignment {
                pr_id: &draft.id,
                reviewer_id: &reviewer,
                team_name: &team,
                assigned_at: now,
            };

            if let Err(why) = conn.add_assignment(&row) {
                if !self.store.is_transactional() {
                    compensate("create", &draft.id, conn.delete_pull_request(&draft.id));
                }
                return Err(why);
            }
            assigned.push(reviewer);
        }

        Ok(assigned)
    }

    fn reassign_in(&self, conn: &S::Conn, pr_id: &str, old_reviewer_id: &str)
        -> ReviewResult<Reassignment>
    {
        let pr = conn.lock_pull_request(pr_id)?;
        if pr.is_merged() {
            return Err(ReviewError::PrMerged(pr_id.to_owned()));
        }

        let current = conn.assignments(pr_id)?;
        let old = match current.iter().find(|a| a.reviewer_id == old_reviewer_id) {
            Some(old) => old.clone(),
            None => {
                return Err(ReviewError::NotAssigned {
                    pr_id: pr_id.to_owned(),
                    reviewer_id: old_reviewer_id.to_owned(),
                })
            }
        };

        // the pool is the team stored on the row, not the reviewer's team today
        let mut excluded = current.iter().map(|a| a.reviewer_id.as_str()).collect::<Vec<_>>();
        excluded.push(pr.author_id.as_str());
        let mut candidates = eligible_candidates(conn.team_members(&old.team_name)?, &excluded);

        if candidates.is_empty() {
            return Err(ReviewError::NoCandidate {
                pr_id: pr_id.to_owned(),
                team: old.team_name,
            });
        }
        let replacement = self.draw(&mut candidates);

        conn.remove_assignment(pr_id, old_reviewer_id)?;
        let row = NewAssignment {
            pr_id,
            reviewer_id: &replacement,
            team_name: &old.team_name,
            assigned_at: now(),
        };
        if let Err(why) = conn.add_assignment(&row) {
            if !self.store.is_transactional() {
                compensate("reassign", pr_id, conn.add_assignment(&old.as_new()));
            }
            return Err(why);
        }

        let reviewers = conn
            .assignments(pr_id)?
            .into_iter()
            .map(|a| a.reviewer_id)
            .collect();

        Ok(Reassignment {
            replaced_by: replacement,
            reviewers,
        })
    }

    /// Remove one candidate at random and return it.
    fn draw(&self, candidates: &mut Vec<String>) -> String {
        let idx = self.selector.pick(candidates.len());
        candidates.remove(idx)
    }
}

/// Active members of a team that are not in `excluded`, in roster order.
pub fn eligible_candidates(members: Vec<Member>, excluded: &[&str]) -> Vec<String> {
    members
        .into_iter()
        .filter(|m| m.is_active)
        .filter(|m| !excluded.contains(&m.user_id.as_str()))
        .map(|m| m.user_id)
        .collect()
}

fn now() -> NaiveDateTime {
    Utc::now().naive_utc()
}

fn observe<T>(op: &str, id: &str, result: ReviewResult<T>) -> ReviewResult<T> {
    match result {
        Err(ref why) if why.is_domain() => {
            debug!("{} {} rejected: {}", op, id, why);
        }
        Err(ReviewError::Cancelled) => {
            warn!("{} {} cancelled: deadline exceeded, nothing written", op, id);
        }
        Err(ref why) => {
            error!("{} {} failed unexpectedly: {} ({:?})", op, id, why, why);
        }
        Ok(_) => (),
    }
    result
}

fn compensate(op: &str, id: &str, result: ReviewResult<()>) {
    match result {
        Ok(()) => warn!("{} {}: partial write undone after failure", op, id),
        Err(why) => error!(
            "STATE INCONSISTENCY: {} {}: compensation failed: {} ({:?})",
            op, id, why, why
        ),
    }
}
