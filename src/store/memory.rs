//! In-memory `Store`.
//!
//! A single mutex guards the whole state, so transactions are fully
//! serialized. Each transaction works on a copy of the state that is committed
//! only when the closure succeeds. A store built with
//! `MemoryStore::non_transactional` writes the copy back regardless, which
//! models a backend without multi-statement atomicity.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use chrono::NaiveDateTime;

use super::{Deadline, PullRequestStore, RosterAdmin, RosterStore, Store};
use crate::domain::review::{NewAssignment, NewPullRequest, PrStatus, PullRequest,
                            ReviewerAssignment};
use crate::domain::roster::{Member, MemberProfile, Membership, Team, TeamRoster, User};
use crate::error::{Entity, ReviewError, ReviewResult};

#[derive(Clone, Debug, Default)]
struct MemoryState {
    users: BTreeMap<String, User>,
    teams: BTreeMap<String, Team>,
    memberships: Vec<Membership>,
    pull_requests: BTreeMap<String, PullRequest>,
    assignments: Vec<ReviewerAssignment>,
    mutations: u64,
}

pub struct MemoryStore {
    state: Mutex<MemoryState>,
    transactional: bool,
    rejected_reviewers: Mutex<BTreeSet<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore {
            state: Mutex::new(MemoryState::default()),
            transactional: true,
            rejected_reviewers: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn non_transactional() -> Self {
        MemoryStore {
            transactional: false,
            ..MemoryStore::new()
        }
    }

    /// Make every later `add_assignment` for this reviewer fail with a store error.
    pub fn reject_reviewer(&self, reviewer_id: &str) {
        if let Ok(mut rejected) = self.rejected_reviewers.lock() {
            rejected.insert(reviewer_id.to_owned());
        }
    }

    /// Number of committed writes so far.
    pub fn mutations(&self) -> u64 {
        self.state.lock().map(|s| s.mutations).unwrap_or_default()
    }

    fn lock_state(&self) -> ReviewResult<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| ReviewError::Store("memory store lock poisoned".to_string()))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        MemoryStore::new()
    }
}

impl Store for MemoryStore {
    type Conn = MemoryConn;

    fn is_transactional(&self) -> bool {
        self.transactional
    }

    fn transaction<T, F>(&self, deadline: Deadline, f: F) -> ReviewResult<T>
    where
        F: FnOnce(&MemoryConn) -> ReviewResult<T>,
    {
        deadline.check()?;
        let mut guard = self.lock_state()?;
        let rejected = self
            .rejected_reviewers
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default();

        let conn = MemoryConn {
            state: RefCell::new(guard.clone()),
            deadline,
            rejected,
            failed: Cell::new(false),
        };

        let result = f(&conn).and_then(|value| deadline.check().map(|_| value));
        if result.is_ok() || !self.transactional {
            *guard = conn.state.into_inner();
        }
        result
    }
}

/// Connection handed to a `MemoryStore` transaction.
///
/// Once any call has failed, the calls that follow are undoing partial work
/// and no longer check the deadline.
pub struct MemoryConn {
    state: RefCell<MemoryState>,
    deadline: Deadline,
    rejected: BTreeSet<String>,
    failed: Cell<bool>,
}

impl MemoryConn {
    fn guard(&self) -> ReviewResult<()> {
        if self.failed.get() {
            return Ok(());
        }
        self.deadline.check().map_err(|why| self.fail(why))
    }

    fn fail(&self, why: ReviewError) -> ReviewError {
        self.failed.set(true);
        why
    }

    fn read<T>(&self, f: impl FnOnce(&MemoryState) -> T) -> ReviewResult<T> {
        self.guard()?;
        let state = self.state.borrow();
        Ok(f(&*state))
    }

    fn write<T>(&self, f: impl FnOnce(&mut MemoryState) -> ReviewResult<T>) -> ReviewResult<T> {
        self.guard()?;
        let mut state = self.state.borrow_mut();
        let value = f(&mut *state).map_err(|why| self.fail(why))?;
        state.mutations += 1;
        Ok(value)
    }
}

impl PullRequestStore for MemoryConn {
    fn insert_pull_request(&self, pr: &NewPullRequest<'_>) -> ReviewResult<PullRequest> {
        self.write(|state| {
            if state.pull_requests.contains_key(pr.id) {
                return Err(ReviewError::AlreadyExists(pr.id.to_owned()));
            }
            let stored = PullRequest {
                id: pr.id.to_owned(),
                title: pr.title.to_owned(),
                author_id: pr.author_id.to_owned(),
                status: pr.status.to_owned(),
                created_at: pr.created_at,
                updated_at: pr.updated_at,
                merged_at: None,
            };
            state.pull_requests.insert(stored.id.clone(), stored.clone());
            Ok(stored)
        })
    }

    fn find_pull_request(&self, id: &str) -> ReviewResult<Option<PullRequest>> {
        self.read(|state| state.pull_requests.get(id).cloned())
    }

    fn lock_pull_request(&self, id: &str) -> ReviewResult<PullRequest> {
        // the store mutex is already held for the whole transaction
        self.pull_request(id)
    }

    fn update_status(&self, id: &str, status: PrStatus, at: NaiveDateTime)
        -> ReviewResult<PullRequest>
    {
        self.write(|state| {
            let pr = state
                .pull_requests
                .get_mut(id)
                .ok_or_else(|| ReviewError::not_found(Entity::PullRequest, id))?;
            let allowed = pr.status().map_or(false, |from| from.can_transition_to(status));
            if !allowed {
                return Err(ReviewError::IllegalTransition {
                    pr_id: id.to_owned(),
                    from: pr.status.clone(),
                    to: status,
                });
            }
            pr.status = status.repr().to_owned();
            pr.updated_at = at;
            if status == PrStatus::Merged {
                pr.merged_at = Some(at);
            }
            Ok(pr.clone())
        })
    }

    fn delete_pull_request(&self, id: &str) -> ReviewResult<()> {
        self.write(|state| {
            state.pull_requests.remove(id);
            state.assignments.retain(|a| a.pr_id != id);
            Ok(())
        })
    }

    fn add_assignment(&self, assignment: &NewAssignment<'_>) -> ReviewResult<()> {
        if self.rejected.contains(assignment.reviewer_id) {
            return Err(self.fail(ReviewError::Store(format!(
                "insert of reviewer {} on {} rejected",
                assignment.reviewer_id, assignment.pr_id
            ))));
        }
        self.write(|state| {
            if !state.pull_requests.contains_key(assignment.pr_id) {
                return Err(ReviewError::Store(format!(
                    "foreign key violation: pull request {} missing",
                    assignment.pr_id
                )));
            }
            let duplicate = state.assignments.iter().any(|a| {
                a.pr_id == assignment.pr_id && a.reviewer_id == assignment.reviewer_id
            });
            if duplicate {
                return Err(ReviewError::Store(format!(
                    "duplicate assignment of {} on {}",
                    assignment.reviewer_id, assignment.pr_id
                )));
            }
            state.assignments.push(ReviewerAssignment {
                pr_id: assignment.pr_id.to_owned(),
                reviewer_id: assignment.reviewer_id.to_owned(),
                team_name: assignment.team_name.to_owned(),
                assigned_at: assignment.assigned_at,
            });
            Ok(())
        })
    }

    fn remove_assignment(&self, pr_id: &str, reviewer_id: &str) -> ReviewResult<()> {
        self.write(|state| {
            state
                .assignments
                .retain(|a| !(a.pr_id == pr_id && a.reviewer_id == reviewer_id));
            Ok(())
        })
    }

    fn assignments(&self, pr_id: &str) -> ReviewResult<Vec<ReviewerAssignment>> {
        self.read(|state| {
            let mut rows = state
                .assignments
                .iter()
                .filter(|a| a.pr_id == pr_id)
                .cloned()
                .collect::<Vec<_>>();
            rows.sort_by(|a, b| {
                (a.assigned_at, &a.reviewer_id).cmp(&(b.assigned_at, &b.reviewer_id))
            });
            rows
        })
    }

    fn assigned_to(&self, user_id: &str) -> ReviewResult<Vec<PullRequest>> {
        self.read(|state| {
            let mut prs = state
                .assignments
                .iter()
                .filter(|a| a.reviewer_id == user_id)
                .filter_map(|a| state.pull_requests.get(&a.pr_id).cloned())
                .collect::<Vec<_>>();
            prs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
            prs
        })
    }
}

impl RosterStore for MemoryConn {
    fn user(&self, id: &str) -> ReviewResult<User> {
        self.read(|state| state.users.get(id).cloned())?
            .ok_or_else(|| ReviewError::not_found(Entity::User, id))
    }

    fn teams_for_user(&self, user_id: &str) -> ReviewResult<Vec<String>> {
        self.read(|state| {
            state
                .memberships
                .iter()
                .filter(|m| m.user_id == user_id)
                .map(|m| m.team_name.clone())
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect()
        })
    }

    fn team_members(&self, team_name: &str) -> ReviewResult<Vec<Member>> {
        self.read(|state| {
            let mut members = state
                .memberships
                .iter()
                .filter(|m| m.team_name == team_name)
                .filter_map(|m| state.users.get(&m.user_id))
                .map(|u| Member {
                    user_id: u.id.clone(),
                    is_active: u.is_active,
                })
                .collect::<Vec<_>>();
            members.sort();
            members
        })
    }

    fn team(&self, name: &str) -> ReviewResult<TeamRoster> {
        self.read(|state| {
            let team = state.teams.get(name).cloned()?;
            let mut members = state
                .memberships
                .iter()
                .filter(|m| m.team_name == name)
                .filter_map(|m| state.users.get(&m.user_id))
                .map(|u| MemberProfile {
                    user_id: u.id.clone(),
                    name: u.name.clone(),
                    is_active: u.is_active,
                })
                .collect::<Vec<_>>();
            members.sort();
            Some(TeamRoster { team, members })
        })?
        .ok_or_else(|| ReviewError::not_found(Entity::Team, name))
    }
}

impl RosterAdmin for MemoryConn {
    fn upsert_team(&self, name: &str, at: NaiveDateTime) -> ReviewResult<()> {
        self.write(|state| {
            state.teams.entry(name.to_owned()).or_insert_with(|| Team {
                name: name.to_owned(),
                created_at: at,
            });
            Ok(())
        })
    }

    fn upsert_user(&self, user: &User) -> ReviewResult<()> {
        self.write(|state| {
            let stored = state
                .users
                .entry(user.id.clone())
                .or_insert_with(|| user.clone());
            stored.name = user.name.clone();
            stored.is_active = user.is_active;
            Ok(())
        })
    }

    fn replace_team_members(&self, team_name: &str, user_ids: &[&str], at: NaiveDateTime)
        -> ReviewResult<()>
    {
        self.write(|state| {
            if !state.teams.contains_key(team_name) {
                return Err(ReviewError::not_found(Entity::Team, team_name));
            }
            if let Some(missing) = user_ids.iter().find(|id| !state.users.contains_key(**id)) {
                return Err(ReviewError::not_found(Entity::User, missing));
            }
            state.memberships.retain(|m| m.team_name != team_name);
            for user_id in user_ids {
                state.memberships.push(Membership {
                    team_name: team_name.to_owned(),
                    user_id: (*user_id).to_owned(),
                    joined_at: at,
                });
            }
            Ok(())
        })
    }

    fn set_user_active(&self, user_id: &str, active: bool) -> ReviewResult<User> {
        self.write(|state| {
            let user = state
                .users
                .get_mut(user_id)
                .ok_or_else(|| ReviewError::not_found(Entity::User, user_id))?;
            user.is_active = active;
            Ok(user.clone())
        })
    }
}
