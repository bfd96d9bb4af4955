// Copyright 2016 Adam Perry. Dual-licensed MIT and Apache 2.0 (see LICENSE files for details).

//! Persistence contracts consumed by the assignment engine.
//!
//! A `Store` hands out a connection for the duration of one transaction. All
//! reads and writes an engine operation performs go through that connection,
//! so a Postgres-backed store can hold a row lock on the pull request from the
//! first read to the commit.

use std::time::{Duration, Instant};

use chrono::NaiveDateTime;

use crate::domain::review::{NewAssignment, NewPullRequest, PrStatus, PullRequest,
                            ReviewerAssignment};
use crate::domain::roster::{Member, TeamRoster, User};
use crate::error::{ReviewError, ReviewResult};

pub mod memory;
pub mod postgres;

pub use self::memory::MemoryStore;
pub use self::postgres::PgStore;

/// Point in time after which a store call must give up.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    pub fn none() -> Self {
        Deadline(None)
    }

    pub fn after(timeout: Duration) -> Self {
        Deadline::at(Instant::now() + timeout)
    }

    pub fn at(instant: Instant) -> Self {
        Deadline(Some(instant))
    }

    pub fn expired(&self) -> bool {
        self.0.map(|at| Instant::now() >= at).unwrap_or(false)
    }

    /// Time left, or `None` when unbounded. Zero once expired.
    pub fn remaining(&self) -> Option<Duration> {
        self.0
            .map(|at| at.checked_duration_since(Instant::now()).unwrap_or_default())
    }

    pub fn check(&self) -> ReviewResult<()> {
        if self.expired() {
            Err(ReviewError::Cancelled)
        } else {
            Ok(())
        }
    }
}

impl Default for Deadline {
    fn default() -> Self {
        Deadline::none()
    }
}

pub trait PullRequestStore {
    /// Fails with `AlreadyExists` when the id is taken.
    fn insert_pull_request(&self, pr: &NewPullRequest<'_>) -> ReviewResult<PullRequest>;

    fn find_pull_request(&self, id: &str) -> ReviewResult<Option<PullRequest>>;

    /// Like `pull_request`, but holds a row lock until the transaction ends.
    fn lock_pull_request(&self, id: &str) -> ReviewResult<PullRequest>;

    /// Fails with `IllegalTransition` unless the current status may move to
    /// `status`.
    fn update_status(&self, id: &str, status: PrStatus, at: NaiveDateTime)
        -> ReviewResult<PullRequest>;

    /// Only used to undo a half-finished creation.
    fn delete_pull_request(&self, id: &str) -> ReviewResult<()>;

    fn add_assignment(&self, assignment: &NewAssignment<'_>) -> ReviewResult<()>;

    fn remove_assignment(&self, pr_id: &str, reviewer_id: &str) -> ReviewResult<()>;

    /// Assignment rows of one pull request, oldest first.
    fn assignments(&self, pr_id: &str) -> ReviewResult<Vec<ReviewerAssignment>>;

    /// Pull requests the user currently reviews, newest first.
    fn assigned_to(&self, user_id: &str) -> ReviewResult<Vec<PullRequest>>;

    fn pull_request(&self, id: &str) -> ReviewResult<PullRequest> {
        self.find_pull_request(id)?
            .ok_or_else(|| ReviewError::not_found(crate::error::Entity::PullRequest, id))
    }
}

pub trait RosterStore {
    fn user(&self, id: &str) -> ReviewResult<User>;

    /// Team names the user belongs to, ordered by name. Possibly empty.
    fn teams_for_user(&self, user_id: &str) -> ReviewResult<Vec<String>>;

    /// Members of a team with their activity flag, ordered by user id.
    fn team_members(&self, team_name: &str) -> ReviewResult<Vec<Member>>;

    /// Fails with `NotFound` for an unknown team.
    fn team(&self, name: &str) -> ReviewResult<TeamRoster>;
}

/// Write side of the roster. Never called by the assignment engine.
pub trait RosterAdmin {
    fn upsert_team(&self, name: &str, at: NaiveDateTime) -> ReviewResult<()>;

    fn upsert_user(&self, user: &User) -> ReviewResult<()>;

    fn replace_team_members(&self, team_name: &str, user_ids: &[&str], at: NaiveDateTime)
        -> ReviewResult<()>;

    fn set_user_active(&self, user_id: &str, active: bool) -> ReviewResult<User>;
}

pub trait Store: Send + Sync {
    type Conn: PullRequestStore + RosterStore + RosterAdmin;

    /// Whether an error returned from a `transaction` closure undoes every
    /// write the closure made. When it does not, callers compensate.
    fn is_transactional(&self) -> bool {
        true
    }

    fn transaction<T, F>(&self, deadline: Deadline, f: F) -> ReviewResult<T>
    where
        F: FnOnce(&Self::Conn) -> ReviewResult<T>;
}
