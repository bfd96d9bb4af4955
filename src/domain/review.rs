use std::fmt;

use chrono::NaiveDateTime;

use super::schema::*;

const STATUS_REPR_OPEN: &str = "OPEN";
const STATUS_REPR_MERGED: &str = "MERGED";

/// Pull request lifecycle. `Merged` is terminal.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum PrStatus {
    Open,
    Merged,
}

impl PrStatus {
    pub fn repr(self) -> &'static str {
        match self {
            PrStatus::Open => STATUS_REPR_OPEN,
            PrStatus::Merged => STATUS_REPR_MERGED,
        }
    }

    pub fn from_repr(string: &str) -> Option<Self> {
        match string {
            STATUS_REPR_OPEN => Some(PrStatus::Open),
            STATUS_REPR_MERGED => Some(PrStatus::Merged),
            _ => None,
        }
    }

    pub fn can_transition_to(self, next: PrStatus) -> bool {
        match (self, next) {
            (PrStatus::Open, PrStatus::Merged) => true,
            _ => false,
        }
    }
}

impl fmt::Display for PrStatus {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.write_str(self.repr())
    }
}

#[derive(Clone, Debug, Deserialize, Eq, Ord, PartialEq, PartialOrd, Queryable, Serialize)]
pub struct PullRequest {
    pub id: String,
    pub title: String,
    pub author_id: String,
    pub status: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub merged_at: Option<NaiveDateTime>,
}

impl PullRequest {
    pub fn status(&self) -> Option<PrStatus> {
        PrStatus::from_repr(&self.status)
    }

    pub fn is_merged(&self) -> bool {
        self.status() == Some(PrStatus::Merged)
    }
}

#[derive(Clone, Debug, Eq, Insertable, Ord, PartialEq, PartialOrd)]
#[table_name="pull_requests"]
pub struct NewPullRequest<'a> {
    pub id: &'a str,
    pub title: &'a str,
    pub author_id: &'a str,
    pub status: &'a str,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Clone, Debug, Deserialize, Eq, Ord, PartialEq, PartialOrd, Queryable, Serialize)]
pub struct ReviewerAssignment {
    pub pr_id: String,
    pub reviewer_id: String,
    pub team_name: String,
    pub assigned_at: NaiveDateTime,
}

impl ReviewerAssignment {
    pub fn as_new(&self) -> NewAssignment<'_> {
        NewAssignment {
            pr_id: &self.pr_id,
            reviewer_id: &self.reviewer_id,
            team_name: &self.team_name,
            assigned_at: self.assigned_at,
        }
    }
}

#[derive(Clone, Debug, Eq, Insertable, Ord, PartialEq, PartialOrd)]
#[table_name="pr_reviewers"]
pub struct NewAssignment<'a> {
    pub pr_id: &'a str,
    pub reviewer_id: &'a str,
    pub team_name: &'a str,
    pub assigned_at: NaiveDateTime,
}
