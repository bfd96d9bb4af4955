// Copyright 2016 Adam Perry. Dual-licensed MIT and Apache 2.0 (see LICENSE files for details).

use std::fmt;
use std::io;

use diesel::r2d2::PoolError;
use thiserror::Error;

use crate::domain::review::PrStatus;

pub type ReviewResult<T> = std::result::Result<T, ReviewError>;

/// What a `NotFound` error refers to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Entity {
    PullRequest,
    User,
    Team,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Entity::PullRequest => "pull request",
            Entity::User => "user",
            Entity::Team => "team",
        })
    }
}

#[derive(Debug, Error)]
pub enum ReviewError {
    #[error("{kind} {id} not found")]
    NotFound { kind: Entity, id: String },

    #[error("pull request {0} already exists")]
    AlreadyExists(String),

    #[error("pull request {0} is already merged")]
    PrMerged(String),

    #[error("{reviewer_id} is not assigned to pull request {pr_id}")]
    NotAssigned { pr_id: String, reviewer_id: String },

    #[error("no active replacement candidate in team {team} for pull request {pr_id}")]
    NoCandidate { pr_id: String, team: String },

    #[error("pull request {pr_id} cannot move from {from} to {to}")]
    IllegalTransition {
        pr_id: String,
        from: String,
        to: PrStatus,
    },

    #[error("operation cancelled: deadline exceeded")]
    Cancelled,

    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("store error: {0}")]
    Store(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("unable to parse roster: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ReviewError {
    pub fn not_found(kind: Entity, id: &str) -> Self {
        ReviewError::NotFound {
            kind,
            id: id.to_owned(),
        }
    }

    /// Expected business outcomes the caller is meant to translate, as opposed
    /// to failures of the process or its store.
    pub fn is_domain(&self) -> bool {
        match self {
            ReviewError::NotFound { .. }
            | ReviewError::AlreadyExists(_)
            | ReviewError::PrMerged(_)
            | ReviewError::NotAssigned { .. }
            | ReviewError::NoCandidate { .. } => true,
            _ => false,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ReviewError::NotFound { .. } => "NOT_FOUND",
            ReviewError::AlreadyExists(_) => "PR_EXISTS",
            ReviewError::PrMerged(_) => "PR_MERGED",
            ReviewError::NotAssigned { .. } => "NOT_ASSIGNED",
            ReviewError::NoCandidate { .. } => "NO_CANDIDATE",
            ReviewError::Cancelled => "CANCELLED",
            _ => "INTERNAL",
        }
    }
}
