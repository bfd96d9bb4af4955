use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde_json::Value;

use crate::assign::{Engine, PullRequestDraft, ReviewerSelector};
use crate::error::{ReviewError, ReviewResult};
use crate::store::{Deadline, Store};
use crate::teams;

/// Reviewbot: assigns pull request reviewers from team rosters
#[derive(Parser, Debug)]
#[command(name = "reviewbot", version)]
#[command(about = "Assigns pull request reviewers from team rosters", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Command {
    /// Load teams and users from the roster file
    SyncRoster {
        /// Roster file (defaults to REVIEWBOT_TEAMS_FILE)
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Open a pull request and assign up to two reviewers
    Create {
        id: String,
        #[arg(long)]
        title: String,
        #[arg(long)]
        author: String,
    },
    /// Mark a pull request merged
    Merge { id: String },
    /// Replace one reviewer with another member of the same team
    Reassign {
        id: String,
        #[arg(long)]
        old_reviewer: String,
    },
    /// Show a pull request with its reviewers
    Show { id: String },
    /// List pull requests a user reviews
    Assigned { user: String },
    /// Show a team with its members
    ShowTeam { name: String },
    /// Include or exclude a user from future reviewer draws
    SetActive {
        user: String,
        /// Mark the user inactive instead
        #[arg(long)]
        inactive: bool,
    },
}

/// Execute one command and render its result as JSON.
pub fn run<S, R>(engine: &Engine<S, R>, command: Command, roster_file: &str, deadline: Deadline)
    -> ReviewResult<Value>
where
    S: Store,
    R: ReviewerSelector,
{
    match command {
        Command::SyncRoster { file } => {
            let path = file.unwrap_or_else(|| PathBuf::from(roster_file));
            let cfg = teams::read_roster(&path)?;
            let summary = teams::sync_roster(engine.store(), &cfg, deadline)?;
            Ok(serde_json::to_value(summary)?)
        }
        Command::Create { id, title, author } => {
            let draft = PullRequestDraft {
                id,
                title,
                author_id: author,
            };
            let assigned = engine.create_pull_request(&draft, deadline)?;
            Ok(json!({
                "pr_id": draft.id,
                "assigned_reviewers": assigned,
            }))
        }
        Command::Merge { id } => {
            let pr = engine.merge_pull_request(&id, deadline)?;
            Ok(serde_json::to_value(pr)?)
        }
        Command::Reassign { id, old_reviewer } => {
            let swap = engine.reassign_reviewer(&id, &old_reviewer, deadline)?;
            Ok(json!({
                "pr_id": id,
                "replaced": old_reviewer,
                "replaced_by": swap.replaced_by,
                "assigned_reviewers": swap.reviewers,
            }))
        }
        Command::Show { id } => {
            let pr = engine.get_pull_request(&id, deadline)?;
            Ok(serde_json::to_value(pr)?)
        }
        Command::Assigned { user } => {
            let prs = engine.list_assigned_to(&user, deadline)?;
            Ok(json!({
                "user_id": user,
                "pull_requests": prs,
            }))
        }
        Command::ShowTeam { name } => {
            let roster = teams::get_team(engine.store(), &name, deadline)?;
            Ok(serde_json::to_value(roster)?)
        }
        Command::SetActive { user, inactive } => {
            let user = teams::set_user_active(engine.store(), &user, !inactive, deadline)?;
            Ok(serde_json::to_value(user)?)
        }
    }
}

/// Body printed for a failed command.
pub fn error_body(why: &ReviewError) -> Value {
    json!({
        "error": {
            "code": why.code(),
            "message": why.to_string(),
        }
    })
}

/// Domain rejections exit with 1, everything else with 2.
pub fn exit_code(why: &ReviewError) -> i32 {
    if why.is_domain() {
        1
    } else {
        2
    }
}
