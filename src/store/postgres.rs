// Copyright 2016 Adam Perry. Dual-licensed MIT and Apache 2.0 (see LICENSE files for details).

use chrono::NaiveDateTime;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};
use diesel::result::{DatabaseErrorKind, Error as DieselError};

use super::{Deadline, PullRequestStore, RosterAdmin, RosterStore, Store};
use crate::domain::review::{NewAssignment, NewPullRequest, PrStatus, PullRequest,
                            ReviewerAssignment};
use crate::domain::roster::{Member, MemberProfile, NewMembership, Team, TeamRoster, User};
use crate::domain::schema::{pr_reviewers, pull_requests, team_members, teams, users};
use crate::error::{Entity, ReviewError, ReviewResult};

pub type PgPool = Pool<ConnectionManager<PgConnection>>;

/// Postgres-backed store. Every transaction runs at read committed and takes
/// row locks through `lock_pull_request`.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        PgStore { pool }
    }
}

impl Store for PgStore {
    type Conn = PgConnection;

    fn transaction<T, F>(&self, deadline: Deadline, f: F) -> ReviewResult<T>
    where
        F: FnOnce(&PgConnection) -> ReviewResult<T>,
    {
        deadline.check()?;

        let result = self.pool.get().map_err(ReviewError::from).and_then(|conn| {
            let conn = &*conn;
            conn.transaction::<T, ReviewError, _>(|| {
                if let Some(remaining) = deadline.remaining() {
                    // statement_timeout = 0 disables the limit, so never go below 1ms
                    let millis = remaining.as_millis().max(1);
                    diesel::sql_query(format!("SET LOCAL statement_timeout = {}", millis))
                        .execute(conn)?;
                }
                let value = f(conn)?;
                // an error here rolls back instead of committing late
                deadline.check()?;
                Ok(value)
            })
        });

        result.map_err(|why| {
            if deadline.expired() && !why.is_domain() {
                debug!("mapping {} to cancellation after deadline", why);
                ReviewError::Cancelled
            } else {
                why
            }
        })
    }
}

impl PullRequestStore for PgConnection {
    fn insert_pull_request(&self, pr: &NewPullRequest<'_>) -> ReviewResult<PullRequest> {
        match diesel::insert_into(pull_requests::table)
            .values(pr)
            .get_result::<PullRequest>(self)
        {
            Ok(stored) => Ok(stored),
            Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
                Err(ReviewError::AlreadyExists(pr.id.to_owned()))
            }
            Err(why) => Err(why.into()),
        }
    }

    fn find_pull_request(&self, id: &str) -> ReviewResult<Option<PullRequest>> {
        Ok(pull_requests::table
            .find(id)
            .get_result::<PullRequest>(self)
            .optional()?)
    }

    fn lock_pull_request(&self, id: &str) -> ReviewResult<PullRequest> {
        pull_requests::table
            .find(id)
            .for_update()
            .get_result::<PullRequest>(self)
            .optional()?
            .ok_or_else(|| ReviewError::not_found(Entity::PullRequest, id))
    }

    fn update_status(&self, id: &str, status: PrStatus, at: NaiveDateTime)
        -> ReviewResult<PullRequest>
    {
        let current = self.lock_pull_request(id)?;
        let allowed = current.status().map_or(false, |from| from.can_transition_to(status));
        if !allowed {
            return Err(ReviewError::IllegalTransition {
                pr_id: id.to_owned(),
                from: current.status,
                to: status,
            });
        }
        let merged_at = if status == PrStatus::Merged { Some(at) } else { None };

        diesel::update(pull_requests::table.find(id))
            .set((
                pull_requests::status.eq(status.repr()),
                pull_requests::updated_at.eq(at),
                pull_requests::merged_at.eq(merged_at),
            ))
            .get_result::<PullRequest>(self)
            .optional()?
            .ok_or_else(|| ReviewError::not_found(Entity::PullRequest, id))
    }

    fn delete_pull_request(&self, id: &str) -> ReviewResult<()> {
        // pr_reviewers rows go with it (ON DELETE CASCADE)
        diesel::delete(pull_requests::table.find(id)).execute(self)?;
        Ok(())
    }

    fn add_assignment(&self, assignment: &NewAssignment<'_>) -> ReviewResult<()> {
        diesel::insert_into(pr_reviewers::table)
            .values(assignment)
            .execute(self)?;
        Ok(())
    }

    fn remove_assignment(&self, pr_id: &str, reviewer_id: &str) -> ReviewResult<()> {
        diesel::delete(
            pr_reviewers::table
                .filter(pr_reviewers::pr_id.eq(pr_id))
                .filter(pr_reviewers::reviewer_id.eq(reviewer_id)),
        )
        .execute(self)?;
        Ok(())
    }

    fn assignments(&self, pr_id: &str) -> ReviewResult<Vec<ReviewerAssignment>> {
        Ok(pr_reviewers::table
            .filter(pr_reviewers::pr_id.eq(pr_id))
            .order((pr_reviewers::assigned_at.asc(), pr_reviewers::reviewer_id.asc()))
            .load::<ReviewerAssignment>(self)?)
    }

    fn assigned_to(&self, user_id: &str) -> ReviewResult<Vec<PullRequest>> {
        Ok(pull_requests::table
            .inner_join(pr_reviewers::table)
            .filter(pr_reviewers::reviewer_id.eq(user_id))
            .select(pull_requests::all_columns)
            .order((pull_requests::created_at.desc(), pull_requests::id.asc()))
            .load::<PullRequest>(self)?)
    }
}

impl RosterStore for PgConnection {
    fn user(&self, id: &str) -> ReviewResult<User> {
        users::table
            .find(id)
            .get_result::<User>(self)
            .optional()?
            .ok_or_else(|| ReviewError::not_found(Entity::User, id))
    }

    fn teams_for_user(&self, user_id: &str) -> ReviewResult<Vec<String>> {
        Ok(team_members::table
            .filter(team_members::user_id.eq(user_id))
            .select(team_members::team_name)
            .order(team_members::team_name.asc())
            .load::<String>(self)?)
    }

    fn team_members(&self, team_name: &str) -> ReviewResult<Vec<Member>> {
        Ok(team_members::table
            .inner_join(users::table)
            .filter(team_members::team_name.eq(team_name))
            .select((users::id, users::is_active))
            .order(users::id.asc())
            .load::<Member>(self)?)
    }

    fn team(&self, name: &str) -> ReviewResult<TeamRoster> {
        let team = teams::table
            .find(name)
            .get_result::<Team>(self)
            .optional()?
            .ok_or_else(|| ReviewError::not_found(Entity::Team, name))?;

        let members = team_members::table
            .inner_join(users::table)
            .filter(team_members::team_name.eq(name))
            .select((users::id, users::name, users::is_active))
            .order(users::id.asc())
            .load::<MemberProfile>(self)?;

        Ok(TeamRoster { team, members })
    }
}

impl RosterAdmin for PgConnection {
    fn upsert_team(&self, name: &str, at: NaiveDateTime) -> ReviewResult<()> {
        diesel::insert_into(teams::table)
            .values((teams::name.eq(name), teams::created_at.eq(at)))
            .on_conflict_do_nothing()
            .execute(self)?;
        Ok(())
    }

    fn upsert_user(&self, user: &User) -> ReviewResult<()> {
        diesel::insert_into(users::table)
            .values(user)
            .on_conflict(users::id)
            .do_update()
            .set((users::name.eq(&user.name), users::is_active.eq(user.is_active)))
            .execute(self)?;
        Ok(())
    }

    fn replace_team_members(&self, team_name: &str, user_ids: &[&str], at: NaiveDateTime)
        -> ReviewResult<()>
    {
        let exists = teams::table
            .find(team_name)
            .select(teams::name)
            .get_result::<String>(self)
            .optional()?;
        if exists.is_none() {
            return Err(ReviewError::not_found(Entity::Team, team_name));
        }

        let known = users::table
            .filter(users::id.eq_any(user_ids.to_vec()))
            .select(users::id)
            .load::<String>(self)?;
        if let Some(missing) = user_ids.iter().find(|id| !known.iter().any(|k| k == **id)) {
            return Err(ReviewError::not_found(Entity::User, missing));
        }

        diesel::delete(team_members::table.filter(team_members::team_name.eq(team_name)))
            .execute(self)?;

        let rows = user_ids
            .iter()
            .map(|user_id| NewMembership {
                team_name,
                user_id,
                joined_at: at,
            })
            .collect::<Vec<_>>();
        if !rows.is_empty() {
            diesel::insert_into(team_members::table)
                .values(&rows)
                .execute(self)?;
        }
        Ok(())
    }

    fn set_user_active(&self, user_id: &str, active: bool) -> ReviewResult<User> {
        diesel::update(users::table.find(user_id))
            .set(users::is_active.eq(active))
            .get_result::<User>(self)
            .optional()?
            .ok_or_else(|| ReviewError::not_found(Entity::User, user_id))
    }
}

#[cfg(test)]
mod test {
    use std::env;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    use chrono::Utc;

    use super::*;
    use crate::assign::{Engine, PullRequestDraft, RandomSelector};
    use crate::utils::setup_test_env;

    static NEXT_ID: AtomicUsize = AtomicUsize::new(0);

    // Postgres tests need TEST_DATABASE_URL pointing at a migrated database.
    fn test_store() -> Option<PgStore> {
        setup_test_env();
        let url = env::var("TEST_DATABASE_URL").ok()?;
        let manager = ConnectionManager::<PgConnection>::new(url);
        let pool = Pool::builder()
            .max_size(4)
            .build(manager)
            .expect("unable to build test pool");
        Some(PgStore::new(pool))
    }

    fn unique(prefix: &str) -> String {
        format!(
            "{}-{}-{}",
            prefix,
            Utc::now().timestamp_millis(),
            NEXT_ID.fetch_add(1, Ordering::SeqCst)
        )
    }

    fn seed_user(conn: &PgConnection, id: &str) -> ReviewResult<()> {
        conn.upsert_user(&User {
            id: id.to_owned(),
            name: id.to_owned(),
            is_active: true,
            created_at: Utc::now().naive_utc(),
        })
    }

    #[test]
    fn duplicate_insert_maps_to_already_exists() {
        let store = match test_store() {
            Some(store) => store,
            None => return,
        };
        let author = unique("author");
        let pr_id = unique("pr");
        let now = Utc::now().naive_utc();
        let new_pr = NewPullRequest {
            id: &pr_id,
            title: "Refactor parser",
            author_id: &author,
            status: PrStatus::Open.repr(),
            created_at: now,
            updated_at: now,
        };

        store
            .transaction(Deadline::none(), |conn| {
                seed_user(conn, &author)?;
                conn.insert_pull_request(&new_pr).map(|_| ())
            })
            .unwrap();

        let err = store
            .transaction(Deadline::none(), |conn| conn.insert_pull_request(&new_pr))
            .unwrap_err();
        assert_eq!(err.code(), "PR_EXISTS");
    }

    #[test]
    fn membership_and_assignment_round_trip() {
        let store = match test_store() {
            Some(store) => store,
            None => return,
        };
        let team = unique("team");
        let (a, b) = (unique("a"), unique("b"));
        let pr_id = unique("pr");
        let now = Utc::now().naive_utc();

        store
            .transaction(Deadline::none(), |conn| {
                seed_user(conn, &a)?;
                seed_user(conn, &b)?;
                conn.upsert_team(&team, now)?;
                conn.replace_team_members(&team, &[a.as_str(), b.as_str()], now)?;
                conn.set_user_active(&b, false)?;

                let members = conn.team_members(&team)?;
                assert_eq!(members.len(), 2);
                assert_eq!(conn.teams_for_user(&a)?, vec![team.clone()]);

                conn.insert_pull_request(&NewPullRequest {
                    id: &pr_id,
                    title: "Add metrics",
                    author_id: &a,
                    status: PrStatus::Open.repr(),
                    created_at: now,
                    updated_at: now,
                })?;
                conn.add_assignment(&NewAssignment {
                    pr_id: &pr_id,
                    reviewer_id: &b,
                    team_name: &team,
                    assigned_at: now,
                })?;
                assert_eq!(conn.assigned_to(&b)?.len(), 1);

                let locked = conn.lock_pull_request(&pr_id)?;
                assert!(!locked.is_merged());
                let merged = conn.update_status(&pr_id, PrStatus::Merged, now)?;
                assert!(merged.is_merged());
                assert!(merged.merged_at.is_some());
                Ok(())
            })
            .unwrap();
    }

    /// A fresh team of `size` active users; the first one authors pull requests.
    fn seed_team(store: &PgStore, size: usize) -> (String, Vec<String>) {
        let team = unique("team");
        let ids = (0..size).map(|_| unique("u")).collect::<Vec<_>>();
        let now = Utc::now().naive_utc();

        store
            .transaction(Deadline::none(), |conn| {
                for id in &ids {
                    seed_user(conn, id)?;
                }
                conn.upsert_team(&team, now)?;
                let members = ids.iter().map(String::as_str).collect::<Vec<_>>();
                conn.replace_team_members(&team, &members, now)
            })
            .unwrap();
        (team, ids)
    }

    fn open_pr(engine: &Engine<PgStore, RandomSelector>, author: &str) -> (String, Vec<String>) {
        let id = unique("pr");
        let draft = PullRequestDraft {
            id: id.clone(),
            title: "Tune pool size".to_owned(),
            author_id: author.to_owned(),
        };
        let assigned = engine.create_pull_request(&draft, Deadline::none()).unwrap();
        (id, assigned)
    }

    fn reviewer_ids(engine: &Engine<PgStore, RandomSelector>, pr_id: &str) -> Vec<String> {
        let mut ids = engine
            .get_pull_request(pr_id, Deadline::none())
            .unwrap()
            .reviewers
            .into_iter()
            .map(|r| r.reviewer_id)
            .collect::<Vec<_>>();
        ids.sort();
        ids
    }

    #[test]
    fn concurrent_reassignments_serialize_on_the_row_lock() {
        let store = match test_store() {
            Some(store) => store,
            None => return,
        };
        let (_, ids) = seed_team(&store, 8);
        let engine = Arc::new(Engine::new(store, RandomSelector));
        let (pr_id, assigned) = open_pr(&engine, &ids[0]);
        assert_eq!(assigned.len(), 2);
        let old = assigned[0].clone();

        let handles = (0..6)
            .map(|_| {
                let engine = Arc::clone(&engine);
                let (pr_id, old) = (pr_id.clone(), old.clone());
                thread::spawn(move || engine.reassign_reviewer(&pr_id, &old, Deadline::none()))
            })
            .collect::<Vec<_>>();
        let results = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .collect::<Vec<_>>();

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        for result in &results {
            if let Err(why) = result {
                assert_eq!(why.code(), "NOT_ASSIGNED");
            }
        }

        let after = reviewer_ids(&engine, &pr_id);
        assert_eq!(after.len(), 2);
        assert_ne!(after[0], after[1]);
        assert!(!after.contains(&old));
        assert!(!after.contains(&ids[0]));
    }

    #[test]
    fn merge_racing_reassignment_never_touches_a_merged_pull_request() {
        let store = match test_store() {
            Some(store) => store,
            None => return,
        };
        let (_, ids) = seed_team(&store, 6);
        let engine = Arc::new(Engine::new(store, RandomSelector));

        for _ in 0..5 {
            let (pr_id, assigned) = open_pr(&engine, &ids[0]);
            let old = assigned[0].clone();

            let merge = {
                let (engine, pr_id) = (Arc::clone(&engine), pr_id.clone());
                thread::spawn(move || engine.merge_pull_request(&pr_id, Deadline::none()))
            };
            let swap = {
                let (engine, pr_id, old) = (Arc::clone(&engine), pr_id.clone(), old.clone());
                thread::spawn(move || engine.reassign_reviewer(&pr_id, &old, Deadline::none()))
            };

            let merged = merge.join().unwrap().unwrap();
            assert!(merged.is_merged());

            let after = reviewer_ids(&engine, &pr_id);
            match swap.join().unwrap() {
                // the swap committed before the merge took the lock
                Ok(swap) => {
                    assert!(after.contains(&swap.replaced_by));
                    assert!(!after.contains(&old));
                }
                Err(why) => {
                    assert_eq!(why.code(), "PR_MERGED");
                    let mut before = assigned.clone();
                    before.sort();
                    assert_eq!(after, before);
                }
            }
            assert_eq!(after.len(), 2);
        }
    }

    #[test]
    fn merged_row_cannot_reopen() {
        let store = match test_store() {
            Some(store) => store,
            None => return,
        };
        let (_, ids) = seed_team(&store, 3);
        let engine = Engine::new(store, RandomSelector);
        let (pr_id, _) = open_pr(&engine, &ids[0]);
        engine.merge_pull_request(&pr_id, Deadline::none()).unwrap();

        let now = Utc::now().naive_utc();
        let err = engine
            .store()
            .transaction(Deadline::none(), |conn| conn.update_status(&pr_id, PrStatus::Open, now))
            .unwrap_err();
        assert_eq!(err.code(), "INTERNAL");

        let stored = engine.get_pull_request(&pr_id, Deadline::none()).unwrap();
        assert!(stored.pull_request.is_merged());
        assert!(stored.pull_request.merged_at.is_some());
    }

    #[test]
    fn team_lookup_joins_member_profiles() {
        let store = match test_store() {
            Some(store) => store,
            None => return,
        };
        let (team, ids) = seed_team(&store, 3);

        let roster = store
            .transaction(Deadline::none(), |conn| conn.team(&team))
            .unwrap();
        assert_eq!(roster.team.name, team);
        let mut expected = ids.clone();
        expected.sort();
        let mut listed = roster.members.into_iter().map(|m| m.user_id).collect::<Vec<_>>();
        listed.sort();
        assert_eq!(listed, expected);

        let missing = unique("team");
        let err = store
            .transaction(Deadline::none(), |conn| conn.team(&missing))
            .unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }
}
