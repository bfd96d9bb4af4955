use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use chrono::Utc;
use itertools::Itertools;
use serde::de;

use crate::domain::roster::{TeamRoster, User};
use crate::error::{ReviewError, ReviewResult};
use crate::store::{Deadline, RosterAdmin, RosterStore, Store};

//==============================================================================
// Public API
//==============================================================================

#[derive(Debug, Deserialize)]
pub struct RosterConfig {
    #[serde(default)]
    teams: BTreeMap<TeamName, Team>,
}

impl RosterConfig {
    /// Retrieve an iterator over all the team names.
    pub fn team_names(&self) -> impl Iterator<Item = &TeamName> {
        self.teams.keys()
    }

    /// Retrieve an iterator over all the (team name, team) pairs.
    pub fn teams(&self) -> impl Iterator<Item = (&TeamName, &Team)> {
        self.teams.iter()
    }

    /// Every distinct member across all teams, keyed by user id.
    fn users(&self) -> BTreeMap<&str, &Member> {
        self.teams
            .values()
            .flat_map(|team| team.members.iter())
            .map(|m| (m.id.as_str(), m))
            .collect()
    }

    fn validate(&self) -> ReviewResult<()> {
        let mut seen: BTreeMap<&str, &Member> = BTreeMap::new();
        for (name, team) in self.teams() {
            if name.0.trim().is_empty() {
                return Err(ReviewError::Config("team with an empty name".to_string()));
            }
            for member in &team.members {
                if member.id.trim().is_empty() {
                    return Err(ReviewError::Config(format!(
                        "member without an id in team {}",
                        name.0
                    )));
                }
                match seen.get(member.id.as_str()) {
                    Some(prev) if prev.name != member.name || prev.active != member.active => {
                        return Err(ReviewError::Config(format!(
                            "user {} is described differently in two teams",
                            member.id
                        )));
                    }
                    _ => {
                        seen.insert(&member.id, member);
                    }
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub struct Team {
    #[serde(default)]
    members: Vec<Member>,
}

impl Team {
    pub fn member_ids(&self) -> impl Iterator<Item = &str> {
        self.members.iter().map(|m| m.id.as_str())
    }
}

#[derive(Debug, Deserialize)]
pub struct Member {
    id: String,
    name: String,
    #[serde(default = "active_by_default")]
    active: bool,
}

fn active_by_default() -> bool {
    true
}

#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct TeamName(pub String);

impl<'de> de::Deserialize<'de> for TeamName {
    fn deserialize<D: de::Deserializer<'de>>(de: D) -> Result<Self, D::Error> {
        let name = <String as de::Deserialize<'de>>::deserialize(de)?;
        Ok(TeamName(name.trim().to_string()))
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct SyncSummary {
    pub teams: usize,
    pub users: usize,
}

/// Read and validate a roster file.
pub fn read_roster(path: &Path) -> ReviewResult<RosterConfig> {
    let input = fs::read_to_string(path)?;
    parse_roster(&input)
}

/// Make the stored roster match `cfg`: upsert every team and user, and
/// replace the membership of every listed team. All or nothing.
pub fn sync_roster<S: Store>(store: &S, cfg: &RosterConfig, deadline: Deadline)
    -> ReviewResult<SyncSummary>
{
    let now = Utc::now().naive_utc();
    let users = cfg.users();

    let summary = store.transaction(deadline, |conn| {
        for (name, _) in cfg.teams() {
            conn.upsert_team(&name.0, now)?;
        }
        for member in users.values() {
            conn.upsert_user(&User {
                id: member.id.clone(),
                name: member.name.clone(),
                is_active: member.active,
                created_at: now,
            })?;
        }
        for (name, team) in cfg.teams() {
            let ids = team.member_ids().collect::<Vec<_>>();
            conn.replace_team_members(&name.0, &ids, now)?;
        }
        Ok(SyncSummary {
            teams: cfg.teams.len(),
            users: users.len(),
        })
    })?;

    info!(
        "roster synced: {} users across teams [{}]",
        summary.users,
        cfg.team_names().map(|t| t.0.as_str()).join(", ")
    );
    Ok(summary)
}

/// A team and the profile of each of its members.
pub fn get_team<S: Store>(store: &S, name: &str, deadline: Deadline)
    -> ReviewResult<TeamRoster>
{
    info!("fetching team {}", name);
    store.transaction(deadline, |conn| conn.team(name))
}

/// Flip a user's activity flag. Inactive users are never drawn as reviewers.
pub fn set_user_active<S: Store>(store: &S, user_id: &str, active: bool, deadline: Deadline)
    -> ReviewResult<User>
{
    let user = store.transaction(deadline, |conn| conn.set_user_active(user_id, active))?;
    info!("user {} is now {}", user.id, if user.is_active { "active" } else { "inactive" });
    Ok(user)
}

//==============================================================================
// Implementation details
//==============================================================================

fn parse_roster(input: &str) -> ReviewResult<RosterConfig> {
    let cfg: RosterConfig = toml::from_str(input)?;
    cfg.validate()?;
    Ok(cfg)
}

//==============================================================================
// Tests
//==============================================================================

#[cfg(test)]
mod test {
    use super::*;
    use crate::store::{MemoryStore, RosterStore};

    const ROSTER: &str = r#"
[teams.avengers]
members = [
  { id = "hulk", name = "Bruce Banner" },
  { id = "thor", name = "Thor Odinson" },
  { id = "vision", name = "Vision", active = false },
]

[teams.justice-league]
members = [
  { id = "superman", name = "Clark Kent" },
  { id = "batman", name = "Bruce Wayne" },
  { id = "hulk", name = "Bruce Banner" },
]
"#;

    #[test]
    fn roster_parser_correct() {
        let cfg = parse_roster(ROSTER).unwrap();

        assert_eq!(
            cfg.team_names().map(|t| t.0.clone()).collect::<Vec<_>>(),
            vec!["avengers", "justice-league"]
        );

        let map: BTreeMap<_, _> = cfg.teams().map(|(k, v)| (k.0.clone(), v)).collect();
        assert_eq!(
            map["avengers"].member_ids().collect::<Vec<_>>(),
            vec!["hulk", "thor", "vision"]
        );
        assert_eq!(
            map["justice-league"].member_ids().collect::<Vec<_>>(),
            vec!["superman", "batman", "hulk"]
        );
        assert!(map.get("x-men").is_none());

        let users = cfg.users();
        assert_eq!(users.len(), 5);
        assert!(!users["vision"].active);
        assert!(users["thor"].active);
    }

    #[test]
    fn conflicting_member_descriptions_are_rejected() {
        let input = r#"
[teams.a]
members = [{ id = "u1", name = "One" }]

[teams.b]
members = [{ id = "u1", name = "One", active = false }]
"#;
        match parse_roster(input) {
            Err(ReviewError::Config(msg)) => assert!(msg.contains("u1")),
            other => panic!("expected config error, got {:?}", other),
        }
    }

    #[test]
    fn member_without_id_is_rejected() {
        let input = r#"
[teams.a]
members = [{ id = " ", name = "Nobody" }]
"#;
        assert!(parse_roster(input).is_err());
    }

    #[test]
    fn sync_writes_teams_users_and_memberships() {
        let store = MemoryStore::new();
        let cfg = parse_roster(ROSTER).unwrap();

        let summary = sync_roster(&store, &cfg, Deadline::none()).unwrap();
        assert_eq!(summary, SyncSummary { teams: 2, users: 5 });

        store
            .transaction(Deadline::none(), |conn| {
                assert_eq!(
                    conn.teams_for_user("hulk")?,
                    vec!["avengers".to_string(), "justice-league".to_string()]
                );
                let members = conn.team_members("avengers")?;
                let inactive = members.iter().filter(|m| !m.is_active).count();
                assert_eq!(members.len(), 3);
                assert_eq!(inactive, 1);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn resync_replaces_membership() {
        let store = MemoryStore::new();
        sync_roster(&store, &parse_roster(ROSTER).unwrap(), Deadline::none()).unwrap();

        let smaller = parse_roster(
            r#"
[teams.avengers]
members = [{ id = "thor", name = "Thor Odinson" }]
"#,
        )
        .unwrap();
        sync_roster(&store, &smaller, Deadline::none()).unwrap();

        store
            .transaction(Deadline::none(), |conn| {
                let ids = conn
                    .team_members("avengers")?
                    .into_iter()
                    .map(|m| m.user_id)
                    .collect::<Vec<_>>();
                assert_eq!(ids, vec!["thor"]);
                // teams missing from the file are left alone
                assert_eq!(conn.team_members("justice-league")?.len(), 3);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn synced_team_can_be_looked_up() {
        let store = MemoryStore::new();
        sync_roster(&store, &parse_roster(ROSTER).unwrap(), Deadline::none()).unwrap();

        let roster = get_team(&store, "avengers", Deadline::none()).unwrap();
        assert_eq!(roster.team.name, "avengers");
        let names = roster.members.iter().map(|m| m.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["Bruce Banner", "Thor Odinson", "Vision"]);
        assert!(!roster.members[2].is_active);

        match get_team(&store, "x-men", Deadline::none()) {
            Err(ReviewError::NotFound { id, .. }) => assert_eq!(id, "x-men"),
            other => panic!("expected NOT_FOUND, got {:?}", other),
        }
    }

    #[test]
    fn activity_flag_can_be_toggled() {
        let store = MemoryStore::new();
        sync_roster(&store, &parse_roster(ROSTER).unwrap(), Deadline::none()).unwrap();

        let user = set_user_active(&store, "vision", true, Deadline::none()).unwrap();
        assert!(user.is_active);

        let err = set_user_active(&store, "ghost", true, Deadline::none()).unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }
}
