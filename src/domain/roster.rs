// Copyright 2016 Adam Perry. Dual-licensed MIT and Apache 2.0 (see LICENSE files for details).

use chrono::NaiveDateTime;

use super::schema::*;

#[derive(Clone, Debug, Deserialize, Eq, Insertable, Ord, PartialEq, PartialOrd, Queryable,
         Serialize)]
#[table_name="users"]
pub struct User {
    pub id: String,
    pub name: String,
    pub is_active: bool,
    pub created_at: NaiveDateTime,
}

#[derive(Clone, Debug, Deserialize, Eq, Insertable, Ord, PartialEq, PartialOrd, Queryable,
         Serialize)]
#[table_name="teams"]
pub struct Team {
    pub name: String,
    pub created_at: NaiveDateTime,
}

#[derive(Clone, Debug, Eq, Insertable, Ord, PartialEq, PartialOrd)]
#[table_name="team_members"]
pub struct NewMembership<'a> {
    pub team_name: &'a str,
    pub user_id: &'a str,
    pub joined_at: NaiveDateTime,
}

#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd, Serialize)]
pub struct Membership {
    pub team_name: String,
    pub user_id: String,
    pub joined_at: NaiveDateTime,
}

/// A team member as the assignment engine sees it.
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd, Queryable, Serialize)]
pub struct Member {
    pub user_id: String,
    pub is_active: bool,
}

#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd, Queryable, Serialize)]
pub struct MemberProfile {
    pub user_id: String,
    pub name: String,
    pub is_active: bool,
}

/// A team with every member's profile, ordered by user id.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct TeamRoster {
    pub team: Team,
    pub members: Vec<MemberProfile>,
}
