table! {
    pr_reviewers (pr_id, reviewer_id) {
        pr_id -> Varchar,
        reviewer_id -> Varchar,
        team_name -> Varchar,
        assigned_at -> Timestamp,
    }
}

table! {
    pull_requests (id) {
        id -> Varchar,
        title -> Varchar,
        author_id -> Varchar,
        status -> Varchar,
        created_at -> Timestamp,
        updated_at -> Timestamp,
        merged_at -> Nullable<Timestamp>,
    }
}

table! {
    team_members (team_name, user_id) {
        team_name -> Varchar,
        user_id -> Varchar,
        joined_at -> Timestamp,
    }
}

table! {
    teams (name) {
        name -> Varchar,
        created_at -> Timestamp,
    }
}

table! {
    users (id) {
        id -> Varchar,
        name -> Varchar,
        is_active -> Bool,
        created_at -> Timestamp,
    }
}

joinable!(pr_reviewers -> pull_requests (pr_id));
joinable!(pr_reviewers -> users (reviewer_id));
joinable!(team_members -> teams (team_name));
joinable!(team_members -> users (user_id));

allow_tables_to_appear_in_same_query!(
    pr_reviewers,
    pull_requests,
    team_members,
    teams,
    users,
);
