use std::collections::HashSet;

use diesel::dsl::exists;
use diesel::prelude::*;
use diesel::{delete, insert_into, select};
use serde::Serialize;

use crate::db::schema::{follows, users};
use crate::types::{require_caller, Caller, Error, Result};
use crate::users::models::User;

/// Public face of a user, relative to whoever is looking: `following`
/// says whether the viewer follows this person.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Profile {
    pub id: i32,
    pub username: String,
    pub bio: Option<String>,
    pub image: Option<String>,
    pub following: bool,
}

/// Which end of the follow edge a listing walks from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FollowDirection {
    Following,
    Followers,
}

pub fn get_profile(conn: &mut SqliteConnection, viewer: Caller, name: &str) -> Result<Profile> {
    let user = User::load_by_name(conn, name)?;
    let following = match viewer {
        Some(viewer_id) => is_following(conn, viewer_id, user.id)?,
        None => false,
    };
    Ok(user.profile(following))
}

pub fn is_following(
    conn: &mut SqliteConnection,
    follower_id: i32,
    followed_id: i32,
) -> Result<bool> {
    select(exists(
        follows::table
            .filter(follows::follower_id.eq(follower_id))
            .filter(follows::followed_id.eq(followed_id)),
    ))
    .get_result::<bool>(conn)
    .map_err(Error::from)
}

/// Adds a follow edge. Self-follow and an already-present edge are both
/// conflicts; the edge set holds at most one entry per ordered pair.
pub fn follow(conn: &mut SqliteConnection, caller: Caller, target_id: i32) -> Result<Profile> {
    let follower = require_caller(caller)?;
    if follower == target_id {
        return Err(Error::Conflict("cannot follow yourself".to_owned()));
    }
    let target = User::load(conn, target_id)?;
    if is_following(conn, follower, target.id)? {
        return Err(Error::Conflict("already following this user".to_owned()));
    }
    insert_into(follows::table)
        .values((
            follows::follower_id.eq(follower),
            follows::followed_id.eq(target.id),
        ))
        .on_conflict_do_nothing()
        .execute(conn)?;
    tracing::debug!(follower, followed = target.id, "followed user");
    Ok(target.profile(true))
}

/// Removes the follow edge if present. Unfollowing someone never followed
/// is a no-op; the removed-edge count (0 or 1) is reported back.
pub fn unfollow(conn: &mut SqliteConnection, caller: Caller, target_id: i32) -> Result<usize> {
    let follower = require_caller(caller)?;
    let target = User::load(conn, target_id)?;
    let removed = delete(
        follows::table
            .filter(follows::follower_id.eq(follower))
            .filter(follows::followed_id.eq(target.id)),
    )
    .execute(conn)?;
    Ok(removed)
}

pub fn list_following(conn: &mut SqliteConnection, user_id: i32) -> Result<Vec<Profile>> {
    list_edges(conn, user_id, FollowDirection::Following)
}

pub fn list_followers(conn: &mut SqliteConnection, user_id: i32) -> Result<Vec<Profile>> {
    list_edges(conn, user_id, FollowDirection::Followers)
}

fn list_edges(
    conn: &mut SqliteConnection,
    user_id: i32,
    direction: FollowDirection,
) -> Result<Vec<Profile>> {
    User::load(conn, user_id)?;
    let other_ids: Vec<i32> = match direction {
        FollowDirection::Following => follows::table
            .filter(follows::follower_id.eq(user_id))
            .select(follows::followed_id)
            .load(conn)?,
        FollowDirection::Followers => follows::table
            .filter(follows::followed_id.eq(user_id))
            .select(follows::follower_id)
            .load(conn)?,
    };

    // The `following` flag stays viewer-relative: does `user_id` follow
    // each listed person. For a following listing that is true by
    // definition; for followers it needs the reverse edges.
    let followed_back: HashSet<i32> = match direction {
        FollowDirection::Following => other_ids.iter().copied().collect(),
        FollowDirection::Followers => follows::table
            .filter(follows::follower_id.eq(user_id))
            .filter(follows::followed_id.eq_any(&other_ids))
            .select(follows::followed_id)
            .load::<i32>(conn)?
            .into_iter()
            .collect(),
    };

    let profiles = users::table
        .filter(users::id.eq_any(&other_ids))
        .order(users::username.asc())
        .load::<User>(conn)?
        .into_iter()
        .map(|user| {
            let following = followed_back.contains(&user.id);
            user.profile(following)
        })
        .collect();
    Ok(profiles)
}

#[cfg(test)]
mod tests {
    use crate::db::test_conn;
    use crate::users::{register, Registration};

    use super::*;

    fn user(conn: &mut SqliteConnection, name: &str) -> i32 {
        register(
            conn,
            Registration {
                username: name.to_owned(),
                email: format!("{}@example.org", name),
                password_hash: "hash".to_owned(),
            },
        )
        .expect("register")
        .id
    }

    #[test]
    fn self_follow_is_a_conflict() {
        let mut conn = test_conn();
        let ada = user(&mut conn, "ada");
        assert!(matches!(
            follow(&mut conn, Some(ada), ada),
            Err(Error::Conflict(_))
        ));
    }

    #[test]
    fn duplicate_follow_is_a_conflict() {
        let mut conn = test_conn();
        let ada = user(&mut conn, "ada");
        let grace = user(&mut conn, "grace");
        let profile = follow(&mut conn, Some(ada), grace).expect("follow");
        assert!(profile.following);
        assert!(matches!(
            follow(&mut conn, Some(ada), grace),
            Err(Error::Conflict(_))
        ));
    }

    #[test]
    fn follow_unknown_user_is_not_found() {
        let mut conn = test_conn();
        let ada = user(&mut conn, "ada");
        assert!(matches!(
            follow(&mut conn, Some(ada), 4242),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn unfollow_is_permissive_and_reports_removed_edges() {
        let mut conn = test_conn();
        let ada = user(&mut conn, "ada");
        let grace = user(&mut conn, "grace");
        // Never followed: a no-op, zero edges removed, no error.
        assert_eq!(unfollow(&mut conn, Some(ada), grace).expect("unfollow"), 0);
        follow(&mut conn, Some(ada), grace).expect("follow");
        assert_eq!(unfollow(&mut conn, Some(ada), grace).expect("unfollow"), 1);
        assert_eq!(unfollow(&mut conn, Some(ada), grace).expect("unfollow"), 0);
    }

    #[test]
    fn profile_reflects_viewer() {
        let mut conn = test_conn();
        let ada = user(&mut conn, "ada");
        let grace = user(&mut conn, "grace");
        follow(&mut conn, Some(ada), grace).expect("follow");

        let seen_by_ada = get_profile(&mut conn, Some(ada), "grace").expect("profile");
        assert!(seen_by_ada.following);
        let seen_anonymously = get_profile(&mut conn, None, "grace").expect("profile");
        assert!(!seen_anonymously.following);
    }

    #[test]
    fn listings_walk_both_edge_directions() {
        let mut conn = test_conn();
        let ada = user(&mut conn, "ada");
        let grace = user(&mut conn, "grace");
        let linus = user(&mut conn, "linus");
        follow(&mut conn, Some(ada), grace).expect("follow");
        follow(&mut conn, Some(linus), ada).expect("follow");
        follow(&mut conn, Some(grace), ada).expect("follow");

        let following = list_following(&mut conn, ada).expect("following");
        assert_eq!(
            following.iter().map(|p| p.username.as_str()).collect::<Vec<_>>(),
            vec!["grace"]
        );
        assert!(following[0].following);

        let followers = list_followers(&mut conn, ada).expect("followers");
        assert_eq!(
            followers.iter().map(|p| p.username.as_str()).collect::<Vec<_>>(),
            vec!["grace", "linus"]
        );
        // Ada follows grace but not linus.
        assert!(followers[0].following);
        assert!(!followers[1].following);
    }
}
