use diesel::prelude::*;
use serde::Serialize;

use crate::db::schema::users;
use crate::profile::Profile;
use crate::types::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Queryable, Identifiable, AsChangeset, Serialize)]
#[diesel(table_name = users)]
#[diesel(treat_none_as_null = true)]
pub struct User {
    pub id: i32,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub bio: Option<String>,
    pub image: Option<String>,
}

impl User {
    pub fn load(conn: &mut SqliteConnection, user_id: i32) -> Result<User> {
        users::table
            .find(user_id)
            .first::<User>(conn)
            .optional()?
            .ok_or(Error::NotFound("user"))
    }

    pub fn load_by_name(conn: &mut SqliteConnection, name: &str) -> Result<User> {
        users::table
            .filter(users::username.eq(name))
            .first::<User>(conn)
            .optional()?
            .ok_or(Error::NotFound("user"))
    }

    /// Public projection of this account: everything a stranger may see,
    /// never the password hash.
    pub fn profile(&self, following: bool) -> Profile {
        Profile {
            id: self.id,
            username: self.username.clone(),
            bio: self.bio.clone(),
            image: self.image.clone(),
            following,
        }
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
}

/// Account view returned to the owner, counters derived from the
/// relations at read time.
#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserView {
    pub id: i32,
    pub username: String,
    pub email: String,
    pub bio: Option<String>,
    pub image: Option<String>,
    pub article_count: i64,
    pub comment_count: i64,
}
