use diesel::dsl::exists;
use diesel::prelude::*;
use diesel::{delete, insert_into, select, update as diesel_update};
use serde::Deserialize;

use crate::db::schema::{article_tags, articles, comments, favorites, follows, users};
use crate::types::{require_caller, Caller, Error, Result, Validate, ValidationError};

pub mod models;
mod utils;

use self::models::{NewUser, User, UserView};
use self::utils::{validate_email_format, validate_username_format};

/// Registration payload. The password hash is produced by the caller's
/// hashing collaborator; the core stores it verbatim.
#[derive(Debug, Deserialize)]
pub struct Registration {
    pub username: String,
    pub email: String,
    pub password_hash: String,
}

impl Validate for Registration {
    fn validate(self, _connection: &mut SqliteConnection) -> Result<Self> {
        let mut errors = ValidationError::default();
        if let Err(e) = validate_email_format(&self.email) {
            errors.merge(e);
        }
        if let Err(e) = validate_username_format(&self.username) {
            errors.merge(e);
        }
        if self.password_hash.is_empty() {
            errors.add_error("password", "missing password hash");
        }
        if errors.is_empty() {
            Ok(self)
        } else {
            Err(errors.into())
        }
    }
}

pub fn register(conn: &mut SqliteConnection, registration: Registration) -> Result<User> {
    let registration = registration.validate(conn)?;

    let email_taken = select(exists(
        users::table.filter(users::email.eq(&registration.email)),
    ))
    .get_result::<bool>(conn)?;
    if email_taken {
        return Err(Error::Conflict(format!(
            "user with email {} already exists",
            registration.email
        )));
    }

    let username_taken = select(exists(
        users::table.filter(users::username.eq(&registration.username)),
    ))
    .get_result::<bool>(conn)?;
    if username_taken {
        return Err(Error::Conflict(format!(
            "username {} already exists",
            registration.username
        )));
    }

    let new_user = NewUser {
        username: registration.username,
        email: registration.email,
        password_hash: registration.password_hash,
    };
    let user = insert_into(users::table)
        .values(&new_user)
        .get_result::<User>(conn)?;
    tracing::info!(user_id = user.id, username = %user.username, "registered user");
    Ok(user)
}

pub fn get_user(conn: &mut SqliteConnection, user_id: i32) -> Result<UserView> {
    let user = User::load(conn, user_id)?;
    let article_count = articles::table
        .filter(articles::author_id.eq(user_id))
        .count()
        .get_result::<i64>(conn)?;
    let comment_count = comments::table
        .filter(comments::user_id.eq(user_id))
        .count()
        .get_result::<i64>(conn)?;
    Ok(UserView {
        id: user.id,
        username: user.username,
        email: user.email,
        bio: user.bio,
        image: user.image,
        article_count,
        comment_count,
    })
}

/// Partial profile update: absent fields leave the stored values
/// untouched.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateUser {
    pub username: Option<String>,
    pub email: Option<String>,
    pub bio: Option<String>,
    pub image: Option<String>,
}

pub fn update_user(
    conn: &mut SqliteConnection,
    caller: Caller,
    update: UpdateUser,
) -> Result<User> {
    let mut user = User::load(conn, require_caller(caller)?)?;
    let mut errors = ValidationError::default();

    if let Some(bio) = update.bio {
        user.bio = Some(bio);
    }
    if let Some(image) = update.image {
        user.image = Some(image);
    }

    if let Some(new_email) = update.email {
        match validate_email_format(&new_email) {
            Err(e) => errors.merge(e),
            Ok(_) => user.email = new_email,
        }
        let taken = select(exists(
            users::table
                .filter(users::email.eq(&user.email))
                .filter(users::id.ne(user.id)),
        ))
        .get_result::<bool>(conn)?;
        if taken {
            return Err(Error::Conflict(format!("email already taken: {}", user.email)));
        }
    }

    if let Some(new_username) = update.username {
        match validate_username_format(&new_username) {
            Err(e) => errors.merge(e),
            Ok(_) => user.username = new_username,
        }
        let taken = select(exists(
            users::table
                .filter(users::username.eq(&user.username))
                .filter(users::id.ne(user.id)),
        ))
        .get_result::<bool>(conn)?;
        if taken {
            return Err(Error::Conflict(format!(
                "username already taken: {}",
                user.username
            )));
        }
    }

    if !errors.is_empty() {
        return Err(errors.into());
    }
    diesel_update(&user).set(&user).execute(conn)?;
    Ok(user)
}

/// Stores the opaque media reference exactly as the upload collaborator
/// produced it.
pub fn update_avatar(
    conn: &mut SqliteConnection,
    caller: Caller,
    image_ref: &str,
) -> Result<User> {
    let user_id = require_caller(caller)?;
    User::load(conn, user_id)?;
    let user = diesel_update(users::table.find(user_id))
        .set(users::image.eq(image_ref))
        .get_result::<User>(conn)?;
    Ok(user)
}

/// Swaps in a new password hash. Verifying the old password is the
/// authentication collaborator's job.
pub fn change_password(
    conn: &mut SqliteConnection,
    caller: Caller,
    new_hash: &str,
) -> Result<()> {
    let user_id = require_caller(caller)?;
    User::load(conn, user_id)?;
    if new_hash.is_empty() {
        return Err(ValidationError::from("password", "missing password hash").into());
    }
    diesel_update(users::table.find(user_id))
        .set(users::password_hash.eq(new_hash))
        .execute(conn)?;
    Ok(())
}

/// Deletes the account and everything it owns in one transaction: owned
/// articles with their comments, favorites and tag links, authored
/// comments on other articles, favorite edges, and follow edges in both
/// directions. Tags themselves survive.
pub fn delete_user(conn: &mut SqliteConnection, caller: Caller) -> Result<()> {
    let user_id = require_caller(caller)?;
    User::load(conn, user_id)?;
    conn.transaction::<_, Error, _>(|conn| {
        let owned = articles::table
            .filter(articles::author_id.eq(user_id))
            .select(articles::id)
            .load::<i32>(conn)?;
        delete(comments::table.filter(comments::article_id.eq_any(&owned))).execute(conn)?;
        delete(favorites::table.filter(favorites::article_id.eq_any(&owned))).execute(conn)?;
        delete(article_tags::table.filter(article_tags::article_id.eq_any(&owned)))
            .execute(conn)?;
        delete(articles::table.filter(articles::id.eq_any(&owned))).execute(conn)?;

        delete(comments::table.filter(comments::user_id.eq(user_id))).execute(conn)?;
        delete(favorites::table.filter(favorites::user_id.eq(user_id))).execute(conn)?;
        delete(
            follows::table.filter(
                follows::follower_id
                    .eq(user_id)
                    .or(follows::followed_id.eq(user_id)),
            ),
        )
        .execute(conn)?;
        delete(users::table.find(user_id)).execute(conn)?;
        Ok(())
    })?;
    tracing::info!(user_id, "deleted user and owned content");
    Ok(())
}
