use std::collections::HashSet;

use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;
use diesel::{delete as diesel_delete, insert_into};
use serde::Serialize;

use crate::article::{Article, ArticleRef};
use crate::db::schema::{comments, follows, users};
use crate::profile::Profile;
use crate::types::{require_caller, Caller, Error, Result, ValidationError};
use crate::users::models::User;
use crate::utils::serialize_date;

#[derive(Debug, PartialEq, Queryable, Identifiable, Associations)]
#[diesel(table_name = comments)]
#[diesel(belongs_to(Article))]
pub struct Comment {
    pub id: i32,
    pub article_id: i32,
    pub user_id: i32,
    pub body: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = comments)]
struct NewComment {
    article_id: i32,
    user_id: i32,
    body: String,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CommentView {
    pub id: i32,
    #[serde(serialize_with = "serialize_date")]
    pub created_at: NaiveDateTime,
    #[serde(serialize_with = "serialize_date")]
    pub updated_at: NaiveDateTime,
    pub body: String,
    pub author: Profile,
}

impl From<(Comment, Profile)> for CommentView {
    fn from((comment, profile): (Comment, Profile)) -> Self {
        CommentView {
            id: comment.id,
            created_at: comment.created_at,
            updated_at: comment.updated_at,
            body: comment.body,
            author: profile,
        }
    }
}

/// Creates a comment on an article. The article's and author's comment
/// counts are derived from this table, so the insert and the counts can
/// never disagree.
pub fn add_comment(
    conn: &mut SqliteConnection,
    caller: Caller,
    article_id: i32,
    body: &str,
) -> Result<CommentView> {
    let author_id = require_caller(caller)?;
    if body.trim().is_empty() {
        return Err(ValidationError::from("body", "empty body").into());
    }
    let article = Article::resolve(conn, ArticleRef::Id(article_id))?;
    let author = User::load(conn, author_id)?;
    let now = Utc::now().naive_utc();
    let new_comment = NewComment {
        article_id: article.id,
        user_id: author.id,
        body: body.to_owned(),
        created_at: now,
        updated_at: now,
    };
    let comment = insert_into(comments::table)
        .values(&new_comment)
        .get_result::<Comment>(conn)?;
    tracing::debug!(comment_id = comment.id, article_id = article.id, "added comment");
    Ok((comment, author.profile(false)).into())
}

/// All comments on an article, newest first, each with its author's
/// profile relative to the viewer.
pub fn list_comments(
    conn: &mut SqliteConnection,
    viewer: Caller,
    article: ArticleRef<'_>,
) -> Result<Vec<CommentView>> {
    let article = Article::resolve(conn, article)?;
    let data = Comment::belonging_to(&article)
        .inner_join(users::table)
        .order((comments::created_at.desc(), comments::id.desc()))
        .load::<(Comment, User)>(conn)?;

    let following: HashSet<i32> = match viewer {
        Some(viewer_id) => {
            let author_ids: Vec<i32> = data.iter().map(|(_, author)| author.id).collect();
            follows::table
                .filter(follows::follower_id.eq(viewer_id))
                .filter(follows::followed_id.eq_any(author_ids))
                .select(follows::followed_id)
                .load::<i32>(conn)?
                .into_iter()
                .collect()
        }
        None => HashSet::new(),
    };

    Ok(data
        .into_iter()
        .map(|(comment, author)| {
            let profile = author.profile(following.contains(&author.id));
            (comment, profile).into()
        })
        .collect())
}

/// Only the comment's author may remove it.
pub fn delete_comment(conn: &mut SqliteConnection, caller: Caller, comment_id: i32) -> Result<()> {
    let actor = require_caller(caller)?;
    let comment = comments::table
        .find(comment_id)
        .first::<Comment>(conn)
        .optional()?
        .ok_or(Error::NotFound("comment"))?;
    if comment.user_id != actor {
        return Err(Error::Forbidden("only the author may delete this comment"));
    }
    diesel_delete(&comment).execute(conn)?;
    Ok(())
}
