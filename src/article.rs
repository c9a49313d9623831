use std::collections::{HashMap, HashSet};
use std::str::FromStr;

use chrono::{NaiveDateTime, Utc};
use diesel::dsl::{count_star, exists, sql};
use diesel::prelude::*;
use diesel::sql_types::BigInt;
use diesel::sqlite::Sqlite;
use diesel::{delete, insert_into, select};
use serde::{Deserialize, Serialize};
use slug::slugify;

use crate::db::schema::{article_tags, articles, comments, favorites, follows, tags, users};
use crate::profile::Profile;
use crate::types::{
    require_caller, Caller, Error, Page, Paged, Result, Validate, ValidationError,
};
use crate::users::models::User;
use crate::utils::{serialize_date, serialize_opt_date};

#[derive(Debug, Clone, PartialEq, Queryable, Identifiable)]
#[diesel(table_name = articles)]
pub struct Article {
    pub id: i32,
    pub author_id: i32,
    pub slug: String,
    pub title: String,
    pub description: String,
    pub body: String,
    pub image: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: Option<NaiveDateTime>,
}

/// Articles are addressable by opaque id or by slug; both resolve to the
/// same row.
#[derive(Debug, Clone, Copy)]
pub enum ArticleRef<'a> {
    Id(i32),
    Slug(&'a str),
}

impl Article {
    pub fn resolve(conn: &mut SqliteConnection, article: ArticleRef<'_>) -> Result<Article> {
        let found = match article {
            ArticleRef::Id(article_id) => articles::table
                .find(article_id)
                .first::<Article>(conn)
                .optional()?,
            ArticleRef::Slug(slug) => articles::table
                .filter(articles::slug.eq(slug))
                .first::<Article>(conn)
                .optional()?,
        };
        found.ok_or(Error::NotFound("article"))
    }
}

/// Deterministic slug: lower-cased, hyphenated, nothing random, so the
/// same title always maps to the same identifier.
pub fn slug_for(title: &str) -> String {
    slugify(title)
}

#[derive(Debug, Insertable)]
#[diesel(table_name = articles)]
struct NewArticle {
    author_id: i32,
    slug: String,
    title: String,
    description: String,
    body: String,
    image: Option<String>,
    created_at: NaiveDateTime,
    updated_at: Option<NaiveDateTime>,
}

#[derive(Debug, Deserialize)]
pub struct ArticleDraft {
    pub title: String,
    pub description: String,
    pub body: String,
    #[serde(default)]
    pub tag_list: Vec<String>,
    #[serde(default)]
    pub image: Option<String>,
}

impl Validate for ArticleDraft {
    fn validate(self, _connection: &mut SqliteConnection) -> Result<Self> {
        let mut error = ValidationError::default();
        if self.title.trim().is_empty() {
            error.add_error("title", "empty title");
        }
        if self.description.trim().is_empty() {
            error.add_error("description", "empty description");
        }
        if self.body.trim().is_empty() {
            error.add_error("body", "empty body");
        }
        if error.is_empty() {
            Ok(self)
        } else {
            Err(error.into())
        }
    }
}

pub fn create_article(
    conn: &mut SqliteConnection,
    caller: Caller,
    draft: ArticleDraft,
) -> Result<ArticleView> {
    create_article_at(conn, caller, draft, Utc::now().naive_utc())
}

pub(crate) fn create_article_at(
    conn: &mut SqliteConnection,
    caller: Caller,
    draft: ArticleDraft,
    created: NaiveDateTime,
) -> Result<ArticleView> {
    let author_id = require_caller(caller)?;
    let draft = draft.validate(conn)?;
    let author = User::load(conn, author_id)?;

    let new_slug = slug_for(&draft.title);
    let taken = select(exists(
        articles::table.filter(articles::slug.eq(&new_slug)),
    ))
    .get_result::<bool>(conn)?;
    if taken {
        // Slug collision is user-correctable: pick another title. The
        // unique constraint still backstops concurrent creators.
        return Err(Error::Conflict(format!(
            "an article with slug \"{}\" already exists",
            new_slug
        )));
    }

    let article = conn.transaction::<_, Error, _>(|conn| {
        let new_article = NewArticle {
            author_id,
            slug: new_slug,
            title: draft.title,
            description: draft.description,
            body: draft.body,
            image: draft.image,
            created_at: created,
            updated_at: None,
        };
        let article = insert_into(articles::table)
            .values(&new_article)
            .get_result::<Article>(conn)?;
        link_tags(conn, article.id, &draft.tag_list)?;
        Ok(article)
    })?;
    tracing::debug!(article_id = article.id, slug = %article.slug, "created article");
    view_one(conn, Some(author.id), article)
}

/// Connect-or-create each tag, then link it. Blank and repeated names are
/// skipped.
fn link_tags(conn: &mut SqliteConnection, article_id: i32, names: &[String]) -> Result<()> {
    let mut seen = HashSet::new();
    for name in names {
        let name = name.trim();
        if name.is_empty() || !seen.insert(name) {
            continue;
        }
        insert_into(tags::table)
            .values(tags::name.eq(name))
            .on_conflict_do_nothing()
            .execute(conn)?;
        let tag_id = tags::table
            .filter(tags::name.eq(name))
            .select(tags::id)
            .first::<i32>(conn)?;
        insert_into(article_tags::table)
            .values((
                article_tags::article_id.eq(article_id),
                article_tags::tag_id.eq(tag_id),
            ))
            .on_conflict_do_nothing()
            .execute(conn)?;
    }
    Ok(())
}

#[derive(Debug, Default, Deserialize)]
pub struct ArticleChanges {
    pub title: Option<String>,
    pub description: Option<String>,
    pub body: Option<String>,
    pub image: Option<String>,
    pub tag_list: Option<Vec<String>>,
}

pub fn update_article(
    conn: &mut SqliteConnection,
    caller: Caller,
    article: ArticleRef<'_>,
    changes: ArticleChanges,
) -> Result<ArticleView> {
    let actor = require_caller(caller)?;
    let mut article = Article::resolve(conn, article)?;
    if article.author_id != actor {
        return Err(Error::Forbidden("only the author may update this article"));
    }

    if let Some(title) = changes.title {
        if title.trim().is_empty() {
            return Err(ValidationError::from("title", "empty title").into());
        }
        let new_slug = slug_for(&title);
        if new_slug != article.slug {
            let taken = select(exists(
                articles::table
                    .filter(articles::slug.eq(&new_slug))
                    .filter(articles::id.ne(article.id)),
            ))
            .get_result::<bool>(conn)?;
            if taken {
                return Err(Error::Conflict(format!(
                    "an article with slug \"{}\" already exists",
                    new_slug
                )));
            }
            article.slug = new_slug;
        }
        article.title = title;
    }
    if let Some(description) = changes.description {
        if description.trim().is_empty() {
            return Err(ValidationError::from("description", "empty description").into());
        }
        article.description = description;
    }
    if let Some(body) = changes.body {
        if body.trim().is_empty() {
            return Err(ValidationError::from("body", "empty body").into());
        }
        article.body = body;
    }
    if let Some(image) = changes.image {
        article.image = Some(image);
    }
    article.updated_at = Some(Utc::now().naive_utc());

    conn.transaction::<_, Error, _>(|conn| {
        diesel::update(articles::table.find(article.id))
            .set((
                articles::slug.eq(&article.slug),
                articles::title.eq(&article.title),
                articles::description.eq(&article.description),
                articles::body.eq(&article.body),
                articles::image.eq(&article.image),
                articles::updated_at.eq(article.updated_at),
            ))
            .execute(conn)?;
        if let Some(ref tag_list) = changes.tag_list {
            delete(article_tags::table.filter(article_tags::article_id.eq(article.id)))
                .execute(conn)?;
            link_tags(conn, article.id, tag_list)?;
        }
        Ok(())
    })?;
    view_one(conn, Some(actor), article)
}

/// Removes the article and everything hanging off it in one transaction.
/// Comments go first so no row ever references a missing article; tags
/// themselves are never deleted, only the links.
pub fn delete_article(
    conn: &mut SqliteConnection,
    caller: Caller,
    article: ArticleRef<'_>,
) -> Result<()> {
    let actor = require_caller(caller)?;
    let article = Article::resolve(conn, article)?;
    if article.author_id != actor {
        return Err(Error::Forbidden("only the author may delete this article"));
    }
    conn.transaction::<_, Error, _>(|conn| {
        delete(comments::table.filter(comments::article_id.eq(article.id))).execute(conn)?;
        delete(favorites::table.filter(favorites::article_id.eq(article.id))).execute(conn)?;
        delete(article_tags::table.filter(article_tags::article_id.eq(article.id)))
            .execute(conn)?;
        delete(articles::table.find(article.id)).execute(conn)?;
        Ok(())
    })?;
    tracing::debug!(article_id = article.id, slug = %article.slug, "deleted article");
    Ok(())
}

pub fn get_article(
    conn: &mut SqliteConnection,
    viewer: Caller,
    article: ArticleRef<'_>,
) -> Result<ArticleView> {
    let article = Article::resolve(conn, article)?;
    view_one(conn, viewer, article)
}

/// Adds the viewer to the article's favorited set. Favoriting twice is a
/// no-op, never a double count: the edge is set membership and the count
/// is derived from the set.
pub fn favorite(conn: &mut SqliteConnection, caller: Caller, article_id: i32) -> Result<ArticleView> {
    let user_id = require_caller(caller)?;
    let article = Article::resolve(conn, ArticleRef::Id(article_id))?;
    insert_into(favorites::table)
        .values((
            favorites::user_id.eq(user_id),
            favorites::article_id.eq(article.id),
        ))
        .on_conflict_do_nothing()
        .execute(conn)?;
    view_one(conn, Some(user_id), article)
}

/// Symmetric to [`favorite`]: removing an absent edge is a no-op and the
/// derived count never dips below the true cardinality.
pub fn unfavorite(
    conn: &mut SqliteConnection,
    caller: Caller,
    article_id: i32,
) -> Result<ArticleView> {
    let user_id = require_caller(caller)?;
    let article = Article::resolve(conn, ArticleRef::Id(article_id))?;
    delete(
        favorites::table
            .filter(favorites::user_id.eq(user_id))
            .filter(favorites::article_id.eq(article.id)),
    )
    .execute(conn)?;
    view_one(conn, Some(user_id), article)
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ArticleView {
    pub id: i32,
    pub slug: String,
    pub title: String,
    pub description: String,
    pub body: String,
    pub image: Option<String>,
    pub tag_list: Vec<String>,
    #[serde(serialize_with = "serialize_date")]
    pub created_at: NaiveDateTime,
    #[serde(serialize_with = "serialize_opt_date")]
    pub updated_at: Option<NaiveDateTime>,
    pub favorites_count: i64,
    pub comments_count: i64,
    pub favorited: bool,
    pub author: Profile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArticleSort {
    #[default]
    Newest,
    Oldest,
    Top,
}

impl FromStr for ArticleSort {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "newest" | "latest" => Ok(ArticleSort::Newest),
            "oldest" => Ok(ArticleSort::Oldest),
            "top" => Ok(ArticleSort::Top),
            other => {
                Err(ValidationError::from("sort", format!("unknown sort key: {}", other)).into())
            }
        }
    }
}

/// Composable feed filters; every field is optional and they all apply
/// together.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct ArticleFilter {
    /// Substring match on the author's username.
    pub author: Option<String>,
    /// Exact author id (an author's own article list).
    pub author_id: Option<i32>,
    /// Exact tag name; the article must carry it.
    pub tag: Option<String>,
    /// Case-insensitive substring match on the title.
    pub query: Option<String>,
    /// Articles favorited by this user (the reading-list view).
    pub favorited_by: Option<i32>,
}

fn filtered(filter: &ArticleFilter) -> articles::BoxedQuery<'static, Sqlite> {
    let mut query = articles::table.into_boxed();
    if let Some(ref author) = filter.author {
        let pattern = format!("%{}%", author);
        query = query.filter(
            articles::author_id.eq_any(
                users::table
                    .filter(users::username.like(pattern))
                    .select(users::id),
            ),
        );
    }
    if let Some(author_id) = filter.author_id {
        query = query.filter(articles::author_id.eq(author_id));
    }
    if let Some(ref tag) = filter.tag {
        query = query.filter(
            articles::id.eq_any(
                article_tags::table
                    .inner_join(tags::table)
                    .filter(tags::name.eq(tag.clone()))
                    .select(article_tags::article_id),
            ),
        );
    }
    if let Some(ref q) = filter.query {
        // SQLite LIKE is case-insensitive for ASCII.
        query = query.filter(articles::title.like(format!("%{}%", q)));
    }
    if let Some(user_id) = filter.favorited_by {
        query = query.filter(
            articles::id.eq_any(
                favorites::table
                    .filter(favorites::user_id.eq(user_id))
                    .select(favorites::article_id),
            ),
        );
    }
    query
}

/// The feed: one filtered, sorted page of articles plus the unpaginated
/// total. A point-in-time snapshot; concurrent writers become visible on
/// the next call.
pub fn list_articles(
    conn: &mut SqliteConnection,
    viewer: Caller,
    filter: &ArticleFilter,
    sort: ArticleSort,
    page: Page,
) -> Result<Paged<ArticleView>> {
    let total = filtered(filter).count().get_result::<i64>(conn)?;

    let query = filtered(filter);
    let query = match sort {
        ArticleSort::Newest => query.order((articles::created_at.desc(), articles::id.desc())),
        ArticleSort::Oldest => query.order((articles::created_at.asc(), articles::id.asc())),
        // Favorites are counted from the edge set right in the ordering,
        // so the ranking can never drift from the true cardinality.
        ArticleSort::Top => query.order(sql::<BigInt>(
            "(SELECT count(*) FROM favorites WHERE favorites.article_id = articles.id) DESC, \
             articles.created_at DESC, articles.id DESC",
        )),
    };
    let rows = query
        .limit(page.limit())
        .offset(page.offset())
        .load::<Article>(conn)?;
    let items = assemble_views(conn, viewer, rows)?;
    Ok(Paged { items, total })
}

fn view_one(conn: &mut SqliteConnection, viewer: Caller, article: Article) -> Result<ArticleView> {
    assemble_views(conn, viewer, vec![article])?
        .pop()
        .ok_or(Error::NotFound("article"))
}

/// Shapes raw article rows into views: author profiles, tag lists, and
/// counters derived from the relations, all batch-loaded per page.
fn assemble_views(
    conn: &mut SqliteConnection,
    viewer: Caller,
    rows: Vec<Article>,
) -> Result<Vec<ArticleView>> {
    if rows.is_empty() {
        return Ok(Vec::new());
    }
    let article_ids: Vec<i32> = rows.iter().map(|a| a.id).collect();
    let author_ids: Vec<i32> = rows.iter().map(|a| a.author_id).collect();

    let authors: HashMap<i32, User> = users::table
        .filter(users::id.eq_any(&author_ids))
        .load::<User>(conn)?
        .into_iter()
        .map(|user| (user.id, user))
        .collect();

    let mut tags_by_article: HashMap<i32, Vec<String>> = HashMap::new();
    let tag_rows = article_tags::table
        .inner_join(tags::table)
        .filter(article_tags::article_id.eq_any(&article_ids))
        .order(tags::name.asc())
        .select((article_tags::article_id, tags::name))
        .load::<(i32, String)>(conn)?;
    for (article_id, name) in tag_rows {
        tags_by_article.entry(article_id).or_default().push(name);
    }

    let favorites_counts: HashMap<i32, i64> = favorites::table
        .filter(favorites::article_id.eq_any(&article_ids))
        .group_by(favorites::article_id)
        .select((favorites::article_id, count_star()))
        .load::<(i32, i64)>(conn)?
        .into_iter()
        .collect();

    let comments_counts: HashMap<i32, i64> = comments::table
        .filter(comments::article_id.eq_any(&article_ids))
        .group_by(comments::article_id)
        .select((comments::article_id, count_star()))
        .load::<(i32, i64)>(conn)?
        .into_iter()
        .collect();

    let (favorited_set, following_set) = match viewer {
        Some(viewer_id) => {
            let favorited: HashSet<i32> = favorites::table
                .filter(favorites::user_id.eq(viewer_id))
                .filter(favorites::article_id.eq_any(&article_ids))
                .select(favorites::article_id)
                .load::<i32>(conn)?
                .into_iter()
                .collect();
            let following: HashSet<i32> = follows::table
                .filter(follows::follower_id.eq(viewer_id))
                .filter(follows::followed_id.eq_any(&author_ids))
                .select(follows::followed_id)
                .load::<i32>(conn)?
                .into_iter()
                .collect();
            (favorited, following)
        }
        None => (HashSet::new(), HashSet::new()),
    };

    rows.into_iter()
        .map(|article| {
            let author = authors
                .get(&article.author_id)
                .ok_or(Error::NotFound("user"))?;
            Ok(ArticleView {
                favorites_count: favorites_counts.get(&article.id).copied().unwrap_or(0),
                comments_count: comments_counts.get(&article.id).copied().unwrap_or(0),
                favorited: favorited_set.contains(&article.id),
                tag_list: tags_by_article.remove(&article.id).unwrap_or_default(),
                author: author.profile(following_set.contains(&article.author_id)),
                id: article.id,
                slug: article.slug,
                title: article.title,
                description: article.description,
                body: article.body,
                image: article.image,
                created_at: article.created_at,
                updated_at: article.updated_at,
            })
        })
        .collect()
}
