use std::collections::HashSet;

use diesel::dsl::{count, exists};
use diesel::prelude::*;
use diesel::{insert_into, select};
use serde::Serialize;

use crate::article::{self, ArticleFilter, ArticleSort, ArticleView};
use crate::db::schema::{article_tags, tags};
use crate::types::{Caller, Error, Page, Paged, Result, ValidationError};

#[derive(Debug, PartialEq, Eq, Queryable, Identifiable)]
#[diesel(table_name = tags)]
pub struct Tag {
    pub id: i32,
    pub name: String,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TagView {
    pub name: String,
    pub article_count: i64,
}

/// Known tags ranked by popularity: article count descending, name
/// ascending on ties. `query` narrows by substring, `limit` caps the
/// result after ranking.
pub fn list_tags(
    conn: &mut SqliteConnection,
    query: Option<&str>,
    limit: Option<i64>,
) -> Result<Vec<TagView>> {
    if let Some(limit) = limit {
        if limit < 1 {
            return Err(ValidationError::from("limit", "limit must be >= 1").into());
        }
    }
    let mut rows: Vec<(String, i64)> = match query {
        Some(q) => tags::table
            .left_join(article_tags::table)
            .filter(tags::name.like(format!("%{}%", q)))
            .group_by((tags::id, tags::name))
            .select((tags::name, count(article_tags::tag_id.nullable())))
            .load(conn)?,
        None => tags::table
            .left_join(article_tags::table)
            .group_by((tags::id, tags::name))
            .select((tags::name, count(article_tags::tag_id.nullable())))
            .load(conn)?,
    };
    rows.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    if let Some(limit) = limit {
        rows.truncate(limit as usize);
    }
    Ok(rows
        .into_iter()
        .map(|(name, article_count)| TagView {
            name,
            article_count,
        })
        .collect())
}

/// Bulk idempotent upsert: names already present in the store or repeated
/// within the batch are silently skipped, never an error. Returns how
/// many tags were actually inserted.
pub fn create_tags(conn: &mut SqliteConnection, names: &[String]) -> Result<usize> {
    let mut seen = HashSet::new();
    let mut inserted = 0;
    conn.transaction::<_, Error, _>(|conn| {
        for name in names {
            let name = name.trim();
            if name.is_empty() || !seen.insert(name) {
                continue;
            }
            inserted += insert_into(tags::table)
                .values(tags::name.eq(name))
                .on_conflict_do_nothing()
                .execute(conn)?;
        }
        Ok(())
    })?;
    Ok(inserted)
}

/// The tag-scoped feed: same sorting and pagination as the main article
/// listing, restricted to one tag. Unknown tags are a typed NotFound.
pub fn articles_for_tag(
    conn: &mut SqliteConnection,
    viewer: Caller,
    tag_name: &str,
    sort: ArticleSort,
    page: Page,
) -> Result<Paged<ArticleView>> {
    let known = select(exists(tags::table.filter(tags::name.eq(tag_name))))
        .get_result::<bool>(conn)?;
    if !known {
        return Err(Error::NotFound("tag"));
    }
    let filter = ArticleFilter {
        tag: Some(tag_name.to_owned()),
        ..ArticleFilter::default()
    };
    article::list_articles(conn, viewer, &filter, sort, page)
}
