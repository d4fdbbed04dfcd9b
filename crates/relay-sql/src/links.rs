//! Derived join rows: page links, file links and user mentions. The
//! derived-work dispatcher computes the minimal diff; these functions only
//! issue the adds and removes it decides on, with duplicate-key tolerance.

use models::Id;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PageRef {
    pub external_id: Id,
    pub title: String,
}

pub async fn current_page_links(
    source_page_id: i64,
    db: impl sqlx::Executor<'_, Database = sqlx::Postgres>,
) -> sqlx::Result<Vec<(i64, String)>> {
    sqlx::query_as::<_, (i64, String)>(
        "select target_page_id, link_text from page_links where source_page_id = $1",
    )
    .bind(source_page_id)
    .fetch_all(db)
    .await
}

pub async fn insert_page_links(
    source_page_id: i64,
    links: &[(i64, String)],
    txn: &mut sqlx::PgConnection,
) -> sqlx::Result<()> {
    for (target_page_id, link_text) in links {
        sqlx::query(
            r#"
            insert into page_links (source_page_id, target_page_id, link_text)
            values ($1, $2, $3)
            on conflict do nothing
            "#,
        )
        .bind(source_page_id)
        .bind(target_page_id)
        .bind(link_text)
        .execute(&mut *txn)
        .await?;
    }
    Ok(())
}

pub async fn delete_page_links(
    source_page_id: i64,
    removed: &[(i64, String)],
    txn: &mut sqlx::PgConnection,
) -> sqlx::Result<()> {
    for (target_page_id, link_text) in removed {
        sqlx::query(
            "delete from page_links
             where source_page_id = $1 and target_page_id = $2 and link_text = $3",
        )
        .bind(source_page_id)
        .bind(target_page_id)
        .bind(link_text)
        .execute(&mut *txn)
        .await?;
    }
    Ok(())
}

pub async fn current_file_links(
    source_page_id: i64,
    db: impl sqlx::Executor<'_, Database = sqlx::Postgres>,
) -> sqlx::Result<Vec<(i64, String)>> {
    sqlx::query_as::<_, (i64, String)>(
        "select target_file_id, link_text from file_links where source_page_id = $1",
    )
    .bind(source_page_id)
    .fetch_all(db)
    .await
}

pub async fn insert_file_links(
    source_page_id: i64,
    links: &[(i64, String)],
    txn: &mut sqlx::PgConnection,
) -> sqlx::Result<()> {
    for (target_file_id, link_text) in links {
        sqlx::query(
            r#"
            insert into file_links (source_page_id, target_file_id, link_text)
            values ($1, $2, $3)
            on conflict do nothing
            "#,
        )
        .bind(source_page_id)
        .bind(target_file_id)
        .bind(link_text)
        .execute(&mut *txn)
        .await?;
    }
    Ok(())
}

pub async fn delete_file_links(
    source_page_id: i64,
    removed: &[(i64, String)],
    txn: &mut sqlx::PgConnection,
) -> sqlx::Result<()> {
    for (target_file_id, link_text) in removed {
        sqlx::query(
            "delete from file_links
             where source_page_id = $1 and target_file_id = $2 and link_text = $3",
        )
        .bind(source_page_id)
        .bind(target_file_id)
        .bind(link_text)
        .execute(&mut *txn)
        .await?;
    }
    Ok(())
}

pub async fn current_mentions(
    source_page_id: i64,
    db: impl sqlx::Executor<'_, Database = sqlx::Postgres>,
) -> sqlx::Result<Vec<i64>> {
    sqlx::query_scalar::<_, i64>(
        "select mentioned_user_id from page_mentions where source_page_id = $1",
    )
    .bind(source_page_id)
    .fetch_all(db)
    .await
}

pub async fn insert_mentions(
    source_page_id: i64,
    user_ids: &[i64],
    txn: &mut sqlx::PgConnection,
) -> sqlx::Result<()> {
    for user_id in user_ids {
        sqlx::query(
            r#"
            insert into page_mentions (source_page_id, mentioned_user_id)
            values ($1, $2)
            on conflict do nothing
            "#,
        )
        .bind(source_page_id)
        .bind(user_id)
        .execute(&mut *txn)
        .await?;
    }
    Ok(())
}

pub async fn delete_mentions(
    source_page_id: i64,
    user_ids: &[i64],
    txn: &mut sqlx::PgConnection,
) -> sqlx::Result<()> {
    sqlx::query(
        "delete from page_mentions
         where source_page_id = $1 and mentioned_user_id = any($2)",
    )
    .bind(source_page_id)
    .bind(user_ids)
    .execute(txn)
    .await?;
    Ok(())
}

/// Outgoing references of a page, excluding soft-deleted targets.
pub async fn outgoing_links(
    source_page_id: i64,
    db: impl sqlx::Executor<'_, Database = sqlx::Postgres>,
) -> sqlx::Result<Vec<PageRef>> {
    sqlx::query_as::<_, PageRef>(
        r#"
        select p.external_id, p.title
        from page_links l
        join pages p on p.id = l.target_page_id
        where l.source_page_id = $1 and not p.is_deleted
        order by p.title asc
        "#,
    )
    .bind(source_page_id)
    .fetch_all(db)
    .await
}

/// Pages referring to this page, excluding soft-deleted sources.
pub async fn incoming_links(
    target_page_id: i64,
    db: impl sqlx::Executor<'_, Database = sqlx::Postgres>,
) -> sqlx::Result<Vec<PageRef>> {
    sqlx::query_as::<_, PageRef>(
        r#"
        select p.external_id, p.title
        from page_links l
        join pages p on p.id = l.source_page_id
        where l.target_page_id = $1 and not p.is_deleted
        order by p.title asc
        "#,
    )
    .bind(target_page_id)
    .fetch_all(db)
    .await
}

/// Pages that @-mention the given user, newest first.
pub async fn pages_mentioning_user(
    user_id: i64,
    db: impl sqlx::Executor<'_, Database = sqlx::Postgres>,
) -> sqlx::Result<Vec<PageRef>> {
    sqlx::query_as::<_, PageRef>(
        r#"
        select p.external_id, p.title
        from page_mentions m
        join pages p on p.id = m.source_page_id
        where m.mentioned_user_id = $1 and not p.is_deleted
        order by m.created_at desc
        "#,
    )
    .bind(user_id)
    .fetch_all(db)
    .await
}
