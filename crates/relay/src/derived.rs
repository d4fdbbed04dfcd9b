//! Derived work driven by document quiescence: cross-page links, file
//! references and user @-mentions are re-derived from the current text, and
//! an embedding recompute is enqueued. Every pass diffs the desired row set
//! against what is persisted and writes only the minimal change, so calling
//! twice with identical text has no observable effect.

use crate::app::App;
use crate::collab::{protocol, ServerFrame};
use crate::content;
use crate::jobs;
use relay_sql::pages::Page;
use std::collections::HashSet;
use yrs::updates::decoder::Decode;
use yrs::{GetString, Transact};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncOutcome {
    pub page_links_changed: bool,
    pub file_links_changed: bool,
    pub mentions_changed: bool,
}

impl SyncOutcome {
    pub fn any_links_changed(&self) -> bool {
        self.page_links_changed || self.file_links_changed
    }
}

/// Additions and removals taking `existing` to `desired`.
fn diff<T: std::hash::Hash + Eq + Clone>(
    desired: &HashSet<T>,
    existing: &HashSet<T>,
) -> (Vec<T>, Vec<T>) {
    let to_add = desired.difference(existing).cloned().collect();
    let to_remove = existing.difference(desired).cloned().collect();
    (to_add, to_remove)
}

/// Text content of an encoded CRDT snapshot.
pub fn snapshot_content(snapshot: &[u8]) -> anyhow::Result<String> {
    let doc = yrs::Doc::new();
    let text = doc.get_or_insert_text(protocol::DOC_TEXT_KEY);
    let update = yrs::Update::decode_v1(snapshot)
        .map_err(|err| anyhow::anyhow!("decoding snapshot: {err}"))?;
    doc.transact_mut()
        .apply_update(update)
        .map_err(|err| anyhow::anyhow!("applying snapshot: {err}"))?;
    let content = text.get_string(&doc.transact());
    Ok(content)
}

/// The quiescence worker: fold snapshot text back into the page row, run the
/// three derivation passes, notify the room, and queue the embedding
/// recompute.
pub async fn sync_snapshot_with_page(app: &App, room_id: &str) -> anyhow::Result<()> {
    let Some(page_external_id) = protocol::page_external_id_for_room(room_id) else {
        anyhow::bail!("unparseable room id {room_id}");
    };
    let Some(snapshot) = relay_sql::updates::get_snapshot(room_id, &app.pool).await? else {
        tracing::info!(room = room_id, "no snapshot to sync");
        return Ok(());
    };
    let Some(page) = relay_sql::pages::fetch_by_external_id(page_external_id, &app.pool).await?
    else {
        anyhow::bail!("no page for room {room_id}");
    };
    if page.is_deleted {
        return Ok(());
    }

    let content = snapshot_content(&snapshot.snapshot)?;
    relay_sql::pages::update_content(page.id, &content, &app.pool).await?;

    let outcome = sync_derived_rows(app, &page, &content).await?;
    tracing::info!(
        room = room_id,
        ?outcome,
        "synced snapshot into page and derived rows"
    );

    if !app.settings.ask_enabled {
        return Ok(());
    }
    app.jobs
        .enqueue(
            jobs::UPDATE_PAGE_EMBEDDING,
            serde_json::json!({
                "page_id": page.external_id,
                "content_hash": content::content_sha256(&content),
            }),
        )
        .await?;
    Ok(())
}

/// Run the three passes over the given content. Emits `links_updated` into
/// the page's room after each pass that changed rows.
pub async fn sync_derived_rows(
    app: &App,
    page: &Page,
    content: &str,
) -> anyhow::Result<SyncOutcome> {
    let room_id = protocol::room_id_for_page(page.external_id);
    let mut outcome = SyncOutcome::default();

    outcome.page_links_changed = sync_page_links(&app.pool, page, content).await?;
    if outcome.page_links_changed {
        notify_links_updated(app, &room_id, page);
    }

    outcome.file_links_changed = sync_file_links(&app.pool, page, content).await?;
    if outcome.file_links_changed {
        notify_links_updated(app, &room_id, page);
    }

    outcome.mentions_changed = sync_mentions(&app.pool, page, content).await?;
    if outcome.mentions_changed {
        notify_links_updated(app, &room_id, page);
    }

    Ok(outcome)
}

fn notify_links_updated(app: &App, room_id: &str, page: &Page) {
    app.rooms.broadcast(
        room_id,
        ServerFrame::LinksUpdated {
            page_id: page.external_id.to_string(),
        },
    );
}

/// Page-to-page links. Unknown and soft-deleted targets are silently
/// dropped.
async fn sync_page_links(pool: &sqlx::PgPool, page: &Page, content: &str) -> anyhow::Result<bool> {
    let parsed = content::parse_page_links(content);

    let external_ids: Vec<String> = parsed.iter().map(|(_, id)| id.clone()).collect();
    let live = if external_ids.is_empty() {
        Vec::new()
    } else {
        relay_sql::pages::live_ids_by_external_ids(&external_ids, pool).await?
    };
    let by_external: std::collections::HashMap<String, i64> = live
        .into_iter()
        .map(|(id, external)| (external, id))
        .collect();

    let desired: HashSet<(i64, String)> = parsed
        .into_iter()
        .filter_map(|(text, external)| Some((*by_external.get(&external)?, text)))
        .collect();
    let existing: HashSet<(i64, String)> =
        relay_sql::links::current_page_links(page.id, pool)
            .await?
            .into_iter()
            .collect();

    if desired == existing {
        return Ok(false);
    }
    let (to_add, to_remove) = diff(&desired, &existing);

    let mut txn = pool.begin().await?;
    relay_sql::links::delete_page_links(page.id, &to_remove, &mut txn).await?;
    relay_sql::links::insert_page_links(page.id, &to_add, &mut txn).await?;
    txn.commit().await?;
    Ok(true)
}

/// Page-to-file links. Entries with a non-UUID file id never reach this
/// function; unknown and soft-deleted files drop out here.
async fn sync_file_links(pool: &sqlx::PgPool, page: &Page, content: &str) -> anyhow::Result<bool> {
    let parsed = content::parse_file_links(content);

    let external_ids: Vec<uuid::Uuid> = parsed.iter().map(|(_, id)| *id).collect();
    let live = if external_ids.is_empty() {
        Vec::new()
    } else {
        relay_sql::files::live_ids_by_external_ids(&external_ids, pool).await?
    };
    let by_external: std::collections::HashMap<uuid::Uuid, i64> = live
        .into_iter()
        .map(|(id, external)| (external, id))
        .collect();

    let desired: HashSet<(i64, String)> = parsed
        .into_iter()
        .filter_map(|(text, external)| Some((*by_external.get(&external)?, text)))
        .collect();
    let existing: HashSet<(i64, String)> =
        relay_sql::links::current_file_links(page.id, pool)
            .await?
            .into_iter()
            .collect();

    if desired == existing {
        return Ok(false);
    }
    let (to_add, to_remove) = diff(&desired, &existing);

    let mut txn = pool.begin().await?;
    relay_sql::links::delete_file_links(page.id, &to_remove, &mut txn).await?;
    relay_sql::links::insert_file_links(page.id, &to_add, &mut txn).await?;
    txn.commit().await?;
    Ok(true)
}

/// User @-mentions. Unknown users are silently dropped.
async fn sync_mentions(pool: &sqlx::PgPool, page: &Page, content: &str) -> anyhow::Result<bool> {
    let mentioned = content::parse_user_mentions(content);

    let desired: HashSet<i64> = if mentioned.is_empty() {
        HashSet::new()
    } else {
        relay_sql::users::resolve_external_ids(&mentioned, pool)
            .await?
            .into_iter()
            .collect()
    };
    let existing: HashSet<i64> = relay_sql::links::current_mentions(page.id, pool)
        .await?
        .into_iter()
        .collect();

    if desired == existing {
        return Ok(false);
    }
    let (to_add, to_remove) = diff(&desired, &existing);

    let mut txn = pool.begin().await?;
    relay_sql::links::delete_mentions(page.id, &to_remove, &mut txn).await?;
    relay_sql::links::insert_mentions(page.id, &to_add, &mut txn).await?;
    txn.commit().await?;
    Ok(true)
}

#[cfg(test)]
mod test {
    use super::*;
    use yrs::{ReadTxn, Text};

    #[test]
    fn test_diff_computes_minimal_change() {
        let desired: HashSet<i64> = [1, 2, 3].into_iter().collect();
        let existing: HashSet<i64> = [2, 3, 4].into_iter().collect();
        let (mut add, mut remove) = diff(&desired, &existing);
        add.sort();
        remove.sort();
        assert_eq!(add, vec![1]);
        assert_eq!(remove, vec![4]);
    }

    #[test]
    fn test_diff_of_equal_sets_is_empty() {
        let set: HashSet<(i64, String)> = [(1, "a".to_string())].into_iter().collect();
        let (add, remove) = diff(&set, &set.clone());
        assert!(add.is_empty() && remove.is_empty());
    }

    #[test]
    fn test_snapshot_content_round_trip() {
        let doc = yrs::Doc::new();
        let text = doc.get_or_insert_text(protocol::DOC_TEXT_KEY);
        {
            let mut txn = doc.transact_mut();
            text.insert(&mut txn, 0, "See [other](/pages/abc123)");
        }
        let snapshot = doc
            .transact()
            .encode_state_as_update_v1(&yrs::StateVector::default());

        let content = snapshot_content(&snapshot).unwrap();
        assert_eq!(content, "See [other](/pages/abc123)");
    }

    #[test]
    fn test_empty_snapshot_yields_empty_content() {
        let doc = yrs::Doc::new();
        let _text = doc.get_or_insert_text(protocol::DOC_TEXT_KEY);
        let snapshot = doc
            .transact()
            .encode_state_as_update_v1(&yrs::StateVector::default());
        assert_eq!(snapshot_content(&snapshot).unwrap(), "");
    }
}
