use crate::kommo_client::{KommoClient, LeadFilter};
use crate::models::{CanonicalId, Lead, PeriodWindow};
use std::collections::HashSet;

/// Drops repeated lead ids, keeping the first occurrence and the input order.
pub fn dedup_by_id(leads: Vec<Lead>) -> Vec<Lead> {
    let mut seen = HashSet::with_capacity(leads.len());
    leads.into_iter().filter(|l| seen.insert(l.id)).collect()
}

/// `dedup_by_id(a ++ b)`.
pub fn merge_dedup(a: Vec<Lead>, b: Vec<Lead>) -> Vec<Lead> {
    let mut all = a;
    all.extend(b);
    dedup_by_id(all)
}

/// Leads of `pipeline_id` created inside `window` (or ever, when `None`).
pub async fn fetch_created(
    kommo: &KommoClient,
    pipeline_id: &CanonicalId,
    window: Option<PeriodWindow>,
) -> Vec<Lead> {
    let filter = LeadFilter {
        pipeline_id: Some(pipeline_id.clone()),
        created: window,
        ..Default::default()
    };
    kommo.list_leads(&filter).await
}

/// Created leads plus the "Incoming leads" inbox, merged.
pub async fn fetch_created_with_unsorted(
    kommo: &KommoClient,
    pipeline_id: &CanonicalId,
    window: Option<PeriodWindow>,
) -> Vec<Lead> {
    let created = fetch_created(kommo, pipeline_id, window).await;
    let unsorted = kommo.list_unsorted(Some(pipeline_id), window).await;
    if !unsorted.is_empty() {
        tracing::debug!("Merging {} unsorted leads into created set", unsorted.len());
    }
    merge_dedup(created, unsorted)
}

/// Leads with `status_id` that closed inside `window`, regardless of creation date.
pub async fn fetch_closed(
    kommo: &KommoClient,
    pipeline_id: &CanonicalId,
    status_id: &CanonicalId,
    window: PeriodWindow,
) -> Vec<Lead> {
    let filter = LeadFilter {
        pipeline_id: Some(pipeline_id.clone()),
        status_id: Some(status_id.clone()),
        closed: Some(window),
        ..Default::default()
    };
    kommo.list_leads(&filter).await
}

/// Volume of won leads in `window`.
///
/// With `reconcile` set, the update-time query is merged in as well since some
/// pipelines leave `closed_at` unset when a lead is moved to the won stage.
/// Leads from the update query that do not carry the won status are discarded.
pub async fn fetch_won_in_window(
    kommo: &KommoClient,
    pipeline_id: &CanonicalId,
    won_status_id: &CanonicalId,
    window: PeriodWindow,
    reconcile: bool,
) -> Vec<Lead> {
    let closed = fetch_closed(kommo, pipeline_id, won_status_id, window).await;
    if !reconcile {
        return closed;
    }

    let filter = LeadFilter {
        pipeline_id: Some(pipeline_id.clone()),
        status_id: Some(won_status_id.clone()),
        updated: Some(window),
        ..Default::default()
    };
    let updated: Vec<Lead> = kommo
        .list_leads(&filter)
        .await
        .into_iter()
        .filter(|l| l.has_status(won_status_id))
        .collect();

    let closed_count = closed.len();
    let merged = merge_dedup(closed, updated);
    tracing::debug!(
        "Won leads: {} by closed_at, {} after updated_at reconciliation",
        closed_count,
        merged.len()
    );
    merged
}

/// Union of every follow-up pipeline's leads created inside `window`.
pub async fn fetch_followup(
    kommo: &KommoClient,
    pipeline_ids: &[CanonicalId],
    window: Option<PeriodWindow>,
) -> Vec<Lead> {
    let mut all = Vec::new();
    for pipeline_id in pipeline_ids {
        all.extend(fetch_created(kommo, pipeline_id, window).await);
    }
    dedup_by_id(all)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lead(id: i64, name: &str) -> Lead {
        Lead {
            id,
            name: Some(name.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_dedup_keeps_first_occurrence_in_order() {
        let leads = vec![lead(3, "a"), lead(1, "b"), lead(3, "c"), lead(2, "d"), lead(1, "e")];
        let deduped = dedup_by_id(leads);
        let ids: Vec<i64> = deduped.iter().map(|l| l.id).collect();
        assert_eq!(ids, vec![3, 1, 2]);
        assert_eq!(deduped[0].display_name(), "a");
        assert_eq!(deduped[1].display_name(), "b");
    }

    #[test]
    fn test_dedup_is_idempotent() {
        let once = dedup_by_id(vec![lead(1, "a"), lead(1, "b"), lead(2, "c")]);
        let twice = dedup_by_id(once.clone());
        assert_eq!(
            once.iter().map(|l| l.id).collect::<Vec<_>>(),
            twice.iter().map(|l| l.id).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_merge_dedup_prefers_first_source() {
        let merged = merge_dedup(vec![lead(1, "closed")], vec![lead(1, "updated"), lead(2, "x")]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].display_name(), "closed");
    }
}
