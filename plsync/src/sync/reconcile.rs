use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use super::item::Item;

/// Items of one provenance, keyed by id.
pub type ItemSet = BTreeMap<String, Item>;

/// Merges the remote view of a collection into the local one and renumbers
/// the result.
///
/// Local items form the base: remote items update their counterparts or are
/// added as new entries, and items the remote no longer lists are kept. The
/// merged items are ordered by their current index (id breaks ties, unknown
/// indices go last) and numbered `0..n`. The returned list is in that order
/// and every item carries the flags for the writes it still needs.
pub fn reconcile(local: ItemSet, remote: ItemSet) -> Vec<Item> {
    let mut merged = local;
    for (id, incoming) in remote {
        match merged.entry(id) {
            Entry::Occupied(mut existing) => existing.get_mut().update(&incoming),
            Entry::Vacant(slot) => {
                slot.insert(incoming);
            }
        }
    }

    let mut ordered: Vec<Item> = merged.into_values().collect();
    ordered.sort_by(compare_position);
    for (position, item) in ordered.iter_mut().enumerate() {
        item.assign_position(position);
    }
    ordered
}

fn compare_position(left: &Item, right: &Item) -> Ordering {
    match (left.index(), right.index()) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
    .then_with(|| left.id().cmp(right.id()))
}

/// Number of items that will need a materialization or a tag rewrite.
pub fn pending_writes(items: &[Item]) -> usize {
    items
        .iter()
        .filter(|item| item.local_path().is_none() || item.needs_write())
        .count()
}
