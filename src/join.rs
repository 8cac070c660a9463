//! Joins between patients, follow-up data and the body-map reference.

use std::collections::HashMap;

use crate::config::JoinDirection;
use crate::site::{SiteKey, SiteReference};
use crate::table::{Cell, Table};

/// Left-joins `followup` onto `patients` by the index column of each table.
///
/// Follow-up columns whose names already exist in `patients` get `suffix`
/// appended. The follow-up index column is not repeated. Patients without a
/// follow-up row get missing cells.
pub fn join_followup(patients: &Table, followup: &Table, suffix: &str) -> Table {
    let extra: Vec<String> = followup
        .columns()
        .iter()
        .skip(1)
        .map(|name| {
            if patients.has_column(name) {
                format!("{name}{suffix}")
            } else {
                name.clone()
            }
        })
        .collect();

    let mut by_id: HashMap<String, &[Cell]> = HashMap::with_capacity(followup.len());
    for row in followup.rows() {
        let Some(id) = row.first().filter(|c| !c.is_missing()) else {
            continue;
        };
        // One-to-one: the first follow-up row for a patient wins.
        by_id.entry(id.to_string()).or_insert(&row[1..]);
    }

    let mut columns = patients.columns().to_vec();
    columns.extend(extra);
    let mut joined = Table::new(columns);

    let mut matched = 0usize;
    for row in patients.rows() {
        let mut cells = row.to_vec();
        let id = row.first().map(ToString::to_string).unwrap_or_default();
        if let Some(found) = by_id.get(&id) {
            matched += 1;
            cells.extend_from_slice(found);
        }
        joined.push_row(cells);
    }

    tracing::debug!(
        patients = patients.len(),
        matched,
        "Follow-up data joined"
    );
    joined
}

/// A reference site paired with the tally grouped onto it.
#[derive(Debug, Clone, PartialEq)]
pub struct SiteRow<'a, T> {
    pub site: &'a SiteReference,
    pub tally: T,
}

/// Joins per-site tallies onto the reference table.
///
/// Rows always follow reference order. With [`JoinDirection::Reference`]
/// every reference site appears and unmatched tallies are `T::default()`;
/// with [`JoinDirection::Patient`] only sites present in `groups` appear.
pub fn join_sites<'a, T: Copy + Default>(
    groups: &HashMap<SiteKey, T>,
    reference: &'a [SiteReference],
    direction: JoinDirection,
) -> Vec<SiteRow<'a, T>> {
    reference
        .iter()
        .filter_map(|site| match (groups.get(&site.key), direction) {
            (Some(tally), _) => Some(SiteRow { site, tally: *tally }),
            (None, JoinDirection::Reference) => Some(SiteRow {
                site,
                tally: T::default(),
            }),
            (None, JoinDirection::Patient) => None,
        })
        .collect()
}

/// Number of grouped sites that have no row in the reference table.
pub fn unmatched_sites<T>(groups: &HashMap<SiteKey, T>, reference: &[SiteReference]) -> usize {
    groups
        .keys()
        .filter(|key| !reference.iter().any(|site| &site.key == *key))
        .count()
}
