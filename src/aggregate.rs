//! Per-site counts and drainage frequencies.

use serde::Serialize;
use std::collections::HashMap;

use crate::config::{JoinDirection, PatientColumns};
use crate::error::{PipelineError, Result};
use crate::join::{SiteRow, join_sites};
use crate::site::{Coordinates, SiteKey, SiteReference};
use crate::table::Table;

/// Constant scale written into the legacy tabular columns.
pub const SCALE: f64 = 1.0;

/// One output row: a reference site and its count.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregatedSite {
    /// 1-based position in the output.
    pub node: usize,
    pub key: SiteKey,
    pub coordinates: Coordinates,
    /// Raw count, or the percentage of the site's patients when normalising.
    pub count: f64,
    /// Numerator of the percentage; only set when normalising.
    pub selected_node: Option<u64>,
    pub scale: f64,
}

/// Numerator and denominator of a normalised site count.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    pub selected: u64,
    pub any: u64,
}

impl Tally {
    /// `selected / any * 100`, or 0 for a site without patients.
    pub fn percentage(self) -> f64 {
        if self.any == 0 {
            0.0
        } else {
            (self.selected as f64 / self.any as f64) * 100.0
        }
    }
}

/// Counts rows per site key. Rows with an incomplete key are not counted.
pub fn count_by_site(table: &Table, columns: &PatientColumns) -> Result<HashMap<SiteKey, u64>> {
    let mut key_columns = [0usize; 3];
    for (slot, name) in key_columns.iter_mut().zip(columns.site_key()) {
        *slot = table
            .column_index(name)
            .ok_or_else(|| PipelineError::MissingColumn {
                table: "patient",
                column: name.to_string(),
            })?;
    }

    let mut counts = HashMap::new();
    for row in table.rows() {
        if let Some(key) = SiteKey::from_row(row, key_columns) {
            *counts.entry(key).or_insert(0) += 1;
        }
    }
    Ok(counts)
}

/// Aggregates `subset` onto the reference sites.
///
/// When `normalise` is set the count becomes the share of `population`
/// patients at each site that are also in `subset`, as a percentage.
pub fn aggregate(
    subset: &Table,
    population: &Table,
    reference: &[SiteReference],
    normalise: bool,
    direction: JoinDirection,
    columns: &PatientColumns,
) -> Result<Vec<AggregatedSite>> {
    let selected = count_by_site(subset, columns)?;

    if !normalise {
        let rows = join_sites(&selected, reference, direction);
        return Ok(into_sites(rows, |&count| (count as f64, None)));
    }

    // The population drives the rows; subset sites outside it are dropped.
    let tallies: HashMap<SiteKey, Tally> = count_by_site(population, columns)?
        .into_iter()
        .map(|(key, any)| {
            let selected = selected.get(&key).copied().unwrap_or(0);
            (key, Tally { selected, any })
        })
        .collect();

    let rows = join_sites(&tallies, reference, direction);
    Ok(into_sites(rows, |tally| (tally.percentage(), Some(tally.selected))))
}

fn into_sites<T>(
    rows: Vec<SiteRow<'_, T>>,
    value: impl Fn(&T) -> (f64, Option<u64>),
) -> Vec<AggregatedSite> {
    rows.into_iter()
        .enumerate()
        .map(|(i, row)| {
            let (count, selected_node) = value(&row.tally);
            AggregatedSite {
                node: i + 1,
                key: row.site.key.clone(),
                coordinates: row.site.coordinates,
                count,
                selected_node,
                scale: SCALE,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Cell;

    fn reference() -> Vec<SiteReference> {
        vec![
            SiteReference {
                key: SiteKey::new(1, 0, 0),
                coordinates: Coordinates { x: 10.0, y: 20.0, z: 30.0 },
            },
            SiteReference {
                key: SiteKey::new(1, 1, 1),
                coordinates: Coordinates { x: -1.0, y: -2.0, z: -3.0 },
            },
        ]
    }

    fn patients(rows: &[[&str; 4]]) -> Table {
        let mut table = Table::new(["Map", "X", "Y", "Node Fields"].map(String::from).to_vec());
        for row in rows {
            table.push_row(row.map(Cell::parse).to_vec());
        }
        table
    }

    #[test]
    fn test_percentage_guards_zero() {
        assert_eq!(Tally { selected: 0, any: 0 }.percentage(), 0.0);
        assert_eq!(Tally { selected: 3, any: 3 }.percentage(), 100.0);
        assert_eq!(Tally { selected: 1, any: 4 }.percentage(), 25.0);
    }

    #[test]
    fn test_count_by_site_skips_incomplete_keys() {
        let table = patients(&[["1", "0", "0", "ro"], ["1", "", "0", "ro"], ["1", "0.0", "0", ""]]);
        let counts = count_by_site(&table, &PatientColumns::default()).unwrap();

        assert_eq!(counts.len(), 1);
        assert_eq!(counts[&SiteKey::new(1, 0, 0)], 2);
    }

    #[test]
    fn test_count_by_site_missing_column() {
        let table = Table::new(vec!["Map".into()]);
        let err = count_by_site(&table, &PatientColumns::default()).unwrap_err();
        assert!(matches!(err, PipelineError::MissingColumn { column, .. } if column == "X"));
    }

    #[test]
    fn test_raw_counts_cover_every_reference_site() {
        let table = patients(&[["1", "0", "0", "ro"], ["1", "0", "0", "rc1"]]);
        let sites = aggregate(
            &table,
            &table,
            &reference(),
            false,
            JoinDirection::Reference,
            &PatientColumns::default(),
        )
        .unwrap();

        assert_eq!(sites.len(), 2);
        assert_eq!((sites[0].node, sites[0].count), (1, 2.0));
        assert_eq!((sites[1].node, sites[1].count), (2, 0.0));
        assert_eq!(sites[0].coordinates.x, 10.0);
        assert_eq!(sites[1].selected_node, None);
        assert_eq!(sites[1].scale, SCALE);
    }

    #[test]
    fn test_normalised_full_match_is_one_hundred() {
        let table = patients(&[["1", "0", "0", "ro"], ["1", "0", "0", "rc1"]]);
        let sites = aggregate(
            &table,
            &table,
            &reference(),
            true,
            JoinDirection::Reference,
            &PatientColumns::default(),
        )
        .unwrap();

        assert_eq!(sites[0].count, 100.0);
        assert_eq!(sites[0].selected_node, Some(2));
        assert_eq!(sites[1].count, 0.0);
        assert_eq!(sites[1].selected_node, Some(0));
    }

    #[test]
    fn test_normalised_partial_match() {
        let population = patients(&[
            ["1", "0", "0", "ro"],
            ["1", "0", "0", "rc1"],
            ["1", "0", "0", "lo"],
            ["1", "1", "1", "lo"],
        ]);
        let subset = patients(&[["1", "0", "0", "ro"]]);

        let sites = aggregate(
            &subset,
            &population,
            &reference(),
            true,
            JoinDirection::Reference,
            &PatientColumns::default(),
        )
        .unwrap();

        assert!((sites[0].count - 100.0 / 3.0).abs() < 1e-9);
        assert_eq!(sites[1].count, 0.0);
        assert_eq!(sites[1].selected_node, Some(0));
    }

    #[test]
    fn test_patient_driven_renumbers_from_one() {
        let table = patients(&[["1", "1", "1", "ro"]]);
        let sites = aggregate(
            &table,
            &table,
            &reference(),
            false,
            JoinDirection::Patient,
            &PatientColumns::default(),
        )
        .unwrap();

        assert_eq!(sites.len(), 1);
        assert_eq!(sites[0].node, 1);
        assert_eq!(sites[0].key, SiteKey::new(1, 1, 1));
    }
}
