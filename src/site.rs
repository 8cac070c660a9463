//! Anatomical site keys and the body-map reference table.

use serde::Serialize;

use crate::config::ReferenceColumns;
use crate::error::{PipelineError, Result};
use crate::table::{Cell, Table};

/// The (map, X, Y) triple identifying one anatomical location.
///
/// Each part is stored in its canonical text form so numeric and textual
/// spellings of the same coordinate compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SiteKey {
    pub map: String,
    pub x: String,
    pub y: String,
}

impl SiteKey {
    pub fn new(map: impl ToString, x: impl ToString, y: impl ToString) -> Self {
        Self {
            map: map.to_string(),
            x: x.to_string(),
            y: y.to_string(),
        }
    }

    /// Builds a key from a row, or `None` when any part is missing.
    pub fn from_row(row: &[Cell], columns: [usize; 3]) -> Option<Self> {
        let [map, x, y] = columns.map(|i| &row[i]);
        if map.is_missing() || x.is_missing() || y.is_missing() {
            return None;
        }
        Some(Self::new(map, x, y))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Coordinates {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// One row of the body-map reference table.
#[derive(Debug, Clone, PartialEq)]
pub struct SiteReference {
    pub key: SiteKey,
    pub coordinates: Coordinates,
}

impl SiteReference {
    /// Reads every row of the reference table in file order.
    ///
    /// Rows with an incomplete site key are skipped; an unreadable
    /// coordinate is an error.
    pub fn from_table(table: &Table, columns: &ReferenceColumns) -> Result<Vec<Self>> {
        let index = |name: &str| {
            table
                .column_index(name)
                .ok_or_else(|| PipelineError::MissingColumn {
                    table: "site reference",
                    column: name.to_string(),
                })
        };

        let key_columns = [
            index(columns.map.as_str())?,
            index(columns.x.as_str())?,
            index(columns.y.as_str())?,
        ];
        let coord_columns = [
            (columns.coord_x.as_str(), index(columns.coord_x.as_str())?),
            (columns.coord_y.as_str(), index(columns.coord_y.as_str())?),
            (columns.coord_z.as_str(), index(columns.coord_z.as_str())?),
        ];

        let mut sites = Vec::with_capacity(table.len());
        for (row_number, row) in table.rows().enumerate() {
            let Some(key) = SiteKey::from_row(row, key_columns) else {
                tracing::warn!(row = row_number + 1, "Reference row without a site key, skipping");
                continue;
            };

            let mut values = [0.0; 3];
            for (value, (name, i)) in values.iter_mut().zip(coord_columns) {
                *value = parse_coordinate(&row[i]).ok_or_else(|| {
                    PipelineError::InvalidCoordinate {
                        row: row_number + 1,
                        column: name.to_string(),
                        value: row[i].to_string(),
                    }
                })?;
            }

            sites.push(SiteReference {
                key,
                coordinates: Coordinates {
                    x: values[0],
                    y: values[1],
                    z: values[2],
                },
            });
        }

        Ok(sites)
    }
}

/// Reads a coordinate cell, accepting the Unicode minus sign used by some
/// rows of the reference workbook.
pub fn parse_coordinate(cell: &Cell) -> Option<f64> {
    match cell {
        Cell::Number(n) => Some(*n),
        Cell::Text(s) => s.replace('\u{2212}', "-").trim().parse().ok(),
        Cell::Missing => None,
    }
}
