//! Loading of the CSV exports of the patient, follow-up and body-map workbooks.

use anyhow::{Context, Result};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::{debug, info};

use crate::config::PipelineConfig;
use crate::join::join_followup;
use crate::site::SiteReference;
use crate::table::{Cell, Table};

/// Name given to the row index column when the export left it unnamed.
pub const INDEX_COLUMN: &str = "index";

/// Headers produced by spreadsheet exports for blank or index-only columns.
fn is_placeholder_header(name: &str) -> bool {
    name.is_empty() || name.starts_with("Unnamed:")
}

/// Reads CSV with a header row into a [`Table`], dropping placeholder columns.
pub fn read_table<R: Read>(reader: R) -> Result<Table> {
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = rdr.headers()?.clone();
    // The first column is the row index and is kept even when unnamed.
    let kept: Vec<usize> = headers
        .iter()
        .enumerate()
        .filter(|(i, h)| *i == 0 || !is_placeholder_header(h))
        .map(|(i, _)| i)
        .collect();

    let columns = kept
        .iter()
        .map(|&i| match &headers[i] {
            h if i == 0 && is_placeholder_header(h) => INDEX_COLUMN.to_string(),
            h => h.to_string(),
        })
        .collect();
    let mut table = Table::new(columns);

    for result in rdr.records() {
        let record = result?;
        table.push_row(
            kept.iter()
                .map(|&i| record.get(i).map_or(Cell::Missing, Cell::parse))
                .collect(),
        );
    }

    Ok(table)
}

pub fn load_table(path: &Path) -> Result<Table> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let table = read_table(file).with_context(|| format!("reading {}", path.display()))?;
    debug!(path = %path.display(), rows = table.len(), columns = table.columns().len(), "Table loaded");
    Ok(table)
}

/// Locations of the three input tables.
#[derive(Debug, Clone)]
pub struct InputPaths<'a> {
    pub sites: &'a Path,
    pub patients: &'a Path,
    pub followup: Option<&'a Path>,
}

/// Everything the pipeline needs, loaded once.
#[derive(Debug, Clone)]
pub struct Datasets {
    /// Patients with follow-up columns already joined in.
    pub patients: Table,
    pub reference: Vec<SiteReference>,
}

impl Datasets {
    #[tracing::instrument(skip_all)]
    pub fn load(paths: &InputPaths<'_>, config: &PipelineConfig) -> Result<Self> {
        let reference_table = load_table(paths.sites)?;
        let reference = SiteReference::from_table(&reference_table, &config.reference_columns)
            .with_context(|| format!("reading sites from {}", paths.sites.display()))?;

        let mut patients = load_table(paths.patients)?;
        if let Some(followup_path) = paths.followup {
            let followup = load_table(followup_path)?;
            patients = join_followup(&patients, &followup, &config.followup_suffix);
        }

        info!(
            sites = reference.len(),
            patients = patients.len(),
            "Data loaded"
        );

        Ok(Self {
            patients,
            reference,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_table_drops_unnamed_columns() {
        let csv = "Unnamed: 0,Map,X,Y,Unnamed: 5,Node Fields\n\
                   7,1,0,0,,rposta rc1\n";
        let table = read_table(csv.as_bytes()).unwrap();

        assert_eq!(table.columns(), ["index", "Map", "X", "Y", "Node Fields"]);
        let row = table.rows().next().unwrap();
        assert_eq!(row[0], Cell::Number(7.0));
        assert_eq!(row[4], Cell::Text("rposta rc1".into()));
    }

    #[test]
    fn test_read_table_names_blank_index_column() {
        let table = read_table(",Map,X\n1,1,0\n".as_bytes()).unwrap();

        assert_eq!(table.sorted_columns(), ["Map", "X", "index"]);
        assert_eq!(table.rows().next().unwrap()[0], Cell::Number(1.0));
    }

    #[test]
    fn test_read_table_short_records() {
        let csv = "id,Age,Sex\n1,60\n";
        let table = read_table(csv.as_bytes()).unwrap();
        let row = table.rows().next().unwrap();
        assert!(row[2].is_missing());
    }

    #[test]
    fn test_load_table_missing_file() {
        assert!(load_table(Path::new("/nonexistent/patients.csv")).is_err());
    }
}
