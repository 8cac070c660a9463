//! Filter → group → join → export, once per filter variant.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use tracing::{info, warn};

use crate::aggregate::{aggregate, count_by_site};
use crate::config::{EmptySubsetPolicy, PipelineConfig};
use crate::error::{PipelineError, Result};
use crate::filter::{FilterExpression, NodeFieldMode, apply_filters};
use crate::join::unmatched_sites;
use crate::loader::Datasets;
use crate::metrics::{Observer, Timer};
use crate::output::{ExportTarget, OutputFormat, export};

/// Per-run choices made on the command line.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub filter: FilterExpression,
    pub mode: NodeFieldMode,
    pub normalise: bool,
    pub formats: Vec<OutputFormat>,
    pub output: PathBuf,
}

/// Files written for one filter variant.
#[derive(Debug, Clone, Serialize)]
pub struct Artifact {
    pub label: String,
    pub patients: usize,
    pub sites: usize,
    pub paths: Vec<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub filter: String,
    pub normalised: bool,
    pub artifacts: Vec<Artifact>,
    /// Labels of variants that matched no patients and were not written.
    pub skipped: Vec<String>,
}

/// Checks the patient table has the site-key columns before anything runs.
fn validate_schema(data: &Datasets, config: &PipelineConfig) -> Result<()> {
    for column in config.patient_columns.site_key() {
        if !data.patients.has_column(column) {
            return Err(PipelineError::MissingColumn {
                table: "patient",
                column: column.to_string(),
            });
        }
    }
    Ok(())
}

#[tracing::instrument(skip_all, fields(filter = %options.filter, normalise = options.normalise))]
pub fn run(
    data: &Datasets,
    config: &PipelineConfig,
    options: &RunOptions,
    observer: &dyn Observer,
) -> Result<RunReport> {
    let _timer = Timer::start(observer, "pipeline.run");
    let started_at = Utc::now();

    validate_schema(data, config)?;
    observer.counter("patients.total", "", data.patients.len() as u64);

    let subsets = {
        let _timer = Timer::start(observer, "pipeline.filter");
        apply_filters(
            &data.patients,
            &options.filter,
            options.mode,
            &config.patient_columns.node_fields,
        )?
    };

    let mut report = RunReport {
        started_at,
        filter: options.filter.to_string(),
        normalised: options.normalise,
        artifacts: Vec::new(),
        skipped: Vec::new(),
    };

    for variant in subsets {
        observer.counter("subset.size", &variant.label, variant.subset.len() as u64);

        if variant.subset.is_empty() && config.empty_subset == EmptySubsetPolicy::Skip {
            warn!(label = %variant.label, "No patients matched, skipping output");
            report.skipped.push(variant.label);
            continue;
        }

        let sites = {
            let _timer = Timer::start(observer, "pipeline.aggregate");
            aggregate(
                &variant.subset,
                &variant.population,
                &data.reference,
                options.normalise,
                config.join,
                &config.patient_columns,
            )?
        };

        let grouped = count_by_site(&variant.subset, &config.patient_columns)?;
        let unmatched = unmatched_sites(&grouped, &data.reference);
        if unmatched > 0 {
            warn!(label = %variant.label, unmatched, "Patient sites missing from the reference table");
        }
        observer.counter("sites.unmatched", &variant.label, unmatched as u64);

        let group = variant.tag.as_deref().unwrap_or(&config.group_name);
        let paths = export(
            &sites,
            &options.formats,
            ExportTarget {
                base: &options.output,
                tag: variant.tag.as_deref(),
                normalised: options.normalise,
                group,
            },
        )?;
        observer.counter("files.written", &variant.label, paths.len() as u64);

        report.artifacts.push(Artifact {
            label: variant.label,
            patients: variant.subset.len(),
            sites: sites.len(),
            paths,
        });
    }

    info!(
        artifacts = report.artifacts.len(),
        skipped = report.skipped.len(),
        "Run complete"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::RecordingObserver;
    use crate::site::{Coordinates, SiteKey, SiteReference};
    use crate::table::{Cell, Table};
    use std::env;
    use std::fs;

    fn datasets() -> Datasets {
        let mut patients = Table::new(
            ["id", "Map", "X", "Y", "Node Fields", "Age"]
                .map(String::from)
                .to_vec(),
        );
        for row in [
            ["1", "1", "0", "0", "ro", "60"],
            ["2", "1", "0", "0", "rposta", "60"],
            ["3", "1", "5", "5", "ro", "30"],
        ] {
            patients.push_row(row.map(Cell::parse).to_vec());
        }

        Datasets {
            patients,
            reference: vec![
                SiteReference {
                    key: SiteKey::new(1, 0, 0),
                    coordinates: Coordinates { x: 1.0, y: 1.0, z: 1.0 },
                },
                SiteReference {
                    key: SiteKey::new(1, 1, 1),
                    coordinates: Coordinates { x: 2.0, y: 2.0, z: 2.0 },
                },
            ],
        }
    }

    fn options(filter: &str, dir: &str) -> RunOptions {
        RunOptions {
            filter: filter.parse().unwrap(),
            mode: NodeFieldMode::Expand,
            normalise: false,
            formats: vec![OutputFormat::Ipdata],
            output: env::temp_dir().join(dir).join("melanoma"),
        }
    }

    #[test]
    fn test_empty_variant_is_skipped_by_default() {
        let observer = RecordingObserver::new();
        let options = options("Node Fields=ro,lc5", "melanoma_sites_test_skip");

        let report = run(&datasets(), &PipelineConfig::default(), &options, &observer).unwrap();

        assert_eq!(report.artifacts.len(), 1);
        assert_eq!(report.artifacts[0].label, "ro");
        assert_eq!(report.skipped, ["lc5"]);
        assert_eq!(
            observer.counter_values("subset.size"),
            vec![("ro".to_string(), 2), ("lc5".to_string(), 0)]
        );
        assert_eq!(observer.counter_values("sites.unmatched")[0].1, 1);
        fs::remove_dir_all(env::temp_dir().join("melanoma_sites_test_skip")).unwrap();
    }

    #[test]
    fn test_empty_variant_is_written_when_configured() {
        let config = PipelineConfig {
            empty_subset: EmptySubsetPolicy::Emit,
            ..PipelineConfig::default()
        };
        let options = options("Age>70", "melanoma_sites_test_emit");

        let report = run(&datasets(), &config, &options, &RecordingObserver::new()).unwrap();

        assert!(report.skipped.is_empty());
        let text = fs::read_to_string(&report.artifacts[0].paths[0]).unwrap();
        assert_eq!(text.lines().count(), 3);
        assert!(text.lines().skip(1).all(|l| l.split('\t').nth(4) == Some("0.0000")));
        fs::remove_dir_all(env::temp_dir().join("melanoma_sites_test_emit")).unwrap();
    }

    #[test]
    fn test_unknown_field_stops_before_writing() {
        let options = options("Stage=II", "melanoma_sites_test_unknown");
        let err = run(
            &datasets(),
            &PipelineConfig::default(),
            &options,
            &RecordingObserver::new(),
        )
        .unwrap_err();

        assert!(err.to_string().contains("column Stage not known"));
        assert!(!env::temp_dir().join("melanoma_sites_test_unknown").exists());
    }

    #[test]
    fn test_missing_site_column_is_reported() {
        let mut config = PipelineConfig::default();
        config.patient_columns.map = "Body map".into();

        let err = run(
            &datasets(),
            &config,
            &options("Age>50", "melanoma_sites_test_schema"),
            &RecordingObserver::new(),
        )
        .unwrap_err();

        assert!(matches!(err, PipelineError::MissingColumn { table: "patient", .. }));
    }
}
