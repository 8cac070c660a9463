//! Rendering of aggregated sites into the `.ipdata` and `.exdata` formats.
//!
//! Both formats are read by external visualisation tooling, so the literal
//! text here must not change; only the numbers vary.

use anyhow::Result as AnyResult;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::aggregate::AggregatedSite;
use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Tab-separated legacy data file.
    Ipdata,
    /// Node list with field metadata.
    Exdata,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Ipdata => "ipdata",
            OutputFormat::Exdata => "exdata",
        }
    }
}

/// Derives the output file for one artifact.
///
/// The stem of `base` gets `_{tag}` for per-token variants and `_normalised`
/// for normalised counts; any extension on `base` is replaced.
pub fn output_path(base: &Path, tag: Option<&str>, normalised: bool, format: OutputFormat) -> PathBuf {
    let mut name = base
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "melanoma".to_string());

    if let Some(tag) = tag {
        name.push('_');
        name.extend(tag.chars().map(|c| if c.is_alphanumeric() || c == '-' { c } else { '_' }));
    }
    if normalised {
        name.push_str("_normalised");
    }
    name.push('.');
    name.push_str(format.extension());

    base.with_file_name(name)
}

/// Python-style scientific notation: 5 mantissa decimals, signed two-digit exponent.
pub fn scientific(value: f64) -> String {
    let formatted = format!("{value:.5e}");
    match formatted.split_once('e') {
        Some((mantissa, exponent)) => {
            let exponent: i32 = exponent.parse().unwrap_or(0);
            let sign = if exponent < 0 { '-' } else { '+' };
            format!("{mantissa}e{sign}{:02}", exponent.abs())
        }
        None => formatted,
    }
}

/// Writes the legacy tabular format.
///
/// The last column carries the raw numerator for normalised rows and the
/// scale otherwise.
pub fn write_ipdata<W: Write>(w: &mut W, sites: &[AggregatedSite]) -> io::Result<()> {
    writeln!(w, "Data file")?;
    for site in sites {
        let c = &site.coordinates;
        let last = match site.selected_node {
            Some(n) => n.to_string(),
            None => format!("{:.4}", site.scale),
        };
        writeln!(
            w,
            "{}\t{:.4}\t{:.4}\t{:.4}\t{:.4}\t{:.4}\t{:.4}\t{:.4}\t{}",
            site.node, c.x, c.y, c.z, site.count, site.scale, site.scale, site.scale, last
        )?;
    }
    Ok(())
}

const EXDATA_COORDINATES: &str = " 1) coordinates, coordinate, rectangular cartesian, #Components=3
  x.  Value index= 1, #Derivatives= 0
  y.  Value index= 2, #Derivatives= 0
  z.  Value index= 3, #Derivatives= 0
";

const EXDATA_COUNT: &str = " 2) count, field, rectangular cartesian, #Components=1
  count.  Value index= 4, #Derivatives= 0
";

const EXDATA_FREQUENCY: &str = " 3) frequency, field, rectangular cartesian, #Components=1
  frequency.  Value index= 5, #Derivatives= 0
";

/// Writes the structured node format under the group `group`.
pub fn write_exdata<W: Write>(
    w: &mut W,
    group: &str,
    sites: &[AggregatedSite],
    normalised: bool,
) -> io::Result<()> {
    writeln!(w, " Group name: {group}")?;
    writeln!(w, " #Fields={}", if normalised { 3 } else { 2 })?;
    w.write_all(EXDATA_COORDINATES.as_bytes())?;
    w.write_all(EXDATA_COUNT.as_bytes())?;
    if normalised {
        w.write_all(EXDATA_FREQUENCY.as_bytes())?;
    }

    for site in sites {
        let c = &site.coordinates;
        writeln!(w, " Node:  {}", site.node)?;
        writeln!(
            w,
            "    {}  {}  {}",
            scientific(c.x),
            scientific(c.y),
            scientific(c.z)
        )?;
        write!(w, "    {}", scientific(site.count))?;
        if normalised {
            let selected = site.selected_node.unwrap_or(0) as f64;
            write!(w, "  {}", scientific(selected))?;
        }
        writeln!(w)?;
    }
    Ok(())
}

/// Settings shared by every file written for one filter variant.
#[derive(Debug, Clone, Copy)]
pub struct ExportTarget<'a> {
    pub base: &'a Path,
    pub tag: Option<&'a str>,
    pub normalised: bool,
    pub group: &'a str,
}

/// Writes `sites` in each of `formats`, returning the paths written.
#[tracing::instrument(skip(sites, target), fields(base = %target.base.display(), tag = ?target.tag))]
pub fn export(
    sites: &[AggregatedSite],
    formats: &[OutputFormat],
    target: ExportTarget<'_>,
) -> Result<Vec<PathBuf>> {
    let mut written = Vec::with_capacity(formats.len());

    for &format in formats {
        let path = output_path(target.base, target.tag, target.normalised, format);
        write_file(&path, |w| match format {
            OutputFormat::Ipdata => write_ipdata(w, sites),
            OutputFormat::Exdata => write_exdata(w, target.group, sites, target.normalised),
        })
        .map_err(|source| PipelineError::Write {
            path: path.clone(),
            source,
        })?;

        info!(path = %path.display(), rows = sites.len(), "Wrote output file");
        written.push(path);
    }

    Ok(written)
}

fn write_file(
    path: &Path,
    render: impl FnOnce(&mut BufWriter<File>) -> io::Result<()>,
) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut writer = BufWriter::new(File::create(path)?);
    render(&mut writer)?;
    writer.flush()
}

/// Logs a value as pretty-printed JSON.
pub fn print_json<T: Serialize>(value: &T) -> AnyResult<()> {
    debug!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
