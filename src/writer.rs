use crate::Histogram;
use anyhow::{Context, Result};
#[cfg(feature = "hdf5")]
use hdf5::types::VarLenUnicode;
use serde::Serialize;
use std::{
    fs::{File, OpenOptions},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

/// Output resource the engine persists its histograms into.
///
/// Paths ending in `.h5` or `.hdf5` are written as HDF5, one group per
/// histogram; anything else is written as a single JSON object keyed by
/// histogram name.
pub enum HistogramWriter {
    #[cfg(feature = "hdf5")]
    Hdf5(hdf5::File),
    Json {
        path: PathBuf,
        records: serde_json::Map<String, serde_json::Value>,
    },
}

#[derive(Serialize)]
struct HistogramRecord {
    n_bins: usize,
    x_min: f64,
    x_max: f64,
    entries: u64,
    underflow: u64,
    overflow: u64,
    counts: Vec<f64>,
    saved_at: String,
}

impl HistogramWriter {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if is_hdf5_path(path) {
            return Self::create_hdf5(path);
        }
        // check the location now, the previous contents stay until close
        OpenOptions::new()
            .append(true)
            .create(true)
            .open(path)
            .with_context(|| format!("cannot create {}", path.display()))?;
        Ok(Self::Json {
            path: path.to_path_buf(),
            records: serde_json::Map::new(),
        })
    }

    #[cfg(feature = "hdf5")]
    fn create_hdf5(path: &Path) -> Result<Self> {
        let file = hdf5::File::create(path)
            .with_context(|| format!("cannot create {}", path.display()))?;
        Ok(Self::Hdf5(file))
    }

    #[cfg(not(feature = "hdf5"))]
    fn create_hdf5(path: &Path) -> Result<Self> {
        anyhow::bail!(
            "{}: HDF5 output requires the `hdf5` feature",
            path.display()
        )
    }

    pub fn write_histogram(&mut self, name: &str, hist: &Histogram) -> Result<()> {
        match self {
            #[cfg(feature = "hdf5")]
            Self::Hdf5(file) => write_hdf5_group(file, name, hist),
            Self::Json { records, .. } => {
                let config = hist.config();
                let record = HistogramRecord {
                    n_bins: config.n_bins,
                    x_min: config.x_min,
                    x_max: config.x_max,
                    entries: hist.entries(),
                    underflow: hist.underflow(),
                    overflow: hist.overflow(),
                    counts: hist.counts().to_vec(),
                    saved_at: saved_at()?,
                };
                records.insert(name.to_string(), serde_json::to_value(record)?);
                Ok(())
            }
        }
    }

    /// Flush and close the resource.
    pub fn close(self) -> Result<()> {
        match self {
            #[cfg(feature = "hdf5")]
            Self::Hdf5(file) => {
                file.close()?;
                Ok(())
            }
            Self::Json { path, records } => {
                let file = File::create(&path)
                    .with_context(|| format!("cannot create {}", path.display()))?;
                let mut out = BufWriter::new(file);
                serde_json::to_writer_pretty(&mut out, &records)?;
                out.flush()?;
                Ok(())
            }
        }
    }
}

/// Save time as RFC 3339 UTC, the same text in both formats.
fn saved_at() -> Result<String> {
    Ok(OffsetDateTime::now_utc().format(&Rfc3339)?)
}

fn is_hdf5_path(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("h5") | Some("hdf5")
    )
}

#[cfg(feature = "hdf5")]
fn write_hdf5_group(file: &hdf5::File, name: &str, hist: &Histogram) -> Result<()> {
    let group = file.create_group(name)?;
    let config = hist.config();

    let counts = group
        .new_dataset::<f64>()
        .shape(config.n_bins)
        .create("counts")?;
    counts.write(hist.counts())?;

    let edges = hist.edges();
    let edges_ds = group
        .new_dataset::<f64>()
        .shape(edges.len())
        .create("edges")?;
    edges_ds.write(&edges)?;

    group
        .new_attr::<u64>()
        .shape(())
        .create("entries")?
        .write_scalar(&hist.entries())?;
    group
        .new_attr::<u64>()
        .shape(())
        .create("underflow")?
        .write_scalar(&hist.underflow())?;
    group
        .new_attr::<u64>()
        .shape(())
        .create("overflow")?
        .write_scalar(&hist.overflow())?;
    let stamp: VarLenUnicode = saved_at()?
        .parse()
        .map_err(|e| anyhow::anyhow!("bad timestamp string: {e:?}"))?;
    group
        .new_attr::<VarLenUnicode>()
        .shape(())
        .create("saved_at")?
        .write_scalar(&stamp)?;

    Ok(())
}
