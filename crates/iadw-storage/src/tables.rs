//! CSV working tables: read, tag with a constant column, concatenate.
//! Gzipped files (`*.csv.gz`) are read and written back compressed.

use std::collections::HashMap;
use std::io::{Read as _, Write as _};
use std::path::Path;

use anyhow::{bail, Context, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use iadw_core::haversine_km;

const BOM: char = '\u{feff}';
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

pub fn decode_gzip(data: &[u8]) -> Result<Vec<u8>, std::io::Error> {
    let mut decoder = GzDecoder::new(data);
    let mut decompressed = Vec::new();
    decoder.read_to_end(&mut decompressed)?;
    Ok(decompressed)
}

pub fn encode_gzip(data: &[u8]) -> Result<Vec<u8>, std::io::Error> {
    let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

fn is_gz_path(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("gz"))
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CsvTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl CsvTable {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

pub fn read_table(path: impl AsRef<Path>) -> Result<CsvTable> {
    let path = path.as_ref();
    let raw = std::fs::read(path).with_context(|| format!("opening {}", path.display()))?;
    let bytes = if raw.starts_with(&GZIP_MAGIC) {
        decode_gzip(&raw).with_context(|| format!("decompressing {}", path.display()))?
    } else {
        raw
    };
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(bytes.as_slice());

    let headers: Vec<String> = reader
        .headers()
        .with_context(|| format!("reading header of {}", path.display()))?
        .iter()
        .map(|h| h.trim_start_matches(BOM).to_string())
        .collect();

    let mut rows = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let record =
            record.with_context(|| format!("reading row {} of {}", index + 1, path.display()))?;
        let mut row: Vec<String> = record.iter().map(str::to_string).collect();
        row.resize(headers.len(), String::new());
        rows.push(row);
    }

    Ok(CsvTable { headers, rows })
}

/// Write `table` to `path`, gzip-compressed when the path ends in `.gz`.
pub fn write_table(path: impl AsRef<Path>, table: &CsvTable) -> Result<()> {
    let path = path.as_ref();
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(&table.headers)
        .with_context(|| format!("writing header of {}", path.display()))?;
    for row in &table.rows {
        writer
            .write_record(row)
            .with_context(|| format!("writing row to {}", path.display()))?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|err| err.into_error())
        .with_context(|| format!("flushing {}", path.display()))?;
    let bytes = if is_gz_path(path) {
        encode_gzip(&bytes).with_context(|| format!("compressing {}", path.display()))?
    } else {
        bytes
    };
    std::fs::write(path, bytes).with_context(|| format!("creating {}", path.display()))?;
    Ok(())
}

/// Set `column` to `value` on every row of the CSV at `path`, adding the column if needed.
pub fn append_column(path: impl AsRef<Path>, column: &str, value: &str) -> Result<()> {
    let path = path.as_ref();
    let mut table = read_table(path)?;
    match table.column_index(column) {
        Some(index) => {
            for row in &mut table.rows {
                row[index] = value.to_string();
            }
        }
        None => {
            table.headers.push(column.to_string());
            for row in &mut table.rows {
                row.push(value.to_string());
            }
        }
    }
    write_table(path, &table)
}

/// Stack tables row-wise over the union of their headers (first-seen order); gaps stay empty.
pub fn concat_tables(tables: &[CsvTable]) -> CsvTable {
    let mut headers: Vec<String> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();
    for table in tables {
        for header in &table.headers {
            if !positions.contains_key(header) {
                positions.insert(header.clone(), headers.len());
                headers.push(header.clone());
            }
        }
    }

    let mut rows = Vec::new();
    for table in tables {
        let mapping: Vec<usize> = table.headers.iter().map(|h| positions[h]).collect();
        for row in &table.rows {
            let mut out = vec![String::new(); headers.len()];
            for (value, &target) in row.iter().zip(&mapping) {
                out[target] = value.clone();
            }
            rows.push(out);
        }
    }

    CsvTable { headers, rows }
}

pub const DISTANCE_COLUMN: &str = "distance_km";

/// Rows whose `latitude`/`longitude` lie within `radius_km` of the point, nearest
/// first, with a `distance_km` column. Rows without usable coordinates are dropped.
pub fn within_radius(table: &CsvTable, lat: f64, lon: f64, radius_km: f64) -> Result<CsvTable> {
    let (Some(lat_idx), Some(lon_idx)) =
        (table.column_index("latitude"), table.column_index("longitude"))
    else {
        bail!("table has no latitude/longitude columns");
    };

    let mut near: Vec<(f64, &Vec<String>)> = table
        .rows
        .iter()
        .filter_map(|row| {
            let row_lat: f64 = row.get(lat_idx)?.trim().parse().ok()?;
            let row_lon: f64 = row.get(lon_idx)?.trim().parse().ok()?;
            let distance = haversine_km(lat, lon, row_lat, row_lon);
            (distance <= radius_km).then_some((distance, row))
        })
        .collect();
    near.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut headers = table.headers.clone();
    headers.push(DISTANCE_COLUMN.to_string());
    let rows = near
        .into_iter()
        .map(|(distance, row)| {
            let mut row = row.clone();
            row.push(format!("{distance:.3}"));
            row
        })
        .collect();
    Ok(CsvTable { headers, rows })
}

pub fn read_and_concat<P: AsRef<Path>>(paths: &[P]) -> Result<CsvTable> {
    let tables = paths
        .iter()
        .map(read_table)
        .collect::<Result<Vec<_>>>()?;
    Ok(concat_tables(&tables))
}
