//! Station Catalog Reader
//!
//! Loads station geometry from a CSV file into deduplicated [`StationRecord`]s.
//!
//! The header row names the columns. Required: `network`, `station`,
//! `location`, `latitude`, `longitude`, `elevation` (any order, case
//! insensitive). Extra columns are ignored, blank lines and `#` comments are
//! skipped. Elevation is metres above sea level. Codes may not contain `.`,
//! which separates the parts of a work unit identifier.
//!
//! ```text
//! network,station,location,latitude,longitude,elevation
//! XX,ABC,,10.0,20.0,100.0
//! XX,DEF,00,10.5,20.5,-30.0
//! ```

use crate::types::StationRecord;
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Characters not allowed in network, station or location codes. Path
/// separators would escape the scratch directory; `.` is the identifier
/// delimiter, so `("A.B", "C")` and `("A", "B.C")` would share a key.
const FORBIDDEN_CODE_CHARS: [char; 4] = ['/', '\\', '\0', '.'];

/// Catalog errors. All of them abort the run before any work is scheduled.
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("failed to read station catalog {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("station catalog {0} has no header row")]
    MissingHeader(PathBuf),

    #[error("station catalog is missing required column '{0}'")]
    MissingColumn(&'static str),

    #[error("line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("line {line}: invalid {field} code '{value}'")]
    InvalidCode {
        line: usize,
        field: &'static str,
        value: String,
    },

    #[error("station catalog {0} contains no stations")]
    Empty(PathBuf),
}

// ============================================================================
// CSV Parsing
// ============================================================================

/// Split a CSV line, honouring double quotes and `""` escapes.
fn csv_split(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => fields.push(std::mem::take(&mut current)),
            _ => current.push(ch),
        }
    }
    fields.push(current);
    fields
}

/// Column positions resolved from the header row.
#[derive(Debug)]
struct Columns {
    network: usize,
    station: usize,
    location: usize,
    latitude: usize,
    longitude: usize,
    elevation: usize,
}

impl Columns {
    fn from_header(header: &str) -> Result<Self, CatalogError> {
        let names: Vec<String> = csv_split(header)
            .into_iter()
            .map(|h| h.trim().to_ascii_lowercase())
            .collect();
        let find = |name: &'static str| {
            names
                .iter()
                .position(|h| h == name)
                .ok_or(CatalogError::MissingColumn(name))
        };

        Ok(Self {
            network: find("network")?,
            station: find("station")?,
            location: find("location")?,
            latitude: find("latitude")?,
            longitude: find("longitude")?,
            elevation: find("elevation")?,
        })
    }

    fn parse_row(&self, fields: &[String], line: usize) -> Result<StationRecord, CatalogError> {
        let text = |idx: usize, field: &'static str| -> Result<String, CatalogError> {
            let value = fields
                .get(idx)
                .ok_or_else(|| CatalogError::Parse {
                    line,
                    message: format!("missing {field} column"),
                })?
                .trim()
                .to_string();
            if value.contains(FORBIDDEN_CODE_CHARS) {
                return Err(CatalogError::InvalidCode { line, field, value });
            }
            Ok(value)
        };
        let number = |idx: usize, field: &'static str| -> Result<f64, CatalogError> {
            let raw = fields.get(idx).map(|s| s.trim()).unwrap_or_default();
            let value: f64 = raw.parse().map_err(|_| CatalogError::Parse {
                line,
                message: format!("invalid {field} '{raw}'"),
            })?;
            if value.is_finite() {
                Ok(value)
            } else {
                Err(CatalogError::Parse {
                    line,
                    message: format!("{field} must be finite, got {raw}"),
                })
            }
        };

        let network = text(self.network, "network")?;
        let station = text(self.station, "station")?;
        if network.is_empty() || station.is_empty() {
            return Err(CatalogError::Parse {
                line,
                message: "network and station codes must not be empty".to_string(),
            });
        }

        Ok(StationRecord {
            network,
            station,
            location: text(self.location, "location")?,
            latitude: number(self.latitude, "latitude")?,
            longitude: number(self.longitude, "longitude")?,
            elevation: number(self.elevation, "elevation")?,
        })
    }
}

// ============================================================================
// Loading
// ============================================================================

/// Read a station catalog and drop duplicate `(network, station, location)`
/// triples. The first row seen for a triple wins.
pub fn read_stations(path: impl AsRef<Path>) -> Result<Vec<StationRecord>, CatalogError> {
    let path = path.as_ref();
    let io_err = |source| CatalogError::Io {
        path: path.to_path_buf(),
        source,
    };

    let file = File::open(path).map_err(io_err)?;
    let mut lines = BufReader::new(file).lines().enumerate();

    let columns = loop {
        match lines.next() {
            Some((_, line)) => {
                let line = line.map_err(io_err)?;
                if is_skippable(&line) {
                    continue;
                }
                break Columns::from_header(&line)?;
            }
            None => return Err(CatalogError::MissingHeader(path.to_path_buf())),
        }
    };

    let mut rows = Vec::new();
    for (idx, line) in lines {
        let line = line.map_err(io_err)?;
        if is_skippable(&line) {
            continue;
        }
        rows.push(columns.parse_row(&csv_split(&line), idx + 1)?);
    }

    let total = rows.len();
    let stations = dedup_stations(rows);
    if stations.is_empty() {
        return Err(CatalogError::Empty(path.to_path_buf()));
    }

    info!(
        path = %path.display(),
        rows = total,
        stations = stations.len(),
        duplicates = total - stations.len(),
        "Station catalog loaded"
    );
    Ok(stations)
}

/// Keep the first record of every `(network, station, location)` triple,
/// preserving catalog order.
pub fn dedup_stations(rows: Vec<StationRecord>) -> Vec<StationRecord> {
    let mut seen: HashSet<(String, String, String)> = HashSet::with_capacity(rows.len());
    let mut stations = Vec::with_capacity(rows.len());

    for row in rows {
        let key = (row.network.clone(), row.station.clone(), row.location.clone());
        if seen.insert(key) {
            stations.push(row);
        } else {
            debug!(
                network = %row.network,
                station = %row.station,
                location = %row.location,
                "Dropping duplicate station row"
            );
        }
    }
    stations
}

fn is_skippable(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.is_empty() || trimmed.starts_with('#')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_catalog(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_csv_split_quotes() {
        assert_eq!(csv_split(r#"a,"b,c",d"#), vec!["a", "b,c", "d"]);
        assert_eq!(csv_split(r#""say ""hi""",x"#), vec![r#"say "hi""#, "x"]);
        assert_eq!(csv_split("a,,b"), vec!["a", "", "b"]);
    }

    #[test]
    fn test_reads_stations_in_catalog_order() {
        let file = write_catalog(
            "network,station,location,latitude,longitude,elevation\n\
             XX,ABC,,10.0,20.0,100.0\n\
             XX,DEF,00,10.5,20.5,-30.0\n",
        );
        let stations = read_stations(file.path()).unwrap();
        assert_eq!(stations.len(), 2);
        assert_eq!(stations[0].station, "ABC");
        assert_eq!(stations[0].location, "");
        assert_eq!(stations[1].location, "00");
        assert_eq!(stations[1].elevation, -30.0);
    }

    #[test]
    fn test_column_order_comments_and_extra_columns() {
        let file = write_catalog(
            "# exported catalog\n\
             Elevation,Latitude,Longitude,Station,Network,Location,Comment\n\
             \n\
             12.5,1.0,2.0,\"ST1\",YY,10,\"broadband, vault\"\n",
        );
        let stations = read_stations(file.path()).unwrap();
        assert_eq!(stations.len(), 1);
        assert_eq!(stations[0].network, "YY");
        assert_eq!(stations[0].station, "ST1");
        assert_eq!(stations[0].location, "10");
        assert_eq!(stations[0].elevation, 12.5);
    }

    #[test]
    fn test_first_seen_duplicate_wins() {
        let file = write_catalog(
            "network,station,location,latitude,longitude,elevation\n\
             XX,ABC,,10.0,20.0,100.0\n\
             XX,ABC,,11.0,21.0,900.0\n\
             XX,ABC,01,12.0,22.0,0.0\n",
        );
        let stations = read_stations(file.path()).unwrap();
        assert_eq!(stations.len(), 2);
        assert_eq!(stations[0].latitude, 10.0);
        assert_eq!(stations[0].elevation, 100.0);
        assert_eq!(stations[1].location, "01");
    }

    #[test]
    fn test_missing_column_is_fatal() {
        let file = write_catalog("network,station,latitude,longitude,elevation\nXX,A,1,2,3\n");
        assert!(matches!(
            read_stations(file.path()),
            Err(CatalogError::MissingColumn("location"))
        ));
    }

    #[test]
    fn test_bad_number_reports_line() {
        let file = write_catalog(
            "network,station,location,latitude,longitude,elevation\n\
             XX,ABC,,10.0,twenty,100.0\n",
        );
        match read_stations(file.path()) {
            Err(CatalogError::Parse { line, message }) => {
                assert_eq!(line, 2);
                assert!(message.contains("longitude"));
            }
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn test_path_separator_in_code_rejected() {
        let file = write_catalog(
            "network,station,location,latitude,longitude,elevation\n\
             XX,../ABC,,10.0,20.0,100.0\n",
        );
        assert!(matches!(
            read_stations(file.path()),
            Err(CatalogError::InvalidCode { field: "station", .. })
        ));
    }

    #[test]
    fn test_dotted_codes_rejected() {
        // Would both map to identifier A.B.C..P
        let file = write_catalog(
            "network,station,location,latitude,longitude,elevation\n\
             A.B,C,,10.0,20.0,0.0\n\
             A,B.C,,10.0,20.0,0.0\n",
        );
        match read_stations(file.path()) {
            Err(CatalogError::InvalidCode { line, field, value }) => {
                assert_eq!(line, 2);
                assert_eq!(field, "network");
                assert_eq!(value, "A.B");
            }
            other => panic!("expected invalid code, got {other:?}"),
        }

        let file = write_catalog(
            "network,station,location,latitude,longitude,elevation\n\
             XX,ABC,0.1,10.0,20.0,0.0\n",
        );
        assert!(matches!(
            read_stations(file.path()),
            Err(CatalogError::InvalidCode { field: "location", .. })
        ));
    }

    #[test]
    fn test_empty_and_missing_catalogs() {
        let file = write_catalog("network,station,location,latitude,longitude,elevation\n");
        assert!(matches!(read_stations(file.path()), Err(CatalogError::Empty(_))));

        let file = write_catalog("");
        assert!(matches!(read_stations(file.path()), Err(CatalogError::MissingHeader(_))));

        assert!(matches!(
            read_stations("/nonexistent/stations.csv"),
            Err(CatalogError::Io { .. })
        ));
    }
}
