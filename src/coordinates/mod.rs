// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

use ahash::AHashMap;
use serde::Deserialize;
use std::io::Read;
use std::path::Path;

/// Maps a TIPLOC to `(lat, lon)`. A missing point is a normal answer.
pub trait CoordinateLookup: Send + Sync {
    fn lookup(&self, tiploc: &str) -> Option<(f64, f64)>;
}

impl<T: CoordinateLookup + ?Sized> CoordinateLookup for std::sync::Arc<T> {
    fn lookup(&self, tiploc: &str) -> Option<(f64, f64)> {
        (**self).lookup(tiploc)
    }
}

#[derive(Debug, Deserialize)]
struct TiplocRow {
    tiploc: String,
    lat: Option<f64>,
    lon: Option<f64>,
}

#[derive(Debug, Default, Clone)]
pub struct StaticCoordinates {
    points: AHashMap<String, (f64, f64)>,
}

impl StaticCoordinates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, tiploc: impl Into<String>, lat: f64, lon: f64) {
        self.points.insert(tiploc.into(), (lat, lon));
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Reads `tiploc,lat,lon` rows with a header. Rows with a blank coordinate
    /// are skipped.
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self, csv::Error> {
        let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);

        let mut points = AHashMap::new();
        let mut skipped = 0usize;

        for row in rdr.deserialize::<TiplocRow>() {
            let row = row?;
            match (row.lat, row.lon) {
                (Some(lat), Some(lon)) if !row.tiploc.is_empty() => {
                    points.insert(row.tiploc, (lat, lon));
                }
                _ => skipped += 1,
            }
        }

        if skipped > 0 {
            tracing::debug!(skipped, "tiploc rows without usable coordinates");
        }

        Ok(Self { points })
    }

    pub fn from_csv_path(path: impl AsRef<Path>) -> Result<Self, csv::Error> {
        let file = std::fs::File::open(path)?;
        Self::from_csv_reader(file)
    }
}

impl CoordinateLookup for StaticCoordinates {
    fn lookup(&self, tiploc: &str) -> Option<(f64, f64)> {
        self.points.get(tiploc).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_rows_and_skips_blank_coordinates() {
        let csv = "tiploc,lat,lon\nCRLN,52.4,-1.8\nNOWHERE,,\n  WOLWCHA , 52.1 , -0.8\n";
        let coords = StaticCoordinates::from_csv_reader(csv.as_bytes()).unwrap();

        assert_eq!(coords.len(), 2);
        assert_eq!(coords.lookup("CRLN"), Some((52.4, -1.8)));
        assert_eq!(coords.lookup("WOLWCHA"), Some((52.1, -0.8)));
        assert_eq!(coords.lookup("NOWHERE"), None);
    }

    #[test]
    fn lookup_through_arc() {
        let mut coords = StaticCoordinates::new();
        coords.insert("A", 1.0, 2.0);
        let shared: std::sync::Arc<dyn CoordinateLookup> = std::sync::Arc::new(coords);
        assert_eq!(shared.lookup("A"), Some((1.0, 2.0)));
    }
}
