//! Static landmark map.
//!
//! The map is an ordered, read-only list of point landmarks. Order matters: nearest-landmark queries break ties
//! in favour of the landmark that appears first.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// A single map landmark with a fixed position in map coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    /// Landmark identifier as given by the map source
    pub id: i32,
    /// Map x coordinate in meters
    pub x: f64,
    /// Map y coordinate in meters
    pub y: f64,
}
impl Landmark {
    pub fn new(id: i32, x: f64, y: f64) -> Landmark {
        Landmark { id, x, y }
    }
    /// Squared Euclidean distance from the landmark to a map point.
    pub fn distance_squared(&self, x: f64, y: f64) -> f64 {
        (self.x - x).powi(2) + (self.y - y).powi(2)
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Map {
    landmarks: Vec<Landmark>,
}
impl From<Vec<Landmark>> for Map {
    fn from(landmarks: Vec<Landmark>) -> Self {
        Map { landmarks }
    }
}
impl FromIterator<Landmark> for Map {
    fn from_iter<I: IntoIterator<Item = Landmark>>(iter: I) -> Self {
        Map {
            landmarks: iter.into_iter().collect(),
        }
    }
}
impl Map {
    pub fn new(landmarks: Vec<Landmark>) -> Map {
        Map { landmarks }
    }
    pub fn landmarks(&self) -> &[Landmark] {
        &self.landmarks
    }
    pub fn len(&self) -> usize {
        self.landmarks.len()
    }
    pub fn is_empty(&self) -> bool {
        self.landmarks.is_empty()
    }
    /// Look up a landmark by its identifier.
    pub fn get(&self, id: i32) -> Option<&Landmark> {
        self.landmarks.iter().find(|landmark| landmark.id == id)
    }
    /// Find the landmark closest to a map point.
    ///
    /// Every point has a nearest landmark no matter how far away it is; `None` is only returned for an empty
    /// map. When several landmarks are equally close the first one in map order wins.
    pub fn nearest(&self, x: f64, y: f64) -> Option<&Landmark> {
        self.landmarks.iter().min_by(|a, b| {
            a.distance_squared(x, y)
                .total_cmp(&b.distance_squared(x, y))
        })
    }
    /// Reads a landmark map from a CSV file with an `id,x,y` header.
    ///
    /// # Arguments
    /// * `path` - Path to the CSV file to read.
    ///
    /// # Returns
    /// * `Ok(Map)` with landmarks in file order.
    /// * `Err` if the file cannot be read or a row fails to parse.
    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let mut rdr = csv::Reader::from_path(path)?;
        let mut landmarks = Vec::new();
        for result in rdr.deserialize() {
            let landmark: Landmark = result?;
            landmarks.push(landmark);
        }
        Ok(Map { landmarks })
    }
    /// Writes the landmark map to a CSV file with an `id,x,y` header.
    pub fn to_csv<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        for landmark in &self.landmarks {
            writer.serialize(landmark)?;
        }
        writer.flush()?;
        Ok(())
    }
}
