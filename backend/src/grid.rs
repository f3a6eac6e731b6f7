use std::fmt;

use serde::{Deserialize, Serialize};

use crate::models::Coordinate;

/// Number of cells along each axis of the logical grid.
pub const GRID_SIZE: i32 = 100;

/// Chebyshev neighbourhood, orthogonal cells first.
const NEIGHBOUR_OFFSETS: [(i32, i32); 8] = [
    (-1, 0),
    (1, 0),
    (0, -1),
    (0, 1),
    (-1, -1),
    (1, 1),
    (-1, 1),
    (1, -1),
];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GridError {
    #[error("grid coordinate ({x}, {y}) is outside [0, 99]")]
    InvalidGridCoordinate { x: i32, y: i32 },
}

/// A validated cell of the 100×100 waypoint grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "[i32; 2]", into = "[i32; 2]")]
pub struct GridCell {
    x: u8,
    y: u8,
}

impl GridCell {
    pub fn new(x: i32, y: i32) -> Result<Self, GridError> {
        if !Self::in_range(x, y) {
            return Err(GridError::InvalidGridCoordinate { x, y });
        }
        Ok(Self {
            x: x as u8,
            y: y as u8,
        })
    }

    pub fn from_pair(pair: [i32; 2]) -> Result<Self, GridError> {
        Self::new(pair[0], pair[1])
    }

    pub fn x(self) -> u8 {
        self.x
    }

    pub fn y(self) -> u8 {
        self.y
    }

    pub fn as_pair(self) -> [u8; 2] {
        [self.x, self.y]
    }

    /// The up to 8 Chebyshev-adjacent cells that lie inside the grid.
    pub fn neighbours(self) -> impl Iterator<Item = GridCell> {
        let (x, y) = (i32::from(self.x), i32::from(self.y));
        NEIGHBOUR_OFFSETS
            .into_iter()
            .filter_map(move |(dx, dy)| GridCell::new(x + dx, y + dy).ok())
    }

    pub fn is_adjacent(self, other: GridCell) -> bool {
        let dx = (i32::from(self.x) - i32::from(other.x)).abs();
        let dy = (i32::from(self.y) - i32::from(other.y)).abs();
        dx.max(dy) == 1
    }

    fn in_range(x: i32, y: i32) -> bool {
        (0..GRID_SIZE).contains(&x) && (0..GRID_SIZE).contains(&y)
    }
}

impl TryFrom<[i32; 2]> for GridCell {
    type Error = GridError;

    fn try_from(pair: [i32; 2]) -> Result<Self, Self::Error> {
        Self::from_pair(pair)
    }
}

impl From<GridCell> for [i32; 2] {
    fn from(cell: GridCell) -> Self {
        [cell.x.into(), cell.y.into()]
    }
}

impl fmt::Display for GridCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Geographic box the grid is laid over.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridBounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl Default for GridBounds {
    fn default() -> Self {
        Self {
            min_lat: 32.5,
            max_lat: 42.0,
            min_lng: -124.5,
            max_lng: -114.0,
        }
    }
}

impl GridBounds {
    /// Affine cell → coordinate mapping. Cell `(0, 0)` sits on the south-west
    /// corner; each cell spans 1/100th of the box on both axes.
    pub fn to_coordinates(&self, cell: GridCell) -> Coordinate {
        let size = f64::from(GRID_SIZE);
        Coordinate {
            lat: self.min_lat + (f64::from(cell.y) / size) * (self.max_lat - self.min_lat),
            lng: self.min_lng + (f64::from(cell.x) / size) * (self.max_lng - self.min_lng),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.min_lat < self.max_lat
            && self.min_lng < self.max_lng
            && (-90.0..=90.0).contains(&self.min_lat)
            && (-90.0..=90.0).contains(&self.max_lat)
            && (-180.0..=180.0).contains(&self.min_lng)
            && (-180.0..=180.0).contains(&self.max_lng)
    }
}

/// Maps a raw grid pair using the default bounding box.
pub fn to_coordinates(grid_x: i32, grid_y: i32) -> Result<Coordinate, GridError> {
    let cell = GridCell::new(grid_x, grid_y)?;
    Ok(GridBounds::default().to_coordinates(cell))
}
