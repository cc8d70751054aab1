//! Static world map sent to every client during onboarding
//!
//! The map asset is a text grid: one row per line, cells separated by commas,
//! each cell a single ASCII character. It is loaded once at startup and shared
//! read-only afterwards.

use std::fs;
use std::path::Path;

/// Side length of the blank grid used when no map file is configured
pub const DEFAULT_MAP_SIZE: usize = 24;

#[derive(Debug, thiserror::Error)]
pub enum MapError {
    #[error("failed to read map file: {0}")]
    Io(#[from] std::io::Error),
    #[error("map contains no rows")]
    Empty,
    #[error("row {row} has {found} columns, expected {expected}")]
    Ragged {
        row: usize,
        expected: usize,
        found: usize,
    },
    #[error("cell {column} in row {row} is {cell:?}, expected one ASCII character")]
    BadCell {
        row: usize,
        column: usize,
        cell: String,
    },
    #[error("map of {0} bytes does not fit in one frame")]
    TooLarge(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorldMap {
    rows: usize,
    columns: usize,
    tiles: Vec<u8>,
}

impl WorldMap {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, MapError> {
        Self::parse(&fs::read_to_string(path)?)
    }

    pub fn parse(text: &str) -> Result<Self, MapError> {
        let mut tiles = Vec::new();
        let mut columns = None;
        let mut rows = 0;

        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let mut width = 0;
            for (column, cell) in line.split(',').map(str::trim).enumerate() {
                match cell.as_bytes() {
                    [byte] if byte.is_ascii() => tiles.push(*byte),
                    _ => {
                        return Err(MapError::BadCell {
                            row: rows,
                            column,
                            cell: cell.to_string(),
                        })
                    }
                }
                width += 1;
            }

            match columns {
                None => columns = Some(width),
                Some(expected) if expected != width => {
                    return Err(MapError::Ragged {
                        row: rows,
                        expected,
                        found: width,
                    })
                }
                Some(_) => {}
            }
            rows += 1;
        }

        let columns = columns.ok_or(MapError::Empty)?;
        if tiles.len() > shared::MAX_PAYLOAD_LEN {
            return Err(MapError::TooLarge(tiles.len()));
        }

        Ok(Self {
            rows,
            columns,
            tiles,
        })
    }

    /// A grid where every cell holds `fill`
    pub fn filled(rows: usize, columns: usize, fill: u8) -> Self {
        Self {
            rows,
            columns,
            tiles: vec![fill; rows * columns],
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn columns(&self) -> usize {
        self.columns
    }

    /// Row-major cell bytes with no delimiters, the `MAP_DATA` payload
    pub fn tiles(&self) -> &[u8] {
        &self.tiles
    }

    pub fn tile(&self, row: usize, column: usize) -> Option<u8> {
        if row >= self.rows || column >= self.columns {
            return None;
        }
        self.tiles.get(row * self.columns + column).copied()
    }
}

impl Default for WorldMap {
    fn default() -> Self {
        Self::filled(DEFAULT_MAP_SIZE, DEFAULT_MAP_SIZE, b'0')
    }
}
