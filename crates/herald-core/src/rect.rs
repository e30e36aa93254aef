//! Parcel rectangle filter for scene pointers.
//!
//! Scene pointers are parcel coordinates written as `"x,y"`. A deployment can
//! be restricted to a region by configuring an inclusive rectangle
//! `"minX,minY,maxX,maxY"`; a scene passes if any of its pointers lands inside.

use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// A parcel coordinate parsed from a pointer token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Parcel {
    /// X coordinate.
    pub x: i32,
    /// Y coordinate.
    pub y: i32,
}

impl Parcel {
    /// Parses an `"x,y"` pointer token.
    ///
    /// Returns `None` for anything that is not two comma-separated integers.
    #[must_use]
    pub fn parse(pointer: &str) -> Option<Self> {
        let (x, y) = pointer.split_once(',')?;
        Some(Self {
            x: x.trim().parse().ok()?,
            y: y.trim().parse().ok()?,
        })
    }
}

/// Inclusive parcel rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RectFilter {
    min_x: i32,
    min_y: i32,
    max_x: i32,
    max_y: i32,
}

impl RectFilter {
    /// Creates a rectangle from its inclusive bounds.
    #[must_use]
    pub const fn new(min_x: i32, min_y: i32, max_x: i32, max_y: i32) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// Returns true if the parcel lies inside the rectangle (edges included).
    #[must_use]
    pub fn contains(&self, parcel: Parcel) -> bool {
        parcel.x >= self.min_x
            && parcel.x <= self.max_x
            && parcel.y >= self.min_y
            && parcel.y <= self.max_y
    }

    /// Returns true if at least one pointer parses to a parcel inside.
    ///
    /// Malformed pointers never match.
    pub fn any_inside<'a, I>(&self, pointers: I) -> bool
    where
        I: IntoIterator<Item = &'a str>,
    {
        pointers
            .into_iter()
            .filter_map(Parcel::parse)
            .any(|parcel| self.contains(parcel))
    }
}

impl FromStr for RectFilter {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bounds = s
            .split(',')
            .map(|part| part.trim().parse::<i32>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| Error::configuration(format!("invalid rect filter {s:?}: {e}")))?;

        let [min_x, min_y, max_x, max_y] = bounds[..] else {
            return Err(Error::configuration(format!(
                "invalid rect filter {s:?}: expected minX,minY,maxX,maxY"
            )));
        };

        Ok(Self::new(min_x, min_y, max_x, max_y))
    }
}

impl fmt::Display for RectFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{},{}", self.min_x, self.min_y, self.max_x, self.max_y)
    }
}
