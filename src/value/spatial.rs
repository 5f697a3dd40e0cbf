// Copyright Rouven Bauer
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Spatial types as understood by the database.
//!
//! Each point type is bound to a fixed spatial reference system identifier
//! (SRID) on the wire.

use std::fmt::{Display, Formatter};

pub(crate) const SRID_CARTESIAN_2D: i64 = 7203;
pub(crate) const SRID_CARTESIAN_3D: i64 = 9157;
pub(crate) const SRID_WGS84_2D: i64 = 4326;
pub(crate) const SRID_WGS84_3D: i64 = 4979;

macro_rules! point_type {
    (
        $(#[$doc:meta])*
        $name:ident, $srid:expr, ( $($coordinate:ident: $index:expr),+ )
    ) => {
        $(#[$doc])*
        #[allow(non_camel_case_types)]
        #[derive(Debug, Clone, Copy, PartialEq)]
        pub struct $name {
            pub(crate) srid: i64,
            pub(crate) coordinates: [f64; point_type!(@count $($coordinate)+)],
        }

        impl $name {
            pub fn new($($coordinate: f64),+) -> Self {
                Self {
                    srid: $srid,
                    coordinates: [$($coordinate),+],
                }
            }

            $(
                pub fn $coordinate(&self) -> f64 {
                    self.coordinates[$index]
                }
            )+

            /// Equality on the coordinates' bit patterns
            /// (`NaN == NaN`, `0.0 != -0.0`).
            pub(crate) fn eq_data(&self, other: &Self) -> bool {
                self.coordinates
                    .iter()
                    .zip(other.coordinates.iter())
                    .all(|(a, b)| a.to_bits() == b.to_bits())
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                write!(
                    f,
                    concat!(stringify!($name), "({})"),
                    self.coordinates.map(|c| c.to_string()).join(", ")
                )
            }
        }
    };
    (@count $($coordinate:ident)+) => {
        [$(point_type!(@unit $coordinate)),+].len()
    };
    (@unit $coordinate:ident) => { () };
}

point_type!(
    /// A 2D point in the cartesian coordinate system.
    Cartesian2D, SRID_CARTESIAN_2D, (x: 0, y: 1)
);
point_type!(
    /// A 3D point in the cartesian coordinate system.
    Cartesian3D, SRID_CARTESIAN_3D, (x: 0, y: 1, z: 2)
);
point_type!(
    /// A 2D point in the WGS84 coordinate system (longitude, latitude).
    WGS84_2D, SRID_WGS84_2D, (longitude: 0, latitude: 1)
);
point_type!(
    /// A 3D point in the WGS84 coordinate system
    /// (longitude, latitude, height).
    WGS84_3D, SRID_WGS84_3D, (longitude: 0, latitude: 1, height: 2)
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accessors_match_constructor_order() {
        let point = WGS84_3D::new(1.0, 2.0, 3.0);
        assert_eq!(point.longitude(), 1.0);
        assert_eq!(point.latitude(), 2.0);
        assert_eq!(point.height(), 3.0);
        assert_eq!(point.srid, SRID_WGS84_3D);
    }

    #[test]
    fn display_lists_coordinates() {
        assert_eq!(format!("{}", Cartesian2D::new(1.0, 2.5)), "Cartesian2D(1, 2.5)");
    }
}
