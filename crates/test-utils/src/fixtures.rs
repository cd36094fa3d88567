//! Common test fixtures for rasterization tests.

/// Common grid specifications for testing.
pub mod grid {
    /// 4x4 unit-pixel grid with its upper-left corner at (0, 4).
    pub const UNIT_4X4: GridSpec = GridSpec {
        west: 0.0,
        north: 4.0,
        xres: 1.0,
        yres: 1.0,
        width: 4,
        height: 4,
        crs: "EPSG:3577",
    };

    /// 100x100 unit-pixel grid.
    pub const UNIT_100: GridSpec = GridSpec {
        west: 0.0,
        north: 100.0,
        xres: 1.0,
        yres: 1.0,
        width: 100,
        height: 100,
        crs: "EPSG:3577",
    };

    /// Continental Australia at 0.05 degrees.
    pub const AUSTRALIA_5KM: GridSpec = GridSpec {
        west: 112.0,
        north: -10.0,
        xres: 0.05,
        yres: 0.05,
        width: 840,
        height: 680,
        crs: "EPSG:4283",
    };

    /// North-up grid specification.
    #[derive(Debug, Clone, Copy)]
    pub struct GridSpec {
        pub west: f64,
        pub north: f64,
        pub xres: f64,
        pub yres: f64,
        pub width: usize,
        pub height: usize,
        pub crs: &'static str,
    }

    impl GridSpec {
        /// Returns the total number of grid cells.
        pub fn size(&self) -> usize {
            self.width * self.height
        }

        /// GDAL-order geotransform: [west, xres, 0, north, 0, -yres].
        pub fn gdal_transform(&self) -> [f64; 6] {
            [self.west, self.xres, 0.0, self.north, 0.0, -self.yres]
        }

        /// World coordinates of a pixel corner.
        pub fn corner(&self, col: usize, row: usize) -> (f64, f64) {
            (
                self.west + col as f64 * self.xres,
                self.north - row as f64 * self.yres,
            )
        }

        /// Returns the bounding box as (min_x, min_y, max_x, max_y).
        pub fn bbox(&self) -> (f64, f64, f64, f64) {
            (
                self.west,
                self.north - self.height as f64 * self.yres,
                self.west + self.width as f64 * self.xres,
                self.north,
            )
        }
    }
}

/// Attribute values shared by feature fixtures.
pub mod taxa {
    /// (TAXON_ID, SCIENTIFIC_NAME, TAXON_GROUP)
    pub const KOALA: (i64, &str, &str) = (1001, "Phascolarctos cinereus", "mammals");
    pub const PLATYPUS: (i64, &str, &str) = (1002, "Ornithorhynchus anatinus", "mammals");
    pub const GANG_GANG: (i64, &str, &str) = (2001, "Callocephalon fimbriatum", "birds");

    /// Presence category codes.
    pub const MAYBE: i64 = 1;
    pub const LIKELY: i64 = 2;
}
