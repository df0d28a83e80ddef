//! The `tilemapresource.xml` document describing a generated pyramid, in
//! the layout of the OSGeo Tile Map Service specification.

use std::fs;
use std::path::{Path, PathBuf};

use crate::area::Size;
use crate::config::TileExtension;
use crate::coordinate::{CoordinateSystem, GeoCoordinate};
use crate::errors::{Result, TilesError};
use crate::tile::TileFormat;
use crate::xml::{XmlDocument, XmlElement};

const XML_DECLARATION: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;

/// One zoom level of the pyramid.
#[derive(Debug, Clone, PartialEq)]
pub struct TileSetEntry {
    /// Directory of the zoom level, relative to the document.
    pub href: String,
    /// Ground units per pixel.
    pub units_per_pixel: f64,
    pub order: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TileSetMetadata {
    pub coordinate_system: CoordinateSystem,
    pub min: GeoCoordinate,
    pub max: GeoCoordinate,
    pub origin: GeoCoordinate,
    pub tile_size: Size,
    pub extension: TileExtension,
    pub tile_sets: Vec<TileSetEntry>,
}

impl TileSetMetadata {
    pub const FILE_NAME: &'static str = "tilemapresource.xml";
    pub const VERSION: &'static str = "1.0.0";
    pub const TILE_MAP_SERVICE: &'static str = "http://tms.osgeo.org/1.0.0";

    /// Describe the zooms `min_zoom..=max_zoom` of a pyramid covering
    /// `bounds`.
    pub fn new(
        coordinate_system: CoordinateSystem,
        (min, max): (GeoCoordinate, GeoCoordinate),
        format: &TileFormat,
        min_zoom: u32,
        max_zoom: u32,
    ) -> Result<Self> {
        if min_zoom > max_zoom {
            return Err(TilesError::InvalidZoomRange {
                min: min_zoom,
                max: max_zoom,
            });
        }
        let (half_x, half_y) = coordinate_system.half_extent();
        let tile_sets = (min_zoom..=max_zoom)
            .map(|zoom| {
                Ok(TileSetEntry {
                    href: zoom.to_string(),
                    units_per_pixel: coordinate_system.resolution(zoom, format.size)?,
                    order: zoom,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(TileSetMetadata {
            coordinate_system,
            min,
            max,
            origin: GeoCoordinate::new(coordinate_system, -half_x, -half_y),
            tile_size: format.size,
            extension: format.extension,
            tile_sets,
        })
    }

    pub fn to_xml(&self) -> Result<String> {
        let document = XmlDocument::new("TileMap")?;
        let root = document
            .root("TileMap")
            .ok_or_else(|| TilesError::Xml("document has no root".to_string()))?;
        root.set_attribute("version", Self::VERSION)?;
        root.set_attribute("tilemapservice", Self::TILE_MAP_SERVICE)?;

        root.add_text_element("SRS", self.coordinate_system.srs())?;

        let bounding_box = root.add_element("BoundingBox")?;
        bounding_box.set_attribute("minx", self.min.x())?;
        bounding_box.set_attribute("miny", self.min.y())?;
        bounding_box.set_attribute("maxx", self.max.x())?;
        bounding_box.set_attribute("maxy", self.max.y())?;

        let origin = root.add_element("Origin")?;
        origin.set_attribute("x", self.origin.x())?;
        origin.set_attribute("y", self.origin.y())?;

        let tile_format = root.add_element("TileFormat")?;
        tile_format.set_attribute("width", self.tile_size.width())?;
        tile_format.set_attribute("height", self.tile_size.height())?;
        tile_format.set_attribute("mime-type", self.extension.mime_type())?;
        tile_format.set_attribute("extension", self.extension.extension())?;

        let tile_sets = root.add_element("TileSets")?;
        tile_sets.set_attribute("profile", self.coordinate_system.profile())?;
        for entry in &self.tile_sets {
            let tile_set = tile_sets.add_element("TileSet")?;
            tile_set.set_attribute("href", &entry.href)?;
            tile_set.set_attribute("units-per-pixel", entry.units_per_pixel)?;
            tile_set.set_attribute("order", entry.order)?;
        }

        Ok(format!("{XML_DECLARATION}\n{document}\n"))
    }

    pub fn from_xml(xml: &str) -> Result<Self> {
        let document: XmlDocument = xml.parse()?;
        let root = document
            .root("TileMap")
            .ok_or_else(|| TilesError::Xml("missing <TileMap> element".to_string()))?;

        let srs = root
            .value("SRS")
            .ok_or_else(|| TilesError::Xml("missing <SRS> element".to_string()))?;
        let coordinate_system: CoordinateSystem = srs.parse()?;
        let coordinate = |element: &XmlElement<'_>, x: &str, y: &str| -> Result<GeoCoordinate> {
            Ok(GeoCoordinate::new(
                coordinate_system,
                element.parse(x)?,
                element.parse(y)?,
            ))
        };

        let bounding_box = required(&root, "BoundingBox")?;
        let min = coordinate(&bounding_box, "minx", "miny")?;
        let max = coordinate(&bounding_box, "maxx", "maxy")?;
        let origin = coordinate(&required(&root, "Origin")?, "x", "y")?;

        let tile_format = required(&root, "TileFormat")?;
        let tile_size = Size::new(tile_format.parse("width")?, tile_format.parse("height")?)?;
        let extension = match tile_format.value("extension") {
            Some(extension) => extension.parse()?,
            None => TileExtension::from_mime_type(&tile_format.parse::<String>("mime-type")?)?,
        };

        let tile_sets = required(&root, "TileSets")?;
        if let Some(profile) = tile_sets.value("profile") {
            if profile != coordinate_system.profile() {
                return Err(TilesError::Xml(format!(
                    "profile '{profile}' does not match {coordinate_system}"
                )));
            }
        }
        let tile_sets = tile_sets
            .children("TileSet")
            .map(|tile_set| {
                Ok(TileSetEntry {
                    href: tile_set.parse("href")?,
                    units_per_pixel: tile_set.parse("units-per-pixel")?,
                    order: tile_set.parse("order")?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(TileSetMetadata {
            coordinate_system,
            min,
            max,
            origin,
            tile_size,
            extension,
            tile_sets,
        })
    }

    /// Write the document into `directory` as [`FILE_NAME`](Self::FILE_NAME).
    pub fn write<P: AsRef<Path>>(&self, directory: P) -> Result<PathBuf> {
        let path = directory.as_ref().join(Self::FILE_NAME);
        fs::write(&path, self.to_xml()?).map_err(|source| TilesError::io(&path, source))?;
        tracing::debug!(path = %path.display(), "wrote tile set metadata");
        Ok(path)
    }

    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let xml = fs::read_to_string(path).map_err(|source| TilesError::io(path, source))?;
        Self::from_xml(&xml)
    }
}

fn required<'a>(parent: &XmlElement<'a>, name: &str) -> Result<XmlElement<'a>> {
    parent
        .child(name)
        .ok_or_else(|| TilesError::Xml(format!("missing <{name}> element")))
}
