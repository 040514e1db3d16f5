//! Binary feature wire format
//!
//! Each feature is a protobuf message; collections are streams of
//! length-delimited records. Names and icons are not inlined, they are
//! written to [`SideData`] tables and referenced by id.

use geo::{Coord, LineString, Polygon};
use prost::Message;
use prost::bytes::Buf;
use uuid::Uuid;

use crate::feature::{Area, AreaCategory, Feature, Place, PlaceCategory, Segment, SegmentCategory};
use crate::geometry::open_ring;
use crate::side_data::{SideData, TableValue};
use crate::{Error, Result};

#[derive(Clone, Copy, PartialEq, prost::Message)]
pub struct BinaryCoordinate {
    #[prost(double, tag = "1")]
    pub latitude: f64,
    #[prost(double, tag = "2")]
    pub longitude: f64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct BinaryPlace {
    #[prost(message, optional, tag = "1")]
    pub coordinate: Option<BinaryCoordinate>,
    #[prost(int32, tag = "2")]
    pub category: i32,
    #[prost(int64, tag = "3")]
    pub name_id: i64,
    #[prost(int64, tag = "4")]
    pub icon_id: i64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct BinarySegment {
    #[prost(message, repeated, tag = "1")]
    pub coordinates: Vec<BinaryCoordinate>,
    #[prost(int32, tag = "2")]
    pub category: i32,
    #[prost(int64, tag = "3")]
    pub name_id: i64,
}

/// Rings are stored open. Holes are concatenated in `holes`; `hole_splits`
/// holds the index where each hole after the first begins.
#[derive(Clone, PartialEq, prost::Message)]
pub struct BinaryArea {
    #[prost(message, repeated, tag = "1")]
    pub outer: Vec<BinaryCoordinate>,
    #[prost(message, repeated, tag = "2")]
    pub holes: Vec<BinaryCoordinate>,
    #[prost(int32, repeated, tag = "3")]
    pub hole_splits: Vec<i32>,
    #[prost(int32, tag = "4")]
    pub category: i32,
    #[prost(double, tag = "5")]
    pub original_area: f64,
    #[prost(int64, tag = "6")]
    pub name_id: i64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct BinaryFeature {
    #[prost(int64, tag = "1")]
    pub id_part0: i64,
    #[prost(int64, tag = "2")]
    pub id_part1: i64,
    #[prost(oneof = "binary_feature::Kind", tags = "4, 5, 6")]
    pub kind: Option<binary_feature::Kind>,
}

pub mod binary_feature {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Kind {
        #[prost(message, tag = "4")]
        Segment(super::BinarySegment),
        #[prost(message, tag = "5")]
        Area(super::BinaryArea),
        #[prost(message, tag = "6")]
        Place(super::BinaryPlace),
    }
}

#[derive(Clone, PartialEq, prost::Message)]
pub(crate) struct BinarySideEntry {
    #[prost(int64, tag = "1")]
    pub id: i64,
    #[prost(bytes = "vec", tag = "2")]
    pub value: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub(crate) struct BinarySideTable {
    #[prost(string, tag = "1")]
    pub tag: String,
    #[prost(message, repeated, tag = "2")]
    pub entries: Vec<BinarySideEntry>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub(crate) struct BinarySideData {
    #[prost(message, repeated, tag = "1")]
    pub tables: Vec<BinarySideTable>,
}

fn split_id(id: Uuid) -> (i64, i64) {
    let bytes = id.as_bytes();
    let mut low = [0u8; 8];
    let mut high = [0u8; 8];
    low.copy_from_slice(&bytes[..8]);
    high.copy_from_slice(&bytes[8..]);
    (i64::from_le_bytes(low), i64::from_le_bytes(high))
}

fn join_id(low: i64, high: i64) -> Uuid {
    let mut bytes = [0u8; 16];
    bytes[..8].copy_from_slice(&low.to_le_bytes());
    bytes[8..].copy_from_slice(&high.to_le_bytes());
    Uuid::from_bytes(bytes)
}

#[inline]
fn to_binary_coordinate(c: &Coord<f64>) -> BinaryCoordinate {
    BinaryCoordinate {
        latitude: c.y,
        longitude: c.x,
    }
}

#[inline]
fn from_binary_coordinate(c: &BinaryCoordinate) -> Coord<f64> {
    Coord {
        x: c.longitude,
        y: c.latitude,
    }
}

fn to_coords(coords: &[BinaryCoordinate]) -> Vec<Coord<f64>> {
    coords.iter().map(from_binary_coordinate).collect()
}

/// Converts features to their binary form, interning names and icons.
#[derive(Debug, Clone, Copy, Default)]
pub struct FeatureWriter<'a> {
    side_data: Option<&'a SideData>,
}

impl<'a> FeatureWriter<'a> {
    /// Without side data, names and icons are dropped.
    pub fn new(side_data: Option<&'a SideData>) -> Self {
        Self { side_data }
    }

    fn name_id(&self, name: &str) -> i64 {
        match self.side_data {
            Some(side_data) if !name.is_empty() => side_data.intern(name.to_string()),
            _ => 0,
        }
    }

    fn icon_id(&self, icon: &[u8]) -> i64 {
        match self.side_data {
            Some(side_data) if !icon.is_empty() => side_data.intern(icon.to_vec()),
            _ => 0,
        }
    }

    pub fn to_binary(&self, feature: &Feature) -> BinaryFeature {
        let (id_part0, id_part1) = split_id(feature.id());
        let kind = match feature {
            Feature::Place(p) => binary_feature::Kind::Place(BinaryPlace {
                coordinate: Some(to_binary_coordinate(&p.coordinate)),
                category: p.category.code(),
                name_id: self.name_id(&p.name),
                icon_id: self.icon_id(&p.icon),
            }),
            Feature::Segment(s) => binary_feature::Kind::Segment(BinarySegment {
                coordinates: s.line.0.iter().map(to_binary_coordinate).collect(),
                category: s.category.code(),
                name_id: self.name_id(&s.name),
            }),
            Feature::Area(a) => {
                let mut holes = Vec::new();
                let mut hole_splits = Vec::new();
                for hole in a.polygon.interiors() {
                    let ring = open_ring(hole);
                    // fewer than three points enclose nothing
                    if ring.len() < 3 {
                        continue;
                    }
                    if !holes.is_empty() {
                        hole_splits.push(holes.len() as i32);
                    }
                    holes.extend(ring.iter().map(to_binary_coordinate));
                }
                binary_feature::Kind::Area(BinaryArea {
                    outer: open_ring(a.polygon.exterior())
                        .iter()
                        .map(to_binary_coordinate)
                        .collect(),
                    holes,
                    hole_splits,
                    category: a.category.code(),
                    original_area: a.original_area,
                    name_id: self.name_id(&a.name),
                })
            }
        };
        BinaryFeature {
            id_part0,
            id_part1,
            kind: Some(kind),
        }
    }

    /// Append every feature as a length-delimited record.
    pub fn write_all(&self, features: &[Feature], buf: &mut Vec<u8>) -> Result<()> {
        for feature in features {
            self.to_binary(feature).encode_length_delimited(buf)?;
        }
        Ok(())
    }
}

/// Rebuilds features from their binary form.
#[derive(Debug, Clone, Copy, Default)]
pub struct FeatureReader<'a> {
    side_data: Option<&'a SideData>,
}

impl<'a> FeatureReader<'a> {
    /// Without side data, names read back empty.
    pub fn new(side_data: Option<&'a SideData>) -> Self {
        Self { side_data }
    }

    fn lookup<T: TableValue + Default>(&self, id: i64) -> T {
        self.side_data
            .map(|side_data| side_data.resolve::<T>(id))
            .unwrap_or_default()
    }

    pub fn from_binary(&self, binary: &BinaryFeature) -> Result<Feature> {
        let id = join_id(binary.id_part0, binary.id_part1);
        let kind = binary
            .kind
            .as_ref()
            .ok_or_else(|| Error::InvalidArgument(format!("feature {id} has no geometry kind")))?;

        Ok(match kind {
            binary_feature::Kind::Place(p) => {
                let coordinate = p
                    .coordinate
                    .as_ref()
                    .map(from_binary_coordinate)
                    .ok_or_else(|| Error::InvalidGeometry(format!("place {id} has no coordinate")))?;
                Place::new(
                    id,
                    self.lookup::<String>(p.name_id),
                    coordinate,
                    PlaceCategory::from_code(p.category),
                )
                .with_icon(self.lookup::<Vec<u8>>(p.icon_id))
                .into()
            }
            binary_feature::Kind::Segment(s) => Segment::new(
                id,
                self.lookup::<String>(s.name_id),
                LineString::new(to_coords(&s.coordinates)),
                SegmentCategory::from_code(s.category),
            )?
            .into(),
            binary_feature::Kind::Area(a) => {
                let holes = split_holes(&a.holes, &a.hole_splits)?;
                Area::new(
                    id,
                    self.lookup::<String>(a.name_id),
                    Polygon::new(LineString::new(to_coords(&a.outer)), holes),
                    AreaCategory::from_code(a.category),
                    a.original_area,
                )?
                .into()
            }
        })
    }

    /// Read length-delimited records until the buffer is exhausted.
    pub fn read_all(&self, mut buf: &[u8]) -> Result<Vec<Feature>> {
        let mut features = Vec::new();
        while buf.has_remaining() {
            let binary = BinaryFeature::decode_length_delimited(&mut buf)?;
            features.push(self.from_binary(&binary)?);
        }
        Ok(features)
    }
}

fn split_holes(holes: &[BinaryCoordinate], splits: &[i32]) -> Result<Vec<LineString<f64>>> {
    if holes.is_empty() {
        return Ok(Vec::new());
    }
    let mut starts = Vec::with_capacity(splits.len() + 1);
    starts.push(0usize);
    for &split in splits {
        let split = usize::try_from(split)
            .map_err(|_| Error::InvalidGeometry(format!("negative hole split {split}")))?;
        if split <= *starts.last().unwrap_or(&0) || split >= holes.len() {
            return Err(Error::InvalidGeometry(format!(
                "hole split {split} out of order for {} hole coordinates",
                holes.len()
            )));
        }
        starts.push(split);
    }
    Ok(starts
        .iter()
        .enumerate()
        .map(|(i, &start)| {
            let end = starts.get(i + 1).copied().unwrap_or(holes.len());
            LineString::new(to_coords(&holes[start..end]))
        })
        .collect())
}

/// Encode a feature collection.
pub fn encode_features(features: &[Feature], side_data: Option<&SideData>) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    FeatureWriter::new(side_data).write_all(features, &mut buf)?;
    Ok(buf)
}

/// Decode a feature collection written by [`encode_features`].
pub fn decode_features(bytes: &[u8], side_data: Option<&SideData>) -> Result<Vec<Feature>> {
    FeatureReader::new(side_data).read_all(bytes)
}

fn table_to_binary<T: TableValue>(side_data: &SideData) -> Option<BinarySideTable> {
    let table = side_data.table::<T>().ok()?;
    Some(BinarySideTable {
        tag: T::TAG.to_string(),
        entries: table
            .entries()
            .into_iter()
            .map(|(id, value)| BinarySideEntry {
                id,
                value: value.to_bytes(),
            })
            .collect(),
    })
}

fn table_from_binary<T: TableValue>(side_data: &SideData, binary: BinarySideTable) -> Result<()> {
    let table = side_data.table::<T>()?;
    for entry in binary.entries {
        table.restore(entry.id, T::from_bytes(entry.value)?)?;
    }
    Ok(())
}

/// Serialize every registered table.
pub(crate) fn encode_side_data(side_data: &SideData) -> Vec<u8> {
    let binary = BinarySideData {
        tables: [
            table_to_binary::<String>(side_data),
            table_to_binary::<Vec<u8>>(side_data),
        ]
        .into_iter()
        .flatten()
        .collect(),
    };
    binary.encode_to_vec()
}

/// Load saved entries into the matching registered tables.
pub(crate) fn decode_side_data_into(side_data: &SideData, bytes: &[u8]) -> Result<()> {
    let binary = BinarySideData::decode(bytes)?;
    for table in binary.tables {
        match table.tag.as_str() {
            tag if tag == String::TAG => table_from_binary::<String>(side_data, table)?,
            tag if tag == <Vec<u8>>::TAG => table_from_binary::<Vec<u8>>(side_data, table)?,
            other => tracing::warn!("Skipping unknown side data table '{other}'"),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::{FeatureKind, feature_id};

    fn coord(x: f64, y: f64) -> Coord<f64> {
        Coord { x, y }
    }

    fn donut() -> Feature {
        let outer = LineString::from(vec![(0.0, 0.0), (10.0, 0.0), (10.0, 10.0), (0.0, 10.0)]);
        let hole_a = LineString::from(vec![(1.0, 1.0), (2.0, 1.0), (2.0, 2.0)]);
        let hole_b = LineString::from(vec![(5.0, 5.0), (6.0, 5.0), (6.0, 6.0), (5.0, 6.0)]);
        Area::new(
            feature_id(FeatureKind::Area, 77),
            "Central Park",
            Polygon::new(outer, vec![hole_a, hole_b]),
            AreaCategory::Park,
            123.5,
        )
        .unwrap()
        .into()
    }

    fn features() -> Vec<Feature> {
        vec![
            Place::new(
                feature_id(FeatureKind::Place, 1),
                "Cafe Blue",
                coord(-3.7, 40.4),
                PlaceCategory::FoodAndDrink,
            )
            .with_icon(vec![0x89, b'P', b'N', b'G'])
            .into(),
            Segment::new(
                feature_id(FeatureKind::Segment, 2),
                "Gran Via",
                LineString::from(vec![(-3.70, 40.42), (-3.71, 40.43), (-3.72, 40.41)]),
                SegmentCategory::PrimaryStreet,
            )
            .unwrap()
            .into(),
            donut(),
        ]
    }

    #[test]
    fn test_round_trip_with_side_data() {
        let side_data = SideData::new();
        let original = features();
        let bytes = encode_features(&original, Some(&side_data)).unwrap();
        let decoded = decode_features(&bytes, Some(&side_data)).unwrap();
        assert_eq!(decoded, original);
        assert_eq!(side_data.table::<String>().unwrap().len(), 3);
        assert_eq!(side_data.table::<Vec<u8>>().unwrap().len(), 1);
    }

    #[test]
    fn test_names_dropped_without_side_data() {
        let bytes = encode_features(&features(), None).unwrap();
        let decoded = decode_features(&bytes, None).unwrap();
        assert!(decoded.iter().all(|f| f.name().is_empty()));
        assert_eq!(decoded[0].id(), features()[0].id());
    }

    #[test]
    fn test_rings_written_open() {
        let binary = FeatureWriter::new(None).to_binary(&donut());
        let Some(binary_feature::Kind::Area(area)) = binary.kind else {
            panic!("expected an area");
        };
        assert_eq!(area.outer.len(), 4);
        assert_eq!(area.holes.len(), 7);
        assert_eq!(area.hole_splits, vec![3]);
        assert_eq!(area.category, AreaCategory::Park.code());
    }

    #[test]
    fn test_degenerate_holes_are_skipped() {
        let outer = LineString::from(vec![(0.0, 0.0), (10.0, 0.0), (10.0, 10.0), (0.0, 10.0)]);
        let hole = LineString::from(vec![(2.0, 2.0), (4.0, 2.0), (4.0, 4.0)]);
        let area: Feature = Area::new(
            feature_id(FeatureKind::Area, 9),
            "",
            Polygon::new(
                outer,
                vec![
                    LineString::new(vec![]),
                    hole,
                    LineString::from(vec![(6.0, 6.0), (7.0, 7.0)]),
                ],
            ),
            AreaCategory::Water,
            100.0,
        )
        .unwrap()
        .into();

        let binary = FeatureWriter::new(None).to_binary(&area);
        let Some(binary_feature::Kind::Area(encoded)) = &binary.kind else {
            panic!("expected an area");
        };
        assert_eq!(encoded.holes.len(), 3);
        assert!(encoded.hole_splits.is_empty());

        let bytes = encode_features(std::slice::from_ref(&area), None).unwrap();
        let decoded = decode_features(&bytes, None).unwrap();
        let (Feature::Area(original), Feature::Area(decoded)) = (&area, &decoded[0]) else {
            panic!("expected areas");
        };
        assert_eq!(decoded.polygon.exterior(), original.polygon.exterior());
        assert_eq!(decoded.polygon.interiors(), &original.polygon.interiors()[1..2]);
    }

    #[test]
    fn test_id_parts() {
        let id = Uuid::from_u128(0x0011_2233_4455_6677_8899_aabb_ccdd_eeff);
        let (low, high) = split_id(id);
        assert_eq!(low.to_le_bytes(), id.as_bytes()[..8]);
        assert_eq!(high.to_le_bytes(), id.as_bytes()[8..]);
        assert_eq!(join_id(low, high), id);
    }

    #[test]
    fn test_minimal_place_size() {
        let place: Feature = Place::new(Uuid::nil(), "", coord(2.0, 1.0), PlaceCategory::Invalid).into();
        let binary = FeatureWriter::new(None).to_binary(&place);
        let Some(binary_feature::Kind::Place(inner)) = &binary.kind else {
            panic!("expected a place");
        };
        // two tagged doubles inside a tagged coordinate message
        assert_eq!(inner.encoded_len(), 20);
        assert_eq!(binary.encoded_len(), 22);
        assert_eq!(encode_features(&[place], None).unwrap().len(), 23);
    }

    #[test]
    fn test_unknown_category_decodes_invalid() {
        let binary = BinaryFeature {
            id_part0: 5,
            id_part1: 0,
            kind: Some(binary_feature::Kind::Segment(BinarySegment {
                coordinates: vec![BinaryCoordinate {
                    latitude: 1.0,
                    longitude: 1.0,
                }],
                category: 999,
                name_id: 0,
            })),
        };
        let feature = FeatureReader::new(None).from_binary(&binary).unwrap();
        let Feature::Segment(segment) = feature else {
            panic!("expected a segment");
        };
        assert_eq!(segment.category, SegmentCategory::Invalid);
    }

    #[test]
    fn test_malformed_input() {
        let missing_kind = BinaryFeature {
            id_part0: 1,
            id_part1: 0,
            kind: None,
        };
        assert!(FeatureReader::new(None).from_binary(&missing_kind).is_err());
        assert!(decode_features(&[0xFF, 0xFF, 0xFF], None).is_err());

        let empty_segment = BinaryFeature {
            id_part0: 1,
            id_part1: 0,
            kind: Some(binary_feature::Kind::Segment(BinarySegment::default())),
        };
        assert!(matches!(
            FeatureReader::new(None).from_binary(&empty_segment),
            Err(Error::InvalidGeometry(_))
        ));

        let holes = vec![BinaryCoordinate::default(); 4];
        assert!(split_holes(&holes, &[2, 1]).is_err());
        assert!(split_holes(&holes, &[4]).is_err());
        assert_eq!(split_holes(&holes, &[1, 3]).unwrap().len(), 3);
    }

    #[test]
    fn test_side_data_persistence() {
        let side_data = SideData::new();
        let bytes = encode_features(&features(), Some(&side_data)).unwrap();
        let saved = encode_side_data(&side_data);

        let restored = SideData::new();
        decode_side_data_into(&restored, &saved).unwrap();
        assert_eq!(decode_features(&bytes, Some(&restored)).unwrap(), features());
    }
}
