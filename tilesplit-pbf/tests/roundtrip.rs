//! Decodes writer output with the same PBF reader the pipeline uses.

use std::io::Write;

use osmpbf::{Element, ElementReader};
use rstest::rstest;
use tempfile::NamedTempFile;
use tilesplit_pbf::{Bounds, Member, MemberKind, Metadata, Node, Relation, TileWriter, Way};

fn assert_close(actual: f64, expected: f64) {
    let delta = (actual - expected).abs();
    assert!(delta <= 1.0e-7, "expected {expected}, got {actual}");
}

fn sample_bounds() -> Bounds {
    Bounds {
        left: 8.4,
        right: 8.6,
        top: 47.4,
        bottom: 47.3,
    }
}

fn sample_nodes() -> Vec<Node> {
    vec![
        Node {
            id: 1,
            lon: 8.54,
            lat: 47.37,
            tags: vec![("amenity".into(), "fountain".into())],
            meta: Metadata {
                version: Some(3),
                timestamp_ms: Some(1_600_000_000_000),
            },
        },
        Node {
            id: 2,
            lon: 8.55,
            lat: 47.38,
            tags: Vec::new(),
            meta: Metadata {
                version: Some(1),
                timestamp_ms: Some(1_500_000_000_000),
            },
        },
        Node {
            id: 5,
            lon: -0.1,
            lat: 51.5,
            tags: Vec::new(),
            meta: Metadata {
                version: Some(2),
                timestamp_ms: Some(1_400_000_000_000),
            },
        },
    ]
}

fn sample_way() -> Way {
    Way {
        id: 10,
        refs: vec![1, 2, 5],
        tags: vec![("highway".into(), "residential".into())],
        meta: Metadata {
            version: Some(4),
            timestamp_ms: Some(1_600_000_001_000),
        },
    }
}

fn sample_relation() -> Relation {
    Relation {
        id: 20,
        members: vec![
            Member {
                kind: MemberKind::Way,
                id: 10,
                role: "outer".into(),
            },
            Member {
                kind: MemberKind::Node,
                id: 1,
                role: String::new(),
            },
        ],
        tags: vec![("type".into(), "multipolygon".into())],
        meta: Metadata {
            version: Some(1),
            timestamp_ms: Some(1_600_000_002_000),
        },
    }
}

fn write_sample(write_metadata: bool) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("create temp file");
    let mut writer =
        TileWriter::new(Vec::new(), &sample_bounds(), write_metadata).expect("start writer");
    for node in sample_nodes() {
        writer.node(&node).expect("buffer node");
    }
    writer.way(&sample_way()).expect("buffer way");
    writer.relation(&sample_relation()).expect("buffer relation");
    let bytes = writer.finish().expect("finish tile");
    file.write_all(&bytes).expect("persist tile");
    file
}

#[rstest]
fn round_trips_elements_in_order(#[values(false, true)] write_metadata: bool) {
    let file = write_sample(write_metadata);
    let reader = ElementReader::from_path(file.path()).expect("open tile");

    let mut seen = Vec::new();
    reader
        .for_each(|element| match element {
            Element::Node(node) => seen.push(("node", node.id())),
            Element::DenseNode(node) => seen.push(("node", node.id())),
            Element::Way(way) => seen.push(("way", way.id())),
            Element::Relation(relation) => seen.push(("relation", relation.id())),
        })
        .expect("decode tile");

    assert_eq!(
        seen,
        vec![
            ("node", 1),
            ("node", 2),
            ("node", 5),
            ("way", 10),
            ("relation", 20)
        ]
    );
}

#[rstest]
fn round_trips_coordinates_and_tags() {
    let file = write_sample(false);
    let reader = ElementReader::from_path(file.path()).expect("open tile");

    let expected = sample_nodes();
    reader
        .for_each(|element| match element {
            Element::DenseNode(node) => {
                let sample = expected
                    .iter()
                    .find(|n| n.id == node.id())
                    .expect("known node id");
                assert_close(node.lon(), sample.lon);
                assert_close(node.lat(), sample.lat);
                let tags: Vec<(String, String)> = node
                    .tags()
                    .map(|(k, v)| (k.to_owned(), v.to_owned()))
                    .collect();
                assert_eq!(tags, sample.tags);
            }
            Element::Node(_) => panic!("nodes are written densely"),
            Element::Way(way) => {
                let refs: Vec<i64> = way.refs().collect();
                assert_eq!(refs, vec![1, 2, 5]);
                let tags: Vec<(&str, &str)> = way.tags().collect();
                assert_eq!(tags, vec![("highway", "residential")]);
            }
            Element::Relation(relation) => {
                let members: Vec<(osmpbf::elements::RelMemberType, i64)> = relation
                    .members()
                    .map(|member| (member.member_type, member.member_id))
                    .collect();
                assert_eq!(
                    members,
                    vec![
                        (osmpbf::elements::RelMemberType::Way, 10),
                        (osmpbf::elements::RelMemberType::Node, 1)
                    ]
                );
                let roles: Vec<&str> = relation
                    .members()
                    .map(|member| member.role().expect("utf-8 role"))
                    .collect();
                assert_eq!(roles, vec!["outer", ""]);
            }
        })
        .expect("decode tile");
}

#[rstest]
fn round_trips_metadata() {
    let file = write_sample(true);
    let reader = ElementReader::from_path(file.path()).expect("open tile");

    reader
        .for_each(|element| match element {
            Element::DenseNode(node) => {
                let info = node.info().expect("dense metadata present");
                let expected = sample_nodes()
                    .into_iter()
                    .find(|n| n.id == node.id())
                    .expect("known node id");
                assert_eq!(Some(info.version()), expected.meta.version);
                assert_eq!(Some(info.milli_timestamp()), expected.meta.timestamp_ms);
            }
            Element::Way(way) => {
                let info = way.info();
                assert_eq!(info.version(), Some(4));
                assert_eq!(info.milli_timestamp(), Some(1_600_000_001_000));
            }
            Element::Relation(relation) => {
                let info = relation.info();
                assert_eq!(info.version(), Some(1));
                assert_eq!(info.milli_timestamp(), Some(1_600_000_002_000));
            }
            Element::Node(_) => panic!("nodes are written densely"),
        })
        .expect("decode tile");
}

#[rstest]
fn splits_large_streams_into_multiple_blocks() {
    let mut file = NamedTempFile::new().expect("create temp file");
    let mut writer = TileWriter::new(Vec::new(), &Bounds::WORLD, false).expect("start writer");
    let count = 20_000i64;
    for id in 0..count {
        writer
            .node(&Node {
                id,
                lon: 8.0 + (id as f64) * 1e-6,
                lat: 47.0,
                tags: Vec::new(),
                meta: Metadata::default(),
            })
            .expect("buffer node");
    }
    let bytes = writer.finish().expect("finish tile");
    file.write_all(&bytes).expect("persist tile");

    let reader = ElementReader::from_path(file.path()).expect("open tile");
    let mut next_id = 0i64;
    reader
        .for_each(|element| {
            if let Element::DenseNode(node) = element {
                assert_eq!(node.id(), next_id, "ids arrive in write order");
                next_id += 1;
            }
        })
        .expect("decode tile");
    assert_eq!(next_id, count);
}
