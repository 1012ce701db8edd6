//! Adaptation of decoded OSM elements.
//!
//! Converts the decoder's borrowed element views into the owned model used
//! for fan-out and deferred relations, normalises ids into the `u64` key
//! space, and enforces metadata presence when requested.

use log::warn;
use osmpbf::elements::RelMemberType;
use osmpbf::Element;
use thiserror::Error;
use tilesplit_pbf::{Member, MemberKind, Metadata, Node, Relation, Way};

/// Errors raised while adapting decoded elements.
#[derive(Debug, Error)]
pub enum InputError {
    /// Metadata output was requested but the element carries none.
    #[error("{kind} {id} is missing version or timestamp metadata")]
    MissingMetadata {
        /// Element kind, for the log line.
        kind: &'static str,
        /// Raw OSM id.
        id: i64,
    },
}

/// An owned element, ready to hand to any number of tile writers.
#[derive(Debug)]
pub(crate) enum OsmElement {
    Node(Node),
    Way(Way),
    Relation(Relation),
}

pub(crate) fn convert(element: Element<'_>) -> OsmElement {
    match element {
        Element::Node(node) => OsmElement::Node(Node {
            id: node.id(),
            lon: node.lon(),
            lat: node.lat(),
            tags: collect_tags(node.tags()),
            meta: info_meta(&node.info()),
        }),
        Element::DenseNode(node) => OsmElement::Node(Node {
            id: node.id(),
            lon: node.lon(),
            lat: node.lat(),
            tags: collect_tags(node.tags()),
            meta: dense_meta(&node),
        }),
        Element::Way(way) => OsmElement::Way(Way {
            id: way.id(),
            refs: way.refs().collect(),
            tags: collect_tags(way.tags()),
            meta: info_meta(&way.info()),
        }),
        Element::Relation(relation) => OsmElement::Relation(relation_model(&relation)),
    }
}

pub(crate) fn relation_model(relation: &osmpbf::Relation<'_>) -> Relation {
    let members = relation
        .members()
        .map(|member| Member {
            kind: match member.member_type {
                RelMemberType::Node => MemberKind::Node,
                RelMemberType::Way => MemberKind::Way,
                RelMemberType::Relation => MemberKind::Relation,
            },
            id: member.member_id,
            role: member.role().unwrap_or("").to_owned(),
        })
        .collect();
    Relation {
        id: relation.id(),
        members,
        tags: collect_tags(relation.tags()),
        meta: info_meta(&relation.info()),
    }
}

pub(crate) fn info_meta(info: &osmpbf::Info) -> Metadata {
    Metadata {
        version: info.version(),
        timestamp_ms: info.milli_timestamp(),
    }
}

pub(crate) fn dense_meta(node: &osmpbf::DenseNode<'_>) -> Metadata {
    match node.info() {
        Some(info) => Metadata {
            version: Some(info.version()),
            timestamp_ms: Some(info.milli_timestamp()),
        },
        None => Metadata::default(),
    }
}

/// Normalise an OSM id into the map key space. Negative ids are skipped
/// with a warning.
pub(crate) fn element_key(kind: &'static str, id: i64) -> Option<u64> {
    match u64::try_from(id) {
        Ok(key) => Some(key),
        Err(_) => {
            warn!("skipping {kind} {id}: negative ids are unsupported");
            None
        }
    }
}

pub(crate) fn require_metadata(
    kind: &'static str,
    id: i64,
    meta: &Metadata,
) -> Result<(), InputError> {
    if meta.version.is_none() || meta.timestamp_ms.is_none() {
        return Err(InputError::MissingMetadata { kind, id });
    }
    Ok(())
}

fn collect_tags<'a, T>(tags: T) -> Vec<(String, String)>
where
    T: IntoIterator<Item = (&'a str, &'a str)>,
{
    tags.into_iter()
        .map(|(key, value)| (key.to_owned(), value.to_owned()))
        .collect()
}
