use std::collections::HashMap;

use crate::anchor_fn::AnchorFunctionKind;
use crate::ids::IdGenerator;
use crate::metadata::METADATA_DELIMITER;

const INSET_PROPERTIES: &[&str] = &[
    "left",
    "right",
    "top",
    "bottom",
    "inset-block-start",
    "inset-block-end",
    "inset-inline-start",
    "inset-inline-end",
    "inset-block",
    "inset-inline",
    "inset",
];

const SIZING_PROPERTIES: &[&str] = &[
    "width",
    "height",
    "min-width",
    "min-height",
    "max-width",
    "max-height",
];

pub(crate) const ANCHOR_SIDE_KEYWORDS: &[&str] = &[
    "top",
    "left",
    "right",
    "bottom",
    "start",
    "end",
    "self-start",
    "self-end",
    "center",
];

pub(crate) const ANCHOR_SIZE_KEYWORDS: &[&str] = &[
    "width",
    "height",
    "block",
    "inline",
    "self-block",
    "self-inline",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyKind {
    Inset,
    Sizing,
    AnchorName,
    AnchorScope,
    PositionAnchor,
}

impl PropertyKind {
    /// The anchor function a property of this kind may carry, if any.
    pub fn anchor_function(self) -> Option<AnchorFunctionKind> {
        match self {
            PropertyKind::Inset => Some(AnchorFunctionKind::Anchor),
            PropertyKind::Sizing => Some(AnchorFunctionKind::AnchorSize),
            _ => None,
        }
    }

    pub fn is_anchor_keyword_family(self) -> bool {
        matches!(
            self,
            PropertyKind::AnchorName | PropertyKind::AnchorScope | PropertyKind::PositionAnchor
        )
    }

    /// Checks a literal (var-free) value against the property's grammar.
    /// Inset and sizing values are not validated here.
    pub fn accepts(self, value: &str) -> bool {
        let value = value.trim();
        match self {
            PropertyKind::AnchorName => is_dashed_ident(value) || value.eq_ignore_ascii_case("none"),
            PropertyKind::PositionAnchor => {
                is_dashed_ident(value) || value.eq_ignore_ascii_case("auto")
            }
            PropertyKind::AnchorScope => {
                is_dashed_ident(value)
                    || value.eq_ignore_ascii_case("all")
                    || value.eq_ignore_ascii_case("none")
            }
            PropertyKind::Inset | PropertyKind::Sizing => true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PolyfilledProperty {
    pub name: &'static str,
    pub kind: PropertyKind,
    pub shadow: String,
    pub inherits: bool,
}

/// Real property name to shadow custom property mapping for one pass.
///
/// Shadow names are custom properties, so they never appear in the table
/// themselves and preprocessing already-rewritten CSS adds nothing new.
#[derive(Debug, Clone)]
pub struct PropertyTable {
    properties: Vec<PolyfilledProperty>,
    by_name: HashMap<&'static str, usize>,
}

impl PropertyTable {
    pub fn new(ids: &mut IdGenerator) -> Self {
        let mut properties = Vec::new();
        let mut push = |name: &'static str, kind: PropertyKind, inherits: bool| {
            properties.push(PolyfilledProperty {
                name,
                kind,
                shadow: ids.property(name),
                inherits,
            });
        };
        push("anchor-name", PropertyKind::AnchorName, false);
        push("anchor-scope", PropertyKind::AnchorScope, false);
        push("position-anchor", PropertyKind::PositionAnchor, true);
        for name in INSET_PROPERTIES {
            push(name, PropertyKind::Inset, false);
        }
        for name in SIZING_PROPERTIES {
            push(name, PropertyKind::Sizing, false);
        }
        let by_name = properties
            .iter()
            .enumerate()
            .map(|(idx, prop)| (prop.name, idx))
            .collect();
        Self {
            properties,
            by_name,
        }
    }

    pub fn get(&self, name: &str) -> Option<&PolyfilledProperty> {
        let key = name.trim().to_ascii_lowercase();
        self.by_name
            .get(key.as_str())
            .map(|idx| &self.properties[*idx])
    }

    pub fn iter(&self) -> impl Iterator<Item = &PolyfilledProperty> {
        self.properties.iter()
    }
}

pub(crate) fn is_dashed_ident(value: &str) -> bool {
    let Some(rest) = value.strip_prefix("--") else {
        return false;
    };
    !rest.is_empty()
        && rest
            .chars()
            .all(|ch| {
                (ch.is_alphanumeric() || ch == '-' || ch == '_' || !ch.is_ascii())
                    && ch != METADATA_DELIMITER
            })
}

pub(crate) fn is_side_keyword(value: &str) -> bool {
    ANCHOR_SIDE_KEYWORDS
        .iter()
        .any(|kw| kw.eq_ignore_ascii_case(value))
}

pub(crate) fn is_size_keyword(value: &str) -> bool {
    ANCHOR_SIZE_KEYWORDS
        .iter()
        .any(|kw| kw.eq_ignore_ascii_case(value))
}
