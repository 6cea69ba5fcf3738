use std::collections::{BTreeMap, HashMap};

use crate::anchor_fn::{AnchorSpecifier, ValueWithAnchorFunctions, parse_anchor_functions};
use crate::debug::DebugLogger;
use crate::dom::{ContainingBlock, Dom, ElementRef};
use crate::error::AnchorError;
use crate::ids::IdGenerator;
use crate::metadata;
use crate::preprocess::PreprocessingResult;
use crate::properties::{PropertyKind, is_dashed_ident};

/// Anchor-relevant values of one positioned element, keyed by property.
#[derive(Debug, Clone)]
pub struct ElementAnchors {
    pub element: ElementRef,
    pub values: BTreeMap<String, ValueWithAnchorFunctions>,
}

#[derive(Debug, Default)]
pub struct AnchorProperties {
    /// Elements declaring each anchor name, in tree order.
    pub elements_by_anchor_name: HashMap<String, Vec<ElementRef>>,
    pub anchor_scope_by_element: HashMap<ElementRef, String>,
    pub position_anchor_by_element: HashMap<ElementRef, String>,
    pub anchors_by_element: Vec<ElementAnchors>,
    /// Position of each element's entry in `anchors_by_element`.
    entry_index: HashMap<ElementRef, usize>,
}

impl AnchorProperties {
    pub fn anchors_for(&self, element: &ElementRef) -> Option<&ElementAnchors> {
        self.entry_index
            .get(element)
            .and_then(|&idx| self.anchors_by_element.get(idx))
            .filter(|entry| &entry.element == element)
    }

    fn values_for(&mut self, element: &ElementRef) -> &mut BTreeMap<String, ValueWithAnchorFunctions> {
        let idx = match self.entry_index.get(element) {
            Some(&idx) => idx,
            None => {
                self.anchors_by_element.push(ElementAnchors {
                    element: element.clone(),
                    values: BTreeMap::new(),
                });
                let idx = self.anchors_by_element.len() - 1;
                self.entry_index.insert(element.clone(), idx);
                idx
            }
        };
        &mut self.anchors_by_element[idx].values
    }
}

/// Reads every polyfilled value off the document and settles each anchor
/// function against the anchors its element may use.
pub fn resolve_anchors(
    dom: &Dom,
    result: &PreprocessingResult,
    ids: &mut IdGenerator,
    debug: Option<&DebugLogger>,
) -> Result<AnchorProperties, AnchorError> {
    let mut props = collect_properties(dom, result, ids, debug)?;
    let mut cache: HashMap<(ElementRef, String), Option<ElementRef>> = HashMap::new();
    let mut entries = std::mem::take(&mut props.anchors_by_element);
    let mut settled = 0u64;
    for entry in entries.iter_mut() {
        for (property, value) in entry.values.iter_mut() {
            for function in value.functions.iter_mut() {
                let name = match &function.specifier {
                    AnchorSpecifier::Named(name) => Some(name.clone()),
                    AnchorSpecifier::Implicit => default_anchor(dom, &props, &entry.element),
                };
                let Some(name) = name else {
                    if let Some(logger) = debug {
                        logger.log_event(
                            "resolve.implicit_unsupported",
                            &[
                                ("element", entry.element.describe().as_str()),
                                ("property", property.as_str()),
                            ],
                        );
                        logger.increment("resolve.implicit_unsupported", 1);
                    }
                    continue;
                };
                let key = (entry.element.clone(), name);
                let anchor = match cache.get(&key) {
                    Some(anchor) => anchor.clone(),
                    None => {
                        let anchor = find_anchor(dom, &props, &entry.element, &key.1);
                        cache.insert(key, anchor.clone());
                        anchor
                    }
                };
                if let Some(logger) = debug {
                    let described = anchor.as_ref().map(ElementRef::describe).unwrap_or_default();
                    logger.log_event(
                        "resolve.binding",
                        &[
                            ("element", entry.element.describe().as_str()),
                            ("property", property.as_str()),
                            ("anchor", described.as_str()),
                        ],
                    );
                }
                if function.settle(anchor) {
                    settled += 1;
                }
            }
        }
    }
    props.anchors_by_element = entries;
    if let Some(logger) = debug {
        logger.increment("resolve.functions_settled", settled);
        logger.increment("resolve.elements", props.anchors_by_element.len() as u64);
    }
    Ok(props)
}

fn collect_properties(
    dom: &Dom,
    result: &PreprocessingResult,
    ids: &mut IdGenerator,
    debug: Option<&DebugLogger>,
) -> Result<AnchorProperties, AnchorError> {
    let mut props = AnchorProperties::default();
    for prop in dom.table().iter() {
        let Some(selectors) = result.selectors_by_property.get(prop.name) else {
            continue;
        };
        for element in dom.distinct_elements(selectors)? {
            let read = dom.property_value(&element, prop.name);
            let value = read.value.trim();
            if value.is_empty() || metadata::contains_delimiter(value) {
                continue;
            }
            let metadata = read.metadata.unwrap_or_default();
            if prop.kind.is_anchor_keyword_family() && !prop.kind.accepts(value) {
                if let Some(logger) = debug {
                    logger.log_event(
                        "resolve.invalid_value",
                        &[("property", prop.name), ("value", value)],
                    );
                }
                continue;
            }
            match prop.kind {
                PropertyKind::AnchorName => {
                    if !value.eq_ignore_ascii_case("none") {
                        props
                            .elements_by_anchor_name
                            .entry(value.to_string())
                            .or_default()
                            .push(element);
                    }
                }
                PropertyKind::AnchorScope => {
                    if !value.eq_ignore_ascii_case("none") {
                        props
                            .anchor_scope_by_element
                            .insert(element, value.to_string());
                    }
                }
                PropertyKind::PositionAnchor => {
                    if !value.eq_ignore_ascii_case("auto") {
                        props
                            .position_anchor_by_element
                            .insert(element, value.to_string());
                    }
                }
                PropertyKind::Inset | PropertyKind::Sizing => {
                    let Some(kind) = prop.kind.anchor_function() else {
                        continue;
                    };
                    let parsed = if metadata.dynamic {
                        parse_anchor_functions(value, kind, ids)
                    } else {
                        metadata
                            .parsed
                            .as_ref()
                            .and_then(|id| result.anchor_values_by_uuid.get(id))
                            .cloned()
                    };
                    if let Some(parsed) = parsed {
                        props
                            .values_for(&element)
                            .insert(prop.name.to_string(), parsed);
                    }
                }
            }
        }
    }
    for elements in props.elements_by_anchor_name.values_mut() {
        elements.sort_by(|a, b| dom.compare_tree_order(a, b));
    }
    Ok(props)
}

/// `position-anchor` inherits, so elements that never matched a declaring
/// selector still read it from the cascade.
fn default_anchor(dom: &Dom, props: &AnchorProperties, element: &ElementRef) -> Option<String> {
    let name = match props.position_anchor_by_element.get(element) {
        Some(name) => name.clone(),
        None => dom.property_value(element, "position-anchor").value,
    };
    let name = name.trim();
    is_dashed_ident(name).then(|| name.to_string())
}

fn find_anchor(
    dom: &Dom,
    props: &AnchorProperties,
    query: &ElementRef,
    name: &str,
) -> Option<ElementRef> {
    let candidates = props.elements_by_anchor_name.get(name)?;
    let scope = scope_for(dom, props, query, name);
    let mut candidates: Vec<&ElementRef> = candidates
        .iter()
        .filter(|anchor| match &scope {
            Some(scope) => dom.contains(scope, anchor),
            None => true,
        })
        .collect();
    if !dom.is_absolutely_positioned(query) {
        return None;
    }
    candidates.sort_by(|a, b| dom.compare_tree_order(b, a));
    candidates
        .into_iter()
        .find(|anchor| is_acceptable_anchor(dom, anchor, query))
        .cloned()
}

/// Nearest inclusive ancestor whose `anchor-scope` covers `name`.
fn scope_for(
    dom: &Dom,
    props: &AnchorProperties,
    query: &ElementRef,
    name: &str,
) -> Option<ElementRef> {
    let mut current = Some(query.clone());
    while let Some(element) = current {
        if let Some(scope) = props.anchor_scope_by_element.get(&element) {
            if scope.eq_ignore_ascii_case("all")
                || scope.split(',').any(|entry| entry.trim() == name)
            {
                return Some(element);
            }
        }
        current = dom.parent_element(&element);
    }
    None
}

fn is_acceptable_anchor(dom: &Dom, anchor: &ElementRef, query: &ElementRef) -> bool {
    let query_block = dom.containing_block(query);
    let anchor_block = dom.containing_block(anchor);
    if query_block != ContainingBlock::Initial && !dom.is_descendant(anchor, &query_block) {
        return false;
    }
    if anchor_block == query_block {
        if dom.is_absolutely_positioned(anchor) && !dom.precedes(anchor, query) {
            return false;
        }
    } else {
        let mut current = anchor_block;
        let mut previous = None;
        while current != query_block {
            let ContainingBlock::Element(element) = current else {
                break;
            };
            current = dom.containing_block(&element);
            previous = Some(element);
        }
        if let Some(previous) = previous {
            if dom.is_absolutely_positioned(&previous) && !dom.precedes(&previous, query) {
                return false;
            }
        }
    }
    let mut ancestor = dom.parent_element(anchor);
    while let Some(element) = ancestor {
        let hidden = dom
            .style_of(&element)
            .map(|style| style.keyword("content-visibility") == "hidden")
            .unwrap_or(false);
        if hidden {
            return false;
        }
        ancestor = dom.parent_element(&element);
    }
    true
}
