use std::collections::{BTreeMap, HashMap, HashSet};

use lightningcss::properties::{Property, PropertyId};
use lightningcss::rules::style::StyleRule;
use lightningcss::rules::{CssRule, CssRuleList};
use lightningcss::stylesheet::{ParserOptions, PrinterOptions, StyleSheet};
use lightningcss::traits::ToCss;

use crate::anchor_fn::{ValueWithAnchorFunctions, parse_anchor_functions};
use crate::debug::DebugLogger;
use crate::error::AnchorError;
use crate::ids::IdGenerator;
use crate::metadata::{self, ValueMetadata};
use crate::properties::{PolyfilledProperty, PropertyTable};
use crate::selector::{Selector, split_selector_list};
use crate::source::CssSource;
use crate::value;

#[derive(Debug, Default, Clone)]
pub struct PreprocessingResult {
    pub selectors_by_uuid: HashMap<String, Selector>,
    /// Property name to the selectors declaring it, in document order.
    pub selectors_by_property: BTreeMap<String, Vec<Selector>>,
    pub anchor_values_by_uuid: HashMap<String, ValueWithAnchorFunctions>,
}

impl PreprocessingResult {
    fn record_selector(&mut self, property: &str, selector: &Selector) {
        self.selectors_by_uuid
            .entry(selector.id.clone())
            .or_insert_with(|| selector.clone());
        let list = self
            .selectors_by_property
            .entry(property.to_string())
            .or_default();
        if !list.contains(selector) {
            list.push(selector.clone());
        }
    }
}

#[derive(Debug, Clone)]
struct ShadowDeclaration {
    rule: usize,
    index: usize,
    important: bool,
    name: String,
    value: String,
}

/// Copies every polyfilled declaration into its shadow custom property,
/// rewriting the sources that changed. A source that fails to parse is
/// skipped, the way a browser ignores a broken stylesheet.
pub fn preprocess_sources(
    sources: &mut [CssSource],
    table: &PropertyTable,
    ids: &mut IdGenerator,
    debug: Option<&DebugLogger>,
) -> PreprocessingResult {
    let mut result = PreprocessingResult::default();
    for source in sources.iter_mut() {
        let outcome = collect_shadow_declarations(&source.css, table, ids, &mut result, debug)
            .and_then(|pending| {
                if pending.is_empty() {
                    Ok(None)
                } else {
                    rewrite_css(&source.css, &pending, table).map(Some)
                }
            });
        match outcome {
            Ok(Some(css)) => {
                source.css = css;
                source.dirty = true;
            }
            Ok(None) => {}
            Err(err) => {
                if let Some(logger) = debug {
                    logger.log_event(
                        "preprocess.source_failed",
                        &[("source", source.id.as_str()), ("error", err.to_string().as_str())],
                    );
                    logger.increment("preprocess.source_failed", 1);
                }
            }
        }
    }
    result
}

fn for_each_style_rule<'i>(
    rules: &mut CssRuleList<'i>,
    ordinal: &mut usize,
    visit: &mut dyn FnMut(usize, &mut StyleRule<'i>) -> Result<(), AnchorError>,
) -> Result<(), AnchorError> {
    for rule in rules.0.iter_mut() {
        match rule {
            CssRule::Style(style) => {
                visit(*ordinal, style)?;
                *ordinal += 1;
            }
            CssRule::Media(media) => for_each_style_rule(&mut media.rules, ordinal, visit)?,
            CssRule::Supports(supports) => {
                for_each_style_rule(&mut supports.rules, ordinal, visit)?
            }
            CssRule::LayerBlock(layer) => for_each_style_rule(&mut layer.rules, ordinal, visit)?,
            CssRule::Container(container) => {
                for_each_style_rule(&mut container.rules, ordinal, visit)?
            }
            _ => {}
        }
    }
    Ok(())
}

fn collect_shadow_declarations(
    css: &str,
    table: &PropertyTable,
    ids: &mut IdGenerator,
    result: &mut PreprocessingResult,
    debug: Option<&DebugLogger>,
) -> Result<Vec<ShadowDeclaration>, AnchorError> {
    let options = ParserOptions {
        error_recovery: true,
        ..ParserOptions::default()
    };
    let mut sheet =
        StyleSheet::parse(css, options).map_err(|err| AnchorError::Css(err.to_string()))?;
    let mut pending = Vec::new();
    let mut selectors_by_rule: HashMap<usize, Vec<Selector>> = HashMap::new();
    let mut ordinal = 0usize;
    for_each_style_rule(&mut sheet.rules, &mut ordinal, &mut |rule, style| {
        let blocks = [
            (false, &style.declarations.declarations),
            (true, &style.declarations.important_declarations),
        ];
        for (important, declarations) in blocks {
            for (index, property) in declarations.iter().enumerate() {
                let Some(prop) = table.get(property.property_id().name()) else {
                    continue;
                };
                let Ok(raw_value) = property.value_to_css_string(PrinterOptions::default()) else {
                    continue;
                };
                let selectors = match selectors_by_rule.get(&rule) {
                    Some(selectors) => selectors.clone(),
                    None => {
                        let text = style
                            .selectors
                            .to_css_string(PrinterOptions::default())
                            .map_err(|err| AnchorError::Css(err.to_string()))?;
                        let selectors: Vec<Selector> = split_selector_list(&text)
                            .iter()
                            .map(|part| Selector::new(ids.uuid(), part))
                            .collect();
                        selectors_by_rule.insert(rule, selectors.clone());
                        selectors
                    }
                };
                let Some(base) = shadow_metadata(prop, &raw_value, ids, result, debug) else {
                    continue;
                };
                for selector in &selectors {
                    let metadata = ValueMetadata {
                        selector: Some(selector.id.clone()),
                        ..base.clone()
                    };
                    result.record_selector(prop.name, selector);
                    if let Some(logger) = debug {
                        logger.log_event(
                            "preprocess.declaration",
                            &[
                                ("property", prop.name),
                                ("selector", selector.full.as_str()),
                                ("value", raw_value.as_str()),
                            ],
                        );
                        logger.increment("preprocess.shadow_declarations", 1);
                    }
                    pending.push(ShadowDeclaration {
                        rule,
                        index,
                        important,
                        name: prop.shadow.clone(),
                        value: metadata::attach(&raw_value, &metadata),
                    });
                }
            }
        }
        Ok(())
    })?;
    Ok(pending)
}

/// Applies the value policy for one declaration. `None` drops the shadow
/// declaration.
fn shadow_metadata(
    prop: &PolyfilledProperty,
    raw_value: &str,
    ids: &mut IdGenerator,
    result: &mut PreprocessingResult,
    debug: Option<&DebugLogger>,
) -> Option<ValueMetadata> {
    if metadata::contains_delimiter(raw_value) {
        if let Some(logger) = debug {
            logger.log_event(
                "preprocess.dropped",
                &[("property", prop.name), ("value", raw_value)],
            );
            logger.increment("preprocess.dropped", 1);
        }
        return None;
    }
    let mut metadata = ValueMetadata::default();
    if value::contains_var(raw_value) {
        metadata.dynamic = true;
    } else if prop.kind.is_anchor_keyword_family() {
        if !prop.kind.accepts(raw_value) {
            if let Some(logger) = debug {
                logger.log_event(
                    "preprocess.dropped",
                    &[("property", prop.name), ("value", raw_value)],
                );
                logger.increment("preprocess.dropped", 1);
            }
            return None;
        }
    } else if let Some(kind) = prop.kind.anchor_function() {
        if raw_value.to_ascii_lowercase().contains(&format!("{}(", kind.name())) {
            if let Some(parsed) = parse_anchor_functions(raw_value, kind, ids) {
                metadata.parsed = Some(parsed.id.clone());
                result.anchor_values_by_uuid.insert(parsed.id.clone(), parsed);
            }
        }
    }
    Some(metadata)
}

/// Re-parses `css` and inserts each pending declaration after the one it
/// shadows. Shadow declarations left by an earlier run are replaced.
fn rewrite_css<'a>(
    css: &'a str,
    pending: &'a [ShadowDeclaration],
    table: &PropertyTable,
) -> Result<String, AnchorError> {
    let options = ParserOptions {
        error_recovery: true,
        ..ParserOptions::default()
    };
    let mut sheet =
        StyleSheet::parse(css, options).map_err(|err| AnchorError::Css(err.to_string()))?;
    let shadow_names: HashSet<&str> = table.iter().map(|prop| prop.shadow.as_str()).collect();
    let mut by_rule: HashMap<usize, Vec<&ShadowDeclaration>> = HashMap::new();
    for shadow in pending {
        by_rule.entry(shadow.rule).or_default().push(shadow);
    }
    let mut ordinal = 0usize;
    for_each_style_rule(&mut sheet.rules, &mut ordinal, &mut |rule, style| {
        let Some(shadows) = by_rule.get(&rule) else {
            return Ok(());
        };
        let block = &mut style.declarations;
        block.declarations = interleave(
            std::mem::take(&mut block.declarations),
            false,
            shadows,
            &shadow_names,
        )?;
        block.important_declarations = interleave(
            std::mem::take(&mut block.important_declarations),
            true,
            shadows,
            &shadow_names,
        )?;
        Ok(())
    })?;
    sheet
        .to_css(PrinterOptions::default())
        .map(|out| out.code)
        .map_err(|err| AnchorError::Css(err.to_string()))
}

fn interleave<'i>(
    declarations: Vec<Property<'i>>,
    important: bool,
    shadows: &[&'i ShadowDeclaration],
    shadow_names: &HashSet<&str>,
) -> Result<Vec<Property<'i>>, AnchorError> {
    let mut out = Vec::with_capacity(declarations.len() + shadows.len());
    for (index, property) in declarations.into_iter().enumerate() {
        let stale = shadow_names.contains(property.property_id().name());
        if !stale {
            out.push(property);
        }
        for shadow in shadows
            .iter()
            .filter(|shadow| shadow.important == important && shadow.index == index)
        {
            let parsed = Property::parse_string(
                PropertyId::from(shadow.name.as_str()),
                shadow.value.as_str(),
                ParserOptions::default(),
            )
            .map_err(|err| AnchorError::Css(format!("{}: {:?}", shadow.name, err)))?;
            out.push(parsed);
        }
    }
    Ok(out)
}
