use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::sync::Arc;

use kuchiki::{ElementData, NodeDataRef, NodeRef, Selectors, Specificity};
use lightningcss::declaration::DeclarationBlock;
use lightningcss::rules::{CssRule, CssRuleList};
use lightningcss::stylesheet::{ParserOptions, PrinterOptions, StyleSheet};
use lightningcss::traits::ToCss;

use crate::debug::DebugLogger;
use crate::selector::{split_pseudo_element, split_selector_list};
use crate::source::CssSource;
use crate::value;

pub(crate) type NodeKey = usize;

pub(crate) fn node_key(node: &NodeRef) -> NodeKey {
    Rc::as_ptr(&node.0) as usize
}

/// Cascade origin; later variants win regardless of specificity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Origin {
    UserAgent,
    Author,
    Inline,
}

enum RuleTarget {
    Selector(kuchiki::Selector),
    Inline(NodeKey),
}

struct RuleEntry {
    origin: Origin,
    target: RuleTarget,
    pseudo: Option<String>,
    specificity: Option<Specificity>,
    order: usize,
    declarations: Vec<(String, String)>,
}

impl RuleEntry {
    fn applies_to(&self, element: &NodeDataRef<ElementData>, pseudo: Option<&str>) -> bool {
        if self.pseudo.as_deref() != pseudo {
            return false;
        }
        match &self.target {
            RuleTarget::Selector(selector) => selector.matches(element),
            RuleTarget::Inline(key) => *key == node_key(element.as_node()),
        }
    }

    fn sort_key(&self) -> (Origin, Option<Specificity>, usize) {
        (self.origin, self.specificity, self.order)
    }
}

/// Computed values for one element or pseudo-element. Custom properties
/// inherit; everything else falls back to its initial value.
#[derive(Debug, Clone, Default)]
pub struct ComputedStyle {
    custom: HashMap<String, String>,
    properties: HashMap<String, String>,
}

impl ComputedStyle {
    pub fn get(&self, name: &str) -> Option<&str> {
        if name.starts_with("--") {
            return self.custom.get(name).map(String::as_str);
        }
        self.properties
            .get(name)
            .map(String::as_str)
            .or_else(|| initial_value(name))
    }

    pub fn keyword(&self, name: &str) -> String {
        self.get(name).unwrap_or_default().trim().to_ascii_lowercase()
    }
}

fn initial_value(name: &str) -> Option<&'static str> {
    match name {
        "position" => Some("static"),
        "display" => Some("inline"),
        "content-visibility" => Some("visible"),
        "overflow" => Some("visible"),
        _ => None,
    }
}

/// Emulates the browser cascade over the document's style sources.
pub struct StyleResolver {
    normal_rules: Vec<RuleEntry>,
    important_rules: Vec<RuleEntry>,
    debug: Option<Arc<DebugLogger>>,
}

impl StyleResolver {
    pub fn new(sources: &[CssSource], debug: Option<Arc<DebugLogger>>) -> Self {
        let mut resolver = Self {
            normal_rules: Vec::new(),
            important_rules: Vec::new(),
            debug,
        };
        let mut order = 0usize;
        resolver.append_stylesheet(default_ua_css(), Origin::UserAgent, None, &mut order);
        for source in sources {
            let inline = source
                .host
                .is_inline()
                .then(|| node_key(source.host.node()));
            let origin = if inline.is_some() {
                Origin::Inline
            } else {
                Origin::Author
            };
            resolver.append_stylesheet(&source.css, origin, inline, &mut order);
        }
        resolver.normal_rules.sort_by_key(RuleEntry::sort_key);
        resolver.important_rules.sort_by_key(RuleEntry::sort_key);
        resolver
    }

    fn append_stylesheet(
        &mut self,
        css: &str,
        origin: Origin,
        inline: Option<NodeKey>,
        order: &mut usize,
    ) {
        let options = ParserOptions {
            error_recovery: true,
            ..ParserOptions::default()
        };
        match StyleSheet::parse(css, options) {
            Ok(sheet) => self.append_rule_list(&sheet.rules, origin, inline, order),
            Err(err) => {
                if let Some(logger) = self.debug.as_deref() {
                    logger.log_event("cascade.sheet_unparsed", &[("error", err.to_string().as_str())]);
                    logger.increment("cascade.sheet_unparsed", 1);
                }
            }
        }
    }

    fn append_rule_list(
        &mut self,
        rules: &CssRuleList,
        origin: Origin,
        inline: Option<NodeKey>,
        order: &mut usize,
    ) {
        for rule in &rules.0 {
            match rule {
                CssRule::Style(style) => {
                    let normal = declaration_pairs(&style.declarations, false);
                    let important = declaration_pairs(&style.declarations, true);
                    let selectors = style
                        .selectors
                        .to_css_string(PrinterOptions::default())
                        .unwrap_or_default();
                    for part in split_selector_list(&selectors) {
                        let (element_part, pseudo) = split_pseudo_element(&part);
                        let (target, specificity) = match inline {
                            Some(key) => (RuleTarget::Inline(key), None),
                            None => match compile_selector(&element_part) {
                                Some(selector) => {
                                    let specificity = selector.specificity();
                                    (RuleTarget::Selector(selector), Some(specificity))
                                }
                                None => {
                                    if let Some(logger) = self.debug.as_deref() {
                                        logger.log_event(
                                            "cascade.selector_unparsed",
                                            &[("selector", part.as_str())],
                                        );
                                        logger.increment("cascade.selector_unparsed", 1);
                                    }
                                    continue;
                                }
                            },
                        };
                        let entry = |target, declarations: &Vec<(String, String)>| RuleEntry {
                            origin,
                            target,
                            pseudo: pseudo.clone(),
                            specificity,
                            order: *order,
                            declarations: declarations.clone(),
                        };
                        if !important.is_empty() {
                            let target = match &target {
                                RuleTarget::Inline(key) => RuleTarget::Inline(*key),
                                RuleTarget::Selector(_) => match compile_selector(&element_part) {
                                    Some(selector) => RuleTarget::Selector(selector),
                                    None => continue,
                                },
                            };
                            self.important_rules.push(entry(target, &important));
                        }
                        if !normal.is_empty() {
                            self.normal_rules.push(entry(target, &normal));
                        }
                    }
                    *order += 1;
                }
                CssRule::Media(media) => {
                    self.append_rule_list(&media.rules, origin, inline, order)
                }
                CssRule::Supports(supports) => {
                    self.append_rule_list(&supports.rules, origin, inline, order)
                }
                CssRule::LayerBlock(layer) => {
                    self.append_rule_list(&layer.rules, origin, inline, order)
                }
                CssRule::Container(container) => {
                    self.append_rule_list(&container.rules, origin, inline, order)
                }
                _ => {}
            }
        }
    }

    /// Cascaded declarations for an element or one of its pseudo-elements,
    /// in application order.
    pub fn cascaded(
        &self,
        element: &NodeDataRef<ElementData>,
        pseudo: Option<&str>,
    ) -> Vec<(String, String)> {
        let mut winners: Vec<(String, String)> = Vec::new();
        for entry in self
            .normal_rules
            .iter()
            .chain(self.important_rules.iter())
            .filter(|entry| entry.applies_to(element, pseudo))
        {
            for (name, value) in &entry.declarations {
                winners.retain(|(existing, _)| existing != name);
                winners.push((name.clone(), value.clone()));
            }
        }
        winners
    }

    pub fn compute(
        &self,
        element: &NodeDataRef<ElementData>,
        pseudo: Option<&str>,
        parent: Option<&ComputedStyle>,
    ) -> ComputedStyle {
        compute_from_declarations(&self.cascaded(element, pseudo), parent)
    }
}

fn compile_selector(text: &str) -> Option<kuchiki::Selector> {
    Selectors::compile(text).ok()?.0.into_iter().next()
}

fn declaration_pairs(block: &DeclarationBlock, important: bool) -> Vec<(String, String)> {
    let list = if important {
        &block.important_declarations
    } else {
        &block.declarations
    };
    list.iter()
        .filter_map(|property| {
            let id = property.property_id();
            let name = id.name();
            let name = if name.starts_with("--") {
                name.to_string()
            } else {
                name.to_ascii_lowercase()
            };
            let value = property
                .value_to_css_string(PrinterOptions::default())
                .ok()?;
            Some((name, value))
        })
        .collect()
}

pub(crate) fn compute_from_declarations(
    declared: &[(String, String)],
    parent: Option<&ComputedStyle>,
) -> ComputedStyle {
    let inherited = parent.map(|p| p.custom.clone()).unwrap_or_default();
    let mut specified: HashMap<String, String> = HashMap::new();
    let mut removed: HashSet<String> = HashSet::new();
    for (name, raw) in declared.iter().filter(|(name, _)| name.starts_with("--")) {
        match raw.trim().to_ascii_lowercase().as_str() {
            "initial" => {
                specified.remove(name);
                removed.insert(name.clone());
            }
            "inherit" | "unset" => {
                specified.remove(name);
                removed.remove(name);
            }
            _ => {
                specified.insert(name.clone(), raw.trim().to_string());
                removed.remove(name);
            }
        }
    }

    let mut vars = VarResolver {
        specified: &specified,
        inherited: &inherited,
        resolved: HashMap::new(),
        in_progress: HashSet::new(),
    };
    let mut custom = inherited.clone();
    for name in &removed {
        custom.remove(name);
    }
    for name in specified.keys() {
        match vars.resolve(name) {
            Some(value) => {
                custom.insert(name.clone(), value);
            }
            None => {
                custom.remove(name);
            }
        }
    }

    let mut properties = HashMap::new();
    for (name, raw) in declared.iter().filter(|(name, _)| !name.starts_with("--")) {
        let substituted = value::substitute_vars(raw, &mut |var| custom.get(var).cloned());
        let Some(text) = substituted else {
            properties.remove(name);
            continue;
        };
        let text = text.trim().to_string();
        match text.to_ascii_lowercase().as_str() {
            "inherit" => {
                let from_parent = parent.and_then(|p| p.get(name)).map(str::to_string);
                match from_parent {
                    Some(value) => {
                        properties.insert(name.clone(), value);
                    }
                    None => {
                        properties.remove(name);
                    }
                }
            }
            "initial" | "unset" => {
                properties.remove(name);
            }
            _ => {
                properties.insert(name.clone(), text);
            }
        }
    }

    ComputedStyle { custom, properties }
}

struct VarResolver<'a> {
    specified: &'a HashMap<String, String>,
    inherited: &'a HashMap<String, String>,
    resolved: HashMap<String, Option<String>>,
    in_progress: HashSet<String>,
}

impl VarResolver<'_> {
    /// Substitutes var() in a custom property declared on this element.
    /// Cycles and unresolvable references yield `None`.
    fn resolve(&mut self, name: &str) -> Option<String> {
        if let Some(done) = self.resolved.get(name) {
            return done.clone();
        }
        let Some(raw) = self.specified.get(name).cloned() else {
            return self.inherited.get(name).cloned();
        };
        if !self.in_progress.insert(name.to_string()) {
            return None;
        }
        let value = value::substitute_vars(&raw, &mut |var| self.resolve(var));
        self.in_progress.remove(name);
        self.resolved.insert(name.to_string(), value.clone());
        value
    }
}

fn default_ua_css() -> &'static str {
    r#"
    address, article, aside, blockquote, body, dd, details, dialog, div, dl, dt,
    fieldset, figcaption, figure, footer, form, h1, h2, h3, h4, h5, h6, header,
    hgroup, hr, html, legend, li, main, menu, nav, ol, p, pre, section, summary, ul {
        display: block;
    }
    table { display: table; }
    tr { display: table-row; }
    td, th { display: table-cell; }
    head, link, meta, script, style, template, title { display: none; }
    "#
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SourceHost;
    use kuchiki::traits::TendrilSink;

    fn style_source(doc: &NodeRef, css: &str) -> CssSource {
        CssSource {
            host: SourceHost::Style(doc.clone()),
            id: "s".to_string(),
            css: css.to_string(),
            url: None,
            dirty: false,
        }
    }

    fn computed(html: &str, css: &str, target: &str) -> ComputedStyle {
        let doc = kuchiki::parse_html().one(html);
        let resolver = StyleResolver::new(&[style_source(&doc, css)], None);
        let element = doc.select_first(target).expect("target");
        let mut chain: Vec<NodeDataRef<ElementData>> = element
            .as_node()
            .ancestors()
            .filter_map(|node| node.into_element_ref())
            .collect();
        chain.reverse();
        let mut parent: Option<ComputedStyle> = None;
        for ancestor in &chain {
            parent = Some(resolver.compute(ancestor, None, parent.as_ref()));
        }
        resolver.compute(&element, None, parent.as_ref())
    }

    #[test]
    fn specificity_then_order_decides() {
        let style = computed(
            r#"<div id="a" class="x"></div>"#,
            "#a { position: relative } .x { position: absolute } div { position: fixed }",
            "#a",
        );
        assert_eq!(style.keyword("position"), "relative");
        let style = computed(
            r#"<div class="x"></div>"#,
            ".x { position: absolute } .x { position: fixed }",
            ".x",
        );
        assert_eq!(style.keyword("position"), "fixed");
    }

    #[test]
    fn important_beats_specificity() {
        let style = computed(
            r#"<div id="a" class="x"></div>"#,
            "#a { position: relative } .x { position: absolute !important }",
            "#a",
        );
        assert_eq!(style.keyword("position"), "absolute");
    }

    #[test]
    fn custom_properties_inherit_but_others_do_not() {
        let style = computed(
            r#"<div class="p"><span id="c"></span></div>"#,
            ".p { --shadow: 1; position: relative; content-visibility: hidden }",
            "#c",
        );
        assert_eq!(style.get("--shadow"), Some("1"));
        assert_eq!(style.keyword("position"), "static");
        assert_eq!(style.keyword("content-visibility"), "visible");
        assert_eq!(style.keyword("display"), "inline");
    }

    #[test]
    fn ua_sheet_sets_block_display() {
        let style = computed("<div id='d'></div>", "", "#d");
        assert_eq!(style.keyword("display"), "block");
    }

    #[test]
    fn author_rules_beat_more_specific_ua_rules() {
        let style = computed("<div id='d'></div>", "* { display: flex }", "#d");
        assert_eq!(style.keyword("display"), "flex");
        let style = computed("<span id='s'></span>", "", "#s");
        assert_eq!(style.keyword("display"), "inline");
    }

    #[test]
    fn var_substitution_and_cycles() {
        let style = computed(
            r#"<div id="a"></div>"#,
            "#a { --x: --name; --y: var(--x); --c1: var(--c2); --c2: var(--c1); --f: var(--nope, 3); position: var(--pos, absolute) }",
            "#a",
        );
        assert_eq!(style.get("--y"), Some("--name"));
        assert_eq!(style.get("--c1"), None);
        assert_eq!(style.get("--c2"), None);
        assert_eq!(style.get("--f"), Some("3"));
        assert_eq!(style.keyword("position"), "absolute");
    }

    #[test]
    fn css_wide_keywords() {
        let style = computed(
            r#"<div class="p"><div id="c"></div></div>"#,
            ".p { --v: 1; position: relative } #c { --v: initial; position: inherit }",
            "#c",
        );
        assert_eq!(style.get("--v"), None);
        assert_eq!(style.keyword("position"), "relative");
    }

    #[test]
    fn inline_sources_win_for_their_host_only() {
        let doc = kuchiki::parse_html().one(r#"<div id="a"></div><div id="b"></div>"#);
        let a = doc.select_first("#a").expect("a");
        let inline = CssSource {
            host: SourceHost::Inline(a.as_node().clone()),
            id: "i".to_string(),
            css: "[data-x=\"i\"] { position: absolute }".to_string(),
            url: None,
            dirty: false,
        };
        let resolver = StyleResolver::new(
            &[style_source(&doc, "#a, #b { position: relative }"), inline],
            None,
        );
        let b = doc.select_first("#b").expect("b");
        assert_eq!(resolver.compute(&a, None, None).keyword("position"), "absolute");
        assert_eq!(resolver.compute(&b, None, None).keyword("position"), "relative");
    }

    #[test]
    fn pseudo_element_rules_apply_to_the_pseudo_only() {
        let doc = kuchiki::parse_html().one(r#"<div class="x"></div>"#);
        let resolver = StyleResolver::new(
            &[style_source(&doc, ".x::before { position: absolute; content: 'a' }")],
            None,
        );
        let x = doc.select_first(".x").expect("x");
        assert_eq!(resolver.compute(&x, None, None).keyword("position"), "static");
        let before = resolver.compute(&x, Some("::before"), None);
        assert_eq!(before.keyword("position"), "absolute");
    }
}
