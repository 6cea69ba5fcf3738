use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;
use std::sync::Arc;

use kuchiki::traits::TendrilSink;
use kuchiki::{ElementData, NodeDataRef, NodeRef, Selectors};

use crate::cascade::{ComputedStyle, NodeKey, StyleResolver, node_key};
use crate::debug::DebugLogger;
use crate::error::AnchorError;
use crate::ids::IdGenerator;
use crate::metadata::{self, ValueMetadata};
use crate::properties::PropertyTable;
use crate::selector::Selector;
use crate::source::CssSource;

/// Stand-in for a `::before`/`::after` style pseudo-element. `fake` is a
/// throwaway `<div>` inserted into the host so geometry queries have a box.
pub struct PseudoElement {
    pub pseudo_part: String,
    pub host: NodeRef,
    pub fake: NodeRef,
    pub style: ComputedStyle,
}

#[derive(Clone)]
pub enum ElementRef {
    Element(NodeRef),
    Pseudo(Rc<PseudoElement>),
}

impl ElementRef {
    /// The node that carries this element's box: the element itself, or
    /// the stand-in for a pseudo-element.
    pub fn node(&self) -> &NodeRef {
        match self {
            ElementRef::Element(node) => node,
            ElementRef::Pseudo(pseudo) => &pseudo.fake,
        }
    }

    pub fn pseudo_part(&self) -> Option<&str> {
        match self {
            ElementRef::Element(_) => None,
            ElementRef::Pseudo(pseudo) => Some(&pseudo.pseudo_part),
        }
    }

    pub fn describe(&self) -> String {
        let host = match self {
            ElementRef::Element(node) => node,
            ElementRef::Pseudo(pseudo) => &pseudo.host,
        };
        let mut out = String::new();
        if let Some(element) = host.as_element() {
            out.push_str(&element.name.local);
            let attrs = element.attributes.borrow();
            if let Some(id) = attrs.get("id") {
                out.push('#');
                out.push_str(id);
            }
            if let Some(class) = attrs.get("class") {
                for name in class.split_whitespace() {
                    out.push('.');
                    out.push_str(name);
                }
            }
        }
        if let Some(pseudo) = self.pseudo_part() {
            out.push_str(pseudo);
        }
        out
    }

    fn identity(&self) -> (NodeKey, Option<&str>) {
        match self {
            ElementRef::Element(node) => (node_key(node), None),
            ElementRef::Pseudo(pseudo) => (node_key(&pseudo.host), Some(&pseudo.pseudo_part)),
        }
    }
}

impl PartialEq for ElementRef {
    fn eq(&self, other: &Self) -> bool {
        self.identity() == other.identity()
    }
}

impl Eq for ElementRef {}

impl Hash for ElementRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity().hash(state);
    }
}

impl fmt::Debug for ElementRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ElementRef({})", self.describe())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainingBlock {
    Initial,
    Element(ElementRef),
}

#[derive(Debug, Clone, Default)]
pub struct PropertyValue {
    pub value: String,
    pub metadata: Option<ValueMetadata>,
}

/// Read-side view of the document after the rewritten CSS is in place.
pub struct Dom {
    document: NodeRef,
    resolver: StyleResolver,
    styles: HashMap<NodeKey, ComputedStyle>,
    tree_order: HashMap<NodeKey, usize>,
    table: PropertyTable,
    selectors: HashMap<String, Selector>,
    compiled: HashMap<String, Option<kuchiki::Selector>>,
    fake_class: String,
    fake_id_prefix: String,
    styles_id: String,
    synthetic: Vec<NodeRef>,
    elements_by_selector: Option<HashMap<String, Vec<ElementRef>>>,
    debug: Option<Arc<DebugLogger>>,
}

impl Dom {
    pub(crate) fn new(
        document: NodeRef,
        sources: &[CssSource],
        table: PropertyTable,
        selectors: HashMap<String, Selector>,
        ids: &mut IdGenerator,
        debug: Option<Arc<DebugLogger>>,
    ) -> Self {
        let resolver = StyleResolver::new(sources, debug.clone());
        let compiled = selectors
            .iter()
            .map(|(id, selector)| {
                let compiled = Selectors::compile(&selector.element_part)
                    .ok()
                    .and_then(|list| list.0.into_iter().next());
                if compiled.is_none() {
                    if let Some(logger) = debug.as_deref() {
                        logger.log_event(
                            "dom.selector_unparsed",
                            &[("selector", selector.full.as_str())],
                        );
                    }
                }
                (id.clone(), compiled)
            })
            .collect();
        let mut dom = Self {
            document,
            resolver,
            styles: HashMap::new(),
            tree_order: HashMap::new(),
            table,
            selectors,
            compiled,
            fake_class: ids.css_id("fake-pseudo-element"),
            fake_id_prefix: ids.css_id("fake-pseudo"),
            styles_id: ids.css_id("fake-pseudo-element-styles"),
            synthetic: Vec::new(),
            elements_by_selector: None,
            debug,
        };
        let root = dom.document.clone();
        dom.compute_subtree(&root, None);
        dom.rebuild_tree_order();
        dom
    }

    fn compute_subtree(&mut self, node: &NodeRef, parent: Option<&ComputedStyle>) {
        for child in node.children() {
            match child.clone().into_element_ref() {
                Some(element) => {
                    let style = self.resolver.compute(&element, None, parent);
                    self.compute_subtree(&child, Some(&style));
                    self.styles.insert(node_key(&child), style);
                }
                None => self.compute_subtree(&child, parent),
            }
        }
    }

    fn rebuild_tree_order(&mut self) {
        self.tree_order = self
            .document
            .inclusive_descendants()
            .enumerate()
            .map(|(idx, node)| (node_key(&node), idx))
            .collect();
    }

    pub fn document(&self) -> &NodeRef {
        &self.document
    }

    pub fn table(&self) -> &PropertyTable {
        &self.table
    }

    pub fn selector(&self, id: &str) -> Option<&Selector> {
        self.selectors.get(id)
    }

    pub fn style_of<'a>(&'a self, element: &'a ElementRef) -> Option<&'a ComputedStyle> {
        match element {
            ElementRef::Element(node) => self.styles.get(&node_key(node)),
            ElementRef::Pseudo(pseudo) => Some(&pseudo.style),
        }
    }

    /// Computed value of `property` for `element`. Polyfilled properties are
    /// read from their shadow custom property, and a non-inheriting value is
    /// discarded unless the selector that declared it matches `element`.
    pub fn property_value(&self, element: &ElementRef, property: &str) -> PropertyValue {
        let Some(style) = self.style_of(element) else {
            return PropertyValue::default();
        };
        let Some(prop) = self.table.get(property) else {
            return PropertyValue {
                value: style.get(property).unwrap_or_default().trim().to_string(),
                metadata: None,
            };
        };
        let Some(raw) = style.get(&prop.shadow) else {
            return PropertyValue::default();
        };
        let (value, serialized) = metadata::split(raw);
        let metadata = match serialized.map(ValueMetadata::deserialize) {
            Some(Ok(metadata)) => Some(metadata),
            Some(Err(err)) => {
                if let Some(logger) = self.debug.as_deref() {
                    logger.log_event(
                        "dom.metadata_invalid",
                        &[("property", prop.name), ("error", err.to_string().as_str())],
                    );
                }
                None
            }
            None => None,
        };
        if !prop.inherits {
            if let Some(selector_id) = metadata.as_ref().and_then(|m| m.selector.as_deref()) {
                let declared_here = self
                    .selectors
                    .get(selector_id)
                    .map(|selector| self.matches_selector(element, selector))
                    .unwrap_or(false);
                if !declared_here {
                    return PropertyValue::default();
                }
            }
        }
        PropertyValue {
            value: value.to_string(),
            metadata,
        }
    }

    pub fn matches_selector(&self, element: &ElementRef, selector: &Selector) -> bool {
        let (host, pseudo) = match element {
            ElementRef::Element(node) => (node, None),
            ElementRef::Pseudo(pseudo) => (&pseudo.host, Some(pseudo.pseudo_part.as_str())),
        };
        if selector.pseudo_part.as_deref() != pseudo {
            return false;
        }
        let Some(host) = host.clone().into_element_ref() else {
            return false;
        };
        self.compiled_matches(&selector.id, &host)
    }

    fn compiled_matches(&self, selector_id: &str, element: &NodeDataRef<ElementData>) -> bool {
        self.compiled
            .get(selector_id)
            .and_then(Option::as_ref)
            .map(|compiled| compiled.matches(element))
            .unwrap_or(false)
    }

    fn is_fake(&self, node: &NodeRef) -> bool {
        self.synthetic.iter().any(|synthetic| synthetic == node)
    }

    fn matching_elements(&self, selector_id: &str) -> Vec<NodeRef> {
        self.document
            .inclusive_descendants()
            .filter(|node| !self.is_fake(node))
            .filter_map(|node| node.into_element_ref())
            .filter(|element| self.compiled_matches(selector_id, element))
            .map(|element| element.as_node().clone())
            .collect()
    }

    /// Inserts a stand-in node for every pseudo-element a polyfilled
    /// selector targets and records the elements each selector matches.
    /// Calling it again is a no-op.
    pub fn create_fake_pseudo_elements(&mut self) -> Result<(), AnchorError> {
        if self.elements_by_selector.is_some() {
            return Ok(());
        }
        let mut selectors: Vec<Selector> = self.selectors.values().cloned().collect();
        selectors.sort_by(|a, b| a.full.cmp(&b.full).then_with(|| a.id.cmp(&b.id)));

        let mut elements_by_selector: HashMap<String, Vec<ElementRef>> = HashMap::new();
        let mut pseudo_by_host: HashMap<(NodeKey, String), Rc<PseudoElement>> = HashMap::new();
        let mut created: Vec<Rc<PseudoElement>> = Vec::new();
        for selector in &selectors {
            let hosts = self.matching_elements(&selector.id);
            let Some(pseudo_part) = selector.pseudo_part.clone() else {
                elements_by_selector.insert(
                    selector.id.clone(),
                    hosts.into_iter().map(ElementRef::Element).collect(),
                );
                continue;
            };
            let mut pseudos = Vec::new();
            for host in hosts {
                let key = (node_key(&host), pseudo_part.clone());
                let pseudo = match pseudo_by_host.get(&key) {
                    Some(existing) => existing.clone(),
                    None => {
                        let pseudo = Rc::new(self.build_pseudo_element(
                            &host,
                            &pseudo_part,
                            created.len(),
                        )?);
                        pseudo_by_host.insert(key, pseudo.clone());
                        created.push(pseudo.clone());
                        pseudo
                    }
                };
                pseudos.push(ElementRef::Pseudo(pseudo));
            }
            elements_by_selector.insert(selector.id.clone(), pseudos);
        }

        let mut rules: Vec<String> = created
            .iter()
            .filter_map(|pseudo| {
                let id = pseudo
                    .fake
                    .as_element()
                    .and_then(|el| el.attributes.borrow().get("id").map(str::to_string))?;
                let content = pseudo.style.get("content")?.to_string();
                Some(format!("#{}{} {{ content: {}; }}", id, pseudo.pseudo_part, content))
            })
            .collect();
        let real_pseudo_selectors: Vec<&str> = selectors
            .iter()
            .filter(|selector| selector.pseudo_part.is_some())
            .map(|selector| selector.full.as_str())
            .collect();
        if !real_pseudo_selectors.is_empty() {
            rules.push(format!("{} {{ display: none; }}", real_pseudo_selectors.join(",")));
        }

        for pseudo in &created {
            if pseudo.pseudo_part == "::before" {
                pseudo.host.prepend(pseudo.fake.clone());
            } else {
                pseudo.host.append(pseudo.fake.clone());
            }
            self.synthetic.push(pseudo.fake.clone());
        }
        if !created.is_empty() {
            let sheet = synthetic_element("style", &[("id", self.styles_id.as_str())])?;
            sheet.append(NodeRef::new_text(rules.join("\n")));
            let head = self
                .document
                .select_first("head")
                .map(|head| head.as_node().clone())
                .unwrap_or_else(|_| self.document.clone());
            head.append(sheet.clone());
            self.synthetic.push(sheet);
        }

        if let Some(logger) = self.debug.as_deref() {
            logger.increment("dom.fake_pseudo_elements", created.len() as u64);
        }
        self.elements_by_selector = Some(elements_by_selector);
        self.rebuild_tree_order();
        Ok(())
    }

    fn build_pseudo_element(
        &self,
        host: &NodeRef,
        pseudo_part: &str,
        index: usize,
    ) -> Result<PseudoElement, AnchorError> {
        let host_element = host
            .clone()
            .into_element_ref()
            .ok_or_else(|| AnchorError::Html("pseudo-element host is not an element".to_string()))?;
        let declarations = self.resolver.cascaded(&host_element, Some(pseudo_part));
        let parent = self.styles.get(&node_key(host));
        let style = crate::cascade::compute_from_declarations(&declarations, parent);
        let inline_style: String = declarations
            .iter()
            .filter(|(name, _)| !name.starts_with("--") && name != "content")
            .map(|(name, value)| format!("{}: {};", name, value))
            .collect::<Vec<_>>()
            .join(" ");
        let fake_id = format!("{}-{}", self.fake_id_prefix, index);
        let fake = synthetic_element(
            "div",
            &[
                ("id", fake_id.as_str()),
                ("class", self.fake_class.as_str()),
                ("style", inline_style.as_str()),
            ],
        )?;
        Ok(PseudoElement {
            pseudo_part: pseudo_part.to_string(),
            host: host.clone(),
            fake,
            style,
        })
    }

    pub fn remove_fake_pseudo_elements(&mut self) {
        if self.elements_by_selector.is_none() {
            return;
        }
        for node in self.synthetic.drain(..) {
            node.detach();
        }
        self.elements_by_selector = None;
        self.rebuild_tree_order();
    }

    /// Elements matched by each polyfilled selector, with pseudo-element
    /// selectors mapped to their stand-ins.
    pub fn polyfilled_elements(&self) -> Result<&HashMap<String, Vec<ElementRef>>, AnchorError> {
        self.elements_by_selector
            .as_ref()
            .ok_or(AnchorError::PseudoElementsNotCreated)
    }

    pub fn elements_for(&self, selector: &Selector) -> Result<&[ElementRef], AnchorError> {
        Ok(self
            .polyfilled_elements()?
            .get(&selector.id)
            .map(Vec::as_slice)
            .unwrap_or(&[]))
    }

    pub fn is_absolutely_positioned(&self, element: &ElementRef) -> bool {
        matches!(
            self.keyword(element, "position").as_str(),
            "absolute" | "fixed"
        )
    }

    fn keyword(&self, element: &ElementRef, property: &str) -> String {
        self.style_of(element)
            .map(|style| style.keyword(property))
            .unwrap_or_default()
    }

    pub fn compare_tree_order(&self, a: &ElementRef, b: &ElementRef) -> Ordering {
        let a = self.tree_order.get(&node_key(a.node()));
        let b = self.tree_order.get(&node_key(b.node()));
        match (a, b) {
            (Some(a), Some(b)) => a.cmp(b),
            _ => Ordering::Equal,
        }
    }

    pub fn precedes(&self, a: &ElementRef, b: &ElementRef) -> bool {
        self.compare_tree_order(a, b) == Ordering::Less
    }

    /// Inclusive containment.
    pub fn contains(&self, parent: &ElementRef, child: &ElementRef) -> bool {
        let parent = parent.node();
        child
            .node()
            .inclusive_ancestors()
            .any(|ancestor| &ancestor == parent)
    }

    pub fn is_descendant(&self, child: &ElementRef, container: &ContainingBlock) -> bool {
        match container {
            ContainingBlock::Initial => true,
            ContainingBlock::Element(container) => {
                container.node() != child.node() && self.contains(container, child)
            }
        }
    }

    pub fn parent_element(&self, element: &ElementRef) -> Option<ElementRef> {
        match element {
            ElementRef::Element(node) => node
                .parent()
                .filter(|parent| parent.as_element().is_some())
                .map(ElementRef::Element),
            ElementRef::Pseudo(pseudo) => Some(ElementRef::Element(pseudo.host.clone())),
        }
    }

    pub fn containing_block(&self, element: &ElementRef) -> ContainingBlock {
        if !self.is_absolutely_positioned(element) {
            return self.offset_parent(element);
        }
        let mut current = self.parent_element(element);
        while let Some(parent) = current {
            if self.keyword(&parent, "position") != "static"
                && self.keyword(&parent, "display") == "block"
            {
                return ContainingBlock::Element(parent);
            }
            current = self.parent_element(&parent);
        }
        ContainingBlock::Initial
    }

    /// Offset-parent rules for elements that are not absolutely positioned.
    fn offset_parent(&self, element: &ElementRef) -> ContainingBlock {
        let tag = |el: &ElementRef| {
            el.node()
                .as_element()
                .map(|data| data.name.local.to_string().to_ascii_lowercase())
                .unwrap_or_default()
        };
        if matches!(tag(element).as_str(), "html" | "body") {
            return ContainingBlock::Initial;
        }
        let mut chain = vec![element.clone()];
        let mut current = self.parent_element(element);
        while let Some(parent) = current {
            current = self.parent_element(&parent);
            chain.push(parent);
        }
        if chain.iter().any(|el| self.keyword(el, "display") == "none") {
            return ContainingBlock::Initial;
        }
        let positioned = self.keyword(element, "position") != "static";
        for ancestor in chain.into_iter().skip(1) {
            let ancestor_tag = tag(&ancestor);
            if ancestor_tag == "body"
                || self.keyword(&ancestor, "position") != "static"
                || (!positioned && matches!(ancestor_tag.as_str(), "td" | "th" | "table"))
            {
                return ContainingBlock::Element(ancestor);
            }
        }
        ContainingBlock::Initial
    }

    pub(crate) fn distinct_elements(&self, selectors: &[Selector]) -> Result<Vec<ElementRef>, AnchorError> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for selector in selectors {
            for element in self.elements_for(selector)? {
                if seen.insert(element.clone()) {
                    out.push(element.clone());
                }
            }
        }
        Ok(out)
    }
}

/// Builds a detached element by parsing a one-element fragment.
fn synthetic_element(tag: &str, attrs: &[(&str, &str)]) -> Result<NodeRef, AnchorError> {
    let doc = kuchiki::parse_html().one(format!("<{tag}></{tag}>"));
    let element = doc
        .select_first(tag)
        .map_err(|_| AnchorError::Html(format!("could not build <{tag}>")))?;
    {
        let mut attributes = element.attributes.borrow_mut();
        for (name, value) in attrs {
            attributes.insert(*name, value.to_string());
        }
    }
    let node = element.as_node().clone();
    node.detach();
    Ok(node)
}
