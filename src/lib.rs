mod anchor_fn;
mod assets;
mod cascade;
mod debug;
mod dom;
mod error;
mod geometry;
mod ids;
mod metadata;
mod perf;
mod preprocess;
mod properties;
mod resolve;
mod selector;
mod source;
mod value;

pub use anchor_fn::{
    AnchorFunction, AnchorFunctionKind, AnchorParam, AnchorSide, AnchorSpecifier,
    ValueWithAnchorFunctions, parse_anchor_functions,
};
pub use assets::{AssetBundle, StylesheetAsset};
pub use cascade::ComputedStyle;
use debug::DebugLogger;
pub use dom::{ContainingBlock, Dom, ElementRef, PropertyValue, PseudoElement};
pub use error::AnchorError;
pub use geometry::{AnchorBinding, PlaceholderValue, PositionEngine, RewrittenDeclaration};
pub use ids::{DEFAULT_ID_PREFIX, IdGenerator};
pub use metadata::{METADATA_DELIMITER, ValueMetadata};
use perf::PerfLogger;
pub use preprocess::PreprocessingResult;
pub use properties::{PolyfilledProperty, PropertyKind, PropertyTable};
pub use resolve::{AnchorProperties, ElementAnchors};
pub use selector::Selector;
pub use source::{CssSource, SourceHost};

use kuchiki::NodeRef;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

pub const DEFAULT_SOURCE_SELECTOR: &str = "style,link,[style]";

/// Rewrites a document's stylesheets so anchor positioning values survive
/// the cascade, then resolves every `anchor()`/`anchor-size()` reference.
pub struct AnchorFill {
    id_prefix: String,
    seeded_ids: bool,
    source_selector: String,
    assets: AssetBundle,
    keep_pseudo_elements: bool,
    debug: Option<Arc<DebugLogger>>,
    perf: Option<Arc<PerfLogger>>,
    passes: AtomicUsize,
}

pub struct AnchorFillBuilder {
    id_prefix: Option<String>,
    seeded_ids: bool,
    source_selector: String,
    assets: AssetBundle,
    keep_pseudo_elements: bool,
    debug_path: Option<std::path::PathBuf>,
    perf_enabled: bool,
    perf_path: Option<std::path::PathBuf>,
}

/// Everything one run over a document produced. Synthetic pseudo-element
/// nodes stay in the document until `cleanup` runs.
pub struct PolyfillPass {
    pass_id: usize,
    sources: Vec<CssSource>,
    preprocessing: PreprocessingResult,
    dom: Dom,
    anchors: AnchorProperties,
}

impl PolyfillPass {
    pub fn pass_id(&self) -> usize {
        self.pass_id
    }

    pub fn sources(&self) -> &[CssSource] {
        &self.sources
    }

    pub fn preprocessing(&self) -> &PreprocessingResult {
        &self.preprocessing
    }

    pub fn dom(&self) -> &Dom {
        &self.dom
    }

    pub fn anchors(&self) -> &AnchorProperties {
        &self.anchors
    }

    pub fn bindings(&self) -> Vec<AnchorBinding> {
        geometry::bindings(&self.anchors)
    }

    pub fn placeholder_values(&self, engine: &dyn PositionEngine) -> Vec<PlaceholderValue> {
        geometry::placeholder_values(&self.anchors, engine)
    }

    pub fn rewritten_declarations(&self) -> Vec<RewrittenDeclaration> {
        geometry::rewritten_declarations(&self.anchors)
    }

    /// Removes the pseudo-element stand-ins. Rewritten stylesheets stay.
    pub fn cleanup(&mut self) {
        self.dom.remove_fake_pseudo_elements();
    }
}

impl AnchorFill {
    pub fn builder() -> AnchorFillBuilder {
        AnchorFillBuilder::new()
    }

    fn emit_debug_summary(&self, context: &str) {
        if let Some(logger) = self.debug.as_deref() {
            logger.emit_summary(context);
            logger.flush();
        }
        if let Some(perf) = self.perf.as_deref() {
            perf.flush();
        }
    }

    fn timed<T>(&self, pass_id: usize, name: &str, phase: impl FnOnce() -> T) -> T {
        let started = Instant::now();
        let out = phase();
        if let Some(perf) = self.perf.as_deref() {
            perf.log_span_ms(name, Some(pass_id), started.elapsed().as_secs_f64() * 1000.0);
        }
        out
    }

    fn id_generator(&self, document: &NodeRef) -> IdGenerator {
        if self.seeded_ids {
            IdGenerator::seeded(document.to_string().as_bytes())
        } else {
            IdGenerator::new(self.id_prefix.clone())
        }
    }

    pub fn polyfill(&self, document: &NodeRef) -> Result<PolyfillPass, AnchorError> {
        let pass_id = self.passes.fetch_add(1, Ordering::Relaxed);
        let debug = self.debug.as_deref();
        let mut ids = self.id_generator(document);
        let table = PropertyTable::new(&mut ids);
        let inline_attribute = ids.attribute("css");

        let mut sources = self.timed(pass_id, "anchorfill.read_sources", || {
            source::read_css_sources(
                document,
                &self.source_selector,
                &self.assets,
                &mut ids,
                &inline_attribute,
                debug,
            )
        })?;
        let preprocessing = self.timed(pass_id, "anchorfill.preprocess", || {
            preprocess::preprocess_sources(&mut sources, &table, &mut ids, debug)
        });
        self.timed(pass_id, "anchorfill.write_sources", || {
            source::write_css_sources(&mut sources)
        });
        let mut dom = self.timed(pass_id, "anchorfill.dom", || {
            Dom::new(
                document.clone(),
                &sources,
                table,
                preprocessing.selectors_by_uuid.clone(),
                &mut ids,
                self.debug.clone(),
            )
        });
        self.timed(pass_id, "anchorfill.pseudo_elements", || {
            dom.create_fake_pseudo_elements()
        })?;
        let anchors = self.timed(pass_id, "anchorfill.resolve", || {
            resolve::resolve_anchors(&dom, &preprocessing, &mut ids, debug)
        })?;

        let mut pass = PolyfillPass {
            pass_id,
            sources,
            preprocessing,
            dom,
            anchors,
        };
        if !self.keep_pseudo_elements {
            pass.cleanup();
        }
        if let Some(perf) = self.perf.as_deref() {
            perf.log_counts(
                "anchorfill.pass",
                Some(pass_id),
                &[
                    ("sources", pass.sources.len() as u64),
                    ("selectors", pass.preprocessing.selectors_by_uuid.len() as u64),
                    ("parsed_values", pass.preprocessing.anchor_values_by_uuid.len() as u64),
                    ("positioned_elements", pass.anchors.anchors_by_element.len() as u64),
                ],
            );
        }
        self.emit_debug_summary("polyfill");
        Ok(pass)
    }
}

impl Default for AnchorFillBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl AnchorFillBuilder {
    pub fn new() -> Self {
        Self {
            id_prefix: None,
            seeded_ids: false,
            source_selector: DEFAULT_SOURCE_SELECTOR.to_string(),
            assets: AssetBundle::default(),
            keep_pseudo_elements: true,
            debug_path: None,
            perf_enabled: false,
            perf_path: None,
        }
    }

    // Write JSONL debug events and a per-pass counter summary.
    pub fn debug_log(mut self, path: impl Into<std::path::PathBuf>) -> Self {
        self.debug_path = Some(path.into());
        self
    }

    pub fn perf_log(mut self, path: impl Into<std::path::PathBuf>) -> Self {
        self.perf_enabled = true;
        self.perf_path = Some(path.into());
        self
    }

    // Uses anchorfill_perf.log when enabled without a path.
    pub fn perf_enabled(mut self, enabled: bool) -> Self {
        self.perf_enabled = enabled;
        self
    }

    pub fn id_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.id_prefix = Some(prefix.into());
        self
    }

    pub fn seeded_ids(mut self, enabled: bool) -> Self {
        self.seeded_ids = enabled;
        self
    }

    pub fn source_selector(mut self, selector: impl Into<String>) -> Self {
        self.source_selector = selector.into();
        self
    }

    pub fn asset(mut self, href: impl Into<String>, css: impl Into<String>) -> Self {
        self.assets.add(href, css);
        self
    }

    pub fn assets(mut self, bundle: AssetBundle) -> Self {
        self.assets = bundle;
        self
    }

    // Leave stand-in nodes in the document after polyfill() returns so a
    // layout engine can measure them.
    pub fn keep_pseudo_elements(mut self, keep: bool) -> Self {
        self.keep_pseudo_elements = keep;
        self
    }

    pub fn build(self) -> Result<AnchorFill, AnchorError> {
        if self.seeded_ids && self.id_prefix.is_some() {
            return Err(AnchorError::InvalidConfiguration(
                "seeded_ids(true) cannot be combined with id_prefix".to_string(),
            ));
        }
        if let Some(prefix) = &self.id_prefix {
            if !ids::is_valid_prefix(prefix) {
                return Err(AnchorError::InvalidConfiguration(format!(
                    "id_prefix {:?} must be letters, digits, '-' or '_' and not start with a digit",
                    prefix
                )));
            }
        }
        if self.source_selector.trim().is_empty()
            || kuchiki::Selectors::compile(&self.source_selector).is_err()
        {
            return Err(AnchorError::InvalidConfiguration(format!(
                "source_selector {:?} is not a valid selector list",
                self.source_selector
            )));
        }
        let debug = if let Some(path) = self.debug_path {
            Some(Arc::new(DebugLogger::new(path)?))
        } else {
            None
        };
        let perf = if self.perf_enabled || self.perf_path.is_some() {
            let path = self
                .perf_path
                .unwrap_or_else(|| std::path::PathBuf::from("anchorfill_perf.log"));
            Some(Arc::new(PerfLogger::new(path)?))
        } else {
            None
        };
        Ok(AnchorFill {
            id_prefix: self
                .id_prefix
                .unwrap_or_else(|| DEFAULT_ID_PREFIX.to_string()),
            seeded_ids: self.seeded_ids,
            source_selector: self.source_selector,
            assets: self.assets,
            keep_pseudo_elements: self.keep_pseudo_elements,
            debug,
            perf,
            passes: AtomicUsize::new(0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kuchiki::traits::TendrilSink;

    const PAGE: &str = r#"<html><head>
        <style>
          #anchor { anchor-name: --tip }
          #tooltip { position: absolute; top: anchor(--tip bottom); left: anchor(--tip left, 8px) }
        </style>
        <link rel="stylesheet" href="extra.css">
      </head><body>
        <div id="anchor"></div>
        <div id="tooltip"></div>
        <p id="note" style="anchor-name: --note"></p>
        <div class="badge"></div>
      </body></html>"#;

    fn temp_path(name: &str) -> std::path::PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        std::env::temp_dir().join(format!(
            "anchorfill_{}_{}_{}.log",
            name,
            std::process::id(),
            nanos
        ))
    }

    struct Fixed;

    impl PositionEngine for Fixed {
        fn anchor_value(&self, _binding: &AnchorBinding) -> Option<String> {
            Some("42px".to_string())
        }
    }

    fn element_id(element: &ElementRef) -> Option<String> {
        element
            .node()
            .as_element()
            .and_then(|el| el.attributes.borrow().get("id").map(str::to_string))
    }

    #[test]
    fn polyfills_a_document_end_to_end() {
        let doc = kuchiki::parse_html().one(PAGE);
        let fill = AnchorFill::builder()
            .id_prefix("t-")
            .asset("extra.css", ".badge::after { anchor-name: --badge; content: '!' }")
            .build()
            .expect("builder");
        let mut pass = fill.polyfill(&doc).expect("polyfill");

        assert_eq!(pass.sources().len(), 3);
        let style = doc.select_first("style").expect("style");
        let css = style.as_node().text_contents();
        assert!(css.contains("--anchor-name-t-"), "css={}", css);
        let link = doc.select_first("link").expect("link");
        let href = link.attributes.borrow().get("href").map(str::to_string);
        assert!(href.unwrap_or_default().starts_with("data:text/css;base64,"));
        let note = doc.select_first("#note").expect("note");
        assert!(
            note.attributes
                .borrow()
                .get("style")
                .unwrap_or_default()
                .contains("--anchor-name-t-")
        );

        let tooltip = &pass.anchors().anchors_by_element[0];
        assert_eq!(element_id(&tooltip.element).as_deref(), Some("tooltip"));
        let bindings = pass.bindings();
        assert_eq!(bindings.len(), 2);
        assert!(bindings.iter().all(|b| {
            b.anchor.as_ref().and_then(element_id).as_deref() == Some("anchor")
        }));
        let values = pass.placeholder_values(&Fixed);
        assert!(values.iter().all(|v| v.value == "42px"));
        assert_eq!(pass.rewritten_declarations().len(), 2);
        assert_eq!(
            pass.anchors().elements_by_anchor_name["--note"].len(),
            1
        );
        assert_eq!(
            pass.anchors().elements_by_anchor_name["--badge"][0].pseudo_part(),
            Some("::after")
        );

        let divs = |doc: &NodeRef| doc.select("div").map(|s| s.count()).unwrap_or(0);
        assert_eq!(divs(&doc), 4);
        pass.cleanup();
        assert_eq!(divs(&doc), 3);
    }

    #[test]
    fn passes_are_numbered_and_reruns_are_stable() {
        let doc = kuchiki::parse_html().one(PAGE);
        let fill = AnchorFill::builder()
            .id_prefix("t-")
            .keep_pseudo_elements(false)
            .build()
            .expect("builder");
        let first = fill.polyfill(&doc).expect("first");
        let css_after_first = doc
            .select_first("style")
            .expect("style")
            .as_node()
            .text_contents();
        let second = fill.polyfill(&doc).expect("second");
        let css_after_second = doc
            .select_first("style")
            .expect("style")
            .as_node()
            .text_contents();
        assert_eq!(first.pass_id(), 0);
        assert_eq!(second.pass_id(), 1);
        assert_eq!(
            css_after_first.matches("--top-t-").count(),
            css_after_second.matches("--top-t-").count()
        );
        assert_eq!(second.bindings().len(), 2);
    }

    #[test]
    fn seeded_ids_follow_the_document() {
        let fill = AnchorFill::builder()
            .seeded_ids(true)
            .build()
            .expect("builder");
        let a = kuchiki::parse_html().one("<p>a</p>");
        let b = kuchiki::parse_html().one("<p>b</p>");
        let prefix = |doc: &NodeRef| fill.id_generator(doc).prefix().to_string();
        assert_eq!(prefix(&a), prefix(&kuchiki::parse_html().one("<p>a</p>")));
        assert_ne!(prefix(&a), prefix(&b));
        assert!(prefix(&a).starts_with("af"));
    }

    #[test]
    fn builder_rejects_bad_settings() {
        let bad = [
            AnchorFill::builder().id_prefix("9abc").build(),
            AnchorFill::builder().id_prefix("").build(),
            AnchorFill::builder().id_prefix("a b").build(),
            AnchorFill::builder().source_selector("style[").build(),
            AnchorFill::builder().seeded_ids(true).id_prefix("x-").build(),
        ];
        for result in bad {
            assert!(matches!(result, Err(AnchorError::InvalidConfiguration(_))));
        }
        assert!(AnchorFillBuilder::default().build().is_ok());
    }

    #[test]
    fn debug_log_records_events_and_summary() {
        let path = temp_path("debug");
        let fill = AnchorFill::builder()
            .id_prefix("t-")
            .debug_log(&path)
            .build()
            .expect("builder");
        let doc = kuchiki::parse_html().one(PAGE);
        fill.polyfill(&doc).expect("polyfill");
        let text = std::fs::read_to_string(&path).expect("debug log");
        assert!(text.contains("\"type\":\"css.source_skipped\""), "log={}", text);
        assert!(text.contains("\"type\":\"resolve.binding\""), "log={}", text);
        assert!(text.contains("\"type\":\"debug.summary\",\"context\":\"polyfill\""));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn perf_log_times_each_phase() {
        let path = temp_path("perf");
        {
            let fill = AnchorFill::builder()
                .id_prefix("t-")
                .perf_log(&path)
                .build()
                .expect("builder");
            let doc = kuchiki::parse_html().one(PAGE);
            fill.polyfill(&doc).expect("polyfill");
        }
        let text = std::fs::read_to_string(&path).expect("perf log");
        for phase in ["read_sources", "preprocess", "write_sources", "dom", "pseudo_elements", "resolve"] {
            assert!(
                text.contains(&format!("\"name\":\"anchorfill.{}\"", phase)),
                "missing {} in {}",
                phase,
                text
            );
        }
        let _ = std::fs::remove_file(&path);
    }
}
