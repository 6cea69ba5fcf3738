use kuchiki::NodeRef;

use crate::assets::{AssetBundle, css_data_uri};
use crate::debug::{DebugLogger, json_string};
use crate::error::AnchorError;
use crate::ids::IdGenerator;

#[derive(Debug, Clone)]
pub enum SourceHost {
    Style(NodeRef),
    Link(NodeRef),
    Inline(NodeRef),
}

impl SourceHost {
    pub fn node(&self) -> &NodeRef {
        match self {
            SourceHost::Style(node) | SourceHost::Link(node) | SourceHost::Inline(node) => node,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SourceHost::Style(_) => "style",
            SourceHost::Link(_) => "link",
            SourceHost::Inline(_) => "inline",
        }
    }

    pub fn is_inline(&self) -> bool {
        matches!(self, SourceHost::Inline(_))
    }
}

#[derive(Debug, Clone)]
pub struct CssSource {
    pub host: SourceHost,
    pub id: String,
    pub css: String,
    pub url: Option<String>,
    pub dirty: bool,
}

/// Collects every style source in document order. Inline `style` attributes
/// become a one-rule stylesheet keyed by `inline_attribute`, which is set on
/// the host so the rule can match it.
pub fn read_css_sources(
    document: &NodeRef,
    selector: &str,
    assets: &AssetBundle,
    ids: &mut IdGenerator,
    inline_attribute: &str,
    debug: Option<&DebugLogger>,
) -> Result<Vec<CssSource>, AnchorError> {
    let matches = document
        .select(selector)
        .map_err(|_| AnchorError::InvalidConfiguration(format!("bad source selector: {selector}")))?;
    let mut sources = Vec::new();
    for element in matches {
        let node = element.as_node().clone();
        let tag = element.name.local.to_string().to_ascii_lowercase();
        let (style_attr, rel, link_type, href) = {
            let attrs = element.attributes.borrow();
            (
                attrs.get("style").map(str::to_string),
                attrs.get("rel").map(str::to_ascii_lowercase),
                attrs.get("type").map(str::to_ascii_lowercase),
                attrs.get("href").map(str::to_string),
            )
        };
        match tag.as_str() {
            "style" => {
                let css = node.text_contents();
                if !css.trim().is_empty() {
                    sources.push(CssSource {
                        host: SourceHost::Style(node.clone()),
                        id: ids.uuid(),
                        css,
                        url: None,
                        dirty: false,
                    });
                }
            }
            "link" => {
                let is_stylesheet = rel
                    .as_deref()
                    .map(|rel| rel.split_whitespace().any(|token| token == "stylesheet"))
                    .unwrap_or(false)
                    || link_type.as_deref() == Some("text/css");
                if let (true, Some(href)) = (is_stylesheet, href) {
                    match assets.stylesheet(&href) {
                        Some(css) => sources.push(CssSource {
                            host: SourceHost::Link(node.clone()),
                            id: ids.uuid(),
                            css,
                            url: Some(href),
                            dirty: false,
                        }),
                        None => {
                            if let Some(logger) = debug {
                                logger.log_json(&format!(
                                    "{{\"type\":\"css.source_skipped\",\"href\":{}}}",
                                    json_string(&href)
                                ));
                                logger.increment("css.source_skipped", 1);
                            }
                        }
                    }
                }
            }
            _ => {}
        }
        if let Some(style) = style_attr.filter(|style| !style.trim().is_empty()) {
            let id = ids.uuid();
            element
                .attributes
                .borrow_mut()
                .insert(inline_attribute, id.clone());
            sources.push(CssSource {
                host: SourceHost::Inline(node),
                css: format!("[{}=\"{}\"] {{ {} }}", inline_attribute, id, style),
                id,
                url: None,
                dirty: false,
            });
        }
    }
    if let Some(logger) = debug {
        for source in &sources {
            logger.log_json(&format!(
                "{{\"type\":\"css.source\",\"kind\":\"{}\",\"id\":{},\"bytes\":{}}}",
                source.host.kind(),
                json_string(&source.id),
                source.css.len()
            ));
        }
        logger.increment("css.sources", sources.len() as u64);
    }
    Ok(sources)
}

/// Writes rewritten CSS back into the document for every dirty source.
pub fn write_css_sources(sources: &mut [CssSource]) {
    for source in sources.iter_mut().filter(|source| source.dirty) {
        match &source.host {
            SourceHost::Style(node) => {
                let children: Vec<NodeRef> = node.children().collect();
                for child in children {
                    child.detach();
                }
                node.append(NodeRef::new_text(source.css.clone()));
            }
            SourceHost::Link(node) => {
                if let Some(element) = node.as_element() {
                    element
                        .attributes
                        .borrow_mut()
                        .insert("href", css_data_uri(&source.css));
                }
            }
            SourceHost::Inline(node) => {
                if let Some(element) = node.as_element() {
                    element
                        .attributes
                        .borrow_mut()
                        .insert("style", inline_rule_body(&source.css).to_string());
                }
            }
        }
        source.dirty = false;
    }
}

/// The declarations between the outermost braces of a wrapped inline rule.
pub(crate) fn inline_rule_body(css: &str) -> &str {
    match (css.find('{'), css.rfind('}')) {
        (Some(open), Some(close)) if open < close => css[open + 1..close].trim(),
        _ => css.trim(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kuchiki::traits::TendrilSink;

    const ATTR: &str = "data-css-t";

    fn read(html: &str, assets: &AssetBundle) -> (NodeRef, Vec<CssSource>) {
        let doc = kuchiki::parse_html().one(html);
        let mut ids = IdGenerator::new("t-");
        let sources =
            read_css_sources(&doc, "style,link,[style]", assets, &mut ids, ATTR, None)
                .expect("sources");
        (doc, sources)
    }

    #[test]
    fn collects_sources_in_document_order() {
        let mut assets = AssetBundle::default();
        assets.add("a.css", ".a { top: 0 }");
        let (_, sources) = read(
            r#"<html><head>
                <style>.x { left: 0 }</style>
                <link rel="stylesheet" href="a.css">
                <link rel="icon" href="a.css">
                <link rel="stylesheet" href="missing.css">
                <style>   </style>
              </head><body><div style="top: 1px"></div></body></html>"#,
            &assets,
        );
        let kinds: Vec<&str> = sources.iter().map(|s| s.host.kind()).collect();
        assert_eq!(kinds, vec!["style", "link", "inline"]);
        assert_eq!(sources[1].url.as_deref(), Some("a.css"));
        assert_eq!(sources[1].css, ".a { top: 0 }");
    }

    #[test]
    fn inline_styles_are_wrapped_and_tagged() {
        let (doc, sources) = read(
            r#"<div id="box" style="anchor-name: --a"></div>"#,
            &AssetBundle::default(),
        );
        let source = &sources[0];
        assert_eq!(
            source.css,
            format!("[{}=\"{}\"] {{ anchor-name: --a }}", ATTR, source.id)
        );
        let el = doc.select_first("#box").expect("box");
        let attrs = el.attributes.borrow();
        assert_eq!(attrs.get(ATTR), Some(source.id.as_str()));
    }

    #[test]
    fn writes_back_only_dirty_sources() {
        let mut assets = AssetBundle::default();
        assets.add("a.css", ".a{}");
        let (doc, mut sources) = read(
            r#"<html><head><style>.x{}</style><link rel="stylesheet" href="a.css"></head>
               <body><p id="p" style="top: 0"></p></body></html>"#,
            &assets,
        );
        for source in sources.iter_mut() {
            source.css = source.css.replace("{}", "{ left: 1px }");
            source.dirty = true;
        }
        sources[2].css = sources[2].css.replace("top: 0", "top: 0; --shadow: 1");
        write_css_sources(&mut sources);
        assert!(sources.iter().all(|s| !s.dirty));

        let style = doc.select_first("style").expect("style");
        assert_eq!(style.as_node().text_contents(), ".x{ left: 1px }");
        let link = doc.select_first("link").expect("link");
        let href = link.attributes.borrow().get("href").map(str::to_string);
        assert_eq!(
            href.and_then(|href| assets.stylesheet(&href)).as_deref(),
            Some(".a{ left: 1px }")
        );
        let p = doc.select_first("#p").expect("p");
        assert_eq!(
            p.attributes.borrow().get("style"),
            Some("top: 0; --shadow: 1")
        );
    }

    #[test]
    fn clean_sources_are_left_alone() {
        let (doc, mut sources) = read("<style>.x{}</style>", &AssetBundle::default());
        sources[0].css = "changed".to_string();
        write_css_sources(&mut sources);
        let style = doc.select_first("style").expect("style");
        assert_eq!(style.as_node().text_contents(), ".x{}");
    }
}
