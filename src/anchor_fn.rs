use crate::dom::ElementRef;
use crate::ids::IdGenerator;
use crate::properties::{is_dashed_ident, is_side_keyword, is_size_keyword};
use crate::value::{self, ValueNode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnchorFunctionKind {
    Anchor,
    AnchorSize,
}

impl AnchorFunctionKind {
    pub fn name(self) -> &'static str {
        match self {
            AnchorFunctionKind::Anchor => "anchor",
            AnchorFunctionKind::AnchorSize => "anchor-size",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AnchorSpecifier {
    Named(String),
    /// `implicit`, or no specifier at all.
    Implicit,
}

impl AnchorSpecifier {
    pub fn as_str(&self) -> &str {
        match self {
            AnchorSpecifier::Named(name) => name,
            AnchorSpecifier::Implicit => "implicit",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AnchorSide {
    Keyword(String),
    Percentage(String),
    Calc(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum AnchorParam {
    Side(AnchorSide),
    Size(String),
}

/// One `anchor()` or `anchor-size()` occurrence, replaced in its value by
/// `var(<custom_property>)`.
#[derive(Debug, Clone)]
pub struct AnchorFunction {
    pub kind: AnchorFunctionKind,
    pub custom_property: String,
    pub specifier: AnchorSpecifier,
    pub param: AnchorParam,
    pub fallback: Option<String>,
    resolution: Option<Option<ElementRef>>,
}

impl AnchorFunction {
    pub fn resolved_anchor(&self) -> Option<&ElementRef> {
        self.resolution.as_ref().and_then(|anchor| anchor.as_ref())
    }

    pub fn is_settled(&self) -> bool {
        self.resolution.is_some()
    }

    /// Records the resolution result. Only the first call has an effect.
    pub fn settle(&mut self, anchor: Option<ElementRef>) -> bool {
        if self.resolution.is_some() {
            return false;
        }
        self.resolution = Some(anchor);
        true
    }
}

#[derive(Debug, Clone)]
pub struct ValueWithAnchorFunctions {
    pub id: String,
    pub value: String,
    pub functions: Vec<AnchorFunction>,
}

/// Finds every well-formed `kind` function in `text` and rewrites it to a
/// placeholder custom property reference. Malformed calls stay as written.
pub fn parse_anchor_functions(
    text: &str,
    kind: AnchorFunctionKind,
    ids: &mut IdGenerator,
) -> Option<ValueWithAnchorFunctions> {
    let mut nodes = value::parse_value(text);
    let mut functions = Vec::new();
    rewrite_nodes(&mut nodes, kind, ids, &mut functions);
    if functions.is_empty() {
        return None;
    }
    Some(ValueWithAnchorFunctions {
        id: ids.uuid(),
        value: value::serialize(&nodes),
        functions,
    })
}

fn rewrite_nodes(
    nodes: &mut [ValueNode],
    kind: AnchorFunctionKind,
    ids: &mut IdGenerator,
    found: &mut Vec<AnchorFunction>,
) {
    for node in nodes.iter_mut() {
        let replacement = match node {
            ValueNode::Function { name, args } if name.eq_ignore_ascii_case(kind.name()) => {
                match parse_params(args, kind) {
                    Some((specifier, param)) => {
                        let comma = args.iter().position(|n| *n == ValueNode::Comma);
                        let fallback = comma.and_then(|idx| {
                            let tail = &mut args[idx + 1..];
                            rewrite_nodes(tail, kind, ids, found);
                            let text = value::serialize(value::trim_nodes(tail));
                            (!text.is_empty()).then_some(text)
                        });
                        let custom_property = ids.property(kind.name());
                        let placeholder = ValueNode::Raw(format!("var({})", custom_property));
                        found.push(AnchorFunction {
                            kind,
                            custom_property,
                            specifier,
                            param,
                            fallback,
                            resolution: None,
                        });
                        Some(placeholder)
                    }
                    None => {
                        rewrite_nodes(args, kind, ids, found);
                        None
                    }
                }
            }
            ValueNode::Function { args, .. } => {
                rewrite_nodes(args, kind, ids, found);
                None
            }
            ValueNode::Parens(inner) => {
                rewrite_nodes(inner, kind, ids, found);
                None
            }
            _ => None,
        };
        if let Some(replacement) = replacement {
            *node = replacement;
        }
    }
}

fn parse_params(
    args: &[ValueNode],
    kind: AnchorFunctionKind,
) -> Option<(AnchorSpecifier, AnchorParam)> {
    let (params, _) = value::split_first_comma(args);
    let parts: Vec<&ValueNode> = params
        .iter()
        .filter(|node| **node != ValueNode::Whitespace)
        .collect();
    let (specifier, param) = match parts.as_slice() {
        [param] => (AnchorSpecifier::Implicit, *param),
        [specifier, param] => (parse_specifier(specifier)?, *param),
        _ => return None,
    };
    let param = match kind {
        AnchorFunctionKind::Anchor => AnchorParam::Side(parse_side(param)?),
        AnchorFunctionKind::AnchorSize => match param {
            ValueNode::Ident(raw) if is_size_keyword(raw) => {
                AnchorParam::Size(raw.to_ascii_lowercase())
            }
            _ => return None,
        },
    };
    Some((specifier, param))
}

fn parse_specifier(node: &ValueNode) -> Option<AnchorSpecifier> {
    match node {
        ValueNode::Ident(raw) if is_dashed_ident(raw) => Some(AnchorSpecifier::Named(raw.clone())),
        ValueNode::Ident(raw) if raw.eq_ignore_ascii_case("implicit") => {
            Some(AnchorSpecifier::Implicit)
        }
        _ => None,
    }
}

fn parse_side(node: &ValueNode) -> Option<AnchorSide> {
    match node {
        ValueNode::Ident(raw) if is_side_keyword(raw) => {
            Some(AnchorSide::Keyword(raw.to_ascii_lowercase()))
        }
        ValueNode::Percentage(raw) => Some(AnchorSide::Percentage(raw.clone())),
        ValueNode::Function { args, .. } if node.is_function("calc") && is_percent_calc(args) => {
            Some(AnchorSide::Calc(value::serialize(std::slice::from_ref(node))))
        }
        _ => None,
    }
}

/// A calc body built only from percentages, plain numbers, arithmetic
/// operators, and nested calc()/parenthesized groups of the same.
fn is_percent_calc(nodes: &[ValueNode]) -> bool {
    nodes.iter().all(|node| match node {
        ValueNode::Whitespace | ValueNode::Number(_) | ValueNode::Percentage(_) => true,
        ValueNode::Delim(ch) => matches!(ch, '*' | '/' | '+' | '-'),
        ValueNode::Parens(inner) => is_percent_calc(inner),
        ValueNode::Function { args, .. } if node.is_function("calc") => is_percent_calc(args),
        _ => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str, kind: AnchorFunctionKind) -> Option<ValueWithAnchorFunctions> {
        let mut ids = IdGenerator::new("t-");
        parse_anchor_functions(text, kind, &mut ids)
    }

    fn side_of(text: &str) -> Option<AnchorParam> {
        parse(text, AnchorFunctionKind::Anchor).map(|v| v.functions[0].param.clone())
    }

    #[test]
    fn named_anchor_with_side_keyword() {
        let parsed = parse("anchor(--my-anchor top)", AnchorFunctionKind::Anchor)
            .expect("anchor parsed");
        assert_eq!(parsed.functions.len(), 1);
        let function = &parsed.functions[0];
        assert_eq!(
            function.specifier,
            AnchorSpecifier::Named("--my-anchor".to_string())
        );
        assert_eq!(
            function.param,
            AnchorParam::Side(AnchorSide::Keyword("top".to_string()))
        );
        assert_eq!(function.fallback, None);
        assert_eq!(parsed.value, format!("var({})", function.custom_property));
        assert!(function.custom_property.starts_with("--anchor-"));
    }

    #[test]
    fn rewritten_value_exposes_no_anchor_functions() {
        let parsed = parse("calc(anchor(--a right) + 4px)", AnchorFunctionKind::Anchor)
            .expect("anchor parsed");
        assert!(parsed.value.starts_with("calc(var(--anchor-"));
        assert!(parse(&parsed.value, AnchorFunctionKind::Anchor).is_none());
    }

    #[test]
    fn single_argument_uses_implicit_anchor() {
        let parsed = parse("anchor(50%)", AnchorFunctionKind::Anchor).expect("anchor parsed");
        assert_eq!(parsed.functions[0].specifier, AnchorSpecifier::Implicit);
        assert_eq!(
            parsed.functions[0].param,
            AnchorParam::Side(AnchorSide::Percentage("50%".to_string()))
        );
        let parsed =
            parse("anchor(implicit end)", AnchorFunctionKind::Anchor).expect("anchor parsed");
        assert_eq!(parsed.functions[0].specifier, AnchorSpecifier::Implicit);
    }

    #[test]
    fn wrong_arity_is_ignored() {
        assert!(parse("anchor(--a top extra)", AnchorFunctionKind::Anchor).is_none());
        assert!(parse("anchor()", AnchorFunctionKind::Anchor).is_none());
    }

    #[test]
    fn invalid_specifier_or_side_is_ignored() {
        assert!(parse("anchor(a top)", AnchorFunctionKind::Anchor).is_none());
        assert!(parse("anchor(--a middle)", AnchorFunctionKind::Anchor).is_none());
        assert!(parse("anchor(--a 10px)", AnchorFunctionKind::Anchor).is_none());
        assert!(parse("anchor(--a width)", AnchorFunctionKind::Anchor).is_none());
    }

    #[test]
    fn calc_sides_accept_only_percentages_and_numbers() {
        assert!(matches!(
            side_of("anchor(--a calc(20% + 10%))"),
            Some(AnchorParam::Side(AnchorSide::Calc(_)))
        ));
        assert!(side_of("anchor(--a calc((2/calc(2))*25%))").is_some());
        assert!(side_of("anchor(--a calc(2*25%))").is_some());
        assert!(side_of("anchor(--a calc(2*25px))").is_none());
        assert!(side_of("anchor(--a calc(50% - 1em))").is_none());
    }

    #[test]
    fn fallback_is_kept_as_text() {
        let parsed =
            parse("anchor(--a bottom, 10px)", AnchorFunctionKind::Anchor).expect("parsed");
        assert_eq!(parsed.functions[0].fallback.as_deref(), Some("10px"));
        let parsed = parse("anchor(--a bottom,)", AnchorFunctionKind::Anchor).expect("parsed");
        assert_eq!(parsed.functions[0].fallback, None);
    }

    #[test]
    fn nested_fallback_functions_are_rewritten_too() {
        let parsed = parse(
            "anchor(--a top, anchor(--b bottom))",
            AnchorFunctionKind::Anchor,
        )
        .expect("parsed");
        assert_eq!(parsed.functions.len(), 2);
        let inner = &parsed.functions[0];
        let outer = &parsed.functions[1];
        assert_eq!(inner.specifier, AnchorSpecifier::Named("--b".to_string()));
        assert_eq!(
            outer.fallback.as_deref(),
            Some(format!("var({})", inner.custom_property).as_str())
        );
    }

    #[test]
    fn partial_success_leaves_invalid_calls_in_place() {
        let parsed = parse(
            "calc(anchor(--a top) + anchor(--b nowhere))",
            AnchorFunctionKind::Anchor,
        )
        .expect("parsed");
        assert_eq!(parsed.functions.len(), 1);
        assert!(parsed.value.contains("anchor(--b nowhere)"));
    }

    #[test]
    fn anchor_size_uses_size_keywords() {
        let parsed = parse("anchor-size(--a width)", AnchorFunctionKind::AnchorSize)
            .expect("parsed");
        assert_eq!(
            parsed.functions[0].param,
            AnchorParam::Size("width".to_string())
        );
        assert!(parsed.functions[0].custom_property.starts_with("--anchor-size-"));
        assert!(parse("anchor-size(--a top)", AnchorFunctionKind::AnchorSize).is_none());
        assert!(parse("anchor(--a top)", AnchorFunctionKind::AnchorSize).is_none());
    }

    #[test]
    fn settles_only_once() {
        let mut parsed = parse("anchor(--a top)", AnchorFunctionKind::Anchor).expect("parsed");
        let function = &mut parsed.functions[0];
        assert!(!function.is_settled());
        assert!(function.settle(None));
        assert!(function.is_settled());
        assert!(!function.settle(None));
        assert!(function.resolved_anchor().is_none());
    }
}
