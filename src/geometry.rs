use crate::anchor_fn::{AnchorFunctionKind, AnchorParam};
use crate::dom::ElementRef;
use crate::resolve::AnchorProperties;

/// One anchor function occurrence on a positioned element, with the anchor
/// it settled on.
#[derive(Debug, Clone)]
pub struct AnchorBinding {
    pub element: ElementRef,
    pub property: String,
    pub custom_property: String,
    pub kind: AnchorFunctionKind,
    pub anchor: Option<ElementRef>,
    pub param: AnchorParam,
    pub fallback: Option<String>,
}

/// Layout collaborator that turns a binding into a length. Returning `None`
/// means the engine could not place the element against the anchor.
pub trait PositionEngine {
    fn anchor_value(&self, binding: &AnchorBinding) -> Option<String>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlaceholderValue {
    pub element: ElementRef,
    pub custom_property: String,
    pub value: String,
}

/// A property value with its anchor functions swapped for placeholders.
#[derive(Debug, Clone, PartialEq)]
pub struct RewrittenDeclaration {
    pub element: ElementRef,
    pub property: String,
    pub value: String,
}

pub fn bindings(props: &AnchorProperties) -> Vec<AnchorBinding> {
    let mut out = Vec::new();
    for entry in &props.anchors_by_element {
        for (property, value) in &entry.values {
            for function in &value.functions {
                out.push(AnchorBinding {
                    element: entry.element.clone(),
                    property: property.clone(),
                    custom_property: function.custom_property.clone(),
                    kind: function.kind,
                    anchor: function.resolved_anchor().cloned(),
                    param: function.param.clone(),
                    fallback: function.fallback.clone(),
                });
            }
        }
    }
    out
}

/// Values for every placeholder custom property. Unresolved bindings, and
/// ones the engine declines, use the function's fallback; with no fallback
/// the placeholder is left undefined.
pub fn placeholder_values(
    props: &AnchorProperties,
    engine: &dyn PositionEngine,
) -> Vec<PlaceholderValue> {
    bindings(props)
        .into_iter()
        .filter_map(|binding| {
            let value = binding
                .anchor
                .as_ref()
                .and_then(|_| engine.anchor_value(&binding))
                .or_else(|| binding.fallback.clone())?;
            Some(PlaceholderValue {
                element: binding.element,
                custom_property: binding.custom_property,
                value,
            })
        })
        .collect()
}

pub fn rewritten_declarations(props: &AnchorProperties) -> Vec<RewrittenDeclaration> {
    props
        .anchors_by_element
        .iter()
        .flat_map(|entry| {
            entry.values.iter().map(|(property, value)| RewrittenDeclaration {
                element: entry.element.clone(),
                property: property.clone(),
                value: value.value.clone(),
            })
        })
        .collect()
}
