use cssparser::{ParseError, Parser, ParserInput, Token};

/// A CSS component value, kept close enough to the source text that
/// `serialize` reproduces it (comments dropped, whitespace collapsed).
#[derive(Debug, Clone, PartialEq)]
pub enum ValueNode {
    Whitespace,
    Comma,
    Delim(char),
    Ident(String),
    Number(String),
    Percentage(String),
    Dimension(String),
    Function { name: String, args: Vec<ValueNode> },
    Parens(Vec<ValueNode>),
    Raw(String),
}

impl ValueNode {
    pub fn is_function(&self, target: &str) -> bool {
        matches!(self, ValueNode::Function { name, .. } if name.eq_ignore_ascii_case(target))
    }
}

pub fn parse_value(text: &str) -> Vec<ValueNode> {
    let mut input = ParserInput::new(text);
    let mut parser = Parser::new(&mut input);
    parse_nodes(&mut parser).unwrap_or_else(|_| vec![ValueNode::Raw(text.to_string())])
}

fn parse_nodes<'i, 't>(parser: &mut Parser<'i, 't>) -> Result<Vec<ValueNode>, ParseError<'i, ()>> {
    let mut nodes = Vec::new();
    loop {
        let start = parser.position();
        let token = match parser.next_including_whitespace_and_comments() {
            Ok(token) => token.clone(),
            Err(_) => break,
        };
        let node = match token {
            Token::Comment(_) => continue,
            Token::WhiteSpace(_) => ValueNode::Whitespace,
            Token::Comma => ValueNode::Comma,
            Token::Delim(ch) => ValueNode::Delim(ch),
            Token::Ident(_) => ValueNode::Ident(parser.slice_from(start).to_string()),
            Token::Number { .. } => ValueNode::Number(parser.slice_from(start).to_string()),
            Token::Percentage { .. } => {
                ValueNode::Percentage(parser.slice_from(start).to_string())
            }
            Token::Dimension { .. } => ValueNode::Dimension(parser.slice_from(start).to_string()),
            Token::Function(name) => {
                let args = parser.parse_nested_block(|nested| parse_nodes(nested))?;
                ValueNode::Function {
                    name: name.to_string(),
                    args,
                }
            }
            Token::ParenthesisBlock => {
                ValueNode::Parens(parser.parse_nested_block(|nested| parse_nodes(nested))?)
            }
            Token::SquareBracketBlock | Token::CurlyBracketBlock => {
                parser.parse_nested_block(|nested| {
                    while nested.next_including_whitespace_and_comments().is_ok() {}
                    Ok::<(), ParseError<'i, ()>>(())
                })?;
                ValueNode::Raw(parser.slice_from(start).to_string())
            }
            _ => ValueNode::Raw(parser.slice_from(start).to_string()),
        };
        nodes.push(node);
    }
    Ok(nodes)
}

pub fn serialize(nodes: &[ValueNode]) -> String {
    let mut out = String::new();
    serialize_into(nodes, &mut out);
    out
}

fn serialize_into(nodes: &[ValueNode], out: &mut String) {
    for node in nodes {
        serialize_node(node, out);
    }
}

fn serialize_node(node: &ValueNode, out: &mut String) {
    match node {
        ValueNode::Whitespace => out.push(' '),
        ValueNode::Comma => out.push(','),
        ValueNode::Delim(ch) => out.push(*ch),
        ValueNode::Ident(raw)
        | ValueNode::Number(raw)
        | ValueNode::Percentage(raw)
        | ValueNode::Dimension(raw)
        | ValueNode::Raw(raw) => out.push_str(raw),
        ValueNode::Function { name, args } => {
            out.push_str(name);
            out.push('(');
            serialize_into(args, out);
            out.push(')');
        }
        ValueNode::Parens(inner) => {
            out.push('(');
            serialize_into(inner, out);
            out.push(')');
        }
    }
}

pub fn contains_function(nodes: &[ValueNode], target: &str) -> bool {
    nodes.iter().any(|node| match node {
        ValueNode::Function { name, args } => {
            name.eq_ignore_ascii_case(target) || contains_function(args, target)
        }
        ValueNode::Parens(inner) => contains_function(inner, target),
        _ => false,
    })
}

pub fn contains_var(text: &str) -> bool {
    text.to_ascii_lowercase().contains("var(") && contains_function(&parse_value(text), "var")
}

/// Strips leading and trailing whitespace nodes.
pub fn trim_nodes(nodes: &[ValueNode]) -> &[ValueNode] {
    let start = nodes
        .iter()
        .position(|node| *node != ValueNode::Whitespace)
        .unwrap_or(nodes.len());
    let end = nodes
        .iter()
        .rposition(|node| *node != ValueNode::Whitespace)
        .map(|idx| idx + 1)
        .unwrap_or(start);
    &nodes[start..end.max(start)]
}

/// Splits at the first comma that is not nested in a function or block.
pub fn split_first_comma(nodes: &[ValueNode]) -> (&[ValueNode], Option<&[ValueNode]>) {
    match nodes.iter().position(|node| *node == ValueNode::Comma) {
        Some(idx) => (&nodes[..idx], Some(&nodes[idx + 1..])),
        None => (nodes, None),
    }
}

/// Replaces every `var()` with the value returned by `lookup`, honouring
/// fallbacks. Returns `None` when a reference has neither a value nor a
/// fallback, which makes the whole value invalid at computed-value time.
pub fn substitute_vars(
    text: &str,
    lookup: &mut dyn FnMut(&str) -> Option<String>,
) -> Option<String> {
    let nodes = parse_value(text);
    if !contains_function(&nodes, "var") {
        return Some(text.to_string());
    }
    let mut out = String::new();
    substitute_into(&nodes, lookup, &mut out)?;
    Some(out)
}

fn substitute_into(
    nodes: &[ValueNode],
    lookup: &mut dyn FnMut(&str) -> Option<String>,
    out: &mut String,
) -> Option<()> {
    for node in nodes {
        match node {
            ValueNode::Function { name, args } if name.eq_ignore_ascii_case("var") => {
                let (reference, fallback) = split_first_comma(args);
                let reference = trim_nodes(reference);
                let var_name = match reference {
                    [ValueNode::Ident(ident)] if ident.starts_with("--") => ident.as_str(),
                    _ => return None,
                };
                match lookup(var_name) {
                    Some(value) => out.push_str(&value),
                    None => {
                        let fallback = fallback?;
                        substitute_into(trim_nodes(fallback), lookup, out)?;
                    }
                }
            }
            ValueNode::Function { name, args } => {
                out.push_str(name);
                out.push('(');
                substitute_into(args, lookup, out)?;
                out.push(')');
            }
            ValueNode::Parens(inner) => {
                out.push('(');
                substitute_into(inner, lookup, out)?;
                out.push(')');
            }
            other => serialize_node(other, out),
        }
    }
    Some(())
}
