//! Literal-only evaluation of Python expressions.
//!
//! Only constant syntax is understood: strings, numbers, booleans, `None`,
//! and lists, tuples and dicts built from them. Anything else (names, calls,
//! comprehensions, f-strings, splats) makes the whole expression
//! non-literal and yields `None`.

use serde_json::{Map, Number, Value};
use tree_sitter::Node;

/// Evaluate `node` as a literal expression.
pub fn literal_value(node: Node<'_>, source: &str) -> Option<Value> {
    match node.kind() {
        "string" | "concatenated_string" => string_value(node, source).map(Value::String),
        "integer" => parse_integer(text(node, source)).map(|n| Value::Number(n.into())),
        "float" => parse_float(text(node, source)),
        "true" => Some(Value::Bool(true)),
        "false" => Some(Value::Bool(false)),
        "none" => Some(Value::Null),
        "unary_operator" => {
            let operator = node.child_by_field_name("operator")?;
            let argument = node.child_by_field_name("argument")?;
            let value = literal_value(argument, source)?;
            match (text(operator, source), value) {
                ("-", Value::Number(n)) => negate(&n),
                ("+", Value::Number(n)) => Some(Value::Number(n)),
                _ => None,
            }
        }
        "parenthesized_expression" => {
            let inner = named_children(node).into_iter().next()?;
            literal_value(inner, source)
        }
        "list" | "tuple" => {
            let mut items = Vec::new();
            for child in named_children(node) {
                items.push(literal_value(child, source)?);
            }
            Some(Value::Array(items))
        }
        "dictionary" => {
            let mut map = Map::new();
            for pair in named_children(node) {
                if pair.kind() != "pair" {
                    return None;
                }
                let key = pair.child_by_field_name("key")?;
                let value = pair.child_by_field_name("value")?;
                let Value::String(key) = literal_value(key, source)? else {
                    return None;
                };
                map.insert(key, literal_value(value, source)?);
            }
            Some(Value::Object(map))
        }
        _ => None,
    }
}

/// Value of a plain or implicitly concatenated string literal.
///
/// f-strings and byte strings are not constant text and return `None`.
pub fn string_value(node: Node<'_>, source: &str) -> Option<String> {
    match node.kind() {
        "string" => decode_string_literal(text(node, source)),
        "concatenated_string" => {
            let mut out = String::new();
            for part in named_children(node) {
                out.push_str(&string_value(part, source)?);
            }
            Some(out)
        }
        _ => None,
    }
}

/// Decode the source text of a single Python string literal.
pub fn decode_string_literal(literal: &str) -> Option<String> {
    let prefix_len = literal
        .char_indices()
        .find(|(_, c)| !c.is_ascii_alphabetic())
        .map(|(i, _)| i)?;
    let prefix = literal[..prefix_len].to_ascii_lowercase();
    if prefix.contains('f') || prefix.contains('b') {
        return None;
    }
    let raw = prefix.contains('r');

    let body = &literal[prefix_len..];
    let quote = ["\"\"\"", "'''", "\"", "'"]
        .into_iter()
        .find(|q| body.starts_with(q))?;
    if body.len() < quote.len() * 2 || !body.ends_with(quote) {
        return None;
    }
    let inner = &body[quote.len()..body.len() - quote.len()];

    if raw {
        Some(inner.to_string())
    } else {
        Some(unescape(inner))
    }
}

fn unescape(inner: &str) -> String {
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let Some(next) = chars.next() else {
            out.push('\\');
            break;
        };
        match next {
            '\n' => {}
            '\\' => out.push('\\'),
            '\'' => out.push('\''),
            '"' => out.push('"'),
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            'a' => out.push('\u{07}'),
            'b' => out.push('\u{08}'),
            'f' => out.push('\u{0C}'),
            'v' => out.push('\u{0B}'),
            'x' | 'u' | 'U' => {
                let width = match next {
                    'x' => 2,
                    'u' => 4,
                    _ => 8,
                };
                let digits: String = (0..width).filter_map(|_| chars.next()).collect();
                match u32::from_str_radix(&digits, 16)
                    .ok()
                    .and_then(char::from_u32)
                {
                    Some(decoded) if digits.len() == width => out.push(decoded),
                    _ => {
                        out.push('\\');
                        out.push(next);
                        out.push_str(&digits);
                    }
                }
            }
            '0'..='7' => {
                let mut digits = String::from(next);
                while digits.len() < 3 {
                    match chars.peek() {
                        Some(d @ '0'..='7') => {
                            digits.push(*d);
                            chars.next();
                        }
                        _ => break,
                    }
                }
                if let Some(decoded) = u32::from_str_radix(&digits, 8)
                    .ok()
                    .and_then(char::from_u32)
                {
                    out.push(decoded);
                }
            }
            other => {
                out.push('\\');
                out.push(other);
            }
        }
    }
    out
}

fn parse_integer(raw: &str) -> Option<i64> {
    let cleaned = raw.replace('_', "").to_ascii_lowercase();
    let (digits, radix) = if let Some(rest) = cleaned.strip_prefix("0x") {
        (rest, 16)
    } else if let Some(rest) = cleaned.strip_prefix("0o") {
        (rest, 8)
    } else if let Some(rest) = cleaned.strip_prefix("0b") {
        (rest, 2)
    } else {
        (cleaned.as_str(), 10)
    };
    i64::from_str_radix(digits, radix).ok()
}

fn parse_float(raw: &str) -> Option<Value> {
    let cleaned = raw.replace('_', "");
    let value: f64 = cleaned.parse().ok()?;
    Number::from_f64(value).map(Value::Number)
}

fn negate(n: &Number) -> Option<Value> {
    if let Some(i) = n.as_i64() {
        return i.checked_neg().map(|v| Value::Number(v.into()));
    }
    n.as_f64()
        .and_then(|f| Number::from_f64(-f))
        .map(Value::Number)
}

fn text<'s>(node: Node<'_>, source: &'s str) -> &'s str {
    &source[node.start_byte()..node.end_byte()]
}

fn named_children(node: Node<'_>) -> Vec<Node<'_>> {
    let mut cursor = node.walk();
    node.named_children(&mut cursor)
        .filter(|child| child.kind() != "comment")
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::python::Module;
    use serde_json::json;

    fn eval_rhs(source: &str) -> Option<Value> {
        let module = Module::parse(source).unwrap();
        let bindings = module.top_level_bindings();
        let value = bindings.first().and_then(|b| b.value)?;
        literal_value(value, source)
    }

    #[test]
    fn test_decode_string_literal_variants() {
        assert_eq!(decode_string_literal(r#""plain""#).as_deref(), Some("plain"));
        assert_eq!(decode_string_literal("'single'").as_deref(), Some("single"));
        assert_eq!(
            decode_string_literal(r#""""triple""""#).as_deref(),
            Some("triple")
        );
        assert_eq!(decode_string_literal(r#""a\tb\n""#).as_deref(), Some("a\tb\n"));
        assert_eq!(decode_string_literal(r#"r"a\tb""#).as_deref(), Some(r"a\tb"));
        assert_eq!(decode_string_literal(r#""\x41é""#).as_deref(), Some("Aé"));
        assert_eq!(decode_string_literal(r#"f"{x}""#), None);
        assert_eq!(decode_string_literal(r#"b"bytes""#), None);
    }

    #[test]
    fn test_parameters_literal_list() {
        let source = r#"PARAMETERS = [
    # size of the output
    {"name": "size", "type": "int", "default": 512, "description": "Target size"},
    {"name": "ratio", "type": "float", "default": -0.5, "description": "Ratio"},
    {"name": "keep", "type": "bool", "default": True, "description": ("Keep " "alpha")},
]
"#;
        assert_eq!(
            eval_rhs(source),
            Some(json!([
                {"name": "size", "type": "int", "default": 512, "description": "Target size"},
                {"name": "ratio", "type": "float", "default": -0.5, "description": "Ratio"},
                {"name": "keep", "type": "bool", "default": true, "description": "Keep alpha"},
            ]))
        );
    }

    #[test]
    fn test_non_literals_are_rejected() {
        assert_eq!(eval_rhs("X = [1, compute()]\n"), None);
        assert_eq!(eval_rhs("X = NAME.lower()\n"), None);
        assert_eq!(eval_rhs("X = [i for i in range(3)]\n"), None);
        assert_eq!(eval_rhs("X = f\"{NAME}\"\n"), None);
        assert_eq!(eval_rhs("X = {1: 'a'}\n"), None);
    }

    #[test]
    fn test_numbers() {
        assert_eq!(eval_rhs("X = 0x10\n"), Some(json!(16)));
        assert_eq!(eval_rhs("X = 1_000\n"), Some(json!(1000)));
        assert_eq!(eval_rhs("X = (None, False)\n"), Some(json!([null, false])));
    }
}
