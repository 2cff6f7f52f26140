//! Template expressions for derived attributes.
//!
//! An expression is literal text with `{attribute}` placeholders. `{{` and
//! `}}` produce literal braces.

use crate::identity::Identity;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Attribute(String),
}

/// A parsed derived-attribute expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedExpression {
    segments: Vec<Segment>,
}

impl DerivedExpression {
    /// Parse an expression, rejecting unbalanced or empty placeholders.
    pub fn parse(expression: &str) -> Result<Self, String> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = expression.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    literal.push('}');
                }
                '{' => {
                    let mut name = String::new();
                    let mut closed = false;
                    for n in chars.by_ref() {
                        if n == '}' {
                            closed = true;
                            break;
                        }
                        name.push(n);
                    }
                    if !closed {
                        return Err(format!("unterminated placeholder in '{}'", expression));
                    }
                    let name = name.trim();
                    if name.is_empty() {
                        return Err(format!("empty placeholder in '{}'", expression));
                    }
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Attribute(name.to_string()));
                }
                '}' => return Err(format!("unbalanced '}}' in '{}'", expression)),
                other => literal.push(other),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self { segments })
    }

    /// Names of the plain attributes the expression reads.
    pub fn attributes(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Attribute(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// Evaluate against an identity.
    ///
    /// Missing attributes render as empty text. Returns `None` when none of
    /// the referenced attributes has a value.
    pub fn evaluate(&self, identity: &Identity) -> Option<String> {
        let mut output = String::new();
        let mut resolved_any = false;
        let mut references_any = false;

        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => output.push_str(text),
                Segment::Attribute(name) => {
                    references_any = true;
                    if let Some(value) = identity.first_value(name) {
                        resolved_any = true;
                        output.push_str(value);
                    }
                }
            }
        }

        if references_any && !resolved_any {
            None
        } else {
            Some(output)
        }
    }
}
