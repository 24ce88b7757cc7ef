//! Minimal reader/writer for the tool's nested key-value script format.
//!
//! ```text
//! "AppBuild"
//! {
//! 	"AppID"	"480"
//! 	"Depots"
//! 	{
//! 		"481"	"depot_build_481.vdf"
//! 	}
//! }
//! ```
//!
//! The tool's parser has no escape syntax, so values containing a double
//! quote or a line break are rejected instead of written.

use depotctl_core::{DepotError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VdfValue {
    Str(String),
    Block(Vec<VdfNode>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VdfNode {
    pub key: String,
    pub value: VdfValue,
}

impl VdfNode {
    pub fn string(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: VdfValue::Str(value.into()),
        }
    }

    pub fn block(key: impl Into<String>, children: Vec<VdfNode>) -> Self {
        Self {
            key: key.into(),
            value: VdfValue::Block(children),
        }
    }

    /// Looks up a direct child. Keys compare case-insensitively like the tool does.
    pub fn get(&self, key: &str) -> Option<&VdfNode> {
        match &self.value {
            VdfValue::Block(children) => children.iter().find(|c| c.key.eq_ignore_ascii_case(key)),
            VdfValue::Str(_) => None,
        }
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.get(key).map(|n| &n.value) {
            Some(VdfValue::Str(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn children(&self) -> &[VdfNode] {
        match &self.value {
            VdfValue::Block(children) => children,
            VdfValue::Str(_) => &[],
        }
    }
}

fn ensure_representable(what: &str, text: &str) -> Result<()> {
    if text.contains('"') || text.contains('\n') || text.contains('\r') {
        return Err(DepotError::validation(
            what,
            format!("cannot be written to a build script: {:?}", text),
        ));
    }
    Ok(())
}

/// Renders a document with tab indentation and `\n` line endings.
pub fn render(root: &VdfNode) -> Result<String> {
    let mut out = String::new();
    render_node(root, 0, &mut out)?;
    Ok(out)
}

fn render_node(node: &VdfNode, depth: usize, out: &mut String) -> Result<()> {
    ensure_representable(&node.key, &node.key)?;
    let indent = "\t".repeat(depth);
    match &node.value {
        VdfValue::Str(value) => {
            ensure_representable(&node.key, value)?;
            out.push_str(&format!("{}\"{}\"\t\"{}\"\n", indent, node.key, value));
        }
        VdfValue::Block(children) => {
            out.push_str(&format!("{}\"{}\"\n{}{{\n", indent, node.key, indent));
            for child in children {
                render_node(child, depth + 1, out)?;
            }
            out.push_str(&format!("{}}}\n", indent));
        }
    }
    Ok(())
}

#[derive(Debug, PartialEq)]
enum Token {
    Text(String),
    Open,
    Close,
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' => tokens.push(Token::Open),
            '}' => tokens.push(Token::Close),
            '"' => {
                let mut text = String::new();
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some(ch) => text.push(ch),
                        None => return Err(parse_error("unterminated string")),
                    }
                }
                tokens.push(Token::Text(text));
            }
            '/' if chars.peek() == Some(&'/') => {
                for ch in chars.by_ref() {
                    if ch == '\n' {
                        break;
                    }
                }
            }
            c if c.is_whitespace() => {}
            c => {
                // Unquoted token
                let mut text = String::from(c);
                while let Some(&next) = chars.peek() {
                    if next.is_whitespace() || next == '{' || next == '}' || next == '"' {
                        break;
                    }
                    text.push(next);
                    chars.next();
                }
                tokens.push(Token::Text(text));
            }
        }
    }
    Ok(tokens)
}

fn parse_error(message: &str) -> DepotError {
    DepotError::Serialization {
        format: "VDF".to_string(),
        message: message.to_string(),
    }
}

/// Parses a document with exactly one root node.
pub fn parse(input: &str) -> Result<VdfNode> {
    let tokens = tokenize(input)?;
    let mut pos = 0;
    let root = parse_node(&tokens, &mut pos)?;
    if pos != tokens.len() {
        return Err(parse_error("trailing content after root block"));
    }
    Ok(root)
}

fn parse_node(tokens: &[Token], pos: &mut usize) -> Result<VdfNode> {
    let key = match tokens.get(*pos) {
        Some(Token::Text(key)) => key.clone(),
        _ => return Err(parse_error("expected key")),
    };
    *pos += 1;
    match tokens.get(*pos) {
        Some(Token::Text(value)) => {
            *pos += 1;
            Ok(VdfNode::string(key, value.clone()))
        }
        Some(Token::Open) => {
            *pos += 1;
            let mut children = Vec::new();
            loop {
                match tokens.get(*pos) {
                    Some(Token::Close) => {
                        *pos += 1;
                        break;
                    }
                    Some(_) => children.push(parse_node(tokens, pos)?),
                    None => return Err(parse_error("unterminated block")),
                }
            }
            Ok(VdfNode::block(key, children))
        }
        _ => Err(parse_error("expected value or block")),
    }
}
