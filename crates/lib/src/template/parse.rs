//! Template parsing.
//!
//! # Syntax
//!
//! - `{{ name }}` - substitute a value
//! - `{% if name %}` / `{% if not name %}` ... `{% else %}` ... `{% endif %}`
//! - `{% for item in list %}` ... `{% endfor %}`
//!
//! A block tag alone on its line swallows the newline that ends it, so tags
//! can sit on lines of their own without leaving blank lines behind. Tags
//! inside a line of other content leave the newline in place.

use super::TemplateError;

/// A parsed template node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Node {
  Text(String),
  Var(String),
  If {
    name: String,
    negate: bool,
    then: Vec<Node>,
    otherwise: Vec<Node>,
  },
  For {
    item: String,
    list: String,
    body: Vec<Node>,
  },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Tag {
  If { name: String, negate: bool },
  Else,
  EndIf,
  For { item: String, list: String },
  EndFor,
}

#[derive(Debug)]
enum Token {
  Text(String),
  Var(String),
  Tag(Tag, usize),
}

enum FrameKind {
  Root,
  If {
    name: String,
    negate: bool,
    then: Option<Vec<Node>>,
  },
  For {
    item: String,
    list: String,
  },
}

struct Frame {
  kind: FrameKind,
  line: usize,
  nodes: Vec<Node>,
}

/// Parse `source` into a node tree. `template` names it in errors.
pub(crate) fn parse(template: &str, source: &str) -> Result<Vec<Node>, TemplateError> {
  let tokens = tokenize(template, source)?;

  let mut stack = vec![Frame {
    kind: FrameKind::Root,
    line: 1,
    nodes: Vec::new(),
  }];

  for token in tokens {
    match token {
      Token::Text(text) => push(&mut stack, Node::Text(text)),
      Token::Var(name) => push(&mut stack, Node::Var(name)),
      Token::Tag(Tag::If { name, negate }, line) => stack.push(Frame {
        kind: FrameKind::If {
          name,
          negate,
          then: None,
        },
        line,
        nodes: Vec::new(),
      }),
      Token::Tag(Tag::For { item, list }, line) => stack.push(Frame {
        kind: FrameKind::For { item, list },
        line,
        nodes: Vec::new(),
      }),
      Token::Tag(Tag::Else, line) => match stack.last_mut() {
        Some(Frame {
          kind: FrameKind::If { then: then @ None, .. },
          nodes,
          ..
        }) => {
          *then = Some(std::mem::take(nodes));
        }
        _ => return Err(syntax(template, line, "'else' without matching 'if'")),
      },
      Token::Tag(Tag::EndIf, line) => {
        let frame = pop(&mut stack, template, line, "endif")?;
        match frame.kind {
          FrameKind::If { name, negate, then } => {
            let (then, otherwise) = match then {
              Some(then) => (then, frame.nodes),
              None => (frame.nodes, Vec::new()),
            };
            push(
              &mut stack,
              Node::If {
                name,
                negate,
                then,
                otherwise,
              },
            );
          }
          _ => return Err(syntax(template, line, "'endif' closes a 'for' block")),
        }
      }
      Token::Tag(Tag::EndFor, line) => {
        let frame = pop(&mut stack, template, line, "endfor")?;
        match frame.kind {
          FrameKind::For { item, list } => push(
            &mut stack,
            Node::For {
              item,
              list,
              body: frame.nodes,
            },
          ),
          _ => return Err(syntax(template, line, "'endfor' closes an 'if' block")),
        }
      }
    }
  }

  if stack.len() > 1 {
    let line = stack.last().map(|f| f.line).unwrap_or(1);
    return Err(syntax(template, line, "unclosed block"));
  }

  Ok(stack.pop().map(|f| f.nodes).unwrap_or_default())
}

fn push(stack: &mut [Frame], node: Node) {
  if let Some(frame) = stack.last_mut() {
    frame.nodes.push(node);
  }
}

fn pop(stack: &mut Vec<Frame>, template: &str, line: usize, tag: &str) -> Result<Frame, TemplateError> {
  if stack.len() <= 1 {
    return Err(syntax(template, line, &format!("'{tag}' without an open block")));
  }
  stack
    .pop()
    .ok_or_else(|| syntax(template, line, &format!("'{tag}' without an open block")))
}

fn tokenize(template: &str, source: &str) -> Result<Vec<Token>, TemplateError> {
  let mut tokens = Vec::new();
  let mut rest = source;
  let mut line = 1;
  // Whether everything emitted since the last newline is whitespace or tags.
  let mut blank_line = true;

  while !rest.is_empty() {
    let next = [rest.find("{{"), rest.find("{%")].into_iter().flatten().min();

    let Some(start) = next else {
      tokens.push(Token::Text(rest.to_string()));
      break;
    };

    if start > 0 {
      let text = &rest[..start];
      line += text.matches('\n').count();
      blank_line = match text.rfind('\n') {
        Some(nl) => text[nl + 1..].trim().is_empty(),
        None => blank_line && text.trim().is_empty(),
      };
      tokens.push(Token::Text(text.to_string()));
    }

    let is_var = rest[start..].starts_with("{{");
    let close = if is_var { "}}" } else { "%}" };
    let body_start = start + 2;
    let Some(len) = rest[body_start..].find(close) else {
      return Err(syntax(template, line, &format!("unclosed '{}'", &rest[start..body_start])));
    };
    let body = rest[body_start..body_start + len].trim();
    let mut after = &rest[body_start + len + 2..];

    if is_var {
      check_name(template, line, body)?;
      tokens.push(Token::Var(body.to_string()));
      blank_line = false;
    } else {
      tokens.push(Token::Tag(parse_tag(template, line, body)?, line));
      if blank_line
        && let Some(stripped) = after.strip_prefix('\n')
      {
        after = stripped;
        line += 1;
      }
    }

    line += rest[body_start..body_start + len].matches('\n').count();
    rest = after;
  }

  Ok(tokens)
}

fn parse_tag(template: &str, line: usize, body: &str) -> Result<Tag, TemplateError> {
  let words: Vec<&str> = body.split_whitespace().collect();
  let tag = match words.as_slice() {
    ["if", "not", name] => Tag::If {
      name: name.to_string(),
      negate: true,
    },
    ["if", name] => Tag::If {
      name: name.to_string(),
      negate: false,
    },
    ["else"] => Tag::Else,
    ["endif"] => Tag::EndIf,
    ["for", item, "in", list] => Tag::For {
      item: item.to_string(),
      list: list.to_string(),
    },
    ["endfor"] => Tag::EndFor,
    _ => return Err(syntax(template, line, &format!("unknown tag '{body}'"))),
  };

  match &tag {
    Tag::If { name, .. } => check_name(template, line, name)?,
    Tag::For { item, list } => {
      check_name(template, line, item)?;
      check_name(template, line, list)?;
    }
    _ => {}
  }
  Ok(tag)
}

fn check_name(template: &str, line: usize, name: &str) -> Result<(), TemplateError> {
  let mut chars = name.chars();
  let valid = match chars.next() {
    Some(c) if c.is_ascii_alphabetic() || c == '_' => chars.all(|c| c.is_ascii_alphanumeric() || c == '_'),
    _ => false,
  };
  if valid {
    Ok(())
  } else {
    Err(syntax(template, line, &format!("invalid variable name '{name}'")))
  }
}

fn syntax(template: &str, line: usize, message: &str) -> TemplateError {
  TemplateError::Syntax {
    template: template.to_string(),
    line,
    message: message.to_string(),
  }
}
