//! Build-script rendering.
//!
//! A profile names a script template; the renderer looks it up in the local
//! override directory first and the built-in set second, then fills it from a
//! [`RenderContext`]. Rendering never touches the filesystem beyond reading
//! the template.

mod context;
mod parse;

use std::borrow::Cow;
use std::path::PathBuf;

use thiserror::Error;
use tracing::debug;

pub use context::{RenderContext, SharedContext, TemplateValue};
use parse::Node;

/// Templates shipped with the library.
pub const BUILTIN_TEMPLATES: &[(&str, &str)] = &[
  (
    "debian.sh.tmpl",
    include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/templates/debian.sh.tmpl")),
  ),
  (
    "centos.sh.tmpl",
    include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/templates/centos.sh.tmpl")),
  ),
];

/// Errors from template lookup and rendering.
#[derive(Debug, Error)]
pub enum TemplateError {
  #[error("template '{0}' not found")]
  NotFound(String),

  #[error("invalid template name '{0}'")]
  InvalidName(String),

  #[error("{template}:{line}: {message}")]
  Syntax {
    template: String,
    line: usize,
    message: String,
  },

  #[error("{template}: undefined variable '{name}'")]
  UndefinedVariable { template: String, name: String },

  #[error("{template}: '{name}' is not a list")]
  NotAList { template: String, name: String },

  #[error("failed to read template {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

/// Resolves template names and renders them.
#[derive(Debug, Clone, Default)]
pub struct ScriptRenderer {
  local_dir: Option<PathBuf>,
}

impl ScriptRenderer {
  pub fn new(local_dir: Option<PathBuf>) -> Self {
    Self { local_dir }
  }

  pub fn local_dir(&self) -> Option<&std::path::Path> {
    self.local_dir.as_deref()
  }

  /// Render the named template with `ctx`.
  pub fn render(&self, template: &str, ctx: &RenderContext) -> Result<String, TemplateError> {
    let source = self.source(template)?;
    render_str(template, &source, ctx)
  }

  /// Template text for `name`: local directory first, built-ins second.
  pub fn source(&self, name: &str) -> Result<Cow<'static, str>, TemplateError> {
    if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
      return Err(TemplateError::InvalidName(name.to_string()));
    }

    if let Some(dir) = &self.local_dir {
      let path = dir.join(name);
      if path.is_file() {
        debug!(template = name, path = %path.display(), "using local template");
        let content = std::fs::read_to_string(&path).map_err(|source| TemplateError::Read { path, source })?;
        return Ok(Cow::Owned(content));
      }
    }

    BUILTIN_TEMPLATES
      .iter()
      .find(|(builtin, _)| *builtin == name)
      .map(|(_, content)| Cow::Borrowed(*content))
      .ok_or_else(|| TemplateError::NotFound(name.to_string()))
  }
}

/// Render template text directly. `template` names it in errors.
pub fn render_str(template: &str, source: &str, ctx: &RenderContext) -> Result<String, TemplateError> {
  let nodes = parse::parse(template, source)?;
  let mut out = String::with_capacity(source.len());
  let mut scope = Scope {
    template,
    ctx,
    locals: Vec::new(),
  };
  scope.render(&nodes, &mut out)?;
  Ok(out)
}

struct Scope<'a> {
  template: &'a str,
  ctx: &'a RenderContext,
  locals: Vec<(String, TemplateValue)>,
}

impl Scope<'_> {
  fn lookup(&self, name: &str) -> Result<&TemplateValue, TemplateError> {
    self
      .locals
      .iter()
      .rev()
      .find(|(local, _)| local == name)
      .map(|(_, value)| value)
      .or_else(|| self.ctx.get(name))
      .ok_or_else(|| TemplateError::UndefinedVariable {
        template: self.template.to_string(),
        name: name.to_string(),
      })
  }

  fn render(&mut self, nodes: &[Node], out: &mut String) -> Result<(), TemplateError> {
    for node in nodes {
      match node {
        Node::Text(text) => out.push_str(text),
        Node::Var(name) => out.push_str(&self.lookup(name)?.render()),
        Node::If {
          name,
          negate,
          then,
          otherwise,
        } => {
          let truthy = self.lookup(name)?.is_truthy() != *negate;
          self.render(if truthy { then } else { otherwise }, out)?;
        }
        Node::For { item, list, body } => {
          let items = match self.lookup(list)? {
            TemplateValue::List(items) => items.clone(),
            _ => {
              return Err(TemplateError::NotAList {
                template: self.template.to_string(),
                name: list.clone(),
              });
            }
          };
          for value in items {
            self.locals.push((item.clone(), TemplateValue::Text(value)));
            let result = self.render(body, out);
            self.locals.pop();
            result?;
          }
        }
      }
    }
    Ok(())
  }
}
