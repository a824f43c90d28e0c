//! Environment-variable interpolation for build spec fields.
//!
//! Values such as a version string may reference the process environment so a
//! CI job can inject them without editing the build file.
//!
//! # Reference Formats
//!
//! - `${NAME}` - value of environment variable `NAME`
//! - `$NAME` - same, where `NAME` is `[A-Za-z_][A-Za-z0-9_]*`
//!
//! # Escaping
//!
//! `$$` produces a literal `$`. A `$` followed by anything that cannot start a
//! name passes through unchanged.
//!
//! # Example
//!
//! ```
//! use boxpack_lib::build::env::interpolate_with;
//!
//! let lookup = |name: &str| (name == "BUILD_NUMBER").then(|| "42".to_string());
//! assert_eq!(interpolate_with("1.0.${BUILD_NUMBER}", lookup).unwrap(), "1.0.42");
//! ```

use thiserror::Error;

/// Errors from resolving environment references.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvError {
  #[error("environment variable '{0}' is not set")]
  MissingVariable(String),

  #[error("unclosed variable reference at position {0}")]
  Unclosed(usize),

  #[error("invalid variable name '{0}'")]
  InvalidName(String),
}

/// Resolve references against the current process environment.
pub fn interpolate(input: &str) -> Result<String, EnvError> {
  interpolate_with(input, |name| std::env::var(name).ok())
}

/// Resolve references with a caller-supplied lookup.
///
/// # Errors
///
/// Returns [`EnvError::MissingVariable`] naming the first reference the lookup
/// cannot resolve.
pub fn interpolate_with<F>(input: &str, lookup: F) -> Result<String, EnvError>
where
  F: Fn(&str) -> Option<String>,
{
  let mut output = String::with_capacity(input.len());
  let mut chars = input.char_indices().peekable();

  while let Some((pos, ch)) = chars.next() {
    if ch != '$' {
      output.push(ch);
      continue;
    }

    match chars.peek() {
      Some((_, '$')) => {
        chars.next();
        output.push('$');
      }
      Some((_, '{')) => {
        chars.next();

        let mut name = String::new();
        let mut found_close = false;
        for (_, c) in chars.by_ref() {
          if c == '}' {
            found_close = true;
            break;
          }
          name.push(c);
        }

        if !found_close {
          return Err(EnvError::Unclosed(pos));
        }
        if !is_valid_name(&name) {
          return Err(EnvError::InvalidName(name));
        }

        output.push_str(&resolve(&name, &lookup)?);
      }
      Some((_, c)) if c.is_ascii_alphabetic() || *c == '_' => {
        let mut name = String::new();
        while let Some((_, c)) = chars.peek() {
          if c.is_ascii_alphanumeric() || *c == '_' {
            name.push(*c);
            chars.next();
          } else {
            break;
          }
        }

        output.push_str(&resolve(&name, &lookup)?);
      }
      _ => output.push('$'),
    }
  }

  Ok(output)
}

fn resolve<F>(name: &str, lookup: &F) -> Result<String, EnvError>
where
  F: Fn(&str) -> Option<String>,
{
  lookup(name).ok_or_else(|| EnvError::MissingVariable(name.to_string()))
}

fn is_valid_name(name: &str) -> bool {
  let mut chars = name.chars();
  match chars.next() {
    Some(c) if c.is_ascii_alphabetic() || c == '_' => chars.all(|c| c.is_ascii_alphanumeric() || c == '_'),
    _ => false,
  }
}
