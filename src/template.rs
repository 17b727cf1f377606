// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Template rendering.
//!
//! Dotsmith expands `.tmpl` source entries through a small action language
//! before they ever touch the target tree. Actions are delimited by
//! `{{ ... }}` and evaluate against the immutable [`RenderContext`] built at
//! startup.
//!
//! # Language
//!
//! - Interpolation: `{{ .hostname }}`, nested paths `{{ .os_release.id }}`.
//!   The leading dot is optional.
//! - Conditionals: `{{ if .os == "linux" }} ... {{ else }} ... {{ end }}`
//!   with `==`, `!=`, `not`, `and`, `or`.
//! - Iteration: `{{ for pkg in .packages }}{{ pkg }}{{ end }}` binding a
//!   loop variable that shadows the context.
//! - Filters: `{{ .packages | join " " }}`, plus `upper`, `lower`, `trim`.
//!
//! # Determinism
//!
//! Rendering is a pure function of template text and context. This matters
//! beyond reproducibility: run-onchange scripts are gated by the hash of
//! their rendered content, so any nondeterminism here would re-trigger
//! scripts at random.
//!
//! # Failure Mode
//!
//! An unresolved variable reference fails the render with an error naming
//! the template and the variable. It is never silently replaced with an
//! empty string, because a blank where a hostname should be is the kind of
//! misconfiguration nobody notices until much later.

pub mod lexer;
pub mod parser;

use crate::{
    context::{RenderContext, Value},
    template::parser::{Expr, Node},
};

/// Template renderer bound to one render context.
#[derive(Clone, Debug)]
pub struct Renderer<'ctx> {
    context: &'ctx RenderContext,
}

impl<'ctx> Renderer<'ctx> {
    /// Construct new renderer over a context.
    pub fn new(context: &'ctx RenderContext) -> Self {
        Self { context }
    }

    /// Expand template text into its final form.
    ///
    /// The `name` identifies the template in error messages; callers pass
    /// the source-relative path of the entry being rendered.
    ///
    /// # Errors
    ///
    /// - Return [`RenderError`] wrapping the lex, parse, or evaluation
    ///   failure together with the template name.
    pub fn render(&self, name: impl Into<String>, source: &str) -> Result<String> {
        let name = name.into();
        let wrap = |kind: RenderErrorKind| RenderError {
            template: name.clone(),
            kind,
        };

        let segments = lexer::lex(source).map_err(|err| wrap(err.into()))?;
        let nodes = parser::parse(segments).map_err(|err| wrap(err.into()))?;

        let mut output = String::new();
        let mut scopes = Vec::new();
        self.eval_nodes(&nodes, &mut scopes, &mut output)
            .map_err(wrap)?;

        Ok(output)
    }

    fn eval_nodes(
        &self,
        nodes: &[Node],
        scopes: &mut Vec<(String, Value)>,
        output: &mut String,
    ) -> Result<(), RenderErrorKind> {
        for node in nodes {
            match node {
                Node::Text(text) => output.push_str(text),
                Node::Output(expr) => {
                    let value = self.eval_expr(expr, scopes)?;
                    let text = value
                        .as_text()
                        .ok_or_else(|| RenderErrorKind::Unprintable {
                            type_name: value.type_name(),
                        })?;
                    output.push_str(&text);
                }
                Node::If {
                    cond,
                    then,
                    otherwise,
                } => {
                    let value = self.eval_expr(cond, scopes)?;
                    let Value::Bool(truth) = value else {
                        return Err(RenderErrorKind::NonBooleanCondition {
                            type_name: value.type_name(),
                        });
                    };

                    let branch = if truth { then } else { otherwise };
                    self.eval_nodes(branch, scopes, output)?;
                }
                Node::For { var, list, body } => {
                    let value = self.eval_expr(list, scopes)?;
                    let Value::List(items) = value else {
                        return Err(RenderErrorKind::NonListIteration {
                            type_name: value.type_name(),
                        });
                    };

                    for item in items {
                        scopes.push((var.clone(), item));
                        let result = self.eval_nodes(body, scopes, output);
                        scopes.pop();
                        result?;
                    }
                }
            }
        }

        Ok(())
    }

    fn eval_expr(
        &self,
        expr: &Expr,
        scopes: &[(String, Value)],
    ) -> Result<Value, RenderErrorKind> {
        match expr {
            Expr::Str(literal) => Ok(Value::String(literal.clone())),
            Expr::Int(value) => Ok(Value::Integer(*value)),
            Expr::Bool(value) => Ok(Value::Bool(*value)),
            Expr::Var(path) => self.resolve_var(path, scopes),
            Expr::Not(inner) => {
                let value = self.eval_expr(inner, scopes)?;
                let Value::Bool(truth) = value else {
                    return Err(RenderErrorKind::NonBooleanCondition {
                        type_name: value.type_name(),
                    });
                };
                Ok(Value::Bool(!truth))
            }
            Expr::And(left, right) => {
                // INVARIANT: Short-circuit, so the right side may reference
                // variables that only exist when the left side holds.
                match self.eval_bool(left, scopes)? {
                    false => Ok(Value::Bool(false)),
                    true => Ok(Value::Bool(self.eval_bool(right, scopes)?)),
                }
            }
            Expr::Or(left, right) => match self.eval_bool(left, scopes)? {
                true => Ok(Value::Bool(true)),
                false => Ok(Value::Bool(self.eval_bool(right, scopes)?)),
            },
            Expr::Eq(left, right) => Ok(Value::Bool(
                self.eval_expr(left, scopes)? == self.eval_expr(right, scopes)?,
            )),
            Expr::Ne(left, right) => Ok(Value::Bool(
                self.eval_expr(left, scopes)? != self.eval_expr(right, scopes)?,
            )),
            Expr::Filter { input, name, arg } => {
                let input = self.eval_expr(input, scopes)?;
                let arg = match arg {
                    Some(expr) => Some(self.eval_expr(expr, scopes)?),
                    None => None,
                };
                apply_filter(name, input, arg)
            }
        }
    }

    fn eval_bool(
        &self,
        expr: &Expr,
        scopes: &[(String, Value)],
    ) -> Result<bool, RenderErrorKind> {
        let value = self.eval_expr(expr, scopes)?;
        match value {
            Value::Bool(truth) => Ok(truth),
            other => Err(RenderErrorKind::NonBooleanCondition {
                type_name: other.type_name(),
            }),
        }
    }

    fn resolve_var(
        &self,
        path: &[String],
        scopes: &[(String, Value)],
    ) -> Result<Value, RenderErrorKind> {
        let undefined = || RenderErrorKind::UndefinedVariable {
            variable: path.join("."),
        };

        let (first, rest) = path.split_first().ok_or_else(undefined)?;

        // INVARIANT: Innermost loop binding shadows outer bindings and the
        // context root alike.
        if let Some((_, value)) = scopes.iter().rev().find(|(name, _)| name == first) {
            return value.lookup(rest).cloned().ok_or_else(undefined);
        }

        self.context.get_path(path).cloned().ok_or_else(undefined)
    }
}

fn apply_filter(
    name: &str,
    input: Value,
    arg: Option<Value>,
) -> Result<Value, RenderErrorKind> {
    match name {
        "join" => {
            let Value::List(items) = input else {
                return Err(RenderErrorKind::FilterType {
                    name: name.to_string(),
                    message: format!("expected a list, got {}", input.type_name()),
                });
            };

            let separator = match arg {
                Some(value) => value.as_text().ok_or_else(|| RenderErrorKind::FilterType {
                    name: name.to_string(),
                    message: "separator has no text form".to_string(),
                })?,
                None => String::new(),
            };

            let mut parts = Vec::with_capacity(items.len());
            for item in &items {
                parts.push(item.as_text().ok_or_else(|| RenderErrorKind::FilterType {
                    name: name.to_string(),
                    message: format!("cannot join {} element", item.type_name()),
                })?);
            }

            Ok(Value::String(parts.join(&separator)))
        }
        "upper" | "lower" | "trim" => {
            let text = input.as_text().ok_or_else(|| RenderErrorKind::FilterType {
                name: name.to_string(),
                message: format!("expected text, got {}", input.type_name()),
            })?;

            let result = match name {
                "upper" => text.to_uppercase(),
                "lower" => text.to_lowercase(),
                _ => text.trim().to_string(),
            };

            Ok(Value::String(result))
        }
        _ => Err(RenderErrorKind::UnknownFilter {
            name: name.to_string(),
        }),
    }
}

/// Render failure for one template.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
#[error("template {template:?}: {kind}")]
pub struct RenderError {
    /// Source-relative path of the template that failed.
    pub template: String,

    /// What actually went wrong.
    pub kind: RenderErrorKind,
}

/// Render error types.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum RenderErrorKind {
    /// Tokenization failed.
    #[error(transparent)]
    Lex(#[from] lexer::LexError),

    /// Parsing failed.
    #[error(transparent)]
    Parse(#[from] parser::ParseError),

    /// A variable reference resolved to nothing.
    #[error("undefined variable {variable:?}")]
    UndefinedVariable { variable: String },

    /// Interpolated value has no scalar text form.
    #[error("cannot interpolate {type_name} value")]
    Unprintable { type_name: &'static str },

    /// Condition evaluated to something other than a boolean.
    #[error("condition must be a boolean, got {type_name}")]
    NonBooleanCondition { type_name: &'static str },

    /// Iteration over something other than a list.
    #[error("cannot iterate over {type_name} value")]
    NonListIteration { type_name: &'static str },

    /// Filter name matched nothing.
    #[error("unknown filter {name:?}")]
    UnknownFilter { name: String },

    /// Filter applied to an incompatible value.
    #[error("filter {name:?}: {message}")]
    FilterType { name: String, message: String },
}

/// Friendly result alias :3
type Result<T, E = RenderError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;

    fn context() -> RenderContext {
        let mut os_release = BTreeMap::new();
        os_release.insert("id".to_string(), Value::String("arch".into()));

        RenderContext::from_values([
            ("hostname".to_string(), Value::String("laptop1".into())),
            ("os".to_string(), Value::String("linux".into())),
            ("full".to_string(), Value::Bool(true)),
            (
                "packages".to_string(),
                Value::List(vec![
                    Value::String("git".into()),
                    Value::String("tmux".into()),
                ]),
            ),
            ("os_release".to_string(), Value::Map(os_release)),
        ])
    }

    #[test]
    fn render_variable_substitution() {
        let context = context();
        let result = Renderer::new(&context)
            .render("ssh/config.tmpl", "Host {{ .hostname }}")
            .unwrap();

        assert_eq!(result, "Host laptop1");
    }

    #[test]
    fn render_nested_path() {
        let context = context();
        let result = Renderer::new(&context)
            .render("t", "{{ .os_release.id }}")
            .unwrap();

        assert_eq!(result, "arch");
    }

    #[test]
    fn render_if_else_branches() {
        let context = context();
        let renderer = Renderer::new(&context);

        let result = renderer
            .render("t", r#"{{ if .os == "linux" }}pacman{{ else }}brew{{ end }}"#)
            .unwrap();
        assert_eq!(result, "pacman");

        let result = renderer
            .render("t", r#"{{ if .os == "darwin" }}brew{{ else }}pacman{{ end }}"#)
            .unwrap();
        assert_eq!(result, "pacman");
    }

    #[test]
    fn render_for_loop_binds_variable() {
        let context = context();
        let result = Renderer::new(&context)
            .render("t", "{{ for pkg in .packages }}[{{ pkg }}]{{ end }}")
            .unwrap();

        assert_eq!(result, "[git][tmux]");
    }

    #[test]
    fn render_join_filter() {
        let context = context();
        let result = Renderer::new(&context)
            .render("t", r#"install {{ .packages | join " " }}"#)
            .unwrap();

        assert_eq!(result, "install git tmux");
    }

    #[test]
    fn render_filter_chain() {
        let context = context();
        let result = Renderer::new(&context)
            .render("t", r#"{{ .hostname | upper }}"#)
            .unwrap();

        assert_eq!(result, "LAPTOP1");
    }

    #[test]
    fn render_undefined_variable_names_template_and_variable() {
        let context = context();
        let result = Renderer::new(&context).render("shell/rc.tmpl", "{{ .missing.key }}");

        let expect = Err(RenderError {
            template: "shell/rc.tmpl".to_string(),
            kind: RenderErrorKind::UndefinedVariable {
                variable: "missing.key".to_string(),
            },
        });

        assert_eq!(result, expect);
    }

    #[test]
    fn render_is_deterministic() {
        let context = context();
        let renderer = Renderer::new(&context);
        let source = "{{ for pkg in .packages }}{{ pkg }}|{{ end }}{{ .hostname }}";

        let first = renderer.render("t", source).unwrap();
        let second = renderer.render("t", source).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn render_loop_variable_shadows_context() {
        let context = RenderContext::from_values([
            ("pkg".to_string(), Value::String("outer".into())),
            (
                "packages".to_string(),
                Value::List(vec![Value::String("inner".into())]),
            ),
        ]);

        let result = Renderer::new(&context)
            .render("t", "{{ pkg }}{{ for pkg in .packages }}-{{ pkg }}{{ end }}-{{ pkg }}")
            .unwrap();

        assert_eq!(result, "outer-inner-outer");
    }

    #[test]
    fn render_non_boolean_condition_fails() {
        let context = context();
        let result = Renderer::new(&context).render("t", "{{ if .hostname }}x{{ end }}");

        assert_eq!(
            result.unwrap_err().kind,
            RenderErrorKind::NonBooleanCondition { type_name: "string" }
        );
    }

    #[test]
    fn render_unknown_filter_fails() {
        let context = context();
        let result = Renderer::new(&context).render("t", "{{ .hostname | sparkle }}");

        assert_eq!(
            result.unwrap_err().kind,
            RenderErrorKind::UnknownFilter {
                name: "sparkle".to_string()
            }
        );
    }
}
