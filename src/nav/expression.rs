//! Dotted-expression extraction at a cursor position.
//!
//! From the line text, the maximal run of dotted-identifier syntax covering
//! the cursor is split into components, and the component the cursor sits on
//! is recorded. A match whose end equals the cursor character still covers
//! the cursor; a match ending strictly before it does not.

use std::sync::OnceLock;

use regex::Regex;

fn dotted_identifier() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"[A-Za-z_][A-Za-z_0-9]*(\.[A-Za-z_][A-Za-z_0-9]*)*")
            .expect("dotted identifier pattern is valid")
    })
}

/// A dotted expression under the cursor: its components and which one the
/// cursor selects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expression {
    components: Vec<String>,
    selected: usize,
}

impl Expression {
    pub fn new(components: Vec<String>, selected: usize) -> Self {
        debug_assert!(selected < components.len());
        Expression {
            components,
            selected,
        }
    }

    pub fn components(&self) -> &[String] {
        &self.components
    }

    /// Index of the component the cursor sits on.
    pub fn selected(&self) -> usize {
        self.selected
    }

    /// All components joined: `pkg.sub.Cls.PROP`.
    pub fn full_expression(&self) -> String {
        self.components.join(".")
    }

    /// Components up to and including the selected one.
    pub fn target_expression(&self) -> String {
        self.components[..=self.selected].join(".")
    }

    /// The selected component alone.
    pub fn unqualified_target(&self) -> &str {
        &self.components[self.selected]
    }

    /// The final component, regardless of the cursor.
    pub fn last_component(&self) -> &str {
        self.components.last().expect("expression is non-empty")
    }

    /// Whether the cursor is on the final component.
    pub fn selects_last(&self) -> bool {
        self.selected + 1 == self.components.len()
    }
}

/// Extract the dotted expression covering `character` (0-based) on `line`.
/// Returns `None` when no match spans the cursor.
pub fn extract_expression(line: &str, character: u32) -> Option<Expression> {
    let character = character as usize;
    for found in dotted_identifier().find_iter(line) {
        if found.start() > character {
            return None;
        }
        if character > found.end() {
            continue;
        }

        let components: Vec<String> = found.as_str().split('.').map(str::to_string).collect();
        let mut offset = found.start();
        let mut selected = components.len() - 1;
        for (i, component) in components.iter().enumerate() {
            if character <= offset + component.len() {
                selected = i;
                break;
            }
            offset += component.len() + 1;
        }
        return Some(Expression {
            components,
            selected,
        });
    }
    None
}
