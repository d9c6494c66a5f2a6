//! Expectations composed of other expectations.

use super::report::Report;
use super::{Expectation, PredicateOptions, Renderer};
use crate::fact::Fact;

/// A composite expectation was built with no children.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{name}() must be called with at least one expectation")]
pub struct EmptyCompositeError {
    pub name: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    All,
    Any,
    None,
}

struct Composite {
    mode: Mode,
    criteria: String,
    children: Vec<Box<dyn Expectation>>,
    ok: bool,
}

fn build(
    name: &'static str,
    mode: Mode,
    mut children: Vec<Box<dyn Expectation>>,
) -> Result<Box<dyn Expectation>, EmptyCompositeError> {
    if children.is_empty() {
        return Err(EmptyCompositeError { name });
    }
    if children.len() == 1 && mode != Mode::None {
        return Ok(children.remove(0));
    }
    let criteria = match mode {
        Mode::All => "all of".to_string(),
        Mode::Any => "any of".to_string(),
        Mode::None => "none of".to_string(),
    };
    Ok(Box::new(Composite {
        mode,
        criteria,
        children,
        ok: false,
    }))
}

/// Passes when every child passes.
pub fn try_all_of(
    children: Vec<Box<dyn Expectation>>,
) -> Result<Box<dyn Expectation>, EmptyCompositeError> {
    build("all_of", Mode::All, children)
}

/// Passes when at least one child passes.
pub fn try_any_of(
    children: Vec<Box<dyn Expectation>>,
) -> Result<Box<dyn Expectation>, EmptyCompositeError> {
    build("any_of", Mode::Any, children)
}

/// Passes when no child passes.
pub fn try_none_of(
    children: Vec<Box<dyn Expectation>>,
) -> Result<Box<dyn Expectation>, EmptyCompositeError> {
    build("none_of", Mode::None, children)
}

/// Like [`try_all_of`], panicking when `children` is empty.
pub fn all_of(children: Vec<Box<dyn Expectation>>) -> Box<dyn Expectation> {
    try_all_of(children).unwrap_or_else(|err| panic!("{err}"))
}

/// Like [`try_any_of`], panicking when `children` is empty.
pub fn any_of(children: Vec<Box<dyn Expectation>>) -> Box<dyn Expectation> {
    try_any_of(children).unwrap_or_else(|err| panic!("{err}"))
}

/// Like [`try_none_of`], panicking when `children` is empty.
pub fn none_of(children: Vec<Box<dyn Expectation>>) -> Box<dyn Expectation> {
    try_none_of(children).unwrap_or_else(|err| panic!("{err}"))
}

/// Passes when each of the `n` expectations built by `f` passes.
///
/// `f` is called with indexes `0..n`. Panics when `n` is zero.
pub fn to_repeatedly(
    description: impl Into<String>,
    n: usize,
    f: impl Fn(usize) -> Box<dyn Expectation>,
) -> Box<dyn Expectation> {
    assert!(n > 0, "to_repeatedly() must be called with n > 0");
    Box::new(Composite {
        mode: Mode::All,
        criteria: description.into(),
        children: (0..n).map(f).collect(),
        ok: false,
    })
}

impl Expectation for Composite {
    fn caption(&self) -> String {
        self.criteria.clone()
    }

    fn begin(&mut self, options: &PredicateOptions) {
        self.ok = false;
        for child in &mut self.children {
            child.begin(options);
        }
    }

    fn notify(&mut self, fact: &Fact) {
        for child in &mut self.children {
            child.notify(fact);
        }
    }

    fn end(&mut self) {
        for child in &mut self.children {
            child.end();
        }
        let passed = self.children.iter().filter(|c| c.ok()).count();
        self.ok = match self.mode {
            Mode::All => passed == self.children.len(),
            Mode::Any => passed > 0,
            Mode::None => passed == 0,
        };
    }

    fn ok(&self) -> bool {
        self.ok
    }

    fn build_report(&self, tree_ok: bool, renderer: &dyn Renderer) -> Report {
        let total = self.children.len();
        let passed = self.children.iter().filter(|c| c.ok()).count();
        let failed = total - passed;

        let outcome = match (self.mode, self.ok) {
            (Mode::All, true) | (Mode::Any, true) if passed == total => {
                format!("all {total} of the sub-assertions passed")
            }
            (Mode::Any, true) => format!("{passed} of the {total} sub-assertions passed"),
            (Mode::All, _) | (Mode::Any, _) if passed == 0 => {
                "none of the sub-assertions passed".to_string()
            }
            (Mode::All, _) => format!("{failed} of the {total} sub-assertions failed"),
            (Mode::Any, _) => "none of the sub-assertions passed".to_string(),
            (Mode::None, true) => "none of the sub-assertions passed".to_string(),
            (Mode::None, false) if passed == 1 && total == 1 => {
                "the sub-assertion passed unexpectedly".to_string()
            }
            (Mode::None, false) => {
                format!("{passed} of the {total} sub-assertions passed unexpectedly")
            }
        };

        let mut report = Report::new(tree_ok, self.ok, self.criteria.clone()).with_outcome(outcome);
        for child in &self.children {
            report.append(child.build_report(tree_ok, renderer));
        }
        report
    }
}
