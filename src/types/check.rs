//! Checks to run and the results the pipeline produces.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// One command to run against the checkout.
///
/// Checks are run one after the other, in configuration order, from the root
/// of the checkout (or `dir` below it).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Check {
    /// Argument vector; the first element is the program.
    pub command: Vec<String>,

    /// `KEY=VALUE` overlays applied on top of the job environment.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,

    /// Directory to run from, relative to the checkout root.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub dir: String,
}

impl Check {
    pub fn new<I, S>(command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Check {
            command: command.into_iter().map(Into::into).collect(),
            env: Vec::new(),
            dir: String::new(),
        }
    }

    pub fn with_env(mut self, env: impl Into<String>) -> Self {
        self.env.push(env.into());
        self
    }

    pub fn with_dir(mut self, dir: impl Into<String>) -> Self {
        self.dir = dir.into();
        self
    }

    /// Command line as shown to users: overlays first, then the arguments.
    pub fn display(&self) -> String {
        self.env
            .iter()
            .chain(self.command.iter())
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Name of the `index`-th check (1-based) out of `total`.
///
/// Zero-padded to the width of `total` so names sort in run order.
pub fn check_name(index: usize, total: usize) -> String {
    let width = total.to_string().len();
    format!("cmd{index:0width$}")
}

/// Output of one pipeline phase or check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepResult {
    /// Display name, also the key of the note file.
    pub name: String,
    /// Captured text.
    pub content: String,
    pub success: bool,
    pub elapsed: Duration,
}

impl StepResult {
    pub fn new(
        name: impl Into<String>,
        content: impl Into<String>,
        success: bool,
        elapsed: Duration,
    ) -> Self {
        StepResult {
            name: name.into(),
            content: content.into(),
            success,
            elapsed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn check_name_pads_to_total_width() {
        assert_eq!(check_name(1, 3), "cmd1");
        assert_eq!(check_name(1, 11), "cmd01");
        assert_eq!(check_name(11, 11), "cmd11");
        assert_eq!(check_name(7, 100), "cmd007");
    }

    proptest! {
        #[test]
        fn check_names_sort_in_run_order(total in 1usize..2000, a in 1usize..2000, b in 1usize..2000) {
            let a = a.min(total);
            let b = b.min(total);
            prop_assert_eq!(check_name(a, total).cmp(&check_name(b, total)), a.cmp(&b));
        }
    }

    #[test]
    fn display_puts_overlays_first() {
        let check = Check::new(["go", "test", "./..."]).with_env("CGO_ENABLED=0");
        assert_eq!(check.display(), "CGO_ENABLED=0 go test ./...");
    }

    #[test]
    fn check_deserializes_with_defaults() {
        let check: Check = serde_yaml::from_str("command: [make, test]").unwrap();
        assert_eq!(check, Check::new(["make", "test"]));

        let check: Check =
            serde_yaml::from_str("command: [make]\nenv: [A=1]\ndir: sub/dir").unwrap();
        assert_eq!(check.env, vec!["A=1".to_string()]);
        assert_eq!(check.dir, "sub/dir");
    }
}
