//! Dependent restart planning.
//!
//! The reboot label on a monitored container lists, comma separated, the
//! names of the containers that must be restarted when its address moves.

use crate::container::ManagedContainer;
use crate::labels::Labels;

/// Ordered list of dependent container names parsed from a reboot label.
///
/// Order is preserved and duplicates are kept: `"a,b,a"` restarts `a`,
/// then `b`, then `a` again.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyDirective {
    names: Vec<String>,
}

impl DependencyDirective {
    /// Parse a raw label value.
    ///
    /// Entries are trimmed; entries left empty are dropped.
    pub fn parse(raw: &str) -> Self {
        let names = raw
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect();

        Self { names }
    }

    /// Read the directive from `labels[key]`; an absent label is empty.
    pub fn from_labels(labels: &Labels, key: &str) -> Self {
        labels.get(key).map(Self::parse).unwrap_or_default()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, String> {
        self.names.iter()
    }
}

impl<'a> IntoIterator for &'a DependencyDirective {
    type Item = &'a String;
    type IntoIter = std::slice::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Computes which dependents to restart for a drifted container.
#[derive(Debug, Clone)]
pub struct RemediationPlanner {
    reboot_label: String,
}

impl RemediationPlanner {
    /// Create a planner reading dependents from `reboot_label`.
    pub fn new(reboot_label: impl Into<String>) -> Self {
        Self {
            reboot_label: reboot_label.into(),
        }
    }

    pub fn reboot_label(&self) -> &str {
        &self.reboot_label
    }

    /// Plan the restarts for `container`.
    ///
    /// An empty plan is valid: drift observed, nothing to restart.
    pub fn plan(&self, container: &ManagedContainer) -> DependencyDirective {
        DependencyDirective::from_labels(&container.labels, &self.reboot_label)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("cache-1,cache-2", &["cache-1", "cache-2"])]
    #[case("svcA,svcB,svcA", &["svcA", "svcB", "svcA"])]
    #[case(" cache-1 , cache-2 ", &["cache-1", "cache-2"])]
    #[case("cache-1,,cache-2,", &["cache-1", "cache-2"])]
    #[case("", &[])]
    #[case(" , ", &[])]
    fn test_parse_directive(#[case] raw: &str, #[case] expected: &[&str]) {
        let directive = DependencyDirective::parse(raw);
        let names: Vec<&str> = directive.iter().map(String::as_str).collect();
        assert_eq!(names, expected);
    }

    #[test]
    fn test_plan_without_label_is_empty() {
        let planner = RemediationPlanner::new("watch.reboot");
        let container = ManagedContainer::new("1i1", "web-1").with_label("other", "x");

        assert!(planner.plan(&container).is_empty());
    }

    #[test]
    fn test_plan_reads_configured_label() {
        let planner = RemediationPlanner::new("watch.reboot");
        let container =
            ManagedContainer::new("1i1", "web-1").with_label("watch.reboot", "cache-1,cache-2");

        let plan = planner.plan(&container);
        assert_eq!(plan.len(), 2);
        assert_eq!(plan.names()[0], "cache-1");
        assert_eq!(plan.names()[1], "cache-2");
    }
}
