use std::collections::BTreeSet;

use crate::resolve::Resolution;

/// Render the discovered dependency graph as an indented tree, one block per
/// root. Walked with an explicit stack so deep graphs cannot overflow.
#[must_use]
pub fn render_tree(resolution: &Resolution) -> String {
    let mut lines = Vec::new();
    let mut expanded: BTreeSet<&str> = BTreeSet::new();

    for root in &resolution.roots {
        let mut path: Vec<&str> = Vec::new();
        let mut stack: Vec<(&str, usize)> = vec![(root.as_str(), 0)];
        while let Some((name, depth)) = stack.pop() {
            path.truncate(depth);
            let indent = "  ".repeat(depth);
            let Some(package) = resolution.packages.get(name) else {
                lines.push(format!("{indent}└── {name} (unresolved)"));
                continue;
            };
            let label = format!("{name}=={}", package.version);
            if path.contains(&name) {
                lines.push(format!("{indent}└── {label} (circular reference)"));
                continue;
            }
            if !expanded.insert(name) {
                lines.push(format!("{indent}└── {label} (already shown)"));
                continue;
            }
            lines.push(format!("{indent}└── {label}"));
            path.push(name);
            if let Some(children) = resolution.edges.get(name) {
                for child in children.iter().rev() {
                    stack.push((child.as_str(), depth + 1));
                }
            }
        }
    }

    lines.join("\n")
}
