//! Service start ordering.
//!
//! Produces a deterministic order from `depends_on` using iterative
//! relaxation: every pass places the services whose dependencies are already
//! placed, iterating in document order. When a pass makes no progress the
//! remaining services form a dependency cycle; they are appended in document
//! order so a misdeclared stack still starts instead of deadlocking.

use std::collections::HashSet;

use tracing::warn;

use crate::model::Project;

/// Returns the service names in start order.
pub fn start_order(project: &Project) -> Vec<String> {
    let total = project.services.len();
    let mut placed: HashSet<&str> = HashSet::with_capacity(total);
    let mut order: Vec<String> = Vec::with_capacity(total);

    while order.len() < total {
        let mut progress = false;
        for (name, service) in &project.services {
            if placed.contains(name.as_str()) {
                continue;
            }
            let satisfied = service
                .depends_on
                .iter()
                .all(|dep| placed.contains(dep.as_str()));
            if satisfied {
                placed.insert(name);
                order.push(name.clone());
                progress = true;
            }
        }

        if !progress {
            let remaining: Vec<String> = project
                .services
                .keys()
                .filter(|name| !placed.contains(name.as_str()))
                .cloned()
                .collect();
            warn!(
                services = ?remaining,
                "dependency cycle detected, starting remaining services in document order"
            );
            order.extend(remaining);
            break;
        }
    }

    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::parse_project;
    use std::collections::HashMap;
    use std::path::Path;

    fn project_from(yaml: &str) -> crate::model::Project {
        parse_project(yaml, "test", Path::new("/work"), &HashMap::new()).unwrap()
    }

    #[test]
    fn dependencies_start_first() {
        let project = project_from(
            r#"
services:
  web:
    image: nginx
    depends_on: [api]
  api:
    image: node
    depends_on: [db]
  db:
    image: postgres
"#,
        );
        let order = start_order(&project);
        let pos = |name: &str| order.iter().position(|s| s == name).unwrap();
        assert!(pos("db") < pos("api"));
        assert!(pos("api") < pos("web"));
        assert_eq!(order.len(), 3);
    }

    #[test]
    fn diamond_is_stable() {
        let project = project_from(
            r#"
services:
  base:
    image: img
  left:
    image: img
    depends_on: [base]
  right:
    image: img
    depends_on: [base]
  top:
    image: img
    depends_on: [left, right]
"#,
        );
        let order = start_order(&project);
        // Independent services keep document order within a pass.
        assert_eq!(order, vec!["base", "left", "right", "top"]);
    }

    #[test]
    fn cycle_falls_back_to_document_order() {
        let project = project_from(
            r#"
services:
  a:
    image: img
    depends_on: [b]
  b:
    image: img
    depends_on: [a]
  standalone:
    image: img
"#,
        );
        let order = start_order(&project);
        // The acyclic service starts first; the cycle is appended as declared.
        assert_eq!(order, vec!["standalone", "a", "b"]);
    }

    #[test]
    fn empty_project_yields_empty_order() {
        let project = project_from("services: {}\n");
        assert!(start_order(&project).is_empty());
    }
}
