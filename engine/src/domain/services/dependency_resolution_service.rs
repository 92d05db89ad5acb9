//! Dependency ordering for service startup

use crate::domain::value_objects::ServiceConfig;
use std::collections::{HashMap, HashSet, VecDeque};

/// Result of ordering a set of services
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StartOrder {
    /// Every service after all of its known dependencies
    pub ordered: Vec<String>,
    /// Services caught in a dependency cycle, in registration order
    pub cyclic: Vec<String>,
    /// `(service, dependency)` pairs naming a dependency that is not registered
    pub missing: Vec<(String, String)>,
}

pub struct DependencyResolutionService;

impl DependencyResolutionService {
    /// Topological start order (Kahn), ties broken by registration order
    ///
    /// Unknown dependencies do not affect the order; they are listed in
    /// `missing`. Cycles are not resolved: their members land in `cyclic`.
    pub fn compute_start_order(configs: &[&ServiceConfig]) -> StartOrder {
        let position: HashMap<&str, usize> = configs
            .iter()
            .enumerate()
            .map(|(i, c)| (c.name.as_str(), i))
            .collect();

        let mut in_degree = vec![0usize; configs.len()];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); configs.len()];
        let mut missing = Vec::new();

        for (i, config) in configs.iter().enumerate() {
            let mut seen = HashSet::new();
            for dep in &config.depends_on {
                match position.get(dep.as_str()) {
                    Some(&j) => {
                        if seen.insert(j) {
                            in_degree[i] += 1;
                            dependents[j].push(i);
                        }
                    }
                    None => missing.push((config.name.clone(), dep.clone())),
                }
            }
        }

        let mut queue: VecDeque<usize> = (0..configs.len()).filter(|&i| in_degree[i] == 0).collect();
        let mut ordered = Vec::with_capacity(configs.len());
        let mut placed = vec![false; configs.len()];

        while let Some(i) = queue.pop_front() {
            placed[i] = true;
            ordered.push(configs[i].name.clone());

            let mut ready = Vec::new();
            for &k in &dependents[i] {
                in_degree[k] -= 1;
                if in_degree[k] == 0 {
                    ready.push(k);
                }
            }
            ready.sort_unstable();
            queue.extend(ready);
        }

        let cyclic = (0..configs.len())
            .filter(|&i| !placed[i])
            .map(|i| configs[i].name.clone())
            .collect();

        StartOrder {
            ordered,
            cyclic,
            missing,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(name: &str, deps: &[&str]) -> ServiceConfig {
        let mut config = ServiceConfig::new(name, vec!["/bin/true".into()]);
        config.depends_on = deps.iter().map(|d| d.to_string()).collect();
        config
    }

    #[test]
    fn test_dependencies_come_first() {
        let web = service("web", &["api"]);
        let api = service("api", &["db", "cache"]);
        let db = service("db", &[]);
        let cache = service("cache", &[]);

        let order = DependencyResolutionService::compute_start_order(&[&web, &api, &db, &cache]);
        assert_eq!(order.ordered, vec!["db", "cache", "api", "web"]);
        assert!(order.cyclic.is_empty());
    }

    #[test]
    fn test_independent_services_keep_registration_order() {
        let a = service("a", &[]);
        let b = service("b", &[]);
        let c = service("c", &[]);
        let order = DependencyResolutionService::compute_start_order(&[&c, &a, &b]);
        assert_eq!(order.ordered, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_cycles_are_reported_not_resolved() {
        let a = service("a", &["b"]);
        let b = service("b", &["a"]);
        let c = service("c", &[]);
        let order = DependencyResolutionService::compute_start_order(&[&a, &b, &c]);
        assert_eq!(order.ordered, vec!["c"]);
        assert_eq!(order.cyclic, vec!["a", "b"]);
    }

    #[test]
    fn test_unknown_dependencies() {
        let api = service("api", &["db", "ghost"]);
        let db = service("db", &[]);

        let order = DependencyResolutionService::compute_start_order(&[&api, &db]);
        assert_eq!(order.ordered, vec!["db", "api"]);
        assert_eq!(order.missing, vec![("api".to_string(), "ghost".to_string())]);
    }
}
