//! Pure swarm graph validation and scheduling: `Request -> Plan | Error`,
//! kept free of any runtime dependency so a request can be validated before
//! it is persisted, independent of execution.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use praktor_persistence::{SwarmEdge, SwarmNode};

use super::error::SwarmError;

/// One collaborative cluster: roles grouped by a `bidirectional=true` edge,
/// sharing the chat topic `swarm.<id>.chat`.
pub type Cluster = Vec<String>;

#[derive(Clone, Debug, PartialEq)]
pub struct Plan {
    pub lead: String,
    /// Execution order: each wave's roles start concurrently once every
    /// role in every earlier wave has finished. The lead's role is always
    /// the sole member of the final wave.
    pub waves: Vec<Vec<String>>,
    /// role -> roles whose final output is appended as context to its
    /// prompt before it starts (directed, non-cluster edges; the lead's
    /// entry is every other role, per the "runs last" rule).
    pub depends_on: HashMap<String, Vec<String>>,
    /// Collaborative clusters (possibly empty), each sharing a chat topic.
    pub clusters: Vec<Cluster>,
}

/// Builds and validates an execution [`Plan`] from a swarm request's raw
/// nodes/edges/lead. Contains no I/O: callers own persistence and dispatch.
pub fn build_plan(nodes: &[SwarmNode], edges: &[SwarmEdge], lead: &str) -> Result<Plan, SwarmError> {
    let roles: Vec<String> = nodes.iter().map(|n| n.role.clone()).collect();
    let role_set: HashSet<&str> = roles.iter().map(String::as_str).collect();
    if role_set.len() != roles.len() {
        let mut seen = HashSet::new();
        for role in &roles {
            if !seen.insert(role.as_str()) {
                return Err(SwarmError::DuplicateRole(role.clone()));
            }
        }
    }

    for edge in edges {
        if !role_set.contains(edge.from_role.as_str()) {
            return Err(SwarmError::UnknownRole(edge.from_role.clone()));
        }
        if !role_set.contains(edge.to_role.as_str()) {
            return Err(SwarmError::UnknownRole(edge.to_role.clone()));
        }
    }

    let mut seen_pairs = HashSet::new();
    for edge in edges {
        let pair = (edge.from_role.clone(), edge.to_role.clone());
        if !seen_pairs.insert(pair.clone()) {
            return Err(SwarmError::DuplicateSynapse(edge.from_role.clone(), edge.to_role.clone()));
        }
    }

    if !role_set.contains(lead) {
        return Err(SwarmError::UnknownLead(lead.to_string()));
    }

    let directed: Vec<&SwarmEdge> = edges.iter().filter(|e| !e.bidirectional).collect();
    check_acyclic(&roles, &directed)?;

    let clusters = build_clusters(&roles, edges);
    let cluster_of: HashMap<&str, usize> = clusters
        .iter()
        .enumerate()
        .flat_map(|(i, members)| members.iter().map(move |r| (r.as_str(), i)))
        .collect();

    // depends_on: direct directed predecessors, excluding same-cluster pairs
    // (cluster peers share context through the chat topic, not prompt
    // augmentation) and excluding the lead, which is handled separately.
    let mut depends_on: HashMap<String, Vec<String>> = roles
        .iter()
        .filter(|r| r.as_str() != lead)
        .map(|r| (r.clone(), Vec::new()))
        .collect();
    for edge in &directed {
        if edge.to_role == lead {
            continue;
        }
        let same_cluster = match (cluster_of.get(edge.from_role.as_str()), cluster_of.get(edge.to_role.as_str())) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        };
        if same_cluster {
            continue;
        }
        depends_on.entry(edge.to_role.clone()).or_default().push(edge.from_role.clone());
    }
    for deps in depends_on.values_mut() {
        deps.sort();
    }
    depends_on.insert(
        lead.to_string(),
        roles.iter().filter(|r| r.as_str() != lead).cloned().collect::<BTreeSet<_>>().into_iter().collect(),
    );

    // Unit-level DAG for scheduling: a unit is a cluster index or a
    // standalone role, excluding the lead (it always runs in its own final
    // wave regardless of edges touching it).
    let mut unit_of: HashMap<&str, String> = HashMap::new();
    for role in &roles {
        if role.as_str() == lead {
            continue;
        }
        let unit = match cluster_of.get(role.as_str()) {
            Some(idx) => format!("cluster:{idx}"),
            None => format!("role:{role}"),
        };
        unit_of.insert(role.as_str(), unit);
    }

    let mut unit_members: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (role, unit) in &unit_of {
        unit_members.entry(unit.clone()).or_default().push((*role).to_string());
    }

    let mut unit_deps: BTreeMap<String, BTreeSet<String>> =
        unit_members.keys().map(|u| (u.clone(), BTreeSet::new())).collect();
    for edge in &directed {
        if edge.to_role == lead {
            continue;
        }
        let (Some(from_unit), Some(to_unit)) = (unit_of.get(edge.from_role.as_str()), unit_of.get(edge.to_role.as_str())) else {
            continue;
        };
        if from_unit != to_unit {
            unit_deps.get_mut(to_unit).unwrap().insert(from_unit.clone());
        }
    }

    let waves = topological_waves(unit_members, unit_deps)?;
    let mut waves: Vec<Vec<String>> = waves;
    if roles.iter().any(|r| r == lead) {
        waves.push(vec![lead.to_string()]);
    }

    Ok(Plan {
        lead: lead.to_string(),
        waves,
        depends_on,
        clusters,
    })
}

fn build_clusters(roles: &[String], edges: &[SwarmEdge]) -> Vec<Cluster> {
    let mut parent: HashMap<&str, &str> = roles.iter().map(|r| (r.as_str(), r.as_str())).collect();

    fn find<'a>(parent: &mut HashMap<&'a str, &'a str>, x: &'a str) -> &'a str {
        let mut root = x;
        while parent[root] != root {
            root = parent[root];
        }
        let mut cur = x;
        while parent[cur] != root {
            let next = parent[cur];
            parent.insert(cur, root);
            cur = next;
        }
        root
    }

    for edge in edges.iter().filter(|e| e.bidirectional) {
        let a = find(&mut parent, edge.from_role.as_str());
        let b = find(&mut parent, edge.to_role.as_str());
        if a != b {
            parent.insert(a, b);
        }
    }

    let mut groups: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    for role in roles {
        let root = find(&mut parent, role.as_str());
        groups.entry(root).or_default().push(role.clone());
    }

    groups.into_values().filter(|members| members.len() > 1).collect()
}

fn check_acyclic(roles: &[String], directed: &[&SwarmEdge]) -> Result<(), SwarmError> {
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    for edge in directed {
        adjacency.entry(edge.from_role.as_str()).or_default().push(edge.to_role.as_str());
    }

    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }
    let mut marks: HashMap<&str, Mark> = HashMap::new();

    fn visit<'a>(
        node: &'a str,
        adjacency: &HashMap<&'a str, Vec<&'a str>>,
        marks: &mut HashMap<&'a str, Mark>,
    ) -> Result<(), SwarmError> {
        match marks.get(node) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => return Err(SwarmError::Cycle),
            None => {}
        }
        marks.insert(node, Mark::Visiting);
        if let Some(neighbors) = adjacency.get(node) {
            for next in neighbors {
                visit(next, adjacency, marks)?;
            }
        }
        marks.insert(node, Mark::Done);
        Ok(())
    }

    for role in roles {
        visit(role.as_str(), &adjacency, &mut marks)?;
    }
    Ok(())
}

fn topological_waves(
    mut members: BTreeMap<String, Vec<String>>,
    mut deps: BTreeMap<String, BTreeSet<String>>,
) -> Result<Vec<Vec<String>>, SwarmError> {
    let mut waves = Vec::new();
    while !members.is_empty() {
        let ready: Vec<String> = deps
            .iter()
            .filter(|(_, d)| d.is_empty())
            .map(|(u, _)| u.clone())
            .collect();
        if ready.is_empty() {
            return Err(SwarmError::Cycle);
        }
        let mut wave_roles = Vec::new();
        for unit in &ready {
            wave_roles.extend(members.remove(unit).unwrap_or_default());
            deps.remove(unit);
        }
        wave_roles.sort();
        for d in deps.values_mut() {
            for unit in &ready {
                d.remove(unit);
            }
        }
        waves.push(wave_roles);
    }
    Ok(waves)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(role: &str) -> SwarmNode {
        SwarmNode {
            agent_id: role.to_string(),
            role: role.to_string(),
            prompt: format!("do {role} work"),
            workspace: None,
        }
    }

    fn edge(from: &str, to: &str, bidirectional: bool) -> SwarmEdge {
        SwarmEdge {
            from_role: from.to_string(),
            to_role: to.to_string(),
            bidirectional,
        }
    }

    #[test]
    fn rejects_duplicate_roles() {
        let nodes = vec![node("coder"), node("coder")];
        let err = build_plan(&nodes, &[], "coder").unwrap_err();
        assert!(matches!(err, SwarmError::DuplicateRole(_)));
    }

    #[test]
    fn rejects_unknown_synapse_endpoint() {
        let nodes = vec![node("coder")];
        let edges = vec![edge("coder", "ghost", false)];
        let err = build_plan(&nodes, &edges, "coder").unwrap_err();
        assert!(matches!(err, SwarmError::UnknownRole(_)));
    }

    #[test]
    fn rejects_unknown_lead() {
        let nodes = vec![node("coder")];
        let err = build_plan(&nodes, &[], "ghost").unwrap_err();
        assert!(matches!(err, SwarmError::UnknownLead(_)));
    }

    #[test]
    fn rejects_directed_cycle() {
        let nodes = vec![node("a"), node("b")];
        let edges = vec![edge("a", "b", false), edge("b", "a", false)];
        let err = build_plan(&nodes, &edges, "a").unwrap_err();
        assert!(matches!(err, SwarmError::Cycle));
    }

    #[test]
    fn nodes_with_no_edges_run_in_one_parallel_wave_before_the_lead() {
        let nodes = vec![node("a"), node("b"), node("lead")];
        let plan = build_plan(&nodes, &[], "lead").unwrap();
        assert_eq!(plan.waves, vec![vec!["a".to_string(), "b".to_string()], vec!["lead".to_string()]]);
    }

    #[test]
    fn s6_pipeline_runs_sequentially_with_lead_last() {
        let nodes = vec![node("researcher"), node("writer"), node("reviewer")];
        let edges = vec![edge("researcher", "writer", false), edge("writer", "reviewer", false)];
        let plan = build_plan(&nodes, &edges, "reviewer").unwrap();
        assert_eq!(
            plan.waves,
            vec![
                vec!["researcher".to_string()],
                vec!["writer".to_string()],
                vec!["reviewer".to_string()],
            ]
        );
        assert_eq!(plan.depends_on["writer"], vec!["researcher".to_string()]);
        assert_eq!(plan.depends_on["reviewer"], vec!["writer".to_string()]);
    }

    #[test]
    fn bidirectional_edges_form_a_collaborative_cluster_and_run_together() {
        let nodes = vec![node("a"), node("b"), node("lead")];
        let edges = vec![edge("a", "b", true)];
        let plan = build_plan(&nodes, &edges, "lead").unwrap();
        assert_eq!(plan.clusters, vec![vec!["a".to_string(), "b".to_string()]]);
        assert_eq!(plan.waves[0], vec!["a".to_string(), "b".to_string()]);
        assert!(plan.depends_on["a"].is_empty());
        assert!(plan.depends_on["b"].is_empty());
    }

    #[test]
    fn lead_depends_on_every_other_role_regardless_of_edges() {
        let nodes = vec![node("a"), node("b"), node("lead")];
        let plan = build_plan(&nodes, &[], "lead").unwrap();
        assert_eq!(plan.depends_on["lead"], vec!["a".to_string(), "b".to_string()]);
    }
}
