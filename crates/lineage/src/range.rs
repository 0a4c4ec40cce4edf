//! Revision specifiers and range resolution.
//!
//! A specifier is `head`, `base`, a revision id or unique id prefix, or a
//! relative offset such as `+2` / `-1`. [`resolve_range`] turns an upper and
//! a lower specifier into the exact ordered list of revisions between them.

use std::fmt;
use std::str::FromStr;

use crate::error::{MigrateError, Result};
use crate::graph::RevisionGraph;
use crate::revision::Revision;

/// A parsed revision specifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevisionSpec {
    /// The single head.
    Head,
    /// Before the first revision.
    Base,
    /// `+N` / `-N`: a number of steps relative to the other end of a range.
    Relative(i64),
    /// A full id or a unique id prefix.
    Id(String),
}

impl RevisionSpec {
    /// Resolves an absolute specifier to a revision id (`None` for base).
    pub fn resolve<'a>(&self, graph: &'a RevisionGraph) -> Result<Option<&'a str>> {
        match self {
            Self::Head => graph.current_head(),
            Self::Base => Ok(None),
            Self::Id(token) => graph.lookup(token).map(|r| Some(r.id.as_str())),
            Self::Relative(_) => Err(MigrateError::InvalidRevisionSpec(self.to_string())),
        }
    }
}

impl FromStr for RevisionSpec {
    type Err = MigrateError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        match s {
            "" => Err(MigrateError::InvalidRevisionSpec(s.to_string())),
            "head" => Ok(Self::Head),
            "base" => Ok(Self::Base),
            _ if s.starts_with('+') || s.starts_with('-') => s
                .parse::<i64>()
                .map(Self::Relative)
                .map_err(|_| MigrateError::InvalidRevisionSpec(s.to_string())),
            _ => Ok(Self::Id(s.to_string())),
        }
    }
}

impl fmt::Display for RevisionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Head => f.write_str("head"),
            Self::Base => f.write_str("base"),
            Self::Relative(n) if *n >= 0 => write!(f, "+{n}"),
            Self::Relative(n) => write!(f, "{n}"),
            Self::Id(id) => f.write_str(id),
        }
    }
}

/// Revisions between two specifiers, ordered from `upper` down towards
/// `lower` (child before parent), excluding `lower` itself.
///
/// - absolute / absolute: the parent chain from `upper` to `lower`;
/// - relative upper (`+N`): the chain from `head` to `lower`, keeping the
///   last N entries, i.e. the N revisions directly above `lower`;
/// - relative lower (`-N`): the chain from `upper` to base, keeping the
///   first N entries, i.e. `upper` and the revisions directly below it.
///
/// A relative offset that runs past the end of its chain fails.
pub fn resolve_range<'a>(
    graph: &'a RevisionGraph,
    upper: &str,
    lower: &str,
) -> Result<Vec<&'a Revision>> {
    let upper: RevisionSpec = upper.parse()?;
    let lower: RevisionSpec = lower.parse()?;

    match (&upper, &lower) {
        (RevisionSpec::Relative(_), RevisionSpec::Relative(_)) => {
            Err(MigrateError::InvalidRevisionSpec(format!("{upper}:{lower}")))
        }
        (RevisionSpec::Relative(n), _) => {
            let wanted = offset(*n);
            let chain = graph.iterate_revisions(graph.current_head()?, lower.resolve(graph)?)?;
            let kept = chain[chain.len().saturating_sub(wanted)..].to_vec();
            check_count(&upper, wanted, kept)
        }
        (_, RevisionSpec::Relative(n)) => {
            let wanted = offset(*n);
            let chain = graph.iterate_revisions(upper.resolve(graph)?, None)?;
            let kept = chain.into_iter().take(wanted).collect();
            check_count(&lower, wanted, kept)
        }
        _ => graph.iterate_revisions(upper.resolve(graph)?, lower.resolve(graph)?),
    }
}

fn offset(n: i64) -> usize {
    usize::try_from(n.unsigned_abs()).unwrap_or(usize::MAX)
}

fn check_count<'a>(
    spec: &RevisionSpec,
    wanted: usize,
    kept: Vec<&'a Revision>,
) -> Result<Vec<&'a Revision>> {
    if kept.len() == wanted {
        Ok(kept)
    } else {
        Err(MigrateError::RelativeShortfall {
            spec: spec.to_string(),
            expected: wanted,
            actual: kept.len(),
        })
    }
}

/// Steps that take the database from `current` to `destination`, in the
/// order they must run (parent before child).
pub fn upgrade_plan<'a>(
    graph: &'a RevisionGraph,
    current: Option<&str>,
    destination: &str,
) -> Result<Vec<&'a Revision>> {
    let mut steps = resolve_range(graph, destination, current.unwrap_or("base"))?;
    steps.reverse();
    Ok(steps)
}

/// Steps whose downgrade takes the database from `current` back to
/// `destination`, in the order they must run (child before parent).
pub fn downgrade_plan<'a>(
    graph: &'a RevisionGraph,
    current: Option<&str>,
    destination: &str,
) -> Result<Vec<&'a Revision>> {
    resolve_range(graph, current.unwrap_or("base"), destination)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(n: usize) -> RevisionGraph {
        let ids: Vec<String> = (0..n).map(|i| format!("r{i}")).collect();
        RevisionGraph::build(
            ids.iter()
                .enumerate()
                .map(|(i, id)| Revision::new(id, i.checked_sub(1).map(|p| ids[p].as_str()))),
        )
    }

    fn ids(revisions: &[&Revision]) -> Vec<String> {
        revisions.iter().map(|r| r.id.clone()).collect()
    }

    #[test]
    fn test_parse_specs() {
        assert_eq!("head".parse::<RevisionSpec>().unwrap(), RevisionSpec::Head);
        assert_eq!("+2".parse::<RevisionSpec>().unwrap(), RevisionSpec::Relative(2));
        assert_eq!("-1".parse::<RevisionSpec>().unwrap(), RevisionSpec::Relative(-1));
        assert_eq!(
            "ae10".parse::<RevisionSpec>().unwrap(),
            RevisionSpec::Id("ae10".to_string())
        );
        assert!("+x".parse::<RevisionSpec>().is_err());
        assert!("".parse::<RevisionSpec>().is_err());
    }

    #[test]
    fn test_head_to_base() {
        let graph = RevisionGraph::build(vec![
            Revision::new("a", None),
            Revision::new("b", Some("a")),
            Revision::new("c", Some("b")),
        ]);
        let range = resolve_range(&graph, "head", "base").unwrap();
        assert_eq!(ids(&range), vec!["c", "b", "a"]);
    }

    #[test]
    fn test_relative_upper_takes_revisions_above_lower() {
        let graph = chain(5);
        let range = resolve_range(&graph, "+2", "r1").unwrap();
        assert_eq!(ids(&range), vec!["r3", "r2"]);

        let err = resolve_range(&graph, "+4", "r1").unwrap_err();
        assert!(matches!(
            err,
            MigrateError::RelativeShortfall {
                expected: 4,
                actual: 3,
                ..
            }
        ));
    }

    #[test]
    fn test_relative_lower_takes_revisions_below_upper() {
        let graph = chain(5);
        let range = resolve_range(&graph, "r3", "-2").unwrap();
        assert_eq!(ids(&range), vec!["r3", "r2"]);

        let range = resolve_range(&graph, "head", "+3").unwrap();
        assert_eq!(ids(&range), vec!["r4", "r3", "r2"]);

        assert!(resolve_range(&graph, "r1", "-3").is_err());
    }

    #[test]
    fn test_upgrade_and_downgrade_plans() {
        let graph = chain(4);

        let up = upgrade_plan(&graph, None, "head").unwrap();
        assert_eq!(ids(&up), vec!["r0", "r1", "r2", "r3"]);

        let up = upgrade_plan(&graph, Some("r1"), "+1").unwrap();
        assert_eq!(ids(&up), vec!["r2"]);

        let down = downgrade_plan(&graph, Some("r3"), "r1").unwrap();
        assert_eq!(ids(&down), vec!["r3", "r2"]);

        let down = downgrade_plan(&graph, Some("r3"), "-1").unwrap();
        assert_eq!(ids(&down), vec!["r3"]);

        assert!(downgrade_plan(&graph, None, "base").unwrap().is_empty());
    }

    #[test]
    fn test_downgrade_to_non_ancestor_fails() {
        let graph = chain(3);
        assert!(matches!(
            downgrade_plan(&graph, Some("r0"), "r2"),
            Err(MigrateError::NotAnAncestor { .. })
        ));
    }
}
