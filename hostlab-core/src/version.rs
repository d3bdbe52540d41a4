//! Topology version compatibility
//!
//! A topology declares which engine versions it was written for, either as
//! an exact version (`"0.1.0"`) or as an operator and a bound (`">= 0.1.0"`).

use std::cmp::Ordering;

use crate::error::{HostlabError, HostlabResult};

/// Version of this engine, compared against topology requirements
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Comparison {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl Comparison {
    fn parse(op: &str) -> Option<Self> {
        match op {
            "=" | "==" => Some(Comparison::Eq),
            "!=" => Some(Comparison::Ne),
            ">" => Some(Comparison::Gt),
            ">=" => Some(Comparison::Ge),
            "<" => Some(Comparison::Lt),
            "<=" => Some(Comparison::Le),
            _ => None,
        }
    }

    fn holds(&self, ordering: Ordering) -> bool {
        match self {
            Comparison::Eq => ordering == Ordering::Equal,
            Comparison::Ne => ordering != Ordering::Equal,
            Comparison::Gt => ordering == Ordering::Greater,
            Comparison::Ge => ordering != Ordering::Less,
            Comparison::Lt => ordering == Ordering::Less,
            Comparison::Le => ordering != Ordering::Greater,
        }
    }
}

fn components(version: &str) -> HostlabResult<Vec<u64>> {
    version
        .split('.')
        .map(|part| {
            part.parse::<u64>().map_err(|_| {
                HostlabError::topology(format!("Invalid topology version attribute '{}'", version))
            })
        })
        .collect()
}

/// Compare two dotted versions numerically; missing components count as zero
fn compare(left: &[u64], right: &[u64]) -> Ordering {
    let len = left.len().max(right.len());
    (0..len)
        .map(|i| {
            let l = left.get(i).copied().unwrap_or(0);
            let r = right.get(i).copied().unwrap_or(0);
            l.cmp(&r)
        })
        .find(|o| *o != Ordering::Equal)
        .unwrap_or(Ordering::Equal)
}

/// Check that `engine_version` satisfies the topology's `required` version.
pub fn check_compatibility(required: Option<&str>, engine_version: &str) -> HostlabResult<()> {
    let required = required
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .ok_or_else(|| HostlabError::topology("You must version the topology!"))?;

    let tokens: Vec<&str> = required.split_whitespace().collect();
    let (comparison, bound) = match tokens.as_slice() {
        [bound] => (Comparison::Eq, *bound),
        [op, bound] => {
            let comparison = Comparison::parse(op).ok_or_else(|| {
                HostlabError::topology(format!("Invalid topology version operator '{}'", op))
            })?;
            (comparison, *bound)
        }
        _ => {
            return Err(HostlabError::topology(format!(
                "Invalid topology version attribute '{}'",
                required
            )))
        }
    };

    let ordering = compare(&components(engine_version)?, &components(bound)?);
    tracing::debug!(
        "Topology requires '{}', engine is {} ({:?})",
        required,
        engine_version,
        ordering
    );

    if comparison.holds(ordering) {
        Ok(())
    } else {
        Err(HostlabError::topology(format!(
            "This topology is not compatible with this version of hostlab! ({} required, {} running)",
            required, engine_version
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("1.2.3", "1.2.3" ; "exact match")]
    #[test_case("= 1.2.3", "1.2.3" ; "explicit equality")]
    #[test_case(">= 1.2.0", "1.2.3" ; "lower bound")]
    #[test_case("> 1.2", "1.2.3" ; "shorter bound")]
    #[test_case("< 1.10.0", "1.9.9" ; "numeric not lexical")]
    #[test_case("<= 2", "2.0.0" ; "missing components are zero")]
    #[test_case("!= 0.9.0", "1.0.0" ; "inequality")]
    fn test_compatible(required: &str, engine: &str) {
        assert!(check_compatibility(Some(required), engine).is_ok());
    }

    #[test_case("1.2.4", "1.2.3" ; "exact mismatch")]
    #[test_case(">= 2.0.0", "1.9.9" ; "below bound")]
    #[test_case("< 1.2.3", "1.2.3" ; "strict bound")]
    fn test_incompatible(required: &str, engine: &str) {
        let err = check_compatibility(Some(required), engine).unwrap_err();
        assert!(err.to_string().contains("not compatible"));
    }

    #[test_case(None ; "absent")]
    #[test_case(Some("") ; "empty")]
    #[test_case(Some(">= 1.0 extra") ; "too many tokens")]
    #[test_case(Some("~> 1.0") ; "unknown operator")]
    #[test_case(Some("1.x") ; "non numeric")]
    fn test_malformed(required: Option<&str>) {
        let err = check_compatibility(required, "1.0.0").unwrap_err();
        assert!(matches!(err, HostlabError::Topology { .. }));
    }
}
