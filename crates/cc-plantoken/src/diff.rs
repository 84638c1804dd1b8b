// diff.rs — Human-readable differences between two artifact sets.
//
// Used to explain an integrity failure: when the executed artifacts do not
// reproduce the plan-token, the audit trail records exactly which artifacts
// appeared, disappeared or changed.

use std::collections::BTreeMap;

use crate::token::PlanArtifactHash;

/// List the differences between the planned and executed artifact sets.
///
/// Output is ordered by artifact name. An empty result means the sets are
/// identical by name, hash and size.
pub fn diff_artifacts(expected: &[PlanArtifactHash], actual: &[PlanArtifactHash]) -> Vec<String> {
    let expected: BTreeMap<&str, &PlanArtifactHash> =
        expected.iter().map(|a| (a.name.as_str(), a)).collect();
    let actual: BTreeMap<&str, &PlanArtifactHash> =
        actual.iter().map(|a| (a.name.as_str(), a)).collect();

    let mut names: Vec<&str> = expected.keys().chain(actual.keys()).copied().collect();
    names.sort_unstable();
    names.dedup();

    let mut differences = Vec::new();
    for name in names {
        match (expected.get(name), actual.get(name)) {
            (Some(_), None) => differences.push(format!("missing artifact '{}'", name)),
            (None, Some(_)) => differences.push(format!("unexpected artifact '{}'", name)),
            (Some(e), Some(a)) => {
                if e.hash != a.hash {
                    differences.push(format!(
                        "artifact '{}' hash changed: {} -> {}",
                        name, e.hash, a.hash
                    ));
                }
                if e.size != a.size {
                    differences.push(format!(
                        "artifact '{}' size changed: {:?} -> {:?}",
                        name, e.size, a.size
                    ));
                }
            }
            (None, None) => {}
        }
    }
    differences
}
