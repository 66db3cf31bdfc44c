use crate::catalog::ModuleCatalog;
use std::collections::HashSet;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("module '{0}' not found in catalog")]
    ModuleNotFound(String),
    #[error("could not find execution path to {0}")]
    NoPath(String),
    #[error("no preloading module left to try")]
    PreloadingExhausted,
}

/// `(hops, category)` — category 0 (regular transform) always beats
/// category 1 (direct transform) at the same hop count, per §4.2's
/// "Shortest-path to type" ordering rule.
type Rank = (usize, u8);

fn better(current: Option<(Rank, String)>, candidate: (Rank, String)) -> Option<(Rank, String)> {
    match &current {
        Some((rank, _)) if *rank <= candidate.0 => current,
        _ => Some(candidate),
    }
}

/// Stateless over the catalog (§4.2). `next_module` is the dispatcher's one
/// real operation; everything else is a helper it calls.
pub struct Dispatcher<'a> {
    catalog: &'a ModuleCatalog,
}

impl<'a> Dispatcher<'a> {
    pub fn new(catalog: &'a ModuleCatalog) -> Self {
        Dispatcher { catalog }
    }

    /// Returns the module that should execute next to make `target`
    /// runnable given `types_available`, or fails when `target` is
    /// unreachable.
    pub fn next_module(
        &self,
        types_available: &[String],
        target: &str,
        excluded: &HashSet<String>,
    ) -> Result<String, DispatchError> {
        let t = self
            .catalog
            .get(target)
            .ok_or_else(|| DispatchError::ModuleNotFound(target.to_string()))?;

        if t.acts_on.is_empty() {
            return Ok(target.to_string());
        }
        if t.acts_on.iter().any(|ty| types_available.iter().any(|a| a == ty)) {
            return Ok(target.to_string());
        }

        let mut excluded_modules = excluded.clone();
        excluded_modules.insert(target.to_string());

        let mut best: Option<(Rank, String)> = None;
        for dest in &t.acts_on {
            if let Some((rank, module)) = self.next_module_for_type(
                types_available,
                dest,
                &excluded_modules,
                &HashSet::new(),
            ) {
                match &best {
                    Some((existing, _)) if *existing <= rank => {}
                    _ => best = Some((rank, module)),
                }
            }
        }

        best.map(|(_, m)| m)
            .ok_or_else(|| DispatchError::NoPath(target.to_string()))
    }

    pub fn next_preloading_module(
        &self,
        candidates: &[String],
        excluded: &HashSet<String>,
    ) -> Result<String, DispatchError> {
        candidates
            .iter()
            .find(|c| !excluded.contains(c.as_str()))
            .cloned()
            .ok_or(DispatchError::PreloadingExhausted)
    }

    /// The module to run next toward `dest`, plus the rank of the path it
    /// leads down, searched from `frontier` (the currently-available
    /// types). `excluded_types` blocks revisiting a type already used as a
    /// jumping-off point *within this DFS chain* — a local cycle break, not
    /// a global one (§4.2).
    fn next_module_for_type(
        &self,
        frontier: &[String],
        dest: &str,
        excluded_modules: &HashSet<String>,
        excluded_types: &HashSet<String>,
    ) -> Option<(Rank, String)> {
        let mut best: Option<(Rank, String)> = None;

        // Category 1: direct transform (acts_on empty), length 1, always
        // available regardless of frontier.
        for m in self.catalog.direct_transforms_to(dest) {
            if !excluded_modules.contains(m) {
                best = better(best, ((1, 1), m.clone()));
            }
        }

        // Category 0: regular transform straight from an available type,
        // length 1 — beats everything, short-circuit if found.
        for source in frontier {
            for tr in self.catalog.transforms_from(source) {
                if tr.generated_type == dest && !excluded_modules.contains(&tr.module) {
                    best = better(best, ((1, 0), tr.module.clone()));
                }
            }
        }
        if matches!(&best, Some(((1, 0), _))) {
            return best;
        }

        // Longer regular chains: try each one-hop expansion of the
        // frontier and recurse for the remaining distance.
        for source in frontier {
            for tr in self.catalog.transforms_from(source) {
                if excluded_modules.contains(&tr.module) {
                    continue;
                }
                if excluded_types.contains(&tr.generated_type)
                    || frontier.iter().any(|f| f == &tr.generated_type)
                {
                    continue;
                }
                let mut new_frontier = frontier.to_vec();
                new_frontier.push(tr.generated_type.clone());
                let mut new_excluded_modules = excluded_modules.clone();
                new_excluded_modules.insert(tr.module.clone());
                let mut new_excluded_types = excluded_types.clone();
                new_excluded_types.insert(source.clone());

                if let Some(sub_rank) = self.remaining_rank(
                    &new_frontier,
                    dest,
                    &new_excluded_modules,
                    &new_excluded_types,
                ) {
                    let total: Rank = (1 + sub_rank.0, 0);
                    best = better(best, (total, tr.module.clone()));
                }
            }
        }

        best
    }

    /// Same search as `next_module_for_type` but only the rank is needed —
    /// used by the recursive chain search, which only cares about *how
    /// far* the rest of the path is, not which module starts it (that was
    /// already fixed one level up).
    fn remaining_rank(
        &self,
        frontier: &[String],
        dest: &str,
        excluded_modules: &HashSet<String>,
        excluded_types: &HashSet<String>,
    ) -> Option<Rank> {
        self.next_module_for_type(frontier, dest, excluded_modules, excluded_types)
            .map(|(rank, _)| rank)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fame_core::ModuleInfo;

    fn module(name: &str) -> ModuleInfo {
        ModuleInfo { name: name.to_string(), ..Default::default() }
    }

    #[test]
    fn general_purpose_target_with_no_acts_on_returns_itself() {
        let m = module("E");
        let cat = ModuleCatalog::build(vec![m]);
        let d = Dispatcher::new(&cat);
        let got = d
            .next_module(&["anything".to_string()], "E", &HashSet::new())
            .unwrap();
        assert_eq!(got, "E");
    }

    #[test]
    fn target_with_available_input_returns_itself() {
        let mut m = module("Static");
        m.acts_on = vec!["executable".to_string()];
        let cat = ModuleCatalog::build(vec![m]);
        let d = Dispatcher::new(&cat);
        let got = d
            .next_module(&["executable".to_string()], "Static", &HashSet::new())
            .unwrap();
        assert_eq!(got, "Static");
    }

    #[test]
    fn single_hop_transform_is_dispatched_first() {
        let mut target = module("Static");
        target.acts_on = vec!["executable".to_string()];
        let mut unzip = module("Unzip");
        unzip.acts_on = vec!["zip".to_string()];
        unzip.generates = vec!["executable".to_string()];
        let cat = ModuleCatalog::build(vec![target, unzip]);
        let d = Dispatcher::new(&cat);
        let got = d
            .next_module(&["zip".to_string()], "Static", &HashSet::new())
            .unwrap();
        assert_eq!(got, "Unzip");
    }

    #[test]
    fn regular_length_one_beats_direct_transform() {
        let mut target = module("Static");
        target.acts_on = vec!["executable".to_string()];
        let mut unzip = module("Unzip");
        unzip.acts_on = vec!["zip".to_string()];
        unzip.generates = vec!["executable".to_string()];
        let mut direct = module("AlwaysProducesExecutable");
        direct.generates = vec!["executable".to_string()];
        let cat = ModuleCatalog::build(vec![target, unzip, direct]);
        let d = Dispatcher::new(&cat);
        let got = d
            .next_module(&["zip".to_string()], "Static", &HashSet::new())
            .unwrap();
        assert_eq!(got, "Unzip");
    }

    #[test]
    fn direct_transform_beats_longer_regular_chain() {
        let mut target = module("Static");
        target.acts_on = vec!["executable".to_string()];
        // two-hop chain: zip -> intermediate -> executable
        let mut step1 = module("Step1");
        step1.acts_on = vec!["zip".to_string()];
        step1.generates = vec!["intermediate".to_string()];
        let mut step2 = module("Step2");
        step2.acts_on = vec!["intermediate".to_string()];
        step2.generates = vec!["executable".to_string()];
        let mut direct = module("AlwaysProducesExecutable");
        direct.generates = vec!["executable".to_string()];
        let cat = ModuleCatalog::build(vec![target, step1, step2, direct]);
        let d = Dispatcher::new(&cat);
        let got = d
            .next_module(&["zip".to_string()], "Static", &HashSet::new())
            .unwrap();
        assert_eq!(got, "AlwaysProducesExecutable");
    }

    #[test]
    fn unreachable_target_fails() {
        let mut target = module("TargetX");
        target.acts_on = vec!["javascript".to_string()];
        let cat = ModuleCatalog::build(vec![target]);
        let d = Dispatcher::new(&cat);
        let err = d
            .next_module(&["pdf".to_string()], "TargetX", &HashSet::new())
            .unwrap_err();
        assert_eq!(err, DispatchError::NoPath("TargetX".to_string()));
    }

    #[test]
    fn cycle_terminates_without_looping() {
        // A->B and B->A transforms; target needs type A from type B.
        let mut a_to_b = module("AtoB");
        a_to_b.acts_on = vec!["A".to_string()];
        a_to_b.generates = vec!["B".to_string()];
        let mut b_to_a = module("BtoA");
        b_to_a.acts_on = vec!["B".to_string()];
        b_to_a.generates = vec!["A".to_string()];
        let mut target = module("NeedsA");
        target.acts_on = vec!["A".to_string()];
        let cat = ModuleCatalog::build(vec![a_to_b, b_to_a, target]);
        let d = Dispatcher::new(&cat);
        // Only type available is B; A is one hop away via BtoA.
        let result = d.next_module(&["B".to_string()], "NeedsA", &HashSet::new());
        assert_eq!(result, Ok("BtoA".to_string()));
    }

    #[test]
    fn preloading_picks_first_non_excluded_candidate() {
        let cat = ModuleCatalog::build(vec![]);
        let d = Dispatcher::new(&cat);
        let candidates = vec!["VT".to_string(), "Local".to_string()];
        let mut excluded = HashSet::new();
        assert_eq!(
            d.next_preloading_module(&candidates, &excluded).unwrap(),
            "VT"
        );
        excluded.insert("VT".to_string());
        assert_eq!(
            d.next_preloading_module(&candidates, &excluded).unwrap(),
            "Local"
        );
        excluded.insert("Local".to_string());
        assert_eq!(
            d.next_preloading_module(&candidates, &excluded).unwrap_err(),
            DispatchError::PreloadingExhausted
        );
    }
}
