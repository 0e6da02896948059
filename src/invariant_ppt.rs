//! Runtime invariant checks for the search engines
//!
//! Search code asserts its invariants through [`assert_invariant!`]; every
//! checked message is recorded per thread so tests can verify afterwards that
//! a scenario actually exercised the invariants it claims to cover.
//!
//! ```rust,ignore
//! use isp_autofocus::invariant_ppt::*;
//!
//! assert_invariant!(
//!     next <= stop,
//!     "BSSA never steps past the stop position",
//!     "bssa"
//! );
//!
//! #[test]
//! fn contract_bssa() {
//!     // ... run a scan ...
//!     contract_test("bssa scan", &["BSSA never steps past the stop position"]);
//! }
//! ```

use std::cell::RefCell;
use std::collections::HashSet;
use std::thread_local;

thread_local! {
    static CHECKED: RefCell<HashSet<&'static str>> = RefCell::new(HashSet::new());
}

/// Assert an invariant and record that it was checked.
///
/// # Panics
/// Panics if the condition is false.
#[macro_export]
macro_rules! assert_invariant {
    ($condition:expr, $message:expr) => {
        $crate::invariant_ppt::__check_invariant($condition, $message, None)
    };
    ($condition:expr, $message:expr, $context:expr) => {
        $crate::invariant_ppt::__check_invariant($condition, $message, Some($context))
    };
}

#[doc(hidden)]
pub fn __check_invariant(condition: bool, message: &'static str, context: Option<&str>) {
    CHECKED.with(|checked| {
        checked.borrow_mut().insert(message);
    });

    if !condition {
        panic!(
            "invariant violated [{}]: {}",
            context.unwrap_or("autofocus"),
            message
        );
    }
}

/// Panic unless every listed invariant was checked on this thread.
pub fn contract_test(scenario: &str, required: &[&str]) {
    let missing: Vec<&str> = CHECKED.with(|checked| {
        let checked = checked.borrow();
        required
            .iter()
            .copied()
            .filter(|message| !checked.contains(message))
            .collect()
    });

    if !missing.is_empty() {
        panic!(
            "contract failure [{}]: invariants never checked:\n  - {}",
            scenario,
            missing.join("\n  - ")
        );
    }
}

/// Forget all recorded checks on this thread.
pub fn clear_invariant_log() {
    CHECKED.with(|checked| checked.borrow_mut().clear());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checked_invariant_is_recorded() {
        clear_invariant_log();
        assert_invariant!(1 + 1 == 2, "arithmetic holds");
        contract_test("arithmetic", &["arithmetic holds"]);
    }

    #[test]
    #[should_panic(expected = "invariants never checked")]
    fn test_missing_invariant_fails_contract() {
        clear_invariant_log();
        contract_test("nothing ran", &["never asserted"]);
    }

    #[test]
    #[should_panic(expected = "invariant violated [bssa]")]
    fn test_violation_panics_with_context() {
        assert_invariant!(false, "always false", "bssa");
    }
}
