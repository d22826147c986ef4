//! Consensus over the solutions of one work item.
//!
//! Once an item has collected as many solutions as the verification
//! strength, the engine either accepts a single canonical value or rejects
//! the whole workgroup so the item is handed out again.

use serde_json::Value;

/// Outcome of verifying one work item.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Accept(Value),
    Reject,
}

/// Default consensus policy with a configured threshold.
#[derive(Debug, Clone, Copy)]
pub struct VerificationEngine {
    equality_percentage: u32,
}

impl VerificationEngine {
    pub fn new(equality_percentage: u32) -> Self {
        Self {
            equality_percentage,
        }
    }

    pub fn equality_percentage(&self) -> u32 {
        self.equality_percentage
    }

    pub fn evaluate(&self, solutions: &[Value]) -> Verdict {
        check_percentage(solutions, self.equality_percentage)
    }
}

/// Accept the most common solution if its share reaches `percentage`.
///
/// Unanimous solutions are always accepted. Among equally common values the
/// one submitted first wins. An empty solution list is rejected.
pub fn check_percentage(solutions: &[Value], percentage: u32) -> Verdict {
    let Some(first) = solutions.first() else {
        return Verdict::Reject;
    };
    if solutions.iter().all(|s| s == first) {
        return Verdict::Accept(first.clone());
    }

    // Tally in first-seen order; values are JSON, so no hashing.
    let mut tally: Vec<(&Value, usize)> = Vec::new();
    for solution in solutions {
        match tally.iter_mut().find(|(value, _)| *value == solution) {
            Some((_, count)) => *count += 1,
            None => tally.push((solution, 1)),
        }
    }

    let mut winner = tally[0];
    for &entry in &tally[1..] {
        if entry.1 > winner.1 {
            winner = entry;
        }
    }

    // count / total >= percentage / 100, kept in integers
    if winner.1 * 100 >= percentage as usize * solutions.len() {
        Verdict::Accept(winner.0.clone())
    } else {
        Verdict::Reject
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use test_case::test_case;

    #[test_case(100 ; "unanimity required")]
    #[test_case(50 ; "majority")]
    #[test_case(0 ; "anything goes")]
    fn test_unanimous_always_accepted(percentage: u32) {
        let solutions = vec![json!({"n": 1}); 4];
        assert_eq!(
            check_percentage(&solutions, percentage),
            Verdict::Accept(json!({"n": 1}))
        );
    }

    #[test]
    fn test_majority_threshold() {
        let solutions = [json!("a"), json!("a"), json!("b")];
        assert_eq!(check_percentage(&solutions, 50), Verdict::Accept(json!("a")));
        assert_eq!(check_percentage(&solutions, 66), Verdict::Accept(json!("a")));
        assert_eq!(check_percentage(&solutions, 67), Verdict::Reject);
        assert_eq!(check_percentage(&solutions, 80), Verdict::Reject);
    }

    #[test]
    fn test_disagreement_rejected_at_default() {
        let engine = VerificationEngine::new(100);
        assert_eq!(engine.evaluate(&[json!(1), json!(2), json!(1)]), Verdict::Reject);
        assert_eq!(engine.evaluate(&[json!(2), json!(2)]), Verdict::Accept(json!(2)));
    }

    #[test]
    fn test_tie_goes_to_first_seen() {
        let solutions = [json!("x"), json!("y"), json!("y"), json!("x")];
        assert_eq!(check_percentage(&solutions, 50), Verdict::Accept(json!("x")));

        let solutions = [json!("y"), json!("x"), json!("x"), json!("y")];
        assert_eq!(check_percentage(&solutions, 50), Verdict::Accept(json!("y")));
    }

    #[test]
    fn test_plurality_with_zero_threshold() {
        let solutions = [json!(1), json!(2), json!(3), json!(2)];
        assert_eq!(check_percentage(&solutions, 0), Verdict::Accept(json!(2)));
        assert_eq!(check_percentage(&solutions, 51), Verdict::Reject);
    }

    #[test]
    fn test_empty_rejected() {
        assert_eq!(check_percentage(&[], 0), Verdict::Reject);
    }
}
