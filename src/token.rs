use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::model::Ms;

/// Random alphanumeric token, used for share ids and link tokens.
pub fn random_token(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Draw candidates from `generate` until `try_claim` accepts one, at most
/// `attempts` times. When every draw is taken, claim a time-suffixed variant
/// of one more draw instead.
pub fn claim_unique<G, C>(attempts: usize, now: Ms, mut generate: G, mut try_claim: C) -> String
where
    G: FnMut() -> String,
    C: FnMut(&str) -> bool,
{
    for _ in 0..attempts {
        let candidate = generate();
        if try_claim(&candidate) {
            return candidate;
        }
    }
    let mut suffix = 0u32;
    loop {
        let candidate = format!("{}-{now:x}{suffix}", generate());
        if try_claim(&candidate) {
            return candidate;
        }
        suffix += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn random_token_shape() {
        let t = random_token(32);
        assert_eq!(t.len(), 32);
        assert!(t.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(t, random_token(32));
    }

    #[test]
    fn claim_first_free_candidate() {
        let mut taken: HashSet<String> = ["a".to_string()].into();
        let mut draws = vec!["a", "b"].into_iter();
        let got = claim_unique(5, 0, || draws.next().unwrap().to_string(), |c| {
            taken.insert(c.to_string())
        });
        assert_eq!(got, "b");
    }

    #[test]
    fn claim_falls_back_to_time_suffix() {
        let mut calls = 0;
        let got = claim_unique(
            3,
            255,
            || "dup".to_string(),
            |c| {
                calls += 1;
                c != "dup"
            },
        );
        assert_eq!(calls, 4);
        assert_eq!(got, "dup-ff0");
    }
}
