//! Defensive parsing of the validator's raw output.
//!
//! The model is instructed to answer with a single YES or NO, but raw
//! output can carry whitespace, casing, or stray words. The ladder below
//! maps every shape to an explicit `(valid, confidence)` pair; ambiguity
//! resolves to invalid with low confidence.

use saga_protocol::Verdict;

/// Early-stop markers for validator generation: the moment one of these
/// appears the answer is decided.
pub const BINARY_STOPS: [&str; 6] = ["yes", "no", "true", "false", "valid", "invalid"];

/// Map raw validator output to a verdict.
pub fn parse(raw: &str) -> Verdict {
    let cleaned: String = raw
        .to_lowercase()
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();

    let contains_yes = cleaned.contains("yes");
    let contains_no = cleaned.contains("no");
    let contains_true = cleaned.contains("true");
    let contains_false = cleaned.contains("false");
    // "invalid" contains "valid", so check the longer word first.
    let contains_invalid = cleaned.contains("invalid");
    let contains_valid = !contains_invalid && cleaned.contains("valid");

    let (valid, confidence) = if cleaned == "yes" || cleaned == "y" {
        (true, 1.0)
    } else if cleaned == "no" || cleaned == "n" {
        (false, 1.0)
    } else if cleaned == "true" {
        (true, 0.95)
    } else if cleaned == "false" {
        (false, 0.95)
    } else if contains_yes && !contains_no {
        (true, 0.8)
    } else if contains_no && !contains_yes {
        (false, 0.8)
    } else if contains_true && !contains_false {
        (true, 0.75)
    } else if contains_false && !contains_true {
        (false, 0.75)
    } else if contains_valid {
        (true, 0.7)
    } else if contains_invalid {
        (false, 0.7)
    } else {
        (false, 0.3)
    };

    Verdict {
        valid,
        confidence,
        raw_response: raw.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(raw: &str, valid: bool, confidence: f64) {
        let v = parse(raw);
        assert_eq!(v.valid, valid, "validity for {:?}", raw);
        assert_eq!(v.confidence, confidence, "confidence for {:?}", raw);
        assert_eq!(v.raw_response, raw);
    }

    #[test]
    fn exact_answers_score_full_confidence() {
        check("YES", true, 1.0);
        check("yes", true, 1.0);
        check(" y ", true, 1.0);
        check("NO", false, 1.0);
        check("n", false, 1.0);
    }

    #[test]
    fn boolean_words() {
        check("true", true, 0.95);
        check("False", false, 0.95);
    }

    #[test]
    fn substring_matches() {
        check("Yes, absolutely", true, 0.8);
        check("Definitely no", false, 0.8);
        check("that is true enough", true, 0.75);
        check("clearly false here", false, 0.75);
    }

    #[test]
    fn valid_keywords() {
        check("valid", true, 0.7);
        check("invalid", false, 0.7);
        // "invalid" must not register as "valid".
        check("this is invalid", false, 0.7);
    }

    #[test]
    fn ambiguity_is_invalid_low_confidence() {
        check("yes and no", false, 0.3);
        check("", false, 0.3);
        check("maybe", false, 0.3);
        check("true false", false, 0.3);
    }
}
