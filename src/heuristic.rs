//! Coarse script-ratio language heuristic.
//! Decides whether a text blob still needs translating into the target script
//! (CJK ideographs) or is already written in it. Source script is Latin letters.
//!
//! The decision is a layered policy evaluated top to bottom; later rules only
//! fire when earlier ones don't match. Defaults to "translate".

use serde::Serialize;

/// Punctuation ignored when counting, alongside all whitespace.
const IGNORED_PUNCTUATION: &[char] = &[
    '.', ',', ';', ':', '!', '?', '(', ')', '[', ']', '{', '}', '\'', '"', '，', '。', '；',
    '：', '！', '？', '（', '）', '【', '】', '「', '」', '‘', '’', '“', '”', '、',
];

/// Character counts for one text blob.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScriptCounts {
    pub target: usize,
    pub source: usize,
    pub total: usize,
}

impl ScriptCounts {
    pub fn of(text: &str) -> Self {
        let mut counts = Self::default();
        for c in text.chars() {
            if c.is_whitespace() || IGNORED_PUNCTUATION.contains(&c) {
                continue;
            }
            counts.total += 1;
            if is_target_script(c) {
                counts.target += 1;
            } else if c.is_ascii_alphabetic() {
                counts.source += 1;
            }
        }
        counts
    }

    pub fn target_ratio(&self) -> f64 {
        ratio(self.target, self.total)
    }

    pub fn source_ratio(&self) -> f64 {
        ratio(self.source, self.total)
    }
}

fn ratio(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64
    }
}

/// CJK unified ideographs plus extension A.
#[inline]
fn is_target_script(c: char) -> bool {
    matches!(c, '\u{4E00}'..='\u{9FFF}' | '\u{3400}'..='\u{4DBF}')
}

/// Which rule of the layered policy produced the decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Rule {
    Empty,
    MostlyTarget,
    SourcePresent,
    SourceDominant,
    Mixed,
    TargetAbsolute,
    Default,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Verdict {
    pub translate: bool,
    pub rule: Rule,
    pub counts: ScriptCounts,
}

/// Run the layered policy and report which rule decided.
pub fn classify(text: &str) -> Verdict {
    let counts = ScriptCounts::of(text);
    let target = counts.target_ratio();
    let source = counts.source_ratio();

    let (translate, rule) = if counts.total == 0 {
        (false, Rule::Empty)
    } else if target > 0.5 {
        (false, Rule::MostlyTarget)
    } else if source > 0.25 {
        (true, Rule::SourcePresent)
    } else if source > 0.3 && target < 0.2 {
        (true, Rule::SourceDominant)
    } else if source > 0.2 && target > 0.1 && target < 0.4 {
        (true, Rule::Mixed)
    } else if counts.target > 15 {
        (false, Rule::TargetAbsolute)
    } else {
        (true, Rule::Default)
    };

    Verdict {
        translate,
        rule,
        counts,
    }
}

/// True when `text` is not already in the target language.
pub fn needs_translation(text: &str) -> bool {
    classify(text).translate
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latin_text_needs_translation() {
        let v = classify("Hello world");
        assert!(v.translate);
        assert_eq!(v.rule, Rule::SourcePresent);
    }

    #[test]
    fn cjk_text_is_already_target() {
        let v = classify("你好世界");
        assert!(!v.translate);
        assert_eq!(v.rule, Rule::MostlyTarget);
    }

    #[test]
    fn mixed_text_with_mostly_latin_translates_on_source_rule() {
        let v = classify("Hello 你好 world this has more english");
        assert!(v.translate);
        // Source rule precedes the mixed-content rules.
        assert_eq!(v.rule, Rule::SourcePresent);
        assert_eq!(v.counts.target, 2);
        assert_eq!(v.counts.source, 28);
    }

    #[test]
    fn whitespace_and_punctuation_only_is_not_translatable() {
        let v = classify("  ... ，。！ \n\t");
        assert!(!v.translate);
        assert_eq!(v.rule, Rule::Empty);
    }

    #[test]
    fn many_ideographs_among_digits_skip_on_absolute_count() {
        // 16 ideographs, 24 digits: target ratio 0.4, source ratio 0.
        let text = format!("{}{}", "中".repeat(16), "1".repeat(24));
        let v = classify(&text);
        assert!(!v.translate);
        assert_eq!(v.rule, Rule::TargetAbsolute);
    }

    #[test]
    fn mixed_rule_fires_when_source_is_moderate() {
        // total 100: 22 latin, 15 ideographs, 63 digits.
        let text = format!("{}{}{}", "a".repeat(22), "中".repeat(15), "7".repeat(63));
        let v = classify(&text);
        assert!(v.translate);
        assert_eq!(v.rule, Rule::Mixed);
    }

    #[test]
    fn digits_only_fall_through_to_default() {
        let v = classify("2024 2025 2026");
        assert!(v.translate);
        assert_eq!(v.rule, Rule::Default);
    }
}
