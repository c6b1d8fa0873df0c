//! Language code matching for the audio/subtitle check.

use serde::Serialize;

use crate::models::LanguageGroup;

const ENGLISH: &[&str] = &["eng", "en", "english"];
const FRENCH: &[&str] = &["fre", "fra", "fr", "french", "francais", "français"];

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum LanguageProblem {
    MissingEnglishAudio,
    MissingFrenchSubtitles,
}

/// Problems found in one backing file of an item.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LanguageFinding {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub problems: Vec<LanguageProblem>,
}

/// Lowercase and strip any region suffix ("en-US" -> "en").
fn primary_subtag(code: &str) -> String {
    let code = code.trim().to_lowercase();
    match code.split(['-', '_']).next() {
        Some(primary) => primary.to_string(),
        None => code,
    }
}

pub fn is_english(code: &str) -> bool {
    ENGLISH.contains(&primary_subtag(code).as_str())
}

pub fn is_french(code: &str) -> bool {
    FRENCH.contains(&primary_subtag(code).as_str())
}

/// Check one language group. `french_only` waives the English audio
/// requirement; French subtitles are only needed when the audio is not
/// French already.
pub fn check_group(group: &LanguageGroup, french_only: bool) -> Vec<LanguageProblem> {
    let mut problems = Vec::new();

    if !french_only && !group.audio.iter().any(|a| is_english(a)) {
        problems.push(LanguageProblem::MissingEnglishAudio);
    }

    let french_audio = group.audio.iter().any(|a| is_french(a));
    if !french_audio && !group.subtitles.iter().any(|s| is_french(s)) {
        problems.push(LanguageProblem::MissingFrenchSubtitles);
    }

    problems
}

/// Findings for every flagged group of an item. An item with no groups, such
/// as a series without episodes, has nothing to flag.
pub fn check_item(groups: &[LanguageGroup], french_only: bool) -> Vec<LanguageFinding> {
    groups
        .iter()
        .filter_map(|group| {
            let problems = check_group(group, french_only);
            (!problems.is_empty()).then(|| LanguageFinding {
                label: group.label.clone(),
                problems,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(audio: &[&str], subtitles: &[&str]) -> LanguageGroup {
        LanguageGroup {
            label: None,
            audio: audio.iter().map(|s| s.to_string()).collect(),
            subtitles: subtitles.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn codes_normalize() {
        assert!(is_english("ENG"));
        assert!(is_english("en-US"));
        assert!(is_english(" English "));
        assert!(!is_english("ger"));
        assert!(is_french("fra"));
        assert!(is_french("fr_CA"));
        assert!(!is_french("fry"));
    }

    #[test]
    fn english_audio_with_french_subs_is_clean() {
        assert!(check_group(&group(&["eng"], &["fre"]), false).is_empty());
    }

    #[test]
    fn french_audio_needs_no_french_subs_but_needs_english_unless_exempt() {
        let french = group(&["fre"], &[]);
        assert_eq!(
            check_group(&french, false),
            vec![LanguageProblem::MissingEnglishAudio]
        );
        assert!(check_group(&french, true).is_empty());
    }

    #[test]
    fn english_only_is_missing_french_subtitles() {
        assert_eq!(
            check_group(&group(&["eng"], &["eng"]), false),
            vec![LanguageProblem::MissingFrenchSubtitles]
        );
    }

    #[test]
    fn item_is_flagged_by_any_bad_group() {
        let mut bad = group(&["jpn"], &["eng"]);
        bad.label = Some("S01E02".to_string());
        let findings = check_item(&[group(&["eng"], &["fre"]), bad], false);

        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].label.as_deref(), Some("S01E02"));
        assert_eq!(
            findings[0].problems,
            vec![
                LanguageProblem::MissingEnglishAudio,
                LanguageProblem::MissingFrenchSubtitles
            ]
        );
    }

    #[test]
    fn item_without_groups_has_no_findings() {
        assert!(check_item(&[], false).is_empty());
        assert!(check_item(&[], true).is_empty());
    }

    #[test]
    fn group_without_streams_is_flagged() {
        let findings = check_item(&[LanguageGroup::default()], false);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].problems.len(), 2);
    }
}
