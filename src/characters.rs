//! Best-effort matching of dialogue lines to the cast's characters.

use serde::Serialize;
use std::collections::BTreeSet;

use crate::plex::Role;

/// Words shorter than this never match.
const MIN_TOKEN_LEN: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CharacterMentions {
    pub actor: String,
    pub character: String,
    pub lines: usize,
}

struct Matcher {
    words: Vec<String>,
}

impl Matcher {
    fn first(&self) -> &str {
        &self.words[0]
    }

    fn full_match(&self, line: &[String]) -> bool {
        line.windows(self.words.len()).any(|w| w == self.words.as_slice())
    }

    fn first_match(&self, line: &[String]) -> bool {
        line.iter().any(|w| w == self.first())
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .map(|w| {
            let w = w.trim_matches('\'').to_lowercase();
            match w.strip_suffix("'s") {
                Some(stem) => stem.to_string(),
                None => w,
            }
        })
        .filter(|w| w.chars().count() >= MIN_TOKEN_LEN)
        .collect()
}

/// Count, per role, the lines that mention its character.
///
/// A line matches on the character's full name or on its first word. When a
/// line names a character in full, roles that only share that character's
/// first word are not credited for it. Roles without a usable character name
/// are left out.
pub fn annotate_dialogue<S: AsRef<str>>(lines: &[S], roles: &[Role]) -> Vec<CharacterMentions> {
    let matchers: Vec<(usize, Matcher)> = roles
        .iter()
        .enumerate()
        .filter_map(|(i, role)| {
            let words = tokenize(role.character.as_deref()?);
            (!words.is_empty()).then_some((i, Matcher { words }))
        })
        .collect();
    let mut counts = vec![0usize; roles.len()];

    for line in lines {
        let words = tokenize(line.as_ref());
        if words.is_empty() {
            continue;
        }
        let full: Vec<&(usize, Matcher)> =
            matchers.iter().filter(|(_, m)| m.full_match(&words)).collect();
        let mut credited: BTreeSet<usize> = full.iter().map(|(i, _)| *i).collect();
        for (i, m) in &matchers {
            if credited.contains(i) || !m.first_match(&words) {
                continue;
            }
            let shadowed = full.iter().any(|(_, f)| f.first() == m.first());
            if !shadowed {
                credited.insert(*i);
            }
        }
        for i in credited {
            counts[i] += 1;
        }
    }

    matchers
        .iter()
        .map(|(i, _)| CharacterMentions {
            actor: roles[*i].name.clone(),
            character: roles[*i].character.clone().unwrap_or_default(),
            lines: counts[*i],
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn role(actor: &str, character: &str) -> Role {
        Role {
            id: None,
            name: actor.to_string(),
            character: Some(character.to_string()),
            thumb: None,
        }
    }

    fn counts(mentions: &[CharacterMentions]) -> Vec<(&str, usize)> {
        mentions
            .iter()
            .map(|m| (m.character.as_str(), m.lines))
            .collect()
    }

    #[test]
    fn counts_each_line_once_per_role() {
        let roles = vec![
            role("James Stewart", "George Bailey"),
            role("Donna Reed", "Mary Hatch"),
            role("Lionel Barrymore", "Mr. Potter"),
        ];
        let lines = [
            "George! George Bailey, come back here.",
            "Mary, where's George?",
            "Potter's bank is closing.",
            "Nobody here.",
        ];
        let result = annotate_dialogue(&lines, &roles);
        assert_eq!(
            counts(&result),
            vec![("George Bailey", 2), ("Mary Hatch", 1), ("Mr. Potter", 1)]
        );
        assert_eq!(result[0].actor, "James Stewart");
    }

    #[test]
    fn full_name_wins_over_shared_first_word() {
        let roles = vec![role("A", "Harry Bailey"), role("B", "Harry Hatch")];
        let lines = ["Harry Bailey is home!", "Harry, is that you?"];
        let result = annotate_dialogue(&lines, &roles);
        assert_eq!(counts(&result), vec![("Harry Bailey", 2), ("Harry Hatch", 1)]);
    }

    #[test]
    fn matching_is_whole_word_and_case_insensitive() {
        let roles = vec![role("Henry Travers", "Clarence")];
        let lines = ["CLARENCE!", "Clarenceville is far.", "clarence's wings"];
        let result = annotate_dialogue(&lines, &roles);
        assert_eq!(counts(&result), vec![("Clarence", 2)]);
    }

    #[test]
    fn short_or_missing_names_never_match() {
        let mut nameless = role("Extra", "");
        nameless.character = None;
        let roles = vec![role("Someone", "Al"), nameless];
        let result = annotate_dialogue(&["Al, pass the salt."], &roles);
        assert!(result.is_empty());
    }
}
