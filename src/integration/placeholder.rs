//! Placeholder token syntax: `#name#` or `#name|postfunc#`, where `#` is the configured specifier

use regex::Regex;

/// A parsed placeholder token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    /// The token exactly as it appears in the text, specifiers included
    pub token: String,
    /// Field or function name
    pub name: String,
    /// Optional filter applied to the resolved value
    pub post_function: Option<String>,
}

/// Finds placeholder tokens for one specifier
#[derive(Debug, Clone)]
pub struct PlaceholderPattern {
    specifier: String,
    regex: Regex,
}

impl PlaceholderPattern {
    pub fn new(specifier: &str) -> Result<Self, regex::Error> {
        let escaped = regex::escape(specifier);
        let regex = Regex::new(&format!("({escaped}.*?{escaped})"))?;
        Ok(Self {
            specifier: specifier.to_string(),
            regex,
        })
    }

    pub fn specifier(&self) -> &str {
        &self.specifier
    }

    /// Every token in `text`, in order of appearance
    pub fn find_all<'t>(&self, text: &'t str) -> Vec<&'t str> {
        self.regex.find_iter(text).map(|m| m.as_str()).collect()
    }

    pub fn has_placeholders(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }

    /// Token with its surrounding specifiers removed
    pub fn strip<'t>(&self, token: &'t str) -> &'t str {
        token
            .trim_start_matches(self.specifier.as_str())
            .trim_end_matches(self.specifier.as_str())
    }

    pub fn parse(&self, token: &str) -> Placeholder {
        let mut parts = self.strip(token).split('|');
        let name = parts.next().unwrap_or_default().to_string();
        let post_function = parts
            .next()
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .map(str::to_string);
        Placeholder {
            token: token.to_string(),
            name,
            post_function,
        }
    }

    /// Every token in `text`, parsed
    pub fn placeholders(&self, text: &str) -> Vec<Placeholder> {
        self.find_all(text).into_iter().map(|t| self.parse(t)).collect()
    }

    /// Text before the first specifier, used as the base of fan-out endpoints
    pub fn prefix<'t>(&self, text: &'t str) -> &'t str {
        text.split(self.specifier.as_str()).next().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_all_is_non_greedy() {
        let pattern = PlaceholderPattern::new("#").unwrap();
        assert_eq!(
            pattern.find_all("Ticket #ticket_id# by #ticket_requester#"),
            vec!["#ticket_id#", "#ticket_requester#"]
        );
        assert!(pattern.find_all("no tokens").is_empty());
    }

    #[test]
    fn test_parse_with_post_function() {
        let pattern = PlaceholderPattern::new("#").unwrap();
        let p = pattern.parse("#Business Owner|upper#");
        assert_eq!(p.name, "Business Owner");
        assert_eq!(p.post_function.as_deref(), Some("upper"));
        assert_eq!(p.token, "#Business Owner|upper#");

        let plain = pattern.parse("#ticket_id#");
        assert_eq!(plain.name, "ticket_id");
        assert_eq!(plain.post_function, None);
    }

    #[test]
    fn test_regex_metacharacter_specifier() {
        let pattern = PlaceholderPattern::new("$").unwrap();
        assert_eq!(pattern.find_all("id=$ticket_id$"), vec!["$ticket_id$"]);
        assert_eq!(pattern.parse("$ticket_id$").name, "ticket_id");
    }

    #[test]
    fn test_prefix_before_first_specifier() {
        let pattern = PlaceholderPattern::new("#").unwrap();
        assert_eq!(pattern.prefix("/api/items/#id1#,#id2#"), "/api/items/");
        assert_eq!(pattern.prefix("/api/items"), "/api/items");
    }
}
