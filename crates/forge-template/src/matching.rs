//! Demand-label matching over a profile's template list.

use forge_config::types::{AgentMode, AgentTemplate};

/// Whether a template can serve a demand label expression.
///
/// A labeled demand is served when every demand token appears in the
/// template's label set. Unlabeled demand is served only by templates
/// in `Normal` mode; `Exclusive` templates take matching labeled
/// demand exclusively.
pub fn serves(template: &AgentTemplate, demand: &str) -> bool {
    let wanted: Vec<&str> = demand.split_whitespace().collect();
    if wanted.is_empty() {
        return template.effective_mode() == AgentMode::Normal;
    }
    let offered = template.label_tokens();
    wanted.iter().all(|token| offered.contains(token))
}

/// First template in declaration order that serves the demand. `None`
/// is the normal "cannot serve" outcome, not an error.
pub fn first_match<'a>(templates: &'a [AgentTemplate], demand: &str) -> Option<&'a AgentTemplate> {
    templates.iter().find(|t| serves(t, demand))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template(name: &str, labels: &str) -> AgentTemplate {
        AgentTemplate {
            name: name.to_string(),
            labels: labels.to_string(),
            image: Some(format!("ci/{name}:1")),
            ..AgentTemplate::default()
        }
    }

    fn exclusive(name: &str, labels: &str) -> AgentTemplate {
        AgentTemplate {
            mode: Some(AgentMode::Exclusive),
            ..template(name, labels)
        }
    }

    #[test]
    fn single_token_matches_superset() {
        let t = template("maven", "maven jdk17 linux");
        assert!(serves(&t, "maven"));
        assert!(serves(&t, "jdk17"));
        assert!(!serves(&t, "gradle"));
    }

    #[test]
    fn every_demand_token_must_be_offered() {
        let t = template("maven", "maven jdk17");
        assert!(serves(&t, "maven jdk17"));
        assert!(!serves(&t, "maven jdk21"));
    }

    #[test]
    fn tokens_match_whole_words_only() {
        let t = template("jdk", "jdk");
        assert!(!serves(&t, "jdk17"));
        let t = template("jdk17", "jdk17");
        assert!(!serves(&t, "jdk"));
    }

    #[test]
    fn unlabeled_demand_needs_normal_mode() {
        assert!(serves(&template("generic", "linux"), ""));
        assert!(!serves(&exclusive("maven", "maven"), ""));
        assert!(serves(&template("bare", ""), "   "));
    }

    #[test]
    fn exclusive_serves_matching_labels() {
        let t = exclusive("maven", "maven jdk17");
        assert!(serves(&t, "maven"));
    }

    #[test]
    fn unlabeled_template_rejects_labeled_demand() {
        assert!(!serves(&template("bare", ""), "maven"));
    }

    #[test]
    fn first_match_respects_declaration_order() {
        let templates = vec![
            template("general", "linux"),
            template("maven-a", "maven"),
            template("maven-b", "maven"),
        ];
        assert_eq!(first_match(&templates, "maven").map(|t| t.name.as_str()), Some("maven-a"));
        assert_eq!(first_match(&templates, "linux").map(|t| t.name.as_str()), Some("general"));
        assert_eq!(first_match(&templates, "").map(|t| t.name.as_str()), Some("general"));
        assert!(first_match(&templates, "windows").is_none());
    }
}
