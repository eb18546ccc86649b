//! Decision Policy: classifies a goal as single-agent or swarm-worthy,
//! using the same lexicon/threshold scoring style as the guardrails
//! config shape, generalized to goal text.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone)]
pub struct DecisionPolicyConfig {
    pub complexity_threshold: f64,
    pub min_subtasks_for_parallel: u32,
    pub auto_swarm: bool,
    pub ask_for_high_risk: bool,
    pub high_risk_threshold: f64,
    pub swarm_score_threshold: f64,
    pub complexity_lexicon: Vec<String>,
    pub risk_lexicon: Vec<String>,
    /// domain tag -> keyword set.
    pub domain_lexicon: HashMap<String, Vec<String>>,
    /// Domain pairs that always add a small bonus when both are present.
    pub trigger_domain_pairs: Vec<(String, String)>,
}

impl Default for DecisionPolicyConfig {
    fn default() -> Self {
        let mut domain_lexicon = HashMap::new();
        domain_lexicon.insert(
            "backend".to_string(),
            vec!["api", "server", "database", "endpoint", "service"].into_iter().map(String::from).collect(),
        );
        domain_lexicon.insert(
            "frontend".to_string(),
            vec!["ui", "component", "page", "frontend", "css", "react"].into_iter().map(String::from).collect(),
        );
        domain_lexicon.insert(
            "infra".to_string(),
            vec!["deploy", "infrastructure", "ci", "pipeline", "docker", "kubernetes"]
                .into_iter()
                .map(String::from)
                .collect(),
        );
        domain_lexicon.insert(
            "data".to_string(),
            vec!["migration", "schema", "etl", "pipeline", "dataset"].into_iter().map(String::from).collect(),
        );

        Self {
            complexity_threshold: 0.5,
            min_subtasks_for_parallel: 3,
            auto_swarm: false,
            ask_for_high_risk: true,
            high_risk_threshold: 0.6,
            swarm_score_threshold: 0.4,
            complexity_lexicon: vec![
                "integrate", "refactor", "migrate", "architecture", "multiple", "across", "system",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            risk_lexicon: vec!["delete", "drop", "production", "credentials", "secret", "irreversible"]
                .into_iter()
                .map(String::from)
                .collect(),
            domain_lexicon,
            trigger_domain_pairs: vec![("backend".to_string(), "frontend".to_string())],
        }
    }
}

#[derive(Debug, Clone)]
pub struct Analysis {
    pub complexity_score: f64,
    pub risk_score: f64,
    pub estimated_subtasks: u32,
    pub required_domains: BTreeSet<String>,
    pub parallelizable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    SingleAgent,
    Swarm,
    AskUser,
}

#[derive(Debug, Clone)]
pub struct Decision {
    pub decision: DecisionKind,
    pub reasons: Vec<String>,
    pub confidence: f64,
}

fn lexicon_density(text_lower: &str, lexicon: &[String]) -> f64 {
    if lexicon.is_empty() {
        return 0.0;
    }
    let hits = lexicon.iter().filter(|w| text_lower.contains(w.as_str())).count();
    (hits as f64 / lexicon.len() as f64).min(1.0)
}

/// Risk scoring uses a fixed normalizer rather than `lexicon.len()`: a goal
/// hitting a couple of risk words should already read as risky regardless of
/// how many entries the configured lexicon happens to carry.
const RISK_HITS_FOR_MAX_SCORE: f64 = 3.0;

fn risk_density(text_lower: &str, lexicon: &[String]) -> f64 {
    let hits = lexicon.iter().filter(|w| text_lower.contains(w.as_str())).count();
    (hits as f64 / RISK_HITS_FOR_MAX_SCORE).min(1.0)
}

fn count_parallel_keywords(text_lower: &str) -> u32 {
    ["parallel", "simultaneously", "concurrently", "at the same time"]
        .iter()
        .filter(|kw| text_lower.contains(*kw))
        .count() as u32
}

fn largest_n_files_like_count(text_lower: &str) -> u32 {
    let re = regex::Regex::new(r"(\d+)\s+(files|components|modules|services|tasks|steps)").unwrap();
    re.captures_iter(text_lower)
        .filter_map(|c| c.get(1).and_then(|m| m.as_str().parse::<u32>().ok()))
        .max()
        .unwrap_or(0)
}

fn count_bullets(text: &str) -> u32 {
    text.lines().filter(|l| {
        let trimmed = l.trim_start();
        trimmed.starts_with("- ") || trimmed.starts_with("* ") || trimmed.starts_with("• ")
    }).count() as u32
}

fn count_and_conjunctions(text_lower: &str) -> u32 {
    text_lower.matches(" and ").count() as u32
}

/// Analyzes goal text and turns the result into a routing decision.
/// Stateless aside from config — holds no runtime state.
pub struct DecisionPolicy {
    config: DecisionPolicyConfig,
}

impl DecisionPolicy {
    pub fn new(config: DecisionPolicyConfig) -> Self {
        Self { config }
    }

    pub fn analyze(&self, goal: &str) -> Analysis {
        let lower = goal.to_lowercase();

        let complexity_score = lexicon_density(&lower, &self.config.complexity_lexicon);
        let risk_score = risk_density(&lower, &self.config.risk_lexicon);

        let estimated_subtasks = [
            count_parallel_keywords(&lower),
            largest_n_files_like_count(&lower),
            count_bullets(goal),
            count_and_conjunctions(&lower) + 1,
        ]
        .into_iter()
        .max()
        .unwrap_or(1)
        .min(20);

        let required_domains: BTreeSet<String> = self
            .config
            .domain_lexicon
            .iter()
            .filter(|(_, keywords)| keywords.iter().any(|kw| lower.contains(kw.as_str())))
            .map(|(domain, _)| domain.clone())
            .collect();

        let parallelizable = estimated_subtasks >= self.config.min_subtasks_for_parallel;

        Analysis {
            complexity_score,
            risk_score,
            estimated_subtasks,
            required_domains,
            parallelizable,
        }
    }

    pub fn decide(&self, analysis: &Analysis) -> Decision {
        let is_high_risk = analysis.risk_score >= self.config.high_risk_threshold;
        let has_trigger_pair = self.config.trigger_domain_pairs.iter().any(|(a, b)| {
            analysis.required_domains.contains(a) && analysis.required_domains.contains(b)
        });

        let mut swarm_score = 0.0;
        let mut ask_score = 0.0;
        let mut reasons = Vec::new();

        if analysis.complexity_score >= self.config.complexity_threshold {
            swarm_score += 0.3;
            reasons.push("complexity score above threshold".to_string());
        }
        if analysis.parallelizable {
            swarm_score += 0.25;
            reasons.push("goal is parallelizable".to_string());
        }
        if analysis.required_domains.len() >= 2 {
            swarm_score += 0.25;
            reasons.push("goal spans multiple domains".to_string());
        }
        if has_trigger_pair {
            swarm_score += 0.1;
            reasons.push("domain pair is in the configured trigger list".to_string());
        }
        if is_high_risk && !self.config.ask_for_high_risk {
            swarm_score += 0.2;
            reasons.push("high risk with askForHighRisk disabled".to_string());
        }
        if is_high_risk && self.config.ask_for_high_risk {
            ask_score += 0.4;
            reasons.push("high risk requires human confirmation".to_string());
        }

        let decision = if reasons.is_empty() {
            DecisionKind::SingleAgent
        } else if ask_score > swarm_score && !self.config.auto_swarm {
            DecisionKind::AskUser
        } else if swarm_score >= self.config.swarm_score_threshold
            && (self.config.auto_swarm || swarm_score > ask_score)
        {
            DecisionKind::Swarm
        } else {
            DecisionKind::AskUser
        };

        let confidence = (swarm_score.max(ask_score)).min(1.0);

        Decision { decision, reasons, confidence }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trivial_goal_is_single_agent() {
        let policy = DecisionPolicy::new(DecisionPolicyConfig::default());
        let analysis = policy.analyze("fix a typo in the readme");
        let decision = policy.decide(&analysis);
        assert_eq!(decision.decision, DecisionKind::SingleAgent);
    }

    #[test]
    fn multi_domain_parallel_goal_is_swarm() {
        let policy = DecisionPolicy::new(DecisionPolicyConfig::default());
        let analysis = policy.analyze(
            "refactor the api server and the frontend react components across 5 files in parallel, \
             integrating the database migration architecture",
        );
        assert!(analysis.parallelizable);
        assert!(analysis.required_domains.len() >= 2);
        let decision = policy.decide(&analysis);
        assert_eq!(decision.decision, DecisionKind::Swarm);
    }

    #[test]
    fn high_risk_goal_asks_user_by_default() {
        let policy = DecisionPolicy::new(DecisionPolicyConfig::default());
        let analysis = policy.analyze("delete the production credentials and drop the database across 3 services");
        let decision = policy.decide(&analysis);
        assert_eq!(decision.decision, DecisionKind::AskUser);
    }

    #[test]
    fn delete_production_records_goal_asks_user() {
        let policy = DecisionPolicy::new(DecisionPolicyConfig::default());
        let analysis = policy.analyze("delete all records from production database");
        assert!(analysis.risk_score >= 0.5);
        let decision = policy.decide(&analysis);
        assert_eq!(decision.decision, DecisionKind::AskUser);
    }

    #[test]
    fn estimated_subtasks_is_clamped_to_twenty() {
        let policy = DecisionPolicy::new(DecisionPolicyConfig::default());
        let analysis = policy.analyze("update 47 files across the project");
        assert_eq!(analysis.estimated_subtasks, 20);
    }
}
