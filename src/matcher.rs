use crate::config::MatcherConfig;
use crate::llm::Llm;
use crate::models::{ExtractedContent, Issue, MatchResult, MatchType, StateType};
use crate::rate_limit::TokenBucket;
use crate::tracker::Tracker;
use anyhow::Result;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

/// The hybrid issue matcher (spec.md §4.6). Pure resolution engine over a
/// tracker and an LLM, both behind capability traits.
pub struct HybridMatcher<T: Tracker, L: Llm> {
    tracker: std::sync::Arc<T>,
    llm: std::sync::Arc<L>,
    config: MatcherConfig,
    branch_pattern: Regex,
    limiter: TokenBucket,
    /// Results per `session_id`, cached for the life of the process
    /// (spec.md §4.6 step 8).
    cache: Mutex<HashMap<String, Option<MatchResult>>>,
}

impl<T: Tracker, L: Llm> HybridMatcher<T, L> {
    pub fn new(
        tracker: std::sync::Arc<T>,
        llm: std::sync::Arc<L>,
        config: MatcherConfig,
        branch_pattern: &str,
    ) -> Result<Self> {
        Ok(HybridMatcher {
            tracker,
            llm,
            limiter: TokenBucket::new(config.max_api_calls_per_minute),
            config,
            branch_pattern: Regex::new(branch_pattern)?,
            cache: Mutex::new(HashMap::new()),
        })
    }

    /// The LLM transport this matcher was built with — reused by the
    /// session processor for summarization so the processor only needs to
    /// own one `Arc<L>`.
    pub fn llm(&self) -> &L {
        self.llm.as_ref()
    }

    /// Extracts the branch-pattern's capture group 1 from `branch`, with no
    /// tracker or LLM involvement — a pure function (spec.md §8
    /// "branch-extraction correctness").
    pub fn extract_branch_identifier(&self, branch: &str) -> Option<String> {
        self.branch_pattern
            .captures(branch)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
    }

    /// `resolve(content, git_branch) -> identifier | null` (spec.md §4.6).
    /// `content` is `None` when only a branch string is available (the
    /// PR-created handler has no transcript to extract from).
    pub async fn resolve(
        &self,
        content: Option<&ExtractedContent>,
        git_branch: Option<&str>,
    ) -> Result<Option<MatchResult>> {
        // Step 1: exact branch match. No further work, no cache lookup —
        // this path must be a pure function of `branch` alone.
        if let Some(branch) = git_branch {
            if let Some(identifier) = self.extract_branch_identifier(branch) {
                return Ok(Some(MatchResult {
                    issue_id: identifier,
                    confidence: 1.0,
                    match_type: MatchType::Exact,
                    keyword_score: 0.0,
                    semantic_score: None,
                    matched_keywords: Vec::new(),
                    reasoning: None,
                }));
            }
        }

        let Some(content) = content else {
            return Ok(None);
        };

        if let Some(cached) = self.cache.lock().unwrap().get(&content.session_id) {
            return Ok(cached.clone());
        }

        let result = self.resolve_uncached(content).await?;
        self.cache
            .lock()
            .unwrap()
            .insert(content.session_id.clone(), result.clone());
        Ok(result)
    }

    async fn resolve_uncached(&self, content: &ExtractedContent) -> Result<Option<MatchResult>> {
        // Step 2: early reject.
        if content.primary_request.len() < 20 || content.entry_count < 2 {
            return Ok(None);
        }

        // Step 3: keyword search (1 rate-limit token for the whole phase).
        self.limiter.acquire(1).await;
        let candidates = self.keyword_search(content).await?;
        if candidates.is_empty() {
            return Ok(None);
        }

        // Step 4 + 5: score and take the top N.
        let mut scored: Vec<(Issue, f64)> = candidates
            .into_iter()
            .map(|issue| {
                let score = keyword_score(&issue, content);
                (issue, score)
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap());
        scored.truncate(self.config.max_candidates);

        // Step 6: semantic ranking.
        let semantic_scores = if self.config.enable_semantic {
            self.semantic_rank(content, &scored).await
        } else {
            HashMap::new()
        };

        // Step 7: combine.
        let mut results: Vec<MatchResult> = scored
            .into_iter()
            .map(|(issue, keyword_score)| {
                combine(&issue, keyword_score, semantic_scores.get(&issue.identifier).copied(), &self.config)
            })
            .collect();
        results.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap());

        // Step 8: accept the best candidate iff it clears the threshold.
        match results.into_iter().next() {
            Some(best) if best.confidence >= self.config.confidence_threshold => Ok(Some(best)),
            _ => Ok(None),
        }
    }

    async fn keyword_search(&self, content: &ExtractedContent) -> Result<Vec<Issue>> {
        let compact_query = {
            let mut parts = vec![content.project_name.clone()];
            parts.extend(content.keywords.iter().take(5).cloned());
            parts.join(" ")
        };
        let primary_query: String = content.primary_request.chars().take(100).collect();
        let project_query = content.project_name.clone();

        let (a, b, c) = tokio::join!(
            self.tracker.search(&compact_query),
            self.tracker.search(&primary_query),
            self.tracker.search(&project_query),
        );

        let mut seen = HashSet::new();
        let mut merged = Vec::new();
        for batch in [a, b, c] {
            let Ok(issues) = batch else { continue };
            for issue in issues {
                if seen.insert(issue.identifier.clone()) {
                    merged.push(issue);
                }
            }
        }

        if merged.is_empty() {
            merged = self
                .tracker
                .get_recent(
                    &[StateType::Started, StateType::Unstarted],
                    self.config.max_candidates,
                )
                .await
                .unwrap_or_default();
        }

        Ok(merged)
    }

    async fn semantic_rank(
        &self,
        content: &ExtractedContent,
        candidates: &[(Issue, f64)],
    ) -> HashMap<String, f64> {
        if candidates.is_empty() {
            return HashMap::new();
        }
        self.limiter.acquire(1).await;

        let prompt = semantic_prompt(content, candidates);
        match self.llm.match_issues(&prompt).await {
            Ok(response) => response
                .matches
                .into_iter()
                .filter(|m| m.relevance_score >= 0.3)
                .map(|m| (m.issue_id, m.relevance_score))
                .collect(),
            Err(_) => HashMap::new(),
        }
    }
}

/// Keyword score for one issue against extracted content (spec.md §4.6
/// step 4). Always within `[0.0, 1.0]`.
fn keyword_score(issue: &Issue, content: &ExtractedContent) -> f64 {
    let title_lower = issue.title.to_lowercase();
    let haystack = format!("{} {}", issue.title, issue.description).to_lowercase();

    let mut score = 0.0;
    for keyword in &content.keywords {
        if haystack.contains(keyword) {
            score += if title_lower.contains(keyword) { 0.15 } else { 0.05 };
        }
    }

    if !content.project_name.is_empty() && haystack.contains(&content.project_name.to_lowercase())
    {
        score += 0.20;
    }

    let primary_tokens: Vec<String> = crate::transcript::tokenize(&content.primary_request)
        .into_iter()
        .filter(|t| t.len() > 2)
        .collect();
    if !primary_tokens.is_empty() {
        let issue_words: HashSet<String> = crate::transcript::tokenize(&haystack).into_iter().collect();
        let overlap = primary_tokens.iter().filter(|t| issue_words.contains(*t)).count();
        score += 0.30 * (overlap as f64 / primary_tokens.len() as f64);
    }

    score.min(1.0)
}

/// State-type-agnostic bonus based on the issue's current state *name*
/// (spec.md §4.6 step 7) — intentionally matches on name substrings rather
/// than `StateType`, since the spec's categories ("todo", "done", …) are
/// finer-grained than the four `StateType` variants.
fn state_bonus(state_name: &str) -> f64 {
    let name = state_name.to_lowercase();
    if name.contains("progress") || name.contains("started") {
        1.0
    } else if name.contains("todo") || name.contains("backlog") || name.contains("unstarted") {
        0.5
    } else if name.contains("done") || name.contains("complete") || name.contains("cancel") {
        0.0
    } else {
        0.3
    }
}

fn combine(
    issue: &Issue,
    keyword_score: f64,
    semantic_score: Option<f64>,
    config: &MatcherConfig,
) -> MatchResult {
    let adjusted_kw = (keyword_score + 0.1 * state_bonus(&issue.state.name)).min(1.0);

    let confidence = match semantic_score {
        Some(sem) => {
            let total = config.keyword_weight + config.semantic_weight;
            adjusted_kw * (config.keyword_weight / total) + sem * (config.semantic_weight / total)
        }
        None => adjusted_kw,
    };

    let match_type = match semantic_score {
        Some(_) if keyword_score > 0.3 => MatchType::Hybrid,
        Some(_) => MatchType::Semantic,
        None => MatchType::Keyword,
    };

    MatchResult {
        issue_id: issue.identifier.clone(),
        confidence: confidence.min(1.0).max(0.0),
        match_type,
        keyword_score,
        semantic_score,
        matched_keywords: Vec::new(),
        reasoning: None,
    }
}

fn semantic_prompt(content: &ExtractedContent, candidates: &[(Issue, f64)]) -> String {
    let candidate_lines: Vec<String> = candidates
        .iter()
        .map(|(issue, _)| format!("- {} ({}): {}", issue.identifier, issue.title, issue.description))
        .collect();

    format!(
        "Primary request: {}\nProject: {}\nCwd: {}\nFile paths: {:?}\nKeywords: {:?}\n\nCandidate issues:\n{}\n\nReturn JSON: {{\"matches\": [{{\"issue_id\": ..., \"relevance_score\": 0..1, \"reasoning\": ..., \"matched_aspects\": [...]}}]}}",
        content.primary_request,
        content.project_name,
        content.cwd,
        content.file_paths,
        content.keywords,
        candidate_lines.join("\n"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::FakeLlm;
    use crate::models::WorkflowState;
    use crate::tracker::FakeTracker;

    fn state(id: &str, name: &str, ty: StateType) -> WorkflowState {
        WorkflowState {
            id: id.into(),
            name: name.into(),
            state_type: ty,
        }
    }

    fn issue(identifier: &str, title: &str, state: WorkflowState) -> Issue {
        Issue {
            id: format!("internal-{identifier}"),
            identifier: identifier.into(),
            title: title.into(),
            description: String::new(),
            url: format!("https://tracker.example/{identifier}"),
            state,
            assignee: None,
            labels: Vec::new(),
        }
    }

    fn content(primary: &str, project: &str, entry_count: usize) -> ExtractedContent {
        let mut c = ExtractedContent {
            session_id: "s1".into(),
            primary_request: primary.into(),
            cwd: format!("/home/u/{project}"),
            project_name: project.into(),
            entry_count,
            ..Default::default()
        };
        for tok in crate::transcript::tokenize(primary) {
            c.keywords.insert(tok);
        }
        c
    }

    #[tokio::test]
    async fn branch_exact_match_needs_no_tracker_or_llm_call() {
        let tracker = std::sync::Arc::new(FakeTracker::default());
        let llm = std::sync::Arc::new(FakeLlm::new("{}"));
        let matcher =
            HybridMatcher::new(tracker, llm, MatcherConfig::default(), r"([A-Z]+-\d+)").unwrap();

        let result = matcher
            .resolve(None, Some("feature/ENG-123-add-login"))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(result.issue_id, "ENG-123");
        assert_eq!(result.match_type, MatchType::Exact);
        assert_eq!(result.confidence, 1.0);
    }

    #[tokio::test]
    async fn early_reject_short_primary_request_returns_none() {
        let tracker = std::sync::Arc::new(FakeTracker::default());
        let llm = std::sync::Arc::new(FakeLlm::new("{}"));
        let matcher =
            HybridMatcher::new(tracker, llm, MatcherConfig::default(), r"([A-Z]+-\d+)").unwrap();

        let c = content("fix it", "web", 5);
        let result = matcher.resolve(Some(&c), Some("main")).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn keyword_match_accepted_at_lower_threshold_rejected_at_default() {
        let in_progress = state("s-prog", "In Progress", StateType::Started);
        let tracker = std::sync::Arc::new(
            FakeTracker::default()
                .with_issue(issue("ENG-42", "Login redirect bug", in_progress)),
        );
        let llm = std::sync::Arc::new(FakeLlm::new("{}"));

        let mut cfg = MatcherConfig::default();
        cfg.enable_semantic = false;
        cfg.confidence_threshold = 0.5;

        let matcher = HybridMatcher::new(tracker.clone(), llm.clone(), cfg, r"([A-Z]+-\d+)").unwrap();
        let c = content("fix the login page redirect bug on mobile", "web", 5);
        let accepted = matcher.resolve(Some(&c), Some("main")).await.unwrap();
        assert!(accepted.is_some(), "should accept at threshold 0.5");
        assert!(accepted.unwrap().confidence >= 0.5);

        let mut cfg2 = MatcherConfig::default();
        cfg2.enable_semantic = false;
        cfg2.confidence_threshold = 0.7;
        let matcher2 = HybridMatcher::new(tracker, llm, cfg2, r"([A-Z]+-\d+)").unwrap();
        let rejected = matcher2.resolve(Some(&c), Some("main")).await.unwrap();
        assert!(rejected.is_none(), "should reject at default threshold 0.7");
    }

    #[test]
    fn keyword_score_is_capped_at_one() {
        let mut c = content(
            "alpha beta gamma delta epsilon zeta eta theta iota kappa",
            "alpha",
            5,
        );
        for w in ["alpha", "beta", "gamma", "delta", "epsilon"] {
            c.keywords.insert(w.to_string());
        }
        let issue = issue(
            "ENG-1",
            "alpha beta gamma delta epsilon",
            state("s", "Backlog", StateType::Backlog),
        );
        let score = keyword_score(&issue, &c);
        assert!(score <= 1.0);
    }

    #[test]
    fn semantic_combine_matches_worked_example() {
        let cfg = MatcherConfig {
            keyword_weight: 0.6,
            semantic_weight: 0.4,
            ..MatcherConfig::default()
        };
        let issue_a = issue("ENG-A", "title", state("s", "Backlog", StateType::Backlog));
        // state_bonus(Backlog-named) adds 0; keyword_score 0.55 is pre-bonus input directly.
        let result_a = combine(&issue_a, 0.55, Some(0.9), &cfg);
        let result_b = combine(&issue_a, 0.55, Some(0.2), &cfg);
        assert!((result_a.confidence - 0.69).abs() < 1e-9);
        assert!((result_b.confidence - 0.41).abs() < 1e-9);
    }

    #[tokio::test]
    async fn no_match_when_keyword_search_and_recent_fallback_both_empty() {
        let tracker = std::sync::Arc::new(FakeTracker::default());
        let llm = std::sync::Arc::new(FakeLlm::new("{}"));
        let matcher =
            HybridMatcher::new(tracker, llm, MatcherConfig::default(), r"([A-Z]+-\d+)").unwrap();
        let c = content("this request matches absolutely nothing in the tracker", "web", 5);
        let result = matcher.resolve(Some(&c), Some("main")).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn results_are_cached_per_session_id() {
        let tracker = std::sync::Arc::new(
            FakeTracker::default().with_issue(issue(
                "ENG-7",
                "fix the login page redirect bug on mobile",
                state("s", "In Progress", StateType::Started),
            )),
        );
        let llm = std::sync::Arc::new(FakeLlm::new("{}"));
        let mut cfg = MatcherConfig::default();
        cfg.enable_semantic = false;
        cfg.confidence_threshold = 0.3;
        let matcher = HybridMatcher::new(tracker, llm, cfg, r"([A-Z]+-\d+)").unwrap();

        let c = content("fix the login page redirect bug on mobile", "web", 5);
        let first = matcher.resolve(Some(&c), Some("main")).await.unwrap();
        let second = matcher.resolve(Some(&c), Some("main")).await.unwrap();
        assert_eq!(first.map(|r| r.issue_id), second.map(|r| r.issue_id));
    }
}
