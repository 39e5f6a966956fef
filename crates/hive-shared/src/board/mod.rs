//! # Knowledge Board
//!
//! Shared information space for the worker fleet: TTL-bounded posts indexed
//! by category and author, keyword search with relevance scoring, and
//! per-category subscriptions. Workers self-coordinate through the board
//! instead of routing every read through the supervisor.
//!
//! Expired posts are invisible to every query the moment their TTL passes,
//! independent of when garbage collection actually removes them.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Buffer size for per-category subscription channels.
const SUBSCRIBER_BUFFER: usize = 64;

/// The closed category set. Anything else coerces to `General`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    MarketData,
    PoolHealth,
    TreasuryStatus,
    SecurityAlerts,
    GasPrices,
    StakingInfo,
    PatternAnalysis,
    WorkerStatus,
    DecisionOutcomes,
    General,
}

impl Category {
    pub const ALL: [Category; 10] = [
        Category::MarketData,
        Category::PoolHealth,
        Category::TreasuryStatus,
        Category::SecurityAlerts,
        Category::GasPrices,
        Category::StakingInfo,
        Category::PatternAnalysis,
        Category::WorkerStatus,
        Category::DecisionOutcomes,
        Category::General,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MarketData => "market_data",
            Self::PoolHealth => "pool_health",
            Self::TreasuryStatus => "treasury_status",
            Self::SecurityAlerts => "security_alerts",
            Self::GasPrices => "gas_prices",
            Self::StakingInfo => "staking_info",
            Self::PatternAnalysis => "pattern_analysis",
            Self::WorkerStatus => "worker_status",
            Self::DecisionOutcomes => "decision_outcomes",
            Self::General => "general",
        }
    }

    /// Parse a category tag, coercing unknown tags to `General`.
    pub fn parse_lossy(tag: &str) -> Self {
        match Self::ALL.iter().find(|c| c.as_str() == tag) {
            Some(c) => *c,
            None => {
                warn!(category = tag, "unknown board category, coercing to general");
                Self::General
            }
        }
    }
}

/// A single post on the board.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardPost {
    pub id: u64,
    pub author: String,
    pub category: Category,
    pub title: String,
    pub content: serde_json::Value,
    pub tags: Vec<String>,
    /// 0 = normal, 1 = important, 2 = critical.
    pub priority: u8,
    pub created_at: DateTime<Utc>,
    /// `None` means the post never expires.
    pub expires_at: Option<DateTime<Utc>>,
    pub views: u64,
    pub accessed_by: Vec<String>,
}

impl BoardPost {
    fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|t| t < now)
    }
}

/// Filters for `query`. All optional; absent filters match everything.
#[derive(Debug, Clone, Default)]
pub struct BoardQuery {
    pub category: Option<Category>,
    pub author: Option<String>,
    /// Any-match tag filter.
    pub tags: Vec<String>,
    pub since: Option<DateTime<Utc>>,
    pub min_priority: u8,
    pub limit: usize,
}

impl BoardQuery {
    pub fn category(category: Category) -> Self {
        Self {
            category: Some(category),
            limit: 50,
            ..Self::default()
        }
    }
}

/// Board statistics snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardStats {
    pub total_posts: usize,
    pub active_categories: usize,
    pub posts_by_category: HashMap<String, usize>,
    pub posts_by_author: HashMap<String, usize>,
    pub total_subscribers: usize,
    /// (title, author, views) of the five most viewed posts.
    pub most_viewed: Vec<(String, String, u64)>,
}

#[derive(Debug, Default)]
struct BoardState {
    posts: HashMap<u64, BoardPost>,
    next_id: u64,
    subscribers: HashMap<Category, Vec<mpsc::Sender<BoardPost>>>,
}

/// TTL to apply to a post.
#[derive(Debug, Clone, Copy, Default)]
pub enum PostTtl {
    /// The board's configured default.
    #[default]
    Default,
    /// Explicit number of hours.
    Hours(i64),
    /// Never expires.
    Indefinite,
}

/// The shared board. One per process, owned by the supervisor.
#[derive(Debug)]
pub struct KnowledgeBoard {
    state: RwLock<BoardState>,
    default_ttl_hours: i64,
}

impl KnowledgeBoard {
    pub fn new(default_ttl_hours: i64) -> Self {
        info!(
            categories = Category::ALL.len(),
            default_ttl_hours, "knowledge board initialized"
        );
        Self {
            state: RwLock::new(BoardState::default()),
            default_ttl_hours,
        }
    }

    /// Post to the board. Returns the post id.
    pub fn post(
        &self,
        author: &str,
        category: Category,
        title: &str,
        content: serde_json::Value,
        tags: Vec<String>,
        priority: u8,
        ttl: PostTtl,
    ) -> u64 {
        let now = Utc::now();
        let expires_at = match ttl {
            PostTtl::Default => Some(now + Duration::hours(self.default_ttl_hours)),
            PostTtl::Hours(h) => Some(now + Duration::hours(h)),
            PostTtl::Indefinite => None,
        };

        let mut state = self.state.write();
        state.next_id += 1;
        let id = state.next_id;

        let post = BoardPost {
            id,
            author: author.to_string(),
            category,
            title: title.to_string(),
            content,
            tags,
            priority: priority.min(2),
            created_at: now,
            expires_at,
            views: 0,
            accessed_by: Vec::new(),
        };

        debug!(
            id,
            author,
            category = category.as_str(),
            title,
            priority,
            "new board post"
        );

        // Notify subscribers at creation time, best-effort. Closed
        // receivers are dropped from the list.
        if let Some(senders) = state.subscribers.get_mut(&category) {
            senders.retain(|tx| match tx.try_send(post.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => true,
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            });
        }

        state.posts.insert(id, post);
        id
    }

    /// Fetch a post, counting the view and recording the reader. Expired
    /// posts are invisible.
    pub fn get(&self, id: u64, reader: &str) -> Option<BoardPost> {
        let now = Utc::now();
        let mut state = self.state.write();
        let post = state.posts.get_mut(&id)?;
        if post.is_expired_at(now) {
            return None;
        }

        post.views += 1;
        if !post.accessed_by.iter().any(|r| r == reader) {
            post.accessed_by.push(reader.to_string());
        }
        Some(post.clone())
    }

    /// Query posts. Results sort by (priority desc, created-at desc).
    /// Expired posts in the touched categories are garbage collected.
    pub fn query(&self, query: &BoardQuery) -> Vec<BoardPost> {
        let now = Utc::now();
        let limit = if query.limit == 0 { 50 } else { query.limit };

        let mut state = self.state.write();
        state.posts.retain(|_, p| {
            // Lazy GC scoped to the categories this query touches.
            let in_scope = query.category.is_none_or(|c| p.category == c);
            !(in_scope && p.is_expired_at(now))
        });

        let mut results: Vec<BoardPost> = state
            .posts
            .values()
            .filter(|p| !p.is_expired_at(now))
            .filter(|p| query.category.is_none_or(|c| p.category == c))
            .filter(|p| query.author.as_deref().is_none_or(|a| p.author == a))
            .filter(|p| {
                query.tags.is_empty() || query.tags.iter().any(|t| p.tags.contains(t))
            })
            .filter(|p| query.since.is_none_or(|s| p.created_at >= s))
            .filter(|p| p.priority >= query.min_priority)
            .cloned()
            .collect();

        results.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(b.created_at.cmp(&a.created_at))
        });
        results.truncate(limit);
        results
    }

    /// Keyword search over title, category, and tags, ranked by relevance.
    pub fn search(&self, query: &str, limit: usize) -> Vec<BoardPost> {
        let now = Utc::now();
        let needle = query.to_lowercase();
        let state = self.state.read();

        let mut scored: Vec<(f64, BoardPost)> = state
            .posts
            .values()
            .filter(|p| !p.is_expired_at(now))
            .filter_map(|p| {
                let title_hit = p.title.to_lowercase().contains(&needle);
                let category_hit = p.category.as_str().contains(&needle);
                let tag_hit = p.tags.iter().any(|t| t.to_lowercase().contains(&needle));
                if !(title_hit || category_hit || tag_hit) {
                    return None;
                }
                Some((relevance(p, title_hit, category_hit, tag_hit, now), p.clone()))
            })
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.into_iter().take(limit).map(|(_, p)| p).collect()
    }

    /// Subscribe to a category. The returned receiver sees every post made
    /// to the category after this call, best-effort.
    pub fn subscribe(&self, category: Category) -> mpsc::Receiver<BoardPost> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        self.state
            .write()
            .subscribers
            .entry(category)
            .or_default()
            .push(tx);
        debug!(category = category.as_str(), "new board subscriber");
        rx
    }

    /// Remove every expired post. Returns how many were collected.
    pub fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        let mut state = self.state.write();
        let before = state.posts.len();
        state.posts.retain(|_, p| !p.is_expired_at(now));
        let removed = before - state.posts.len();
        if removed > 0 {
            info!(removed, "swept expired board posts");
        }
        removed
    }

    pub fn stats(&self) -> BoardStats {
        let now = Utc::now();
        let state = self.state.read();

        let live: Vec<&BoardPost> = state
            .posts
            .values()
            .filter(|p| !p.is_expired_at(now))
            .collect();

        let mut posts_by_category: HashMap<String, usize> = HashMap::new();
        let mut posts_by_author: HashMap<String, usize> = HashMap::new();
        for post in &live {
            *posts_by_category
                .entry(post.category.as_str().to_string())
                .or_default() += 1;
            *posts_by_author.entry(post.author.clone()).or_default() += 1;
        }

        let mut by_views: Vec<&&BoardPost> = live.iter().collect();
        by_views.sort_by(|a, b| b.views.cmp(&a.views));
        let most_viewed = by_views
            .into_iter()
            .take(5)
            .map(|p| (p.title.clone(), p.author.clone(), p.views))
            .collect();

        BoardStats {
            total_posts: live.len(),
            active_categories: posts_by_category.len(),
            posts_by_category,
            posts_by_author,
            total_subscribers: state.subscribers.values().map(Vec::len).sum(),
            most_viewed,
        }
    }
}

/// Search relevance: weighted field hits, a priority boost, and a recency
/// boost that decays to zero over ten hours.
fn relevance(
    post: &BoardPost,
    title_hit: bool,
    category_hit: bool,
    tag_hit: bool,
    now: DateTime<Utc>,
) -> f64 {
    let mut score = 0.0;
    if title_hit {
        score += 10.0;
    }
    if category_hit {
        score += 5.0;
    }
    if tag_hit {
        score += 3.0;
    }
    score += f64::from(post.priority) * 2.0;

    let age_hours = (now - post.created_at).num_seconds() as f64 / 3600.0;
    score += (10.0 - age_hours).max(0.0);
    score
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn board() -> KnowledgeBoard {
        KnowledgeBoard::new(24)
    }

    fn post_simple(board: &KnowledgeBoard, author: &str, category: Category, title: &str) -> u64 {
        board.post(
            author,
            category,
            title,
            json!({"note": title}),
            vec![],
            0,
            PostTtl::Default,
        )
    }

    #[test]
    fn test_post_ids_monotonic() {
        let board = board();
        let a = post_simple(&board, "maths", Category::PoolHealth, "first");
        let b = post_simple(&board, "maths", Category::PoolHealth, "second");
        assert!(b > a);
    }

    #[test]
    fn test_get_counts_views_and_dedups_readers() {
        let board = board();
        let id = post_simple(&board, "maths", Category::PoolHealth, "ratio drift");

        let first = board.get(id, "treasury").unwrap();
        assert_eq!(first.views, 1);
        let second = board.get(id, "treasury").unwrap();
        assert_eq!(second.views, 2);
        assert_eq!(second.accessed_by, vec!["treasury"]);

        let third = board.get(id, "pattern").unwrap();
        assert_eq!(third.accessed_by, vec!["treasury", "pattern"]);
    }

    #[test]
    fn test_get_content_roundtrip() {
        let board = board();
        let content = json!({"ratio": 1.15, "action": "add_liquidity"});
        let id = board.post(
            "maths",
            Category::PoolHealth,
            "rebalance needed",
            content.clone(),
            vec!["uniswap".into()],
            1,
            PostTtl::Hours(6),
        );
        let got = board.get(id, "queen").unwrap();
        assert_eq!(got.content, content);
    }

    #[test]
    fn test_unknown_category_coerces_to_general() {
        assert_eq!(Category::parse_lossy("no_such_thing"), Category::General);
        assert_eq!(Category::parse_lossy("gas_prices"), Category::GasPrices);
    }

    #[test]
    fn test_expired_posts_invisible_to_get_and_query() {
        let board = board();
        let id = board.post(
            "data",
            Category::MarketData,
            "stale",
            json!({}),
            vec![],
            2,
            PostTtl::Hours(-1),
        );

        assert!(board.get(id, "queen").is_none());
        let results = board.query(&BoardQuery::category(Category::MarketData));
        assert!(results.is_empty());
        assert!(board.search("stale", 10).is_empty());
    }

    #[test]
    fn test_indefinite_posts_survive_sweep() {
        let board = board();
        board.post(
            "queen",
            Category::General,
            "keep",
            json!({}),
            vec![],
            0,
            PostTtl::Indefinite,
        );
        board.post(
            "queen",
            Category::General,
            "drop",
            json!({}),
            vec![],
            0,
            PostTtl::Hours(-1),
        );

        assert_eq!(board.sweep_expired(), 1);
        let results = board.query(&BoardQuery::category(Category::General));
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].title, "keep");
    }

    #[test]
    fn test_query_sorts_priority_then_recency() {
        let board = board();
        board.post(
            "a",
            Category::GasPrices,
            "old-low",
            json!({}),
            vec![],
            0,
            PostTtl::Default,
        );
        board.post(
            "a",
            Category::GasPrices,
            "new-low",
            json!({}),
            vec![],
            0,
            PostTtl::Default,
        );
        board.post(
            "a",
            Category::GasPrices,
            "critical",
            json!({}),
            vec![],
            2,
            PostTtl::Default,
        );

        let results = board.query(&BoardQuery::category(Category::GasPrices));
        let titles: Vec<_> = results.iter().map(|p| p.title.as_str()).collect();
        assert_eq!(titles[0], "critical");
        assert_eq!(titles[1], "new-low");
        assert_eq!(titles[2], "old-low");
    }

    #[test]
    fn test_query_filters() {
        let board = board();
        board.post(
            "maths",
            Category::PoolHealth,
            "tagged",
            json!({}),
            vec!["urgent".into()],
            1,
            PostTtl::Default,
        );
        board.post(
            "treasury",
            Category::PoolHealth,
            "untagged",
            json!({}),
            vec![],
            0,
            PostTtl::Default,
        );

        let by_author = board.query(&BoardQuery {
            author: Some("maths".into()),
            limit: 10,
            ..Default::default()
        });
        assert_eq!(by_author.len(), 1);
        assert_eq!(by_author[0].title, "tagged");

        let by_tag = board.query(&BoardQuery {
            tags: vec!["urgent".into()],
            limit: 10,
            ..Default::default()
        });
        assert_eq!(by_tag.len(), 1);

        let by_priority = board.query(&BoardQuery {
            min_priority: 1,
            limit: 10,
            ..Default::default()
        });
        assert_eq!(by_priority.len(), 1);
    }

    #[test]
    fn test_search_title_outranks_tag() {
        let board = board();
        board.post(
            "a",
            Category::General,
            "liquidity report",
            json!({}),
            vec![],
            0,
            PostTtl::Default,
        );
        board.post(
            "a",
            Category::General,
            "daily digest",
            json!({}),
            vec!["liquidity".into()],
            0,
            PostTtl::Default,
        );

        let results = board.search("liquidity", 10);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].title, "liquidity report");
    }

    #[tokio::test]
    async fn test_subscription_fires_on_post() {
        let board = board();
        let mut rx = board.subscribe(Category::SecurityAlerts);

        post_simple(&board, "security", Category::SecurityAlerts, "injection spike");
        post_simple(&board, "data", Category::MarketData, "volume update");

        let received = rx.recv().await.unwrap();
        assert_eq!(received.title, "injection spike");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_stats() {
        let board = board();
        let id = post_simple(&board, "maths", Category::PoolHealth, "a");
        post_simple(&board, "maths", Category::GasPrices, "b");
        post_simple(&board, "data", Category::GasPrices, "c");
        board.get(id, "queen");
        let _rx = board.subscribe(Category::GasPrices);

        let stats = board.stats();
        assert_eq!(stats.total_posts, 3);
        assert_eq!(stats.active_categories, 2);
        assert_eq!(stats.posts_by_author["maths"], 2);
        assert_eq!(stats.total_subscribers, 1);
        assert_eq!(stats.most_viewed[0].2, 1);
    }
}
