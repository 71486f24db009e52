use inbox_triage_core::{Category, Priority, Record, Sentiment, Status};
use serde::{Deserialize, Serialize};
use time::{Date, Duration, OffsetDateTime};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusCounts {
    pub pending: usize,
    pub in_progress: usize,
    pub resolved: usize,
    pub closed: usize,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SentimentCounts {
    pub positive: usize,
    pub negative: usize,
    pub neutral: usize,
}

impl SentimentCounts {
    fn add(&mut self, sentiment: Sentiment) {
        match sentiment {
            Sentiment::Positive => self.positive += 1,
            Sentiment::Negative => self.negative += 1,
            Sentiment::Neutral => self.neutral += 1,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PriorityCounts {
    pub urgent: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CategoryCounts {
    pub account: usize,
    pub billing: usize,
    pub technical: usize,
    pub feature: usize,
    pub general: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Stats {
    pub total: usize,
    pub by_status: StatusCounts,
    /// Records labelled `urgent` or `high`.
    pub urgent_count: usize,
    pub sentiment_counts: SentimentCounts,
    /// Percentage of records with status `resolved`; 0 for an empty collection.
    pub resolution_rate: f64,
    pub by_priority: PriorityCounts,
    pub by_category: CategoryCounts,
    pub starred_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CategoryStats {
    pub category: Category,
    pub total: usize,
    pub urgent: usize,
    pub sentiment: SentimentCounts,
    pub resolved: usize,
    pub resolution_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DailySentiment {
    /// Calendar day as `YYYY-MM-DD`.
    pub day: String,
    pub positive: usize,
    pub negative: usize,
    pub neutral: usize,
}

#[allow(clippy::cast_precision_loss)]
fn percentage(part: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    part as f64 / total as f64 * 100.0
}

fn is_urgent(priority: Priority) -> bool {
    matches!(priority, Priority::Urgent | Priority::High)
}

#[must_use]
pub fn aggregate(snapshot: &[Record]) -> Stats {
    let mut stats = Stats { total: snapshot.len(), ..Stats::default() };

    for record in snapshot {
        match record.status {
            Status::Pending => stats.by_status.pending += 1,
            Status::InProgress => stats.by_status.in_progress += 1,
            Status::Resolved => stats.by_status.resolved += 1,
            Status::Closed => stats.by_status.closed += 1,
        }
        match record.priority {
            Priority::Urgent => stats.by_priority.urgent += 1,
            Priority::High => stats.by_priority.high += 1,
            Priority::Medium => stats.by_priority.medium += 1,
            Priority::Low => stats.by_priority.low += 1,
        }
        match record.category {
            Category::Account => stats.by_category.account += 1,
            Category::Billing => stats.by_category.billing += 1,
            Category::Technical => stats.by_category.technical += 1,
            Category::Feature => stats.by_category.feature += 1,
            Category::General => stats.by_category.general += 1,
        }
        stats.sentiment_counts.add(record.sentiment);
        if is_urgent(record.priority) {
            stats.urgent_count += 1;
        }
        if record.starred {
            stats.starred_count += 1;
        }
    }

    stats.resolution_rate = percentage(stats.by_status.resolved, stats.total);
    stats
}

/// Per-category totals, largest category first. Categories with no records are omitted.
#[must_use]
pub fn category_breakdown(snapshot: &[Record]) -> Vec<CategoryStats> {
    let mut rows = Category::ALL
        .iter()
        .map(|category| {
            let mut row = CategoryStats {
                category: *category,
                total: 0,
                urgent: 0,
                sentiment: SentimentCounts::default(),
                resolved: 0,
                resolution_rate: 0.0,
            };
            for record in snapshot.iter().filter(|record| record.category == *category) {
                row.total += 1;
                row.sentiment.add(record.sentiment);
                if is_urgent(record.priority) {
                    row.urgent += 1;
                }
                if record.status == Status::Resolved {
                    row.resolved += 1;
                }
            }
            row.resolution_rate = percentage(row.resolved, row.total);
            row
        })
        .filter(|row| row.total > 0)
        .collect::<Vec<_>>();

    rows.sort_by(|left, right| {
        right
            .total
            .cmp(&left.total)
            .then_with(|| left.category.as_str().cmp(right.category.as_str()))
    });
    rows
}

/// Sentiment counts for each of the last `days` calendar days (in `now`'s offset), newest
/// first. Days without records are present with zero counts.
#[must_use]
pub fn daily_sentiment(
    snapshot: &[Record],
    days: u16,
    now: OffsetDateTime,
) -> Vec<DailySentiment> {
    let today = now.date();
    let local_day = |record: &Record| record.received_at.to_offset(now.offset()).date();

    (0..i64::from(days))
        .filter_map(|back| today.checked_sub(Duration::days(back)))
        .map(|day: Date| {
            let mut counts = SentimentCounts::default();
            for record in snapshot.iter().filter(|record| local_day(record) == day) {
                counts.add(record.sentiment);
            }
            DailySentiment {
                day: day.to_string(),
                positive: counts.positive,
                negative: counts.negative,
                neutral: counts.neutral,
            }
        })
        .collect()
}
