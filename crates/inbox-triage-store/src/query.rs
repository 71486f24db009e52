//! Filtering, sorting and pagination over a snapshot.

use std::cmp::Ordering;

use inbox_triage_core::{Category, Priority, Record, Sentiment, Status};
use serde::{Deserialize, Serialize};
use time::{Date, Duration, Month, OffsetDateTime, Time};

pub const DEFAULT_PAGE_SIZE: usize = 10;

/// Labels that can be parsed from user input into a facet.
pub trait FacetLabel: Copy + Eq {
    fn parse_label(value: &str) -> Option<Self>;
}

impl FacetLabel for Priority {
    fn parse_label(value: &str) -> Option<Self> {
        Self::parse(value)
    }
}

impl FacetLabel for Sentiment {
    fn parse_label(value: &str) -> Option<Self> {
        Self::parse(value)
    }
}

impl FacetLabel for Status {
    fn parse_label(value: &str) -> Option<Self> {
        Self::parse(value)
    }
}

impl FacetLabel for Category {
    fn parse_label(value: &str) -> Option<Self> {
        Self::parse(value)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Facet<T> {
    #[default]
    All,
    Only(T),
}

impl<T: FacetLabel> Facet<T> {
    /// Unknown values and `all` both mean "no constraint".
    #[must_use]
    pub fn parse(value: &str) -> Self {
        T::parse_label(value).map_or(Self::All, Self::Only)
    }

    #[must_use]
    pub fn matches(&self, value: T) -> bool {
        match self {
            Self::All => true,
            Self::Only(expected) => *expected == value,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DateRange {
    #[default]
    All,
    Today,
    Yesterday,
    Last7Days,
    Last30Days,
    ThisMonth,
    LastMonth,
}

fn first_of_month(year: i32, month: Month) -> Option<Date> {
    Date::from_calendar_date(year, month, 1).ok()
}

impl DateRange {
    /// Case and separator insensitive: `lastMonth`, `last_month` and `last-month` are the same
    /// bucket. Anything unrecognized is [`DateRange::All`].
    #[must_use]
    pub fn parse(value: &str) -> Self {
        let normalized = value
            .chars()
            .filter(|c| !matches!(c, '_' | '-' | ' '))
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "today" => Self::Today,
            "yesterday" => Self::Yesterday,
            "last7days" | "week" => Self::Last7Days,
            "last30days" => Self::Last30Days,
            "thismonth" | "month" => Self::ThisMonth,
            "lastmonth" => Self::LastMonth,
            _ => Self::All,
        }
    }

    /// Whether `at` falls in this bucket, with calendar boundaries taken in `now`'s offset.
    #[must_use]
    pub fn contains(self, at: OffsetDateTime, now: OffsetDateTime) -> bool {
        let start_of_today = now.replace_time(Time::MIDNIGHT);
        let this_month = first_of_month(now.year(), now.month());
        let previous_month = match now.month() {
            Month::January => first_of_month(now.year() - 1, Month::December),
            month => first_of_month(now.year(), month.previous()),
        };
        let at_midnight = |date: Date| date.with_time(Time::MIDNIGHT).assume_offset(now.offset());

        match self {
            Self::All => true,
            Self::Today => at >= start_of_today,
            Self::Yesterday => at >= start_of_today - Duration::days(1) && at < start_of_today,
            Self::Last7Days => at >= now - Duration::days(7),
            Self::Last30Days => at >= now - Duration::days(30),
            Self::ThisMonth => this_month.is_some_and(|first| at >= at_midnight(first)),
            Self::LastMonth => match (previous_month, this_month) {
                (Some(start), Some(end)) => at >= at_midnight(start) && at < at_midnight(end),
                _ => false,
            },
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Filters {
    #[serde(default)]
    pub search: String,
    #[serde(default)]
    pub priority: Facet<Priority>,
    #[serde(default)]
    pub sentiment: Facet<Sentiment>,
    #[serde(default)]
    pub status: Facet<Status>,
    #[serde(default)]
    pub category: Facet<Category>,
    #[serde(default)]
    pub date_range: DateRange,
}

impl Filters {
    #[must_use]
    pub fn matches(&self, record: &Record, now: OffsetDateTime) -> bool {
        self.priority.matches(record.priority)
            && self.sentiment.matches(record.sentiment)
            && self.status.matches(record.status)
            && self.category.matches(record.category)
            && self.date_range.contains(record.received_at, now)
            && matches_search(&self.search, record)
    }
}

fn matches_search(search: &str, record: &Record) -> bool {
    let needle = search.to_lowercase();
    if needle.is_empty() {
        return true;
    }
    [&record.subject, &record.body, &record.sender]
        .iter()
        .any(|field| field.to_lowercase().contains(&needle))
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    #[default]
    ReceivedAt,
    Sender,
    Subject,
    Priority,
    Sentiment,
    Category,
    Status,
    Starred,
    Id,
}

impl SortKey {
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "received_at" | "date" | "timestamp" => Some(Self::ReceivedAt),
            "sender" | "from" => Some(Self::Sender),
            "subject" => Some(Self::Subject),
            "priority" => Some(Self::Priority),
            "sentiment" => Some(Self::Sentiment),
            "category" => Some(Self::Category),
            "status" => Some(Self::Status),
            "starred" => Some(Self::Starred),
            "id" => Some(Self::Id),
            _ => None,
        }
    }

    fn compare(self, left: &Record, right: &Record) -> Ordering {
        match self {
            Self::ReceivedAt => left.received_at.cmp(&right.received_at),
            Self::Sender => compare_text(&left.sender, &right.sender),
            Self::Subject => compare_text(&left.subject, &right.subject),
            Self::Priority => left.priority.rank().cmp(&right.priority.rank()),
            Self::Sentiment => left.sentiment.as_str().cmp(right.sentiment.as_str()),
            Self::Category => left.category.as_str().cmp(right.category.as_str()),
            // Declaration order of `Status` is the workflow order.
            Self::Status => left.status.cmp(&right.status),
            Self::Starred => left.starred.cmp(&right.starred),
            Self::Id => left.id.cmp(&right.id),
        }
    }
}

fn compare_text(left: &str, right: &str) -> Ordering {
    left.chars().flat_map(char::to_lowercase).cmp(right.chars().flat_map(char::to_lowercase))
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "asc" | "ascending" => Some(Self::Asc),
            "desc" | "descending" => Some(Self::Desc),
            _ => None,
        }
    }

    #[must_use]
    pub fn flipped(self) -> Self {
        match self {
            Self::Asc => Self::Desc,
            Self::Desc => Self::Asc,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Query {
    #[serde(default)]
    pub filters: Filters,
    #[serde(default)]
    pub sort_key: SortKey,
    #[serde(default)]
    pub sort_order: SortOrder,
    pub page: usize,
    pub page_size: usize,
}

impl Default for Query {
    fn default() -> Self {
        Self {
            filters: Filters::default(),
            sort_key: SortKey::default(),
            sort_order: SortOrder::default(),
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Number of records that passed the filters, across all pages.
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
    pub page_count: usize,
}

/// Filter, sort and slice a snapshot. Pure; `now` anchors the date buckets.
#[must_use]
pub fn query(snapshot: &[Record], query: &Query, now: OffsetDateTime) -> Page<Record> {
    let mut matched =
        snapshot.iter().filter(|record| query.filters.matches(record, now)).collect::<Vec<_>>();

    let key = query.sort_key;
    match query.sort_order {
        SortOrder::Asc => matched.sort_by(|left, right| key.compare(left, right)),
        SortOrder::Desc => matched.sort_by(|left, right| key.compare(left, right).reverse()),
    }

    let page_size = if query.page_size == 0 { DEFAULT_PAGE_SIZE } else { query.page_size };
    let total = matched.len();
    let page_count = total.div_ceil(page_size).max(1);
    let page = query.page.clamp(1, page_count);
    let start = (page - 1) * page_size;
    let end = (start + page_size).min(total);

    let items = matched
        .get(start..end)
        .unwrap_or_default()
        .iter()
        .map(|record| (*record).clone())
        .collect();
    Page { items, total, page, page_size, page_count }
}

/// View-model wrapper around [`Query`]: changing any filter or the sort resets to page 1.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryState {
    query: Query,
}

impl QueryState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn query(&self) -> &Query {
        &self.query
    }

    #[must_use]
    pub fn page(&self) -> usize {
        self.query.page
    }

    pub fn set_search(&mut self, search: impl Into<String>) {
        self.query.filters.search = search.into();
        self.query.page = 1;
    }

    pub fn set_priority(&mut self, facet: Facet<Priority>) {
        self.query.filters.priority = facet;
        self.query.page = 1;
    }

    pub fn set_sentiment(&mut self, facet: Facet<Sentiment>) {
        self.query.filters.sentiment = facet;
        self.query.page = 1;
    }

    pub fn set_status(&mut self, facet: Facet<Status>) {
        self.query.filters.status = facet;
        self.query.page = 1;
    }

    pub fn set_category(&mut self, facet: Facet<Category>) {
        self.query.filters.category = facet;
        self.query.page = 1;
    }

    pub fn set_date_range(&mut self, range: DateRange) {
        self.query.filters.date_range = range;
        self.query.page = 1;
    }

    pub fn set_sort(&mut self, key: SortKey, order: SortOrder) {
        self.query.sort_key = key;
        self.query.sort_order = order;
        self.query.page = 1;
    }

    /// Selecting the active key again flips the order; a new key starts descending.
    pub fn toggle_sort(&mut self, key: SortKey) {
        let order = if self.query.sort_key == key {
            self.query.sort_order.flipped()
        } else {
            SortOrder::Desc
        };
        self.set_sort(key, order);
    }

    pub fn set_page_size(&mut self, page_size: usize) {
        self.query.page_size = page_size;
        self.query.page = 1;
    }

    /// Page changes are taken as given and clamped when the query runs.
    pub fn set_page(&mut self, page: usize) {
        self.query.page = page;
    }

    /// Run the query and remember the clamped page.
    pub fn run(&mut self, snapshot: &[Record], now: OffsetDateTime) -> Page<Record> {
        let page = query(snapshot, &self.query, now);
        self.query.page = page.page;
        page
    }
}
