//! Profile Knowledge Base data: the candidate's verified career facts.
//!
//! Facts are the only permissible grounding for generated resume content.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A calendar month, serialized as `YYYY-MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct YearMonth(NaiveDate);

impl YearMonth {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, 1).map(YearMonth)
    }

    pub fn year(&self) -> i32 {
        self.0.year()
    }

    /// Resume display form, e.g. `Mar 2021`.
    pub fn display_short(&self) -> String {
        self.0.format("%b %Y").to_string()
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m"))
    }
}

impl FromStr for YearMonth {
    type Err = chrono::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NaiveDate::parse_from_str(&format!("{}-01", s.trim()), "%Y-%m-%d").map(YearMonth)
    }
}

impl Serialize for YearMonth {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for YearMonth {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Employment date range. `end = None` means the role is current.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: YearMonth,
    #[serde(default)]
    pub end: Option<YearMonth>,
}

impl DateRange {
    pub fn is_current(&self) -> bool {
        self.end.is_none()
    }

    /// Latest year the role covers, `None` for a current role.
    pub fn last_year(&self) -> Option<i32> {
        self.end.map(|e| e.year())
    }

    /// Ordering key for recency: current roles first, then latest end, then latest start.
    pub fn recency_key(&self) -> (bool, Option<YearMonth>, YearMonth) {
        (self.end.is_none(), self.end, self.start)
    }

    /// Resume display form, e.g. `Jan 2019 - Dec 2021` or `Mar 2022 - Present`.
    pub fn display(&self) -> String {
        let end = self
            .end
            .map(|e| e.display_short())
            .unwrap_or_else(|| "Present".to_string());
        format!("{} - {}", self.start.display_short(), end)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactKind {
    Bullet,
    Skill,
    Tool,
    Metric,
}

/// A unit of verified career history, tagged with its source role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileFact {
    pub id: String,
    /// Owning role. Skills and tools may be role-independent.
    #[serde(default)]
    pub role_id: Option<String>,
    pub kind: FactKind,
    /// Literal text as recorded in the PKB.
    pub text: String,
    #[serde(default)]
    pub metrics: Vec<String>,
}

impl ProfileFact {
    /// Number of concrete numeric tokens backing this fact. Used as the
    /// "metric specificity" tie-break when several facts support a requirement.
    pub fn metric_specificity(&self) -> usize {
        let in_text = self
            .text
            .split_whitespace()
            .filter(|w| w.chars().any(|c| c.is_ascii_digit()))
            .count();
        in_text + self.metrics.len()
    }

    pub fn has_metric(&self) -> bool {
        self.metric_specificity() > 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileRole {
    pub id: String,
    pub title: String,
    pub company: String,
    pub dates: DateRange,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
}

/// On-disk / wire shape of a Profile Knowledge Base (`pkb.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileDocument {
    /// Opaque version string; changes whenever the PKB is rebuilt.
    pub version: String,
    pub candidate: Candidate,
    #[serde(default)]
    pub roles: Vec<ProfileRole>,
    #[serde(default)]
    pub facts: Vec<ProfileFact>,
    #[serde(default)]
    pub education: Vec<String>,
    #[serde(default)]
    pub certifications: Vec<String>,
}
