use crate::domain::{AttendanceStatus, CommentKind};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Half-up 1-decimal rounding used for every reported percentage:
/// `floor(10*x + 0.5) / 10`
pub fn round_off_1_decimal(x: f64) -> f64 {
    ((10.0 * x) + 0.5).floor() / 10.0
}

pub fn mean<I>(values: I) -> Option<f64>
where
    I: IntoIterator<Item = f64>,
{
    let mut sum = 0.0_f64;
    let mut n = 0_usize;
    for v in values {
        sum += v;
        n += 1;
    }
    if n == 0 {
        None
    } else {
        Some(sum / (n as f64))
    }
}

pub fn percent(score: f64, max: f64) -> Option<f64> {
    if max > 0.0 {
        Some(100.0 * score / max)
    } else {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceSummary {
    pub present: usize,
    pub late: usize,
    pub absent: usize,
    pub excused: usize,
    pub rate: Option<f64>,
}

impl AttendanceSummary {
    /// Unrounded attendance percentage; `rate` is the display value.
    pub fn exact_rate(&self) -> Option<f64> {
        let attended = self.present + self.late;
        percent(attended as f64, (attended + self.absent) as f64)
    }
}

pub fn attendance_summary<I>(statuses: I) -> AttendanceSummary
where
    I: IntoIterator<Item = AttendanceStatus>,
{
    let mut out = AttendanceSummary::default();
    for s in statuses {
        match s {
            AttendanceStatus::Present => out.present += 1,
            AttendanceStatus::Late => out.late += 1,
            AttendanceStatus::Absent => out.absent += 1,
            AttendanceStatus::Excused => out.excused += 1,
        }
    }
    out.rate = out.exact_rate().map(round_off_1_decimal);
    out
}

const SENTIMENT_THRESHOLD: f64 = 0.2;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SentimentSummary {
    pub positive: usize,
    pub negative: usize,
    pub neutral: usize,
    pub total: usize,
    pub positive_share: f64,
    pub net_score: f64,
    pub label: &'static str,
}

impl SentimentSummary {
    /// Unrounded `(positive - negative) / total`; `net_score` is the display value.
    pub fn net(&self) -> Option<f64> {
        if self.total == 0 {
            return None;
        }
        Some((self.positive as f64 - self.negative as f64) / self.total as f64)
    }
}

pub fn comment_sentiment<I>(kinds: I) -> SentimentSummary
where
    I: IntoIterator<Item = CommentKind>,
{
    let (mut positive, mut negative, mut neutral) = (0_usize, 0_usize, 0_usize);
    for k in kinds {
        match k {
            CommentKind::Positive => positive += 1,
            CommentKind::Negative => negative += 1,
            CommentKind::Neutral => neutral += 1,
        }
    }
    let total = positive + negative + neutral;
    if total == 0 {
        return SentimentSummary {
            positive,
            negative,
            neutral,
            total,
            positive_share: 0.0,
            net_score: 0.0,
            label: "none",
        };
    }
    let net_score = (positive as f64 - negative as f64) / (total as f64);
    let label = if net_score >= SENTIMENT_THRESHOLD {
        "positive"
    } else if net_score <= -SENTIMENT_THRESHOLD {
        "negative"
    } else {
        "neutral"
    };
    SentimentSummary {
        positive,
        negative,
        neutral,
        total,
        positive_share: round_off_1_decimal(100.0 * positive as f64 / total as f64),
        net_score: ((net_score * 1000.0).round()) / 1000.0,
        label,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GradeWeights {
    pub topic: f64,
    pub section: f64,
    pub block: f64,
    pub modul: f64,
}

impl Default for GradeWeights {
    fn default() -> Self {
        Self {
            topic: 0.20,
            section: 0.20,
            block: 0.25,
            modul: 0.35,
        }
    }
}

impl GradeWeights {
    /// Missing keys keep their defaults; negative or non-numeric values are rejected.
    pub fn from_json(raw: &serde_json::Value) -> Result<Self, String> {
        let Some(obj) = raw.as_object() else {
            return Err("weights must be an object".to_string());
        };
        let mut w = Self::default();
        for (key, slot) in [
            ("topic", &mut w.topic),
            ("section", &mut w.section),
            ("block", &mut w.block),
            ("modul", &mut w.modul),
        ] {
            let Some(v) = obj.get(key) else { continue };
            let Some(n) = v.as_f64() else {
                return Err(format!("weights.{} must be a number", key));
            };
            if !n.is_finite() || n < 0.0 {
                return Err(format!("weights.{} must be >= 0", key));
            }
            *slot = n;
        }
        if let Some(unknown) = obj
            .keys()
            .find(|k| !matches!(k.as_str(), "topic" | "section" | "block" | "modul"))
        {
            return Err(format!("unknown weight key: {}", unknown));
        }
        Ok(w)
    }
}

/// Per-component percentages for one student in one subject.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeComponents {
    pub topic: Option<f64>,
    pub section: Option<f64>,
    pub block: Option<f64>,
    pub modul: Option<f64>,
}

impl GradeComponents {
    pub fn rounded(self) -> Self {
        Self {
            topic: self.topic.map(round_off_1_decimal),
            section: self.section.map(round_off_1_decimal),
            block: self.block.map(round_off_1_decimal),
            modul: self.modul.map(round_off_1_decimal),
        }
    }
}

/// Weighted mean over the components that are present.
pub fn final_grade(components: &GradeComponents, weights: &GradeWeights) -> Option<f64> {
    let pairs = [
        (components.topic, weights.topic),
        (components.section, weights.section),
        (components.block, weights.block),
        (components.modul, weights.modul),
    ];
    let mut sum = 0.0_f64;
    let mut denom = 0.0_f64;
    let mut present: Vec<f64> = Vec::new();
    for (value, weight) in pairs {
        let Some(v) = value else { continue };
        present.push(v);
        if weight > 0.0 {
            sum += v * weight;
            denom += weight;
        }
    }
    let raw = if denom > 0.0 {
        Some(sum / denom)
    } else {
        mean(present)
    };
    raw.map(round_off_1_decimal)
}

/// Five-point scale mark for a final percentage.
pub fn letter_grade(final_percent: f64) -> u8 {
    if final_percent >= 86.0 {
        5
    } else if final_percent >= 71.0 {
        4
    } else if final_percent >= 56.0 {
        3
    } else {
        2
    }
}

pub const MODUL_TEST_MAX: f64 = 30.0;
pub const MODUL_WRITTEN_MAX: f64 = 40.0;
pub const MODUL_ORAL_MAX: f64 = 30.0;
pub const MODUL_MAX: f64 = MODUL_TEST_MAX + MODUL_WRITTEN_MAX + MODUL_ORAL_MAX;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModulScores {
    pub test: f64,
    pub written: f64,
    pub oral: f64,
}

impl ModulScores {
    pub fn validate(&self) -> Result<(), String> {
        for (name, value, cap) in [
            ("testScore", self.test, MODUL_TEST_MAX),
            ("writtenScore", self.written, MODUL_WRITTEN_MAX),
            ("oralScore", self.oral, MODUL_ORAL_MAX),
        ] {
            if !value.is_finite() || value < 0.0 || value > cap {
                return Err(format!("{} must be between 0 and {}", name, cap));
            }
        }
        Ok(())
    }

    /// Out of 100.
    pub fn total(&self) -> f64 {
        self.test + self.written + self.oral
    }
}

pub const DTM_QUESTIONS_PER_BLOCK: i64 = 30;
pub const DTM_MANDATORY_POINTS: f64 = 1.1;
pub const DTM_FIRST_SPECIALIZED_POINTS: f64 = 3.1;
pub const DTM_SECOND_SPECIALIZED_POINTS: f64 = 2.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DtmCounts {
    pub mandatory: i64,
    pub first_specialized: i64,
    pub second_specialized: i64,
}

impl DtmCounts {
    pub fn validate(&self) -> Result<(), String> {
        for (name, value) in [
            ("mandatoryCorrect", self.mandatory),
            ("firstSpecializedCorrect", self.first_specialized),
            ("secondSpecializedCorrect", self.second_specialized),
        ] {
            if !(0..=DTM_QUESTIONS_PER_BLOCK).contains(&value) {
                return Err(format!(
                    "{} must be between 0 and {}",
                    name, DTM_QUESTIONS_PER_BLOCK
                ));
            }
        }
        Ok(())
    }

    pub fn score(&self) -> f64 {
        round_off_1_decimal(
            self.mandatory as f64 * DTM_MANDATORY_POINTS
                + self.first_specialized as f64 * DTM_FIRST_SPECIALIZED_POINTS
                + self.second_specialized as f64 * DTM_SECOND_SPECIALIZED_POINTS,
        )
    }
}

pub fn dtm_max_score() -> f64 {
    DtmCounts {
        mandatory: DTM_QUESTIONS_PER_BLOCK,
        first_specialized: DTM_QUESTIONS_PER_BLOCK,
        second_specialized: DTM_QUESTIONS_PER_BLOCK,
    }
    .score()
}

#[derive(Debug, Clone, PartialEq)]
pub struct RankInput {
    pub student_id: String,
    pub display_name: String,
    pub score: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedRow {
    pub rank: Option<usize>,
    pub student_id: String,
    pub display_name: String,
    pub score: Option<f64>,
}

/// Competition ranking ("1224"): ties share a rank, the next rank skips.
/// Rows without a score follow the ranked rows, ordered by name.
pub fn rank_competition(mut rows: Vec<RankInput>) -> Vec<RankedRow> {
    rows.sort_by(|a, b| match (a.score, b.score) {
        (Some(x), Some(y)) => y
            .partial_cmp(&x)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.display_name.cmp(&b.display_name)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.display_name.cmp(&b.display_name),
    });

    let mut out: Vec<RankedRow> = Vec::with_capacity(rows.len());
    let mut prev: Option<(f64, usize)> = None;
    for (i, r) in rows.into_iter().enumerate() {
        let rank = r.score.map(|s| match prev {
            Some((p, rank)) if p == s => rank,
            _ => {
                prev = Some((s, i + 1));
                i + 1
            }
        });
        out.push(RankedRow {
            rank,
            student_id: r.student_id,
            display_name: r.display_name,
            score: r.score,
        });
    }
    out
}

pub const RATING_GRADE_WEIGHT: f64 = 0.7;
pub const RATING_ATTENDANCE_WEIGHT: f64 = 0.2;
pub const RATING_SENTIMENT_WEIGHT: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RatingBreakdown {
    pub score: f64,
    pub grade_component: Option<f64>,
    pub attendance_component: Option<f64>,
    pub sentiment_component: Option<f64>,
}

/// `net_sentiment` is in [-1, 1] and mapped onto 0..=100 before weighting.
pub fn rating_score(
    grade: Option<f64>,
    attendance: Option<f64>,
    net_sentiment: Option<f64>,
) -> RatingBreakdown {
    let sentiment = net_sentiment.map(|n| 50.0 * (n.clamp(-1.0, 1.0) + 1.0));
    let mut sum = 0.0_f64;
    let mut denom = 0.0_f64;
    for (value, weight) in [
        (grade, RATING_GRADE_WEIGHT),
        (attendance, RATING_ATTENDANCE_WEIGHT),
        (sentiment, RATING_SENTIMENT_WEIGHT),
    ] {
        if let Some(v) = value {
            sum += v * weight;
            denom += weight;
        }
    }
    let score = if denom > 0.0 { sum / denom } else { 0.0 };
    RatingBreakdown {
        score: round_off_1_decimal(score),
        grade_component: grade.map(round_off_1_decimal),
        attendance_component: attendance.map(round_off_1_decimal),
        sentiment_component: sentiment.map(round_off_1_decimal),
    }
}
