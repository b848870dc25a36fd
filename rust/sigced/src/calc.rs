use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// Grading terms that take part in the rollup. The "Anual" label used for
/// observations is not one of them.
pub const AGGREGATION_PERIODS: [i64; 3] = [1, 2, 3];

pub type CompetencyMap = BTreeMap<String, f64>;

pub fn is_aggregation_period(period: i64) -> bool {
    AGGREGATION_PERIODS.contains(&period)
}

/// Nearest integer, halves rounded up. Only report models call this; the
/// rollup itself keeps full precision between stages.
pub fn round_for_display(x: f64) -> f64 {
    (x + 0.5).floor()
}

#[derive(Debug, Clone, Serialize, thiserror::Error)]
#[error("{code}: {message}")]
pub struct CalcError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl CalcError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn db(e: rusqlite::Error) -> Self {
        Self::new("db_query_failed", e.to_string())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregationMode {
    #[default]
    Average,
    Sum,
}

impl AggregationMode {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "average" | "avg" => Some(AggregationMode::Average),
            "sum" => Some(AggregationMode::Sum),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AggregationMode::Average => "average",
            AggregationMode::Sum => "sum",
        }
    }

    fn combine<I>(self, values: I) -> f64
    where
        I: IntoIterator<Item = f64>,
    {
        let mut sum = 0.0_f64;
        let mut count = 0_usize;
        for v in values {
            sum += v;
            count += 1;
        }
        match self {
            AggregationMode::Sum => sum,
            AggregationMode::Average if count > 0 => sum / (count as f64),
            AggregationMode::Average => 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Primary,
    Secondary,
}

impl Level {
    /// Anything that is not explicitly primary grades on four competencies.
    pub fn from_db(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("primary") {
            Level::Primary
        } else {
            Level::Secondary
        }
    }

    pub fn competency_labels(self) -> Vec<String> {
        let n = match self {
            Level::Primary => 3,
            Level::Secondary => 4,
        };
        (1..=n).map(|i| format!("C{}", i)).collect()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitDef {
    pub id: String,
    pub course_id: String,
    pub period: i64,
    pub name: String,
    pub sort_order: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CriterionDef {
    pub id: String,
    pub unit_id: String,
    pub idx: i64,
    pub description: String,
    pub max_value: f64,
    pub competency: Option<String>,
}

/// Everything the rollup reads for one course. Grade keys are
/// (student, unit, criterion); recovery keys are (student, period, competency).
#[derive(Debug, Clone, Default)]
pub struct CourseSnapshot {
    pub course_id: String,
    pub competency_labels: Vec<String>,
    pub units: Vec<UnitDef>,
    pub criteria: Vec<CriterionDef>,
    pub grades: HashMap<(String, String, String), f64>,
    pub recovery_grades: HashMap<(String, i64, String), f64>,
}

impl CourseSnapshot {
    pub fn unit(&self, unit_id: &str) -> Option<&UnitDef> {
        self.units.iter().find(|u| u.id == unit_id)
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.competency_labels.iter().any(|l| l == label)
    }

    pub fn units_in_period(&self, period: i64) -> impl Iterator<Item = &UnitDef> + '_ {
        self.units.iter().filter(move |u| u.period == period)
    }

    pub fn criteria_of_unit<'a>(
        &'a self,
        unit_id: &'a str,
    ) -> impl Iterator<Item = &'a CriterionDef> + 'a {
        self.criteria.iter().filter(move |c| c.unit_id == unit_id)
    }

    pub fn grade(&self, student_id: &str, criterion: &CriterionDef) -> Option<f64> {
        self.grades
            .get(&(
                student_id.to_string(),
                criterion.unit_id.clone(),
                criterion.id.clone(),
            ))
            .copied()
    }

    pub fn recovery_grade(&self, student_id: &str, period: i64, label: &str) -> Option<f64> {
        self.recovery_grades
            .get(&(student_id.to_string(), period, label.to_string()))
            .copied()
    }
}

/// Mean of the strictly positive values; 0 when none qualify. Zero and
/// missing contributions never grow the denominator.
pub fn positive_average<I>(values: I) -> f64
where
    I: IntoIterator<Item = f64>,
{
    let mut sum = 0.0_f64;
    let mut count = 0_usize;
    for v in values {
        if v > 0.0 {
            sum += v;
            count += 1;
        }
    }
    if count > 0 {
        sum / (count as f64)
    } else {
        0.0
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RollupEngine<'a> {
    snapshot: &'a CourseSnapshot,
    mode: AggregationMode,
}

impl<'a> RollupEngine<'a> {
    pub fn new(snapshot: &'a CourseSnapshot, mode: AggregationMode) -> Self {
        Self { snapshot, mode }
    }

    pub fn snapshot(&self) -> &'a CourseSnapshot {
        self.snapshot
    }

    fn zero_map(&self) -> CompetencyMap {
        self.snapshot
            .competency_labels
            .iter()
            .map(|l| (l.clone(), 0.0))
            .collect()
    }

    /// Average (or sum) of the recorded grades in the unit. Ungraded criteria
    /// are skipped; an unknown unit yields 0.
    pub fn unit_total(&self, student_id: &str, unit_id: &str) -> f64 {
        self.mode.combine(
            self.snapshot
                .criteria_of_unit(unit_id)
                .filter_map(|c| self.snapshot.grade(student_id, c)),
        )
    }

    fn unit_competency_subtotal(&self, student_id: &str, unit_id: &str, label: &str) -> f64 {
        self.mode.combine(
            self.snapshot
                .criteria_of_unit(unit_id)
                .filter(|c| c.competency.as_deref() == Some(label))
                .filter_map(|c| self.snapshot.grade(student_id, c)),
        )
    }

    /// One entry per course label, including labels with no criteria.
    /// Criteria tagged with a label outside the course set never contribute.
    pub fn unit_competency_subtotals(&self, student_id: &str, unit_id: &str) -> CompetencyMap {
        self.snapshot
            .competency_labels
            .iter()
            .map(|l| {
                (
                    l.clone(),
                    self.unit_competency_subtotal(student_id, unit_id, l),
                )
            })
            .collect()
    }

    fn period_competency_average(&self, student_id: &str, period: i64, label: &str) -> f64 {
        positive_average(
            self.snapshot
                .units_in_period(period)
                .map(|u| self.unit_competency_subtotal(student_id, &u.id, label)),
        )
    }

    /// Per-label mean of the non-zero unit subtotals in `period`.
    ///
    /// `period` must be 1, 2 or 3. Debug builds assert it; release builds
    /// return an all-zero map.
    pub fn period_competency_averages(&self, student_id: &str, period: i64) -> CompetencyMap {
        debug_assert!(
            is_aggregation_period(period),
            "period {} is not an aggregation period",
            period
        );
        if !is_aggregation_period(period) {
            return self.zero_map();
        }
        self.snapshot
            .competency_labels
            .iter()
            .map(|l| {
                (
                    l.clone(),
                    self.period_competency_average(student_id, period, l),
                )
            })
            .collect()
    }

    /// Computed period average unless a recovery grade exists, in which case
    /// the recovery grade wins outright (even when lower).
    pub fn effective_period_value(&self, student_id: &str, period: i64, label: &str) -> f64 {
        match self.snapshot.recovery_grade(student_id, period, label) {
            Some(r) => r,
            None => self.period_competency_average(student_id, period, label),
        }
    }

    pub fn final_competency_grade(&self, student_id: &str, label: &str) -> f64 {
        positive_average(
            AGGREGATION_PERIODS
                .iter()
                .map(|p| self.effective_period_value(student_id, *p, label)),
        )
    }

    pub fn final_competency_grades(&self, student_id: &str) -> CompetencyMap {
        self.snapshot
            .competency_labels
            .iter()
            .map(|l| (l.clone(), self.final_competency_grade(student_id, l)))
            .collect()
    }

    pub fn final_course_grade(&self, student_id: &str) -> f64 {
        positive_average(self.final_competency_grades(student_id).into_values())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(id: &str, period: i64) -> UnitDef {
        UnitDef {
            id: id.to_string(),
            course_id: "course-1".to_string(),
            period,
            name: format!("Unit {}", id),
            sort_order: 0,
        }
    }

    fn criterion(id: &str, unit_id: &str, competency: Option<&str>) -> CriterionDef {
        CriterionDef {
            id: id.to_string(),
            unit_id: unit_id.to_string(),
            idx: 0,
            description: id.to_string(),
            max_value: 10.0,
            competency: competency.map(|s| s.to_string()),
        }
    }

    fn snapshot(level: Level) -> CourseSnapshot {
        CourseSnapshot {
            course_id: "course-1".to_string(),
            competency_labels: level.competency_labels(),
            ..Default::default()
        }
    }

    fn grade(s: &mut CourseSnapshot, student: &str, unit: &str, criterion: &str, v: f64) {
        s.grades.insert(
            (student.to_string(), unit.to_string(), criterion.to_string()),
            v,
        );
    }

    fn recovery(s: &mut CourseSnapshot, student: &str, period: i64, label: &str, v: f64) {
        s.recovery_grades
            .insert((student.to_string(), period, label.to_string()), v);
    }

    // One period-1 unit with two C1 criteria graded 8 and 6.
    fn scenario_a() -> CourseSnapshot {
        let mut s = snapshot(Level::Secondary);
        s.units.push(unit("u1", 1));
        s.criteria.push(criterion("k1", "u1", Some("C1")));
        s.criteria.push(criterion("k2", "u1", Some("C1")));
        grade(&mut s, "st1", "u1", "k1", 8.0);
        grade(&mut s, "st1", "u1", "k2", 6.0);
        s
    }

    fn map(pairs: &[(&str, f64)]) -> CompetencyMap {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn level_label_sets() {
        assert_eq!(Level::Primary.competency_labels(), vec!["C1", "C2", "C3"]);
        assert_eq!(
            Level::Secondary.competency_labels(),
            vec!["C1", "C2", "C3", "C4"]
        );
        assert_eq!(Level::from_db(" PRIMARY "), Level::Primary);
        assert_eq!(Level::from_db("secundaria"), Level::Secondary);
    }

    #[test]
    fn aggregation_mode_parse() {
        assert_eq!(AggregationMode::parse("Sum"), Some(AggregationMode::Sum));
        assert_eq!(
            AggregationMode::parse("average"),
            Some(AggregationMode::Average)
        );
        assert_eq!(AggregationMode::parse("median"), None);
    }

    #[test]
    fn scenario_a_unit_and_period() {
        let s = scenario_a();
        let e = RollupEngine::new(&s, AggregationMode::Average);
        assert_eq!(
            e.unit_competency_subtotals("st1", "u1"),
            map(&[("C1", 7.0), ("C2", 0.0), ("C3", 0.0), ("C4", 0.0)])
        );
        assert_eq!(
            e.period_competency_averages("st1", 1),
            map(&[("C1", 7.0), ("C2", 0.0), ("C3", 0.0), ("C4", 0.0)])
        );
        assert_eq!(e.final_competency_grade("st1", "C1"), 7.0);
        assert_eq!(e.final_course_grade("st1"), 7.0);
    }

    #[test]
    fn scenario_b_recovery_replaces_period_value() {
        let mut s = scenario_a();
        recovery(&mut s, "st1", 1, "C1", 9.0);
        let e = RollupEngine::new(&s, AggregationMode::Average);
        assert_eq!(e.final_competency_grade("st1", "C1"), 9.0);
        // The period average itself stays the computed value.
        assert_eq!(e.period_competency_averages("st1", 1)["C1"], 7.0);
    }

    #[test]
    fn recovery_lower_than_computed_still_wins() {
        let mut s = scenario_a();
        recovery(&mut s, "st1", 1, "C1", 3.0);
        let e = RollupEngine::new(&s, AggregationMode::Average);
        assert_eq!(e.final_competency_grade("st1", "C1"), 3.0);
    }

    #[test]
    fn recovery_fills_a_period_without_grades() {
        let mut s = scenario_a();
        recovery(&mut s, "st1", 2, "C1", 5.0);
        let e = RollupEngine::new(&s, AggregationMode::Average);
        assert_eq!(e.final_competency_grade("st1", "C1"), 6.0);
    }

    #[test]
    fn scenario_c_no_grades_is_zero_everywhere() {
        let mut s = scenario_a();
        s.grades.clear();
        for mode in [AggregationMode::Average, AggregationMode::Sum] {
            let e = RollupEngine::new(&s, mode);
            assert_eq!(e.unit_total("st1", "u1"), 0.0);
            assert!(e.unit_competency_subtotals("st1", "u1").values().all(|v| *v == 0.0));
            for p in AGGREGATION_PERIODS {
                assert!(e
                    .period_competency_averages("st1", p)
                    .values()
                    .all(|v| *v == 0.0 && !v.is_nan()));
            }
            assert_eq!(e.final_competency_grade("st1", "C1"), 0.0);
            assert_eq!(e.final_course_grade("st1"), 0.0);
        }
    }

    #[test]
    fn scenario_d_zero_subtotal_unit_is_excluded() {
        let mut s = snapshot(Level::Secondary);
        s.units.push(unit("u1", 1));
        s.units.push(unit("u2", 1));
        s.criteria.push(criterion("k1", "u1", Some("C1")));
        s.criteria.push(criterion("k2", "u2", Some("C1")));
        grade(&mut s, "st1", "u1", "k1", 10.0);
        let e = RollupEngine::new(&s, AggregationMode::Average);
        assert_eq!(e.period_competency_averages("st1", 1)["C1"], 10.0);
    }

    #[test]
    fn unit_total_modes() {
        let mut s = scenario_a();
        s.criteria.push(criterion("k3", "u1", Some("C2")));
        s.criteria.push(criterion("k4", "u1", None));
        grade(&mut s, "st1", "u1", "k3", 5.0);

        let avg = RollupEngine::new(&s, AggregationMode::Average);
        assert!((avg.unit_total("st1", "u1") - 19.0 / 3.0).abs() < 1e-9);

        let sum = RollupEngine::new(&s, AggregationMode::Sum);
        assert_eq!(sum.unit_total("st1", "u1"), 19.0);
        assert_eq!(
            sum.unit_competency_subtotals("st1", "u1"),
            map(&[("C1", 14.0), ("C2", 5.0), ("C3", 0.0), ("C4", 0.0)])
        );
    }

    #[test]
    fn recorded_zero_counts_in_unit_average() {
        let mut s = scenario_a();
        s.criteria.push(criterion("k3", "u1", Some("C1")));
        grade(&mut s, "st1", "u1", "k3", 0.0);
        let e = RollupEngine::new(&s, AggregationMode::Average);
        assert!((e.unit_total("st1", "u1") - 14.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn zero_periods_do_not_grow_the_denominator() {
        let mut s = snapshot(Level::Secondary);
        s.units.push(unit("u1", 1));
        s.units.push(unit("u2", 2));
        s.units.push(unit("u3", 3));
        s.criteria.push(criterion("k1", "u1", Some("C2")));
        s.criteria.push(criterion("k2", "u2", Some("C2")));
        s.criteria.push(criterion("k3", "u3", Some("C2")));
        grade(&mut s, "st1", "u1", "k1", 6.0);
        grade(&mut s, "st1", "u3", "k3", 8.0);
        let e = RollupEngine::new(&s, AggregationMode::Average);
        assert_eq!(e.final_competency_grade("st1", "C2"), 7.0);

        // A zero recovery grade behaves like a zero period: excluded.
        recovery(&mut s, "st1", 3, "C2", 0.0);
        let e = RollupEngine::new(&s, AggregationMode::Average);
        assert_eq!(e.final_competency_grade("st1", "C2"), 6.0);
    }

    #[test]
    fn final_course_grade_skips_empty_competencies() {
        let mut s = scenario_a();
        s.criteria.push(criterion("k3", "u1", Some("C3")));
        grade(&mut s, "st1", "u1", "k3", 9.0);
        let e = RollupEngine::new(&s, AggregationMode::Average);
        assert_eq!(e.final_course_grade("st1"), 8.0);
    }

    #[test]
    fn label_outside_course_set_is_never_counted_per_competency() {
        let mut s = snapshot(Level::Primary);
        s.units.push(unit("u1", 1));
        s.criteria.push(criterion("k1", "u1", Some("C4")));
        s.criteria.push(criterion("k2", "u1", Some("C1")));
        grade(&mut s, "st1", "u1", "k1", 10.0);
        grade(&mut s, "st1", "u1", "k2", 4.0);
        let e = RollupEngine::new(&s, AggregationMode::Average);
        let subtotals = e.unit_competency_subtotals("st1", "u1");
        assert_eq!(subtotals, map(&[("C1", 4.0), ("C2", 0.0), ("C3", 0.0)]));
        // Unit totals still see every graded criterion.
        assert_eq!(e.unit_total("st1", "u1"), 7.0);
        assert_eq!(e.final_course_grade("st1"), 4.0);
    }

    #[test]
    fn other_students_do_not_leak() {
        let s = scenario_a();
        let e = RollupEngine::new(&s, AggregationMode::Average);
        assert_eq!(e.final_course_grade("st2"), 0.0);
        assert_eq!(e.unit_total("st1", "missing-unit"), 0.0);
    }

    #[test]
    fn repeated_calls_are_identical() {
        let mut s = scenario_a();
        recovery(&mut s, "st1", 2, "C3", 4.5);
        let e = RollupEngine::new(&s, AggregationMode::Average);
        assert_eq!(e.final_course_grade("st1"), e.final_course_grade("st1"));
        assert_eq!(
            e.period_competency_averages("st1", 1),
            e.period_competency_averages("st1", 1)
        );
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "not an aggregation period")]
    fn non_aggregation_period_fails_fast_in_debug() {
        let s = scenario_a();
        let e = RollupEngine::new(&s, AggregationMode::Average);
        let _ = e.period_competency_averages("st1", 4);
    }

    #[test]
    fn round_for_display_rounds_halves_up() {
        assert_eq!(round_for_display(0.0), 0.0);
        assert_eq!(round_for_display(6.49), 6.0);
        assert_eq!(round_for_display(6.5), 7.0);
        assert_eq!(round_for_display(19.0 / 3.0), 6.0);
    }
}
